use std::time::Duration;

use tracing::{info, warn};

use crate::app::models::DeviceRecord;
use crate::app::tools::command_line::CommandLine;
use crate::app::tools::commands::{adb_devices, fastboot_devices};
use crate::app::tools::locator::Toolchain;
use crate::app::tools::parse::{parse_bootloader_devices, parse_bridge_devices};
use crate::app::tools::runner::CommandRunner;

fn list_output(
    runner: &dyn CommandRunner,
    command: &CommandLine,
    timeout: Duration,
    trace_id: &str,
) -> Option<String> {
    match runner.run(command, timeout, trace_id) {
        Ok(output) if output.success() => Some(output.stdout),
        Ok(output) => {
            warn!(
                trace_id = %trace_id,
                command = %command.display(),
                exit_code = ?output.exit_code,
                stderr = %output.stderr.trim(),
                "device list command failed"
            );
            None
        }
        Err(err) => {
            warn!(
                trace_id = %trace_id,
                command = %command.display(),
                error = %err,
                "device list command could not run"
            );
            None
        }
    }
}

/// One fresh snapshot of attached devices: bridge and sideload records first, then
/// bootloader records, each in the tool's own order. A failing tool contributes nothing.
pub fn scan_devices(
    runner: &dyn CommandRunner,
    tools: &Toolchain,
    timeout: Duration,
    trace_id: &str,
) -> Vec<DeviceRecord> {
    let mut devices = list_output(runner, &adb_devices(tools), timeout, trace_id)
        .map(|stdout| parse_bridge_devices(&stdout))
        .unwrap_or_default();
    let bootloader = list_output(runner, &fastboot_devices(tools), timeout, trace_id)
        .map(|stdout| parse_bootloader_devices(&stdout))
        .unwrap_or_default();
    devices.extend(bootloader);

    info!(trace_id = %trace_id, count = devices.len(), "scan_devices");
    devices
}
