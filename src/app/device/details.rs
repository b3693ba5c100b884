use std::time::Duration;

use tracing::{info, warn};

use crate::app::config::TimeoutSettings;
use crate::app::models::{ConnectionMode, DeviceInfo, DeviceSelection, LiveMetrics};
use crate::app::tools::command_line::CommandLine;
use crate::app::tools::commands::{
    adb_battery, adb_getprop, adb_id, adb_storage, fastboot_getvar_all,
};
use crate::app::tools::locator::Toolchain;
use crate::app::tools::parse::{
    parse_battery_metrics, parse_bootloader_vars, parse_getprop_value, parse_root_state,
    parse_storage_usage, parse_unlock_state,
};
use crate::app::tools::runner::{CommandOutput, CommandRunner};

pub const MODEL_PROP: &str = "ro.product.model";
pub const BUILD_PROP: &str = "ro.build.display.id";

/// Runs one query; any failure is logged and reported as `None` so the caller keeps its
/// placeholder.
fn query(
    runner: &dyn CommandRunner,
    command: &CommandLine,
    timeout: Duration,
    trace_id: &str,
) -> Option<CommandOutput> {
    match runner.run(command, timeout, trace_id) {
        Ok(output) => Some(output),
        Err(err) => {
            warn!(
                trace_id = %trace_id,
                command = %command.display(),
                error = %err,
                "device query failed"
            );
            None
        }
    }
}

fn query_stdout(
    runner: &dyn CommandRunner,
    command: &CommandLine,
    timeout: Duration,
    trace_id: &str,
) -> Option<String> {
    query(runner, command, timeout, trace_id)
        .filter(CommandOutput::success)
        .map(|output| output.stdout)
}

pub fn fetch_device_info(
    runner: &dyn CommandRunner,
    tools: &Toolchain,
    timeouts: &TimeoutSettings,
    selection: &DeviceSelection,
    trace_id: &str,
) -> DeviceInfo {
    let serial = selection.serial.as_str();
    let mut info = DeviceInfo::placeholder(serial, selection.mode);

    match selection.mode {
        ConnectionMode::Bridge => {
            let timeout = timeouts.query();
            let prop = |key: &str| {
                query_stdout(runner, &adb_getprop(tools, serial, key), timeout, trace_id)
                    .and_then(|stdout| parse_getprop_value(&stdout))
            };
            if let Some(model) = prop(MODEL_PROP) {
                info.model = model;
            }
            if let Some(build) = prop(BUILD_PROP) {
                info.build = build;
            }
            if let Some(id_output) = query_stdout(runner, &adb_id(tools, serial), timeout, trace_id) {
                info.root = parse_root_state(&id_output);
            }
        }
        ConnectionMode::Bootloader => {
            // getvar writes to stderr and may exit nonzero after a partial dump, so the
            // merged text is parsed regardless of the exit code.
            if let Some(output) = query(
                runner,
                &fastboot_getvar_all(tools, serial),
                timeouts.bootloader_info(),
                trace_id,
            ) {
                let vars = parse_bootloader_vars(&output.merged());
                if let Some(product) = vars.product {
                    info.product = product;
                }
                if let Some(unlocked) = vars.unlocked {
                    info.unlocked = parse_unlock_state(&unlocked);
                }
            }
        }
        ConnectionMode::Sideload => {}
    }

    info!(
        trace_id = %trace_id,
        serial = %serial,
        mode = %selection.mode,
        "fetch_device_info"
    );
    info
}

/// Battery, temperature and data-partition usage of a bridge-mode device.
pub fn fetch_metrics(
    runner: &dyn CommandRunner,
    tools: &Toolchain,
    timeout: Duration,
    serial: &str,
    trace_id: &str,
) -> LiveMetrics {
    let mut metrics = LiveMetrics::default();
    if let Some(battery) = query_stdout(runner, &adb_battery(tools, serial), timeout, trace_id) {
        parse_battery_metrics(&battery, &mut metrics);
    }
    if let Some(usage) = query_stdout(runner, &adb_storage(tools, serial), timeout, trace_id)
        .and_then(|stdout| parse_storage_usage(&stdout))
    {
        metrics.storage = usage;
    }
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::device::fake::ScriptedRunner;
    use crate::app::models::{RootState, UnlockState, NOT_AVAILABLE};

    fn selection(serial: &str, mode: ConnectionMode) -> DeviceSelection {
        DeviceSelection {
            serial: serial.to_string(),
            mode,
        }
    }

    #[test]
    fn bridge_info_reads_props_and_root() {
        let runner = ScriptedRunner::new()
            .stdout("adb -s A shell getprop ro.product.model", "Pixel 7\r\n")
            .stdout("adb -s A shell getprop ro.build.display.id", "TQ3A.230901.001\n")
            .stdout("adb -s A shell id", "uid=0(root) gid=0(root)\n");
        let info = fetch_device_info(
            &runner,
            &Toolchain::default(),
            &TimeoutSettings::default(),
            &selection("A", ConnectionMode::Bridge),
            "t",
        );
        assert_eq!(info.model, "Pixel 7");
        assert_eq!(info.build, "TQ3A.230901.001");
        assert_eq!(info.root, RootState::Yes);
        assert_eq!(info.product, NOT_AVAILABLE);
        assert_eq!(info.unlocked, UnlockState::NotAvailable);
    }

    #[test]
    fn bridge_info_degrades_field_by_field() {
        let runner = ScriptedRunner::new()
            .stdout("adb -s A shell getprop ro.product.model", "SM-G991B\n")
            .timeout("adb -s A shell getprop ro.build.display.id")
            .stdout("adb -s A shell id", "uid=2000(shell) gid=2000(shell)\n");
        let info = fetch_device_info(
            &runner,
            &Toolchain::default(),
            &TimeoutSettings::default(),
            &selection("A", ConnectionMode::Bridge),
            "t",
        );
        assert_eq!(info.model, "SM-G991B");
        assert_eq!(info.build, NOT_AVAILABLE);
        assert_eq!(info.root, RootState::No);
    }

    #[test]
    fn bootloader_info_parses_merged_dump_with_short_timeout() {
        let runner = ScriptedRunner::new().stderr(
            "fastboot -s F getvar all",
            "(bootloader) product:kona\n(bootloader) unlocked:no\nall: Done!!\n",
        );
        let info = fetch_device_info(
            &runner,
            &Toolchain::default(),
            &TimeoutSettings::default(),
            &selection("F", ConnectionMode::Bootloader),
            "t",
        );
        assert_eq!(info.product, "kona");
        assert_eq!(info.unlocked, UnlockState::Locked);
        assert_eq!(info.model, NOT_AVAILABLE);
        assert_eq!(info.root, RootState::NotAvailable);
        assert_eq!(
            runner.timeout_for("fastboot -s F getvar all"),
            Some(Duration::from_secs(3))
        );
    }

    #[test]
    fn bootloader_timeout_keeps_defaults() {
        let runner = ScriptedRunner::new().timeout("fastboot -s F getvar all");
        let info = fetch_device_info(
            &runner,
            &Toolchain::default(),
            &TimeoutSettings::default(),
            &selection("F", ConnectionMode::Bootloader),
            "t",
        );
        assert_eq!(info.product, "N/A");
        assert_eq!(info.unlocked.to_string(), "Unknown");
    }

    #[test]
    fn sideload_issues_no_queries() {
        let runner = ScriptedRunner::new();
        let info = fetch_device_info(
            &runner,
            &Toolchain::default(),
            &TimeoutSettings::default(),
            &selection("S", ConnectionMode::Sideload),
            "t",
        );
        assert!(runner.called().is_empty());
        assert_eq!(info, DeviceInfo::placeholder("S", ConnectionMode::Sideload));
    }

    #[test]
    fn metrics_scenario() {
        let runner = ScriptedRunner::new()
            .stdout(
                "adb -s A shell dumpsys battery",
                "Current Battery Service state:\n  level: 87\n  temperature: 312\n",
            )
            .stdout(
                "adb -s A shell df /data",
                "Filesystem 1K-blocks Used Available Use% Mounted on\n/dev/block/dm-48 229585200 96414816 133039312 43% /data\n",
            );
        let metrics = fetch_metrics(&runner, &Toolchain::default(), Duration::from_secs(1), "A", "t");
        assert_eq!(metrics.battery, "87%");
        assert_eq!(metrics.temperature, "31.2°C");
        assert_eq!(metrics.storage, "43% used");
    }

    #[test]
    fn metrics_failures_keep_placeholders() {
        let runner = ScriptedRunner::new().spawn_failure("adb -s A shell dumpsys battery");
        let metrics = fetch_metrics(&runner, &Toolchain::default(), Duration::from_secs(1), "A", "t");
        assert_eq!(metrics, LiveMetrics::default());
    }
}
