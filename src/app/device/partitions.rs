use std::time::Duration;

use tracing::{info, warn};

use crate::app::models::PartitionCatalog;
use crate::app::tools::commands::fastboot_getvar_all;
use crate::app::tools::locator::Toolchain;
use crate::app::tools::parse::parse_partition_catalog;
use crate::app::tools::runner::CommandRunner;

/// Builds a fresh catalog from `getvar all`. Any failure yields an empty catalog.
pub fn fetch_partitions(
    runner: &dyn CommandRunner,
    tools: &Toolchain,
    timeout: Duration,
    serial: &str,
    trace_id: &str,
) -> PartitionCatalog {
    let command = fastboot_getvar_all(tools, serial);
    let output = match runner.run(&command, timeout, trace_id) {
        Ok(output) => output,
        Err(err) => {
            warn!(trace_id = %trace_id, serial = %serial, error = %err, "fetch_partitions failed");
            return PartitionCatalog::default();
        }
    };

    let catalog = parse_partition_catalog(&output.merged());
    info!(
        trace_id = %trace_id,
        serial = %serial,
        standard = catalog.standard.len(),
        critical = catalog.critical.len(),
        "fetch_partitions"
    );
    catalog
}
