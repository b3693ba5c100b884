use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, warn};

use crate::app::config::AppConfig;
use crate::app::device::details::{fetch_device_info, fetch_metrics};
use crate::app::device::monitor::{
    start_metrics_monitor, MetricsEmitter, MetricsEvent, MetricsMonitorConfig, MetricsMonitorHandle,
};
use crate::app::device::partitions::fetch_partitions;
use crate::app::device::scanner::scan_devices;
use crate::app::error::AppError;
use crate::app::flash::engine::BatchFlashEngine;
use crate::app::flash::queue::FlashQueue;
use crate::app::models::{
    ConnectionMode, DeviceInfo, DeviceRecord, DeviceSelection, LiveMetrics, PartitionCatalog, ToolInfo,
};
use crate::app::session_log::{resolve_log_dir, start_boot_capture, BootCapture};
use crate::app::tools::command_line::CommandLine;
use crate::app::tools::commands::is_high_risk;
use crate::app::tools::locator::{check_tools, Toolchain};
use crate::app::tools::process::{ExecutionHandle, ProcessListener, ProcessRunner, StreamingExecutor};
use crate::app::tools::runner::{CommandRunner, SystemRunner};

/// Long-lived handles shared by every front-end call. The selected device is not stored
/// here; callers pass it in.
pub struct AppState {
    pub config: AppConfig,
    pub tools: Toolchain,
    pub flash: BatchFlashEngine,
    runner: Arc<dyn CommandRunner>,
    executor: Arc<dyn StreamingExecutor>,
    metrics_monitor: Mutex<Option<MetricsMonitorHandle>>,
    boot_captures: Mutex<HashMap<String, BootCapture>>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self::with_backends(config, Arc::new(SystemRunner), Arc::new(ProcessRunner))
    }

    pub fn with_backends(
        config: AppConfig,
        runner: Arc<dyn CommandRunner>,
        executor: Arc<dyn StreamingExecutor>,
    ) -> Self {
        let tools = Toolchain::from_settings(&config.tools);
        let flash = BatchFlashEngine::new(
            Arc::new(FlashQueue::new()),
            Arc::clone(&executor),
            tools.clone(),
            Duration::from_secs(config.monitor.flash_heartbeat_secs),
        );
        Self {
            config,
            tools,
            flash,
            runner,
            executor,
            metrics_monitor: Mutex::new(None),
            boot_captures: Mutex::new(HashMap::new()),
        }
    }

    pub fn flash_queue(&self) -> &Arc<FlashQueue> {
        self.flash.queue()
    }

    pub fn check_tools(&self, trace_id: &str) -> Vec<ToolInfo> {
        check_tools(
            self.runner.as_ref(),
            &self.tools,
            self.config.timeouts.version(),
            trace_id,
        )
    }

    pub fn scan_devices(&self, trace_id: &str) -> Vec<DeviceRecord> {
        scan_devices(
            self.runner.as_ref(),
            &self.tools,
            self.config.timeouts.list(),
            trace_id,
        )
    }

    pub fn device_info(&self, selection: &DeviceSelection, trace_id: &str) -> DeviceInfo {
        fetch_device_info(
            self.runner.as_ref(),
            &self.tools,
            &self.config.timeouts,
            selection,
            trace_id,
        )
    }

    pub fn metrics(&self, serial: &str, trace_id: &str) -> LiveMetrics {
        fetch_metrics(
            self.runner.as_ref(),
            &self.tools,
            self.config.timeouts.query(),
            serial,
            trace_id,
        )
    }

    pub fn partitions(&self, serial: &str, trace_id: &str) -> PartitionCatalog {
        fetch_partitions(
            self.runner.as_ref(),
            &self.tools,
            self.config.timeouts.partitions(),
            serial,
            trace_id,
        )
    }

    /// Streams a console command, scoped to `serial` when given. High-risk commands are
    /// refused unless the caller confirmed them.
    pub fn execute(
        &self,
        command: CommandLine,
        serial: Option<&str>,
        confirmed: bool,
        listener: ProcessListener,
        trace_id: &str,
    ) -> Result<ExecutionHandle, AppError> {
        let command = match serial {
            Some(serial) => command.scoped_to(serial),
            None => command,
        };
        if is_high_risk(&command) && !confirmed {
            return Err(AppError::confirmation_required(
                format!("'{}' can modify or wipe the device", command.display()),
                trace_id,
            ));
        }
        Ok(self.executor.execute(command, listener, trace_id))
    }

    /// Follows a selection change: bridge devices get live metrics, anything else clears
    /// them.
    pub fn select_device(
        &self,
        selection: Option<&DeviceSelection>,
        emitter: MetricsEmitter,
        trace_id: &str,
    ) {
        let mut guard = match self.metrics_monitor.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let (Some(selection), Some(current)) = (selection, guard.as_ref()) {
            if selection.mode == ConnectionMode::Bridge && current.serial() == selection.serial {
                return;
            }
        }

        let previous = guard.take().map(|handle| {
            let serial = handle.serial().to_string();
            handle.stop();
            serial
        });

        match selection {
            Some(selection) if selection.mode == ConnectionMode::Bridge => {
                let config = MetricsMonitorConfig {
                    tools: self.tools.clone(),
                    query_timeout: self.config.timeouts.query(),
                    interval: Duration::from_secs(self.config.monitor.metrics_interval_secs),
                };
                *guard = Some(start_metrics_monitor(
                    Arc::clone(&self.runner),
                    config,
                    selection.serial.clone(),
                    emitter,
                    trace_id.to_string(),
                ));
            }
            _ => {
                info!(trace_id = %trace_id, previous = ?previous, "metrics cleared");
                (emitter)(MetricsEvent::Cleared { serial: previous });
            }
        }
    }

    pub fn monitored_serial(&self) -> Option<String> {
        self.metrics_monitor
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|handle| handle.serial().to_string()))
    }

    pub fn start_boot_capture(&self, serial: &str, trace_id: &str) -> Result<PathBuf, AppError> {
        let mut guard = self
            .boot_captures
            .lock()
            .map_err(|_| AppError::system("Boot capture registry lock poisoned", trace_id))?;
        let key = serial.trim().to_string();
        // A capture whose logcat already exited no longer blocks a new one.
        if guard.get(&key).is_some_and(BootCapture::is_finished) {
            guard.remove(&key);
        }
        if guard.contains_key(&key) {
            return Err(AppError::busy("Boot capture already running", trace_id));
        }
        let dir = resolve_log_dir(&self.config.paths);
        let capture = start_boot_capture(self.executor.as_ref(), &self.tools, serial, &dir, trace_id)?;
        let path = capture.path.clone();
        guard.insert(key, capture);
        Ok(path)
    }

    pub fn stop_boot_capture(&self, serial: &str, trace_id: &str) -> Result<PathBuf, AppError> {
        let capture = self
            .boot_captures
            .lock()
            .map_err(|_| AppError::system("Boot capture registry lock poisoned", trace_id))?
            .remove(serial.trim())
            .ok_or_else(|| AppError::validation("No boot capture running for device", trace_id))?;
        Ok(capture.stop())
    }

    /// Stops every background worker this state owns.
    pub fn shutdown(&self, trace_id: &str) {
        if let Ok(mut guard) = self.metrics_monitor.lock() {
            if let Some(handle) = guard.take() {
                handle.stop();
            }
        }
        match self.boot_captures.lock() {
            Ok(mut guard) => {
                for (_, capture) in guard.drain() {
                    capture.stop();
                }
            }
            Err(_) => warn!(trace_id = %trace_id, "boot capture registry lock poisoned"),
        }
    }
}
