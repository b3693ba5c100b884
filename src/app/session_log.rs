use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Local;
use tracing::{info, warn};

use crate::app::config::PathSettings;
use crate::app::error::AppError;
use crate::app::tools::commands::adb_logcat;
use crate::app::tools::locator::Toolchain;
use crate::app::tools::process::{ExecutionHandle, ProcessEvent, StreamingExecutor};

const DEFAULT_LOG_DIR: &str = "logs";

fn timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

pub fn resolve_log_dir(paths: &PathSettings) -> PathBuf {
    let configured = paths.log_dir.trim();
    if configured.is_empty() {
        PathBuf::from(DEFAULT_LOG_DIR)
    } else {
        PathBuf::from(configured)
    }
}

fn ensure_dir(dir: &Path, trace_id: &str) -> Result<(), AppError> {
    fs::create_dir_all(dir)
        .map_err(|err| AppError::system(format!("Failed to create log dir: {err}"), trace_id))
}

/// Writes the console transcript, one entry per line.
pub fn save_session_log(dir: &Path, lines: &[String], trace_id: &str) -> Result<PathBuf, AppError> {
    ensure_dir(dir, trace_id)?;
    let path = dir.join(format!("session_{}.txt", timestamp()));
    let mut body = String::new();
    for line in lines {
        body.push_str(line);
        body.push('\n');
    }
    fs::write(&path, body)
        .map_err(|err| AppError::system(format!("Failed to write session log: {err}"), trace_id))?;
    info!(trace_id = %trace_id, path = %path.display(), lines = lines.len(), "session log saved");
    Ok(path)
}

pub fn boot_log_path(dir: &Path) -> PathBuf {
    dir.join(format!("bootlog_{}.txt", timestamp()))
}

pub struct BootCapture {
    pub path: PathBuf,
    handle: ExecutionHandle,
}

impl BootCapture {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Ends the logcat stream; the file holds every line received so far.
    pub fn stop(self) -> PathBuf {
        self.handle.cancel();
        self.handle.join();
        self.path
    }
}

/// Streams `logcat -v time` of `serial` into a fresh bootlog file until stopped.
pub fn start_boot_capture(
    executor: &dyn StreamingExecutor,
    tools: &Toolchain,
    serial: &str,
    dir: &Path,
    trace_id: &str,
) -> Result<BootCapture, AppError> {
    if serial.trim().is_empty() {
        return Err(AppError::validation("serial is required", trace_id));
    }
    ensure_dir(dir, trace_id)?;
    let path = boot_log_path(dir);
    let file = File::create(&path)
        .map_err(|err| AppError::system(format!("Failed to create boot log: {err}"), trace_id))?;
    let writer = Arc::new(Mutex::new(BufWriter::new(file)));

    let trace_thread = trace_id.to_string();
    let handle = executor.execute(
        adb_logcat(tools, serial.trim()),
        Arc::new(move |event| {
            let Ok(mut writer) = writer.lock() else {
                return;
            };
            let result = match event {
                ProcessEvent::Output(line) => writeln!(writer, "{line}"),
                ProcessEvent::Exit(_) => writer.flush(),
            };
            if let Err(err) = result {
                warn!(trace_id = %trace_thread, error = %err, "boot log write failed");
            }
        }),
        trace_id,
    );

    info!(trace_id = %trace_id, serial = %serial, path = %path.display(), "boot capture started");
    Ok(BootCapture { path, handle })
}
