use std::path::Path;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::app::config::ToolSettings;
use crate::app::error::AppError;
use crate::app::models::ToolInfo;
use crate::app::tools::command_line::CommandLine;
use crate::app::tools::runner::CommandRunner;

pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|candidate| candidate.strip_suffix(quote))
        {
            return inner.trim().to_string();
        }
    }
    trimmed.to_string()
}

fn resolve_program(config_command_path: &str, default: &str) -> String {
    let normalized = normalize_command_path(config_command_path);
    if normalized.is_empty() {
        default.to_string()
    } else {
        normalized
    }
}

/// Programs used to reach devices: the bridge client and the bootloader client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub adb: String,
    pub fastboot: String,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            adb: "adb".to_string(),
            fastboot: "fastboot".to_string(),
        }
    }
}

impl Toolchain {
    pub fn from_settings(settings: &ToolSettings) -> Self {
        Self {
            adb: resolve_program(&settings.adb_path, "adb"),
            fastboot: resolve_program(&settings.fastboot_path, "fastboot"),
        }
    }
}

pub fn validate_program(program: &str, name: &str) -> Result<(), String> {
    if program.trim().is_empty() {
        return Err(format!("{name} command is empty"));
    }
    if program == name {
        return Ok(());
    }
    let path = Path::new(program);
    if path.is_dir() {
        return Err(format!("{name} path must point to an executable file"));
    }
    if !path.exists() {
        return Err(format!("{name} executable not found at the configured path"));
    }
    Ok(())
}

fn probe_tool(
    runner: &dyn CommandRunner,
    name: &str,
    program: &str,
    timeout: Duration,
    trace_id: &str,
) -> ToolInfo {
    let unavailable = |error: String| ToolInfo {
        name: name.to_string(),
        available: false,
        version_output: String::new(),
        command_path: program.to_string(),
        error: Some(error),
    };

    if let Err(err) = validate_program(program, name) {
        return unavailable(err);
    }

    let command = CommandLine::new(program).arg("--version");
    match runner.run(&command, timeout, trace_id) {
        Ok(output) if output.exit_code == Some(0) => {
            let version_output = output.merged().trim().to_string();
            info!(trace_id = %trace_id, tool = %name, "tool available");
            ToolInfo {
                name: name.to_string(),
                available: true,
                version_output,
                command_path: program.to_string(),
                error: None,
            }
        }
        Ok(output) => unavailable(format!(
            "{name} --version exited with {:?}: {}",
            output.exit_code,
            output.merged().trim()
        )),
        Err(err) => unavailable(err.error),
    }
}

/// Runs `<tool> --version` for both clients.
pub fn check_tools(
    runner: &dyn CommandRunner,
    tools: &Toolchain,
    timeout: Duration,
    trace_id: &str,
) -> Vec<ToolInfo> {
    let results = vec![
        probe_tool(runner, "adb", &tools.adb, timeout, trace_id),
        probe_tool(runner, "fastboot", &tools.fastboot, timeout, trace_id),
    ];
    for tool in results.iter().filter(|tool| !tool.available) {
        warn!(
            trace_id = %trace_id,
            tool = %tool.name,
            error = ?tool.error,
            "required tool missing"
        );
    }
    results
}

pub fn missing_tools(results: &[ToolInfo]) -> Vec<String> {
    results
        .iter()
        .filter(|tool| !tool.available)
        .map(|tool| tool.name.clone())
        .collect()
}

/// Startup gate. Fails with `ERR_DEPENDENCY` when no client is usable, otherwise returns the
/// names of the missing ones.
pub fn require_any_tool(results: &[ToolInfo], trace_id: &str) -> Result<Vec<String>, AppError> {
    let missing = missing_tools(results);
    if !missing.is_empty() && missing.len() == results.len() {
        return Err(AppError::dependency(
            format!("Required tools not found: {}", missing.join(", ")),
            trace_id,
        ));
    }
    for name in &missing {
        error!(trace_id = %trace_id, tool = %name, "tool not available");
    }
    Ok(missing)
}
