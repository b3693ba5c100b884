use chrono::Local;
use serde::Serialize;

use crate::app::tools::command_line::CommandLine;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Command,
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    /// Short tag for plain-text consoles.
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Command => "CMD",
            Severity::Info => "INFO",
            Severity::Success => "OK",
            Severity::Warning => "WARN",
            Severity::Error => "ERR",
        }
    }
}

/// Severity a console renderer should color a tool output line with.
pub fn classify_line(line: &str) -> Severity {
    let trimmed = line.trim();
    if trimmed.starts_with('>') {
        return Severity::Command;
    }
    let lower = trimmed.to_lowercase();
    if lower.contains("failed") || lower.contains("error") || lower.starts_with("failure") {
        return Severity::Error;
    }
    if lower.contains("waiting for") || lower.starts_with("warning") {
        return Severity::Warning;
    }
    if lower.contains("okay") || lower.starts_with("finished") || lower.starts_with("success") {
        return Severity::Success;
    }
    Severity::Info
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConsoleLine {
    pub timestamp: String,
    pub severity: Severity,
    pub text: String,
}

impl ConsoleLine {
    pub fn new(severity: Severity, text: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now().format("%H:%M:%S").to_string(),
            severity,
            text: text.into(),
        }
    }

    /// Echo of a submitted command, `> adb -s X reboot`.
    pub fn command(command: &CommandLine) -> Self {
        Self::new(Severity::Command, format!("> {}", command.display()))
    }

    pub fn output(line: impl Into<String>) -> Self {
        let text = line.into();
        Self::new(classify_line(&text), text)
    }

    /// Plain-text form used by saved session logs.
    pub fn render(&self) -> String {
        format!("[{}] {}", self.timestamp, self.text)
    }
}
