use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::app::error::AppError;

/// A fully-resolved external command. Arguments are kept apart so image paths with spaces
/// never go through a shell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    /// Splits a console line typed by the user (`fastboot reboot bootloader`).
    pub fn parse(raw: &str, trace_id: &str) -> Result<Self, AppError> {
        let words = shell_words::split(raw.trim())
            .map_err(|err| AppError::validation(format!("Invalid command line: {err}"), trace_id))?;
        let mut words = words.into_iter();
        let program = words
            .next()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| AppError::validation("command is required", trace_id))?;
        Ok(Self {
            program,
            args: words.collect(),
        })
    }

    /// Basename of the program without extension, lowercased (`adb`, `fastboot`).
    pub fn tool_name(&self) -> String {
        Path::new(&self.program)
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }

    pub fn is_scoped(&self) -> bool {
        self.args.first().map(String::as_str) == Some("-s")
    }

    /// Targets a device by inserting `-s <serial>` right after an adb/fastboot program.
    /// Other programs and already-scoped commands are returned untouched.
    pub fn scoped_to(mut self, serial: &str) -> Self {
        let serial = serial.trim();
        if serial.is_empty() || self.is_scoped() {
            return self;
        }
        if matches!(self.tool_name().as_str(), "adb" | "fastboot") {
            self.args.insert(0, serial.to_string());
            self.args.insert(0, "-s".to_string());
        }
        self
    }

    /// Arguments after an optional `-s <serial>` prefix.
    pub fn subcommand_args(&self) -> &[String] {
        if self.is_scoped() && self.args.len() >= 2 {
            &self.args[2..]
        } else {
            &self.args
        }
    }

    /// Shell-quoted rendering for console echo.
    pub fn display(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(shell_words::quote(&self.program).into_owned());
        parts.extend(self.args.iter().map(|arg| shell_words::quote(arg).into_owned()));
        parts.join(" ")
    }
}
