use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::app::error::AppError;
use crate::app::tools::command_line::CommandLine;
use crate::app::tools::runner::{CommandOutput, CommandRunner};

enum Reply {
    Output(CommandOutput),
    Timeout,
    SpawnFailure,
}

/// Answers commands by their displayed line, e.g. `adb -s A shell id`.
#[derive(Default)]
pub struct ScriptedRunner {
    replies: HashMap<String, Reply>,
    pub calls: Mutex<Vec<(String, Duration)>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stdout(mut self, line: &str, stdout: &str) -> Self {
        self.replies.insert(
            line.to_string(),
            Reply::Output(CommandOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                exit_code: Some(0),
            }),
        );
        self
    }

    pub fn stderr(mut self, line: &str, stderr: &str) -> Self {
        self.replies.insert(
            line.to_string(),
            Reply::Output(CommandOutput {
                stdout: String::new(),
                stderr: stderr.to_string(),
                exit_code: Some(0),
            }),
        );
        self
    }

    pub fn exit(mut self, line: &str, stdout: &str, code: i32) -> Self {
        self.replies.insert(
            line.to_string(),
            Reply::Output(CommandOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                exit_code: Some(code),
            }),
        );
        self
    }

    pub fn timeout(mut self, line: &str) -> Self {
        self.replies.insert(line.to_string(), Reply::Timeout);
        self
    }

    pub fn spawn_failure(mut self, line: &str) -> Self {
        self.replies.insert(line.to_string(), Reply::SpawnFailure);
        self
    }

    pub fn called(&self) -> Vec<String> {
        self.calls
            .lock()
            .expect("calls")
            .iter()
            .map(|(line, _)| line.clone())
            .collect()
    }

    pub fn timeout_for(&self, line: &str) -> Option<Duration> {
        self.calls
            .lock()
            .expect("calls")
            .iter()
            .find(|(called, _)| called == line)
            .map(|(_, timeout)| *timeout)
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(
        &self,
        command: &CommandLine,
        timeout: Duration,
        trace_id: &str,
    ) -> Result<CommandOutput, AppError> {
        let line = command.display();
        self.calls
            .lock()
            .expect("calls")
            .push((line.clone(), timeout));
        match self.replies.get(&line) {
            Some(Reply::Output(output)) => Ok(output.clone()),
            Some(Reply::Timeout) => Err(AppError::timeout("Command timed out", trace_id)),
            Some(Reply::SpawnFailure) | None => Err(AppError::system(
                format!("Failed to spawn command: {line}"),
                trace_id,
            )),
        }
    }
}
