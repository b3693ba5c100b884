use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::app::tools::command_line::CommandLine;

/// Exit code reported when the process could not be launched or was killed by a signal.
pub const LAUNCH_FAILED_EXIT_CODE: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Output(String),
    /// Always the last event of an execution, delivered exactly once.
    Exit(i32),
}

pub type ProcessListener = Arc<dyn Fn(ProcessEvent) + Send + Sync>;

pub struct ExecutionHandle {
    pub execution_id: String,
    cancel_flag: Arc<AtomicBool>,
    child: Arc<Mutex<Option<Child>>>,
    join: Option<JoinHandle<()>>,
}

impl ExecutionHandle {
    /// A handle with no process behind it, for executors that complete on their own.
    pub fn detached(execution_id: impl Into<String>, join: Option<JoinHandle<()>>) -> Self {
        Self {
            execution_id: execution_id.into(),
            cancel_flag: Arc::new(AtomicBool::new(false)),
            child: Arc::new(Mutex::new(None)),
            join,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::Relaxed)
    }

    /// Kills the child. The execution still ends with its single `Exit` event.
    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::Relaxed);
        if let Ok(mut guard) = self.child.lock() {
            if let Some(child) = guard.as_mut() {
                let _ = child.kill();
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map(JoinHandle::is_finished).unwrap_or(true)
    }

    /// Blocks until the worker has delivered the `Exit` event.
    pub fn join(mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Streams a command's output line by line off the calling thread.
pub trait StreamingExecutor: Send + Sync {
    fn execute(
        &self,
        command: CommandLine,
        listener: ProcessListener,
        trace_id: &str,
    ) -> ExecutionHandle;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

fn forward_lines<R: Read + Send + 'static>(reader: R, tx: mpsc::Sender<String>) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buffer);
                    let line = line.trim_end_matches(['\r', '\n']).to_string();
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    })
}

fn wait_for_exit(child_slot: &Arc<Mutex<Option<Child>>>) -> i32 {
    loop {
        let polled = {
            let mut guard = match child_slot.lock() {
                Ok(guard) => guard,
                Err(_) => return LAUNCH_FAILED_EXIT_CODE,
            };
            let Some(child) = guard.as_mut() else {
                return LAUNCH_FAILED_EXIT_CODE;
            };
            match child.try_wait() {
                Ok(Some(status)) => {
                    guard.take();
                    Some(status.code().unwrap_or(LAUNCH_FAILED_EXIT_CODE))
                }
                Ok(None) => None,
                Err(_) => {
                    guard.take();
                    Some(LAUNCH_FAILED_EXIT_CODE)
                }
            }
        };
        if let Some(code) = polled {
            return code;
        }
        // Lock is released between polls so cancel() can reach the child.
        thread::sleep(Duration::from_millis(20));
    }
}

impl StreamingExecutor for ProcessRunner {
    fn execute(
        &self,
        command: CommandLine,
        listener: ProcessListener,
        trace_id: &str,
    ) -> ExecutionHandle {
        let execution_id = Uuid::new_v4().to_string();
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let child_slot: Arc<Mutex<Option<Child>>> = Arc::new(Mutex::new(None));

        let cancel_thread = Arc::clone(&cancel_flag);
        let child_thread = Arc::clone(&child_slot);
        let trace_id = trace_id.to_string();
        let execution_thread = execution_id.clone();

        let join = thread::spawn(move || {
            info!(
                trace_id = %trace_id,
                execution_id = %execution_thread,
                command = %command.display(),
                "execute"
            );
            let spawned = Command::new(&command.program)
                .args(&command.args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn();
            let mut child = match spawned {
                Ok(child) => child,
                Err(err) => {
                    warn!(trace_id = %trace_id, error = %err, "failed to launch command");
                    (listener)(ProcessEvent::Output(format!("Error: {err}")));
                    (listener)(ProcessEvent::Exit(LAUNCH_FAILED_EXIT_CODE));
                    return;
                }
            };

            let (tx, rx) = mpsc::channel::<String>();
            let mut readers = Vec::with_capacity(2);
            if let Some(stdout) = child.stdout.take() {
                readers.push(forward_lines(stdout, tx.clone()));
            }
            if let Some(stderr) = child.stderr.take() {
                readers.push(forward_lines(stderr, tx.clone()));
            }
            drop(tx);

            match child_thread.lock() {
                Ok(mut guard) => {
                    if cancel_thread.load(Ordering::Relaxed) {
                        let _ = child.kill();
                    }
                    *guard = Some(child);
                }
                Err(_) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    (listener)(ProcessEvent::Exit(LAUNCH_FAILED_EXIT_CODE));
                    return;
                }
            }

            // Ends once both pipes are closed.
            for line in rx {
                (listener)(ProcessEvent::Output(line));
            }
            for reader in readers {
                let _ = reader.join();
            }

            let code = wait_for_exit(&child_thread);
            info!(
                trace_id = %trace_id,
                execution_id = %execution_thread,
                exit_code = code,
                cancelled = cancel_thread.load(Ordering::Relaxed),
                "execution finished"
            );
            (listener)(ProcessEvent::Exit(code));
        });

        ExecutionHandle {
            execution_id,
            cancel_flag,
            child: child_slot,
            join: Some(join),
        }
    }
}
