use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::app::console::{classify_line, Severity};
use crate::app::error::AppError;
use crate::app::flash::queue::FlashQueue;
use crate::app::models::{FlashQueueEntry, FlashStatus};
use crate::app::tools::commands::fastboot_flash;
use crate::app::tools::locator::Toolchain;
use crate::app::tools::process::{ProcessEvent, StreamingExecutor, LAUNCH_FAILED_EXIT_CODE};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BatchSummary {
    pub run_id: String,
    pub serial: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub statuses: Vec<FlashStatus>,
}

impl BatchSummary {
    fn from_entries(run_id: &str, serial: &str, entries: &[FlashQueueEntry]) -> Self {
        let statuses: Vec<FlashStatus> = entries.iter().map(|entry| entry.status).collect();
        Self {
            run_id: run_id.to_string(),
            serial: serial.to_string(),
            total: statuses.len(),
            succeeded: statuses.iter().filter(|s| **s == FlashStatus::Success).count(),
            failed: statuses.iter().filter(|s| **s == FlashStatus::Failed).count(),
            statuses,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchEvent {
    Started {
        run_id: String,
        serial: String,
        total: usize,
    },
    StepStarted {
        index: usize,
        partition: String,
        command: String,
    },
    Output {
        index: usize,
        line: String,
        severity: Severity,
    },
    /// The current step is still running; flashing has no timeout.
    Heartbeat { index: usize, elapsed_secs: u64 },
    StatusChanged { index: usize, status: FlashStatus },
    Completed { summary: BatchSummary },
}

pub type BatchEmitter = Arc<dyn Fn(BatchEvent) + Send + Sync>;

pub struct BatchRun {
    pub run_id: String,
    join: JoinHandle<BatchSummary>,
}

impl BatchRun {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Blocks until every row is terminal and the engine is idle again.
    pub fn wait(self) -> Result<BatchSummary, AppError> {
        let run_id = self.run_id;
        self.join
            .join()
            .map_err(|_| AppError::system("batch flash worker panicked", run_id))
    }
}

/// Returns the queue to Idle when the driver thread ends, including by panic.
struct RunGuard(Arc<FlashQueue>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.end_run();
    }
}

pub struct BatchFlashEngine {
    queue: Arc<FlashQueue>,
    executor: Arc<dyn StreamingExecutor>,
    tools: Toolchain,
    heartbeat: Duration,
}

impl BatchFlashEngine {
    pub fn new(
        queue: Arc<FlashQueue>,
        executor: Arc<dyn StreamingExecutor>,
        tools: Toolchain,
        heartbeat: Duration,
    ) -> Self {
        Self {
            queue,
            executor,
            tools,
            heartbeat,
        }
    }

    pub fn queue(&self) -> &Arc<FlashQueue> {
        &self.queue
    }

    pub fn is_running(&self) -> bool {
        self.queue.is_running()
    }

    /// Idle -> Running. Rows are processed strictly in order on a worker thread; a failed
    /// row never stops the batch.
    pub fn start(&self, serial: &str, emitter: BatchEmitter, trace_id: &str) -> Result<BatchRun, AppError> {
        let serial = serial.trim().to_string();
        if serial.is_empty() {
            return Err(AppError::validation("serial is required", trace_id));
        }
        let total = self.queue.begin_run(trace_id)?;
        let guard = RunGuard(Arc::clone(&self.queue));

        let run_id = Uuid::new_v4().to_string();
        info!(trace_id = %trace_id, run_id = %run_id, serial = %serial, total, "batch flash started");

        let step = StepContext {
            executor: Arc::clone(&self.executor),
            tools: self.tools.clone(),
            heartbeat: self.heartbeat,
            serial,
            emitter,
            trace_id: trace_id.to_string(),
        };
        let queue = Arc::clone(&self.queue);
        let run_thread = run_id.clone();

        let join = thread::spawn(move || {
            let guard = guard;
            (step.emitter)(BatchEvent::Started {
                run_id: run_thread.clone(),
                serial: step.serial.clone(),
                total,
            });

            for index in 0..total {
                let Some(entry) = queue.entry(index) else {
                    break;
                };
                let status = step.run(&queue, index, &entry);
                queue.set_status(index, status);
                (step.emitter)(BatchEvent::StatusChanged { index, status });
            }

            let summary = BatchSummary::from_entries(&run_thread, &step.serial, &queue.snapshot());
            drop(guard);
            info!(
                trace_id = %step.trace_id,
                run_id = %run_thread,
                succeeded = summary.succeeded,
                failed = summary.failed,
                "batch flash completed"
            );
            (step.emitter)(BatchEvent::Completed {
                summary: summary.clone(),
            });
            summary
        });

        Ok(BatchRun { run_id, join })
    }
}

struct StepContext {
    executor: Arc<dyn StreamingExecutor>,
    tools: Toolchain,
    heartbeat: Duration,
    serial: String,
    emitter: BatchEmitter,
    trace_id: String,
}

impl StepContext {
    /// Runs one row to its terminal status.
    fn run(&self, queue: &FlashQueue, index: usize, entry: &FlashQueueEntry) -> FlashStatus {
        if entry.partition.trim().is_empty() {
            warn!(trace_id = %self.trace_id, index, "skipping flash row with blank partition");
            (self.emitter)(BatchEvent::Output {
                index,
                line: format!("Error: row {} has no partition name", index + 1),
                severity: Severity::Error,
            });
            return FlashStatus::Failed;
        }

        queue.set_status(index, FlashStatus::Flashing);
        (self.emitter)(BatchEvent::StatusChanged {
            index,
            status: FlashStatus::Flashing,
        });

        let command = fastboot_flash(&self.tools, &self.serial, &entry.partition, &entry.image_path);
        (self.emitter)(BatchEvent::StepStarted {
            index,
            partition: entry.partition.clone(),
            command: command.display(),
        });

        let (tx, rx) = mpsc::channel::<ProcessEvent>();
        let handle = self.executor.execute(
            command,
            Arc::new(move |event| {
                let _ = tx.send(event);
            }),
            &self.trace_id,
        );

        let started = Instant::now();
        let code = loop {
            match rx.recv_timeout(self.heartbeat) {
                Ok(ProcessEvent::Output(line)) => {
                    let severity = classify_line(&line);
                    (self.emitter)(BatchEvent::Output {
                        index,
                        line,
                        severity,
                    });
                }
                Ok(ProcessEvent::Exit(code)) => break code,
                Err(RecvTimeoutError::Timeout) => {
                    (self.emitter)(BatchEvent::Heartbeat {
                        index,
                        elapsed_secs: started.elapsed().as_secs(),
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    warn!(trace_id = %self.trace_id, index, "flash step ended without exit code");
                    break LAUNCH_FAILED_EXIT_CODE;
                }
            }
        };
        handle.join();

        let status = FlashStatus::from_exit_code(code);
        info!(
            trace_id = %self.trace_id,
            index,
            partition = %entry.partition,
            exit_code = code,
            status = %status,
            "flash step finished"
        );
        status
    }
}
