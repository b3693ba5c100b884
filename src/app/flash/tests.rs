use super::engine::*;
use super::queue::FlashQueue;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::app::models::FlashStatus;
use crate::app::tools::command_line::CommandLine;
use crate::app::tools::locator::Toolchain;
use crate::app::tools::process::{
    ExecutionHandle, ProcessEvent, ProcessListener, ProcessRunner, StreamingExecutor,
};

#[derive(Clone)]
struct FakeStep {
    lines: Vec<&'static str>,
    delay: Duration,
    exit: i32,
}

fn step(exit: i32) -> FakeStep {
    FakeStep {
        lines: vec!["Sending 'x' (4 KB)   OKAY [  0.001s]"],
        delay: Duration::from_millis(10),
        exit,
    }
}

/// Replays scripted flash results on a worker thread per execution.
#[derive(Default)]
struct FakeFlasher {
    steps: Mutex<VecDeque<FakeStep>>,
    commands: Mutex<Vec<String>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl FakeFlasher {
    fn with_steps(steps: Vec<FakeStep>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            ..Self::default()
        })
    }

    fn commands(&self) -> Vec<String> {
        self.commands.lock().expect("commands").clone()
    }
}

impl StreamingExecutor for FakeFlasher {
    fn execute(&self, command: CommandLine, listener: ProcessListener, _trace_id: &str) -> ExecutionHandle {
        self.commands.lock().expect("commands").push(command.display());
        let step = self
            .steps
            .lock()
            .expect("steps")
            .pop_front()
            .unwrap_or_else(|| step(0));

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let active = Arc::clone(&self.active);

        let join = thread::spawn(move || {
            for line in step.lines {
                (listener)(ProcessEvent::Output(line.to_string()));
            }
            thread::sleep(step.delay);
            active.fetch_sub(1, Ordering::SeqCst);
            (listener)(ProcessEvent::Exit(step.exit));
        });
        ExecutionHandle::detached("fake", Some(join))
    }
}

fn collecting_emitter() -> (BatchEmitter, Arc<Mutex<Vec<BatchEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let emitter: BatchEmitter = Arc::new(move |event| {
        sink.lock().expect("events").push(event);
    });
    (emitter, events)
}

fn engine_with(queue: &Arc<FlashQueue>, executor: Arc<dyn StreamingExecutor>, heartbeat: Duration) -> BatchFlashEngine {
    BatchFlashEngine::new(Arc::clone(queue), executor, Toolchain::default(), heartbeat)
}

#[test]
fn two_rows_success_then_failure_and_back_to_idle() {
    let queue = Arc::new(FlashQueue::new());
    queue.add("boot_a", "/imgs/boot.img", "t").expect("add");
    queue.add("vendor_boot_a", "/imgs/vendor boot.img", "t").expect("add");
    let flasher = FakeFlasher::with_steps(vec![step(0), step(1)]);
    let engine = engine_with(&queue, flasher.clone(), Duration::from_secs(15));
    let (emitter, events) = collecting_emitter();

    let summary = engine
        .start("R3CN", emitter, "trace-batch")
        .expect("start")
        .wait()
        .expect("summary");

    assert_eq!(summary.statuses, vec![FlashStatus::Success, FlashStatus::Failed]);
    assert_eq!((summary.total, summary.succeeded, summary.failed), (2, 1, 1));
    assert!(!engine.is_running());
    let rendered: Vec<String> = queue.snapshot().iter().map(|row| row.status.to_string()).collect();
    assert_eq!(rendered, ["Success", "Failed"]);

    assert_eq!(
        flasher.commands(),
        [
            "fastboot -s R3CN flash boot_a /imgs/boot.img",
            "fastboot -s R3CN flash vendor_boot_a '/imgs/vendor boot.img'",
        ]
    );

    let events = events.lock().expect("events");
    assert!(matches!(events.first(), Some(BatchEvent::Started { total: 2, .. })));
    assert!(matches!(events.last(), Some(BatchEvent::Completed { .. })));
}

#[test]
fn steps_never_overlap_and_follow_index_order() {
    let queue = Arc::new(FlashQueue::new());
    for name in ["abl_a", "boot_a", "dtbo_a", "vbmeta_a"] {
        queue.add(name, &format!("/imgs/{name}.img"), "t").expect("add");
    }
    let flasher = FakeFlasher::with_steps(vec![step(0), step(2), step(0), step(0)]);
    let engine = engine_with(&queue, flasher.clone(), Duration::from_secs(15));
    let (emitter, events) = collecting_emitter();

    engine.start("R3CN", emitter, "t").expect("start").wait().expect("summary");

    assert_eq!(flasher.max_active.load(Ordering::SeqCst), 1);

    // Row i starts only after row i-1 reached its terminal status.
    let events = events.lock().expect("events");
    let mut last_terminal: Option<usize> = None;
    for event in events.iter() {
        match event {
            BatchEvent::StepStarted { index, .. } => {
                assert_eq!(*index, last_terminal.map(|i| i + 1).unwrap_or(0));
            }
            BatchEvent::StatusChanged { index, status } if status.is_terminal() => {
                last_terminal = Some(*index);
            }
            _ => {}
        }
    }
    assert_eq!(last_terminal, Some(3));

    let terminal = events
        .iter()
        .filter(|event| matches!(event, BatchEvent::StatusChanged { status, .. } if status.is_terminal()))
        .count();
    assert_eq!(terminal, 4);
}

#[test]
fn blank_partition_fails_without_invoking_tool() {
    let queue = Arc::new(FlashQueue::new());
    queue.add("boot", "/imgs/boot.img", "t").expect("add");
    queue.add("dtbo", "/imgs/dtbo.img", "t").expect("add");
    queue.set_partition(0, " ", "t").expect("blank edit");
    let flasher = FakeFlasher::with_steps(vec![step(0)]);
    let engine = engine_with(&queue, flasher.clone(), Duration::from_secs(15));
    let (emitter, _events) = collecting_emitter();

    let summary = engine.start("X", emitter, "t").expect("start").wait().expect("summary");

    assert_eq!(summary.statuses, vec![FlashStatus::Failed, FlashStatus::Success]);
    assert_eq!(flasher.commands(), ["fastboot -s X flash dtbo /imgs/dtbo.img"]);
}

#[test]
fn second_start_and_edits_are_rejected_while_running() {
    let queue = Arc::new(FlashQueue::new());
    queue.add("super", "/imgs/super.img", "t").expect("add");
    let slow = FakeStep {
        lines: vec![],
        delay: Duration::from_millis(300),
        exit: 0,
    };
    let engine = engine_with(&queue, FakeFlasher::with_steps(vec![slow]), Duration::from_secs(15));
    let (emitter, _events) = collecting_emitter();

    let run = engine.start("X", emitter.clone(), "t").expect("start");
    assert!(engine.is_running());

    let err = engine.start("X", emitter, "trace-second").err().expect("busy");
    assert_eq!(err.code, "ERR_BUSY");
    assert_eq!(err.trace_id, "trace-second");
    assert_eq!(queue.add("boot", "/b.img", "t").unwrap_err().code, "ERR_BUSY");
    assert_eq!(queue.clear("t").unwrap_err().code, "ERR_BUSY");

    let summary = run.wait().expect("summary");
    assert_eq!(summary.statuses, vec![FlashStatus::Success]);
    assert!(!engine.is_running());
    queue.add("boot", "/b.img", "t").expect("edits allowed again");
}

#[test]
fn start_requires_rows_and_serial() {
    let queue = Arc::new(FlashQueue::new());
    let engine = engine_with(&queue, FakeFlasher::with_steps(vec![]), Duration::from_secs(15));
    let (emitter, events) = collecting_emitter();

    let err = engine.start("X", emitter.clone(), "t").err().expect("empty queue");
    assert_eq!(err.code, "ERR_VALIDATION");

    queue.add("boot", "/b.img", "t").expect("add");
    let err = engine.start("  ", emitter, "t").err().expect("blank serial");
    assert_eq!(err.code, "ERR_VALIDATION");
    assert!(!engine.is_running());
    assert!(events.lock().expect("events").is_empty());
}

#[test]
fn heartbeat_is_emitted_while_a_step_runs() {
    let queue = Arc::new(FlashQueue::new());
    queue.add("super", "/imgs/super.img", "t").expect("add");
    let slow = FakeStep {
        lines: vec![],
        delay: Duration::from_millis(250),
        exit: 0,
    };
    let engine = engine_with(&queue, FakeFlasher::with_steps(vec![slow]), Duration::from_millis(40));
    let (emitter, events) = collecting_emitter();

    engine.start("X", emitter, "t").expect("start").wait().expect("summary");

    let events = events.lock().expect("events");
    let beats = events
        .iter()
        .filter(|event| matches!(event, BatchEvent::Heartbeat { index: 0, .. }))
        .count();
    assert!(beats >= 1, "expected heartbeats, got {events:?}");
}

#[test]
fn output_lines_carry_severity() {
    let queue = Arc::new(FlashQueue::new());
    queue.add("boot", "/b.img", "t").expect("add");
    let failing = FakeStep {
        lines: vec!["Sending 'boot' (4 KB)   OKAY [  0.001s]", "FAILED (remote: 'unknown partition')"],
        delay: Duration::from_millis(5),
        exit: 1,
    };
    let engine = engine_with(&queue, FakeFlasher::with_steps(vec![failing]), Duration::from_secs(15));
    let (emitter, events) = collecting_emitter();

    engine.start("X", emitter, "t").expect("start").wait().expect("summary");

    let events = events.lock().expect("events");
    let severities: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            BatchEvent::Output { severity, .. } => Some(*severity),
            _ => None,
        })
        .collect();
    assert_eq!(
        severities,
        [crate::app::console::Severity::Success, crate::app::console::Severity::Error]
    );
}

#[test]
fn missing_flash_tool_fails_every_row() {
    let queue = Arc::new(FlashQueue::new());
    queue.add("boot", "/b.img", "t").expect("add");
    queue.add("dtbo", "/d.img", "t").expect("add");
    let engine = BatchFlashEngine::new(
        Arc::clone(&queue),
        Arc::new(ProcessRunner),
        Toolchain {
            adb: "adb".to_string(),
            fastboot: "/no/such/fastboot".to_string(),
        },
        Duration::from_secs(15),
    );
    let (emitter, events) = collecting_emitter();

    let summary = engine.start("X", emitter, "t").expect("start").wait().expect("summary");

    assert_eq!(summary.statuses, vec![FlashStatus::Failed, FlashStatus::Failed]);
    let events = events.lock().expect("events");
    assert!(events
        .iter()
        .any(|event| matches!(event, BatchEvent::Output { line, .. } if line.starts_with("Error:"))));
}
