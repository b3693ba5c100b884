use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

use crate::app::device::details::fetch_metrics;
use crate::app::models::LiveMetrics;
use crate::app::tools::locator::Toolchain;
use crate::app::tools::runner::CommandRunner;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MetricsEvent {
    Updated { serial: String, metrics: LiveMetrics },
    /// The selection moved away from a bridge device; `serial` is the one last monitored.
    Cleared { serial: Option<String> },
}

pub type MetricsEmitter = Arc<dyn Fn(MetricsEvent) + Send + Sync>;

pub struct MetricsMonitorHandle {
    serial: String,
    stop_flag: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl MetricsMonitorHandle {
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Returns once the polling thread is gone; no `Updated` event follows.
    pub fn stop(self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        let _ = self.join.join();
    }
}

#[derive(Clone)]
pub struct MetricsMonitorConfig {
    pub tools: Toolchain,
    pub query_timeout: Duration,
    pub interval: Duration,
}

fn sleep_unless_stopped(stop_flag: &AtomicBool, interval: Duration) {
    let start = Instant::now();
    while start.elapsed() < interval {
        if stop_flag.load(Ordering::Relaxed) {
            return;
        }
        thread::sleep(Duration::from_millis(50).min(interval));
    }
}

/// Polls battery/temperature/storage of `serial` every `config.interval`.
pub fn start_metrics_monitor(
    runner: Arc<dyn CommandRunner>,
    config: MetricsMonitorConfig,
    serial: String,
    emitter: MetricsEmitter,
    trace_id: String,
) -> MetricsMonitorHandle {
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_thread = Arc::clone(&stop_flag);
    let serial_thread = serial.clone();

    info!(trace_id = %trace_id, serial = %serial, "start metrics monitor");
    let join = thread::spawn(move || loop {
        if stop_thread.load(Ordering::Relaxed) {
            break;
        }
        let metrics = fetch_metrics(
            runner.as_ref(),
            &config.tools,
            config.query_timeout,
            &serial_thread,
            &trace_id,
        );
        if stop_thread.load(Ordering::Relaxed) {
            break;
        }
        (emitter)(MetricsEvent::Updated {
            serial: serial_thread.clone(),
            metrics,
        });
        sleep_unless_stopped(&stop_thread, config.interval);
    });

    MetricsMonitorHandle {
        serial,
        stop_flag,
        join,
    }
}
