//! Execution monitor.
//!
//! Drives the polling loop against an engine: submit, then repeatedly
//! sleep, advance scheduling and pull a status snapshot bounded to the
//! monitoring depth, until the root reaches a terminal state. One extra
//! progress and status pull follows termination so that transitions the
//! engine applies lazily are flushed.
//!
//! Failed jobs never make the monitor fail; they show up as
//! `TERMINATED_FAILED` in the returned snapshot and are reported to the
//! sink's failure hook. Only engine errors propagate.

mod sink;
mod status;

pub use sink::{failure_message, status_table, RecordingSink, StatusSink, TableSink, Tee, TracingSink};
pub use status::{observed_status, snapshot, StatusNode, StatusTree};

use std::thread;
use std::time::{Duration, Instant};

use crate::config::MonitoringSettings;
use crate::engine::{ExecutionEngine, TaskHandle};
use crate::error::Result;

/// Polling loop configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionMonitor {
    interval: Duration,
    depth: usize,
}

impl Default for ExecutionMonitor {
    fn default() -> Self {
        Self::from_settings(&MonitoringSettings::default())
    }
}

impl ExecutionMonitor {
    pub fn new(interval: Duration, depth: usize) -> Self {
        Self { interval, depth }
    }

    pub fn from_settings(settings: &MonitoringSettings) -> Self {
        Self::new(Duration::from_secs(settings.interval_secs), settings.depth)
    }

    /// Build from raw operator input, clamping negative values to zero.
    pub fn clamped(interval_secs: i64, depth: i64) -> Self {
        Self::new(
            Duration::from_secs(interval_secs.max(0).unsigned_abs()),
            usize::try_from(depth.max(0)).unwrap_or(usize::MAX),
        )
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Submit the tree from `start_index` and poll it to a terminal state.
    ///
    /// Returns the final snapshot of the whole tree.
    pub fn run(
        &self,
        engine: &mut dyn ExecutionEngine,
        handle: TaskHandle,
        start_index: u32,
        sink: &mut dyn StatusSink,
    ) -> Result<StatusNode> {
        tracing::debug!("Submitting task tree {} from job {}", handle, start_index);
        engine.submit(handle, start_index)?;
        self.watch(engine, handle, sink)
    }

    /// Poll an already submitted tree to a terminal state.
    pub fn watch(
        &self,
        engine: &mut dyn ExecutionEngine,
        handle: TaskHandle,
        sink: &mut dyn StatusSink,
    ) -> Result<StatusNode> {
        let start = Instant::now();
        loop {
            sink.waiting(self.interval);
            if !self.interval.is_zero() {
                thread::sleep(self.interval);
            }

            let bounded = self.pull(engine, handle)?;
            tracing::debug!("Elapsed time: {}", format_elapsed(start.elapsed()));
            sink.emit(&bounded, start.elapsed())?;

            if bounded.is_terminal() {
                let flushed = self.pull(engine, handle)?;
                sink.emit(&flushed, start.elapsed())?;
                break;
            }
        }

        let tree = engine.tree(handle)?;
        let full = snapshot(&tree.root, None);
        for node in full.failed_nodes() {
            sink.failure(node)?;
        }
        tracing::info!(
            "Task tree {} finished as {} after {}",
            handle,
            full.state,
            format_elapsed(start.elapsed())
        );
        Ok(full)
    }

    fn pull(&self, engine: &mut dyn ExecutionEngine, handle: TaskHandle) -> Result<StatusNode> {
        tracing::debug!("Advancing engine");
        engine.progress()?;
        let tree = engine.tree(handle)?;
        Ok(snapshot(&tree.root, Some(self.depth)))
    }
}

/// Format a duration as `H:MM:SS`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
