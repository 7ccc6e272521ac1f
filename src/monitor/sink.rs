//! Observability sinks for status snapshots.

use std::time::Duration;

use super::status::StatusNode;
use super::format_elapsed;
use crate::error::Result;
use crate::ui::{should_use_colors, PlateflowTheme, SpinnerHandle, Table, UserInterface};

/// Receives every snapshot the monitor pulls, and the failed nodes of the
/// final snapshot.
pub trait StatusSink {
    fn emit(&mut self, snapshot: &StatusNode, elapsed: Duration) -> Result<()>;

    /// Called once per failed node after the tree reached a terminal state.
    fn failure(&mut self, node: &StatusNode) -> Result<()>;

    /// Called before the monitor sleeps.
    fn waiting(&mut self, _interval: Duration) {}
}

/// Line for a failed node: `"<name> (id: <id>) failed with exitcode <code>"`.
pub fn failure_message(node: &StatusNode) -> String {
    let code = node
        .exit_code
        .map_or_else(|| "none".to_string(), |c| c.to_string());
    format!("{} (id: {}) failed with exitcode {}", node.name, node.id, code)
}

/// Logs snapshots through `tracing`.
#[derive(Debug, Default)]
pub struct TracingSink;

impl TracingSink {
    fn log(node: &StatusNode, level: usize) {
        tracing::info!(
            "{}{}: {} ({:.2} %)",
            "  ".repeat(level),
            node.name,
            node.state,
            node.percent_done
        );
        for child in &node.subtasks {
            Self::log(child, level + 1);
        }
    }
}

impl StatusSink for TracingSink {
    fn emit(&mut self, snapshot: &StatusNode, elapsed: Duration) -> Result<()> {
        tracing::info!("Elapsed time: {}", format_elapsed(elapsed));
        Self::log(snapshot, 0);
        Ok(())
    }

    fn failure(&mut self, node: &StatusNode) -> Result<()> {
        tracing::error!("{}", failure_message(node));
        Ok(())
    }
}

/// Renders each snapshot as a table and shows a spinner while waiting.
pub struct TableSink<'a> {
    ui: &'a mut dyn UserInterface,
    spinner: Option<Box<dyn SpinnerHandle>>,
}

impl<'a> TableSink<'a> {
    pub fn new(ui: &'a mut dyn UserInterface) -> Self {
        Self { ui, spinner: None }
    }

    fn finish_spinner(&mut self) {
        if let Some(mut spinner) = self.spinner.take() {
            spinner.finish_skipped("status pulled");
        }
    }
}

/// Table of a snapshot: the root row followed by every resolved node.
pub fn status_table(snapshot: &StatusNode) -> Table {
    let theme = if should_use_colors() {
        PlateflowTheme::new()
    } else {
        PlateflowTheme::plain()
    };
    let mut table = Table::new(vec!["Name", "Type", "Status", "Exit", "Done"])
        .align_right(3)
        .align_right(4);
    fn add(table: &mut Table, theme: &PlateflowTheme, node: &StatusNode, level: usize) {
        let name = format!("{}{}", "  ".repeat(level), node.name);
        let status = theme.status(node.status).apply_to(node.status.as_str()).to_string();
        let exit = node.exit_code.map(|c| c.to_string()).unwrap_or_default();
        let done = format!("{:.0}%", node.percent_done);
        table.add_row(vec![&name, &node.node_type, &status, &exit, &done]);
        for child in &node.subtasks {
            add(table, theme, child, level + 1);
        }
    }
    add(&mut table, &theme, snapshot, 0);
    table
}

impl StatusSink for TableSink<'_> {
    fn emit(&mut self, snapshot: &StatusNode, elapsed: Duration) -> Result<()> {
        self.finish_spinner();
        self.ui
            .message(&format!("Elapsed time: {}", format_elapsed(elapsed)));
        self.ui.message(&status_table(snapshot).render());
        Ok(())
    }

    fn failure(&mut self, node: &StatusNode) -> Result<()> {
        self.finish_spinner();
        self.ui.error(&failure_message(node));
        Ok(())
    }

    fn waiting(&mut self, interval: Duration) {
        if interval.is_zero() {
            return;
        }
        self.finish_spinner();
        self.spinner = Some(self.ui.start_spinner(&format!(
            "Waiting {}s for the next status pull",
            interval.as_secs()
        )));
    }
}

impl Drop for TableSink<'_> {
    fn drop(&mut self) {
        self.finish_spinner();
    }
}

/// Keeps everything it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub snapshots: Vec<StatusNode>,
    pub failures: Vec<StatusNode>,
    pub waits: usize,
}

impl StatusSink for RecordingSink {
    fn emit(&mut self, snapshot: &StatusNode, _elapsed: Duration) -> Result<()> {
        self.snapshots.push(snapshot.clone());
        Ok(())
    }

    fn failure(&mut self, node: &StatusNode) -> Result<()> {
        self.failures.push(node.clone());
        Ok(())
    }

    fn waiting(&mut self, _interval: Duration) {
        self.waits += 1;
    }
}

/// Forwards to two sinks.
pub struct Tee<'a, 'b> {
    first: &'a mut dyn StatusSink,
    second: &'b mut dyn StatusSink,
}

impl<'a, 'b> Tee<'a, 'b> {
    pub fn new(first: &'a mut dyn StatusSink, second: &'b mut dyn StatusSink) -> Self {
        Self { first, second }
    }
}

impl StatusSink for Tee<'_, '_> {
    fn emit(&mut self, snapshot: &StatusNode, elapsed: Duration) -> Result<()> {
        self.first.emit(snapshot, elapsed)?;
        self.second.emit(snapshot, elapsed)
    }

    fn failure(&mut self, node: &StatusNode) -> Result<()> {
        self.first.failure(node)?;
        self.second.failure(node)
    }

    fn waiting(&mut self, interval: Duration) {
        self.first.waiting(interval);
        self.second.waiting(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TaskTree;
    use crate::monitor::snapshot;
    use crate::structure::ExperimentId;
    use crate::ui::MockUI;

    fn failed_snapshot() -> StatusNode {
        let mut tree = TaskTree::new(ExperimentId(1), "corilla", &[1, 2], None);
        tree.submit(0);
        tree.finish_job(1, 0);
        tree.finish_job(2, 3);
        tree.refresh();
        snapshot(&tree.root, None)
    }

    #[test]
    fn failure_message_names_id_and_code() {
        let snap = failed_snapshot();
        assert_eq!(
            failure_message(&snap.subtasks[1]),
            "corilla_run_000002 (id: 2) failed with exitcode 3"
        );
    }

    #[test]
    fn table_sink_renders_rows_and_failures() {
        let mut ui = MockUI::new();
        {
            let mut sink = TableSink::new(&mut ui);
            let snap = failed_snapshot();
            sink.emit(&snap, Duration::from_secs(61)).unwrap();
            sink.failure(&snap.subtasks[1]).unwrap();
        }
        assert!(ui.has_message("Elapsed time: 0:01:01"));
        assert!(ui.has_message("TERMINATED_FAILED"));
        assert!(ui.has_error("corilla_run_000002 (id: 2) failed with exitcode 3"));
    }

    #[test]
    fn tee_forwards_to_both() {
        let mut a = RecordingSink::default();
        let mut b = RecordingSink::default();
        let snap = failed_snapshot();
        {
            let mut tee = Tee::new(&mut a, &mut b);
            tee.emit(&snap, Duration::ZERO).unwrap();
            tee.waiting(Duration::ZERO);
        }
        assert_eq!(a.snapshots.len(), 1);
        assert_eq!(b.snapshots.len(), 1);
        assert_eq!(b.waits, 1);
    }
}
