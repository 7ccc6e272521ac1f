//! Helpers shared by the commands that plan, monitor and report.

use serde_json::{Map, Value};

use crate::cli::args::MonitorArgs;
use crate::config::MonitoringSettings;
use crate::error::{PlateflowError, Result};
use crate::monitor::{ExecutionMonitor, StatusSink, TableSink, TracingSink};
use crate::runner::SubmitOutcome;
use crate::store::Submission;
use crate::ui::UserInterface;

use super::dispatcher::CommandResult;

/// Turn `key=value` arguments into a parameter object.
///
/// Values are parsed as JSON when possible (`50`, `true`, `[1,2]`) and
/// taken as strings otherwise.
pub fn parse_params(params: &[String]) -> Result<Value> {
    if params.is_empty() {
        return Ok(Value::Null);
    }
    let mut map = Map::new();
    for param in params {
        let (key, raw) = param.split_once('=').ok_or_else(|| PlateflowError::Validation {
            step: "--param".to_string(),
            message: format!("expected KEY=VALUE, got '{}'", param),
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(PlateflowError::validation(
                "--param",
                format!("missing key in '{}'", param),
            ));
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        map.insert(key.to_string(), value);
    }
    Ok(Value::Object(map))
}

/// Command-line polling values over configured ones, clamped at zero.
pub fn resolve_monitor(settings: &MonitoringSettings, args: &MonitorArgs) -> ExecutionMonitor {
    let configured_interval = i64::try_from(settings.interval_secs).unwrap_or(i64::MAX);
    let configured_depth = i64::try_from(settings.depth).unwrap_or(i64::MAX);
    ExecutionMonitor::clamped(
        args.interval.unwrap_or(configured_interval),
        args.depth.unwrap_or(configured_depth),
    )
}

/// Run `f` with the sink matching the UI's output mode: tables while
/// snapshots are shown, log events otherwise.
pub fn with_status_sink<T>(
    ui: &mut dyn UserInterface,
    f: impl FnOnce(&mut dyn StatusSink) -> Result<T>,
) -> Result<T> {
    if ui.output_mode().shows_snapshots() {
        let mut sink = TableSink::new(ui);
        f(&mut sink)
    } else {
        f(&mut TracingSink)
    }
}

pub fn show_submission(ui: &mut dyn UserInterface, submission: &Submission) {
    ui.message(&format!("Submission: {}", submission.id));
    ui.message(&format!("Phase:      {}", submission.phase));
    ui.message(&format!(
        "Task tree:  {}",
        submission.top_task_id.as_deref().unwrap_or("-")
    ));
    ui.message(&format!(
        "Created:    {}",
        submission.created_at.format("%Y-%m-%d %H:%M:%S")
    ));
}

/// Final lines of a submit or resubmit. Failed jobs become an error
/// naming their ids.
pub fn report_outcome(ui: &mut dyn UserInterface, outcome: &SubmitOutcome) -> Result<CommandResult> {
    let jobs = outcome.snapshot.job_records().len();
    if !outcome.failed_jobs.is_empty() {
        ui.warning(&format!(
            "Submission {} finished as {}; run `plateflow resubmit` to retry the failed jobs",
            outcome.submission.id, outcome.snapshot.state
        ));
        return Err(PlateflowError::JobsFailed {
            failed: outcome.failed_jobs.clone(),
        });
    }
    if !outcome.succeeded() {
        ui.warning(&format!(
            "Submission {} finished as {}",
            outcome.submission.id, outcome.snapshot.state
        ));
        return Ok(CommandResult::failure(1));
    }
    ui.success(&format!(
        "Submission {}: {} job(s) terminated successfully",
        outcome.submission.id, jobs
    ));
    if let Some(summary) = &outcome.collected {
        ui.success(&format!("Collected: {}", summary));
    }
    Ok(CommandResult::success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn params_parse_json_or_text() {
        let params = vec![
            "batch_size=50".to_string(),
            "mip=true".to_string(),
            "regex=^(?P<well>\\w+)=".to_string(),
            "layout=rows".to_string(),
        ];
        assert_eq!(
            parse_params(&params).unwrap(),
            json!({
                "batch_size": 50,
                "mip": true,
                "regex": "^(?P<well>\\w+)=",
                "layout": "rows",
            })
        );
    }

    #[test]
    fn no_params_is_null() {
        assert_eq!(parse_params(&[]).unwrap(), Value::Null);
    }

    #[test]
    fn param_without_equals_is_rejected() {
        let err = parse_params(&["batch_size".to_string()]).unwrap_err();
        assert!(matches!(err, PlateflowError::Validation { .. }));
        assert!(parse_params(&["=3".to_string()]).is_err());
    }

    #[test]
    fn monitor_args_override_and_clamp() {
        let settings = MonitoringSettings {
            interval_secs: 10,
            depth: 2,
        };
        let monitor = resolve_monitor(
            &settings,
            &MonitorArgs {
                interval: Some(-3),
                depth: None,
            },
        );
        assert_eq!(monitor.interval().as_secs(), 0);
        assert_eq!(monitor.depth(), 2);
    }
}
