pub mod completions;
pub mod plan;
pub mod run;

use groundwork_core::CoreError;
use groundwork_schema::{FailureKind, StepResult, StepStatus};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_VALIDATION: u8 = 2;
pub const EXIT_LOCK_HELD: u8 = 3;
pub const EXIT_CANCELLED: u8 = 130;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

/// Prefix a core error so `main` can pick the exit code.
pub fn describe_core_error(e: &CoreError) -> String {
    match e {
        CoreError::LockHeld(_) => format!("run lock: {e}"),
        CoreError::Credentials(_) => format!("invalid configuration: {e}"),
        e if e.is_validation() => format!("invalid manifest: {e}"),
        e => e.to_string(),
    }
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_finish(pb: &ProgressBar, ok: bool, msg: &str) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    let mark = if ok { "✓" } else { "✗" };
    pb.finish_with_message(format!("{mark} {msg}"));
}

/// Short colored label for a step outcome, as shown in progress lines.
pub fn colorize_result(result: &StepResult) -> String {
    use console::Style;
    match (result.status, result.failure) {
        (StepStatus::Succeeded, _) => Style::new().green().apply_to("ok").to_string(),
        (StepStatus::Skipped, _) => Style::new().dim().apply_to("skipped").to_string(),
        (StepStatus::Failed, Some(FailureKind::DependencyBlocked)) => {
            Style::new().yellow().apply_to("blocked").to_string()
        }
        (StepStatus::Failed, Some(FailureKind::Cancelled)) => {
            Style::new().yellow().apply_to("cancelled").to_string()
        }
        (StepStatus::Failed, _) => Style::new().red().bold().apply_to("failed").to_string(),
    }
}
