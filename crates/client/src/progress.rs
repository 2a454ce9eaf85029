// crates/client/src/progress.rs
//! Terminal progress bar for a followed job.

use chatshell_core::api::JobStatus;
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::ClientError;
use crate::poller::ProgressSink;

pub struct TerminalProgress {
    pb: ProgressBar,
}

impl TerminalProgress {
    pub fn start(label: &str) -> anyhow::Result<Self> {
        let pb = ProgressBar::new(100);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {prefix} [{bar:30.cyan/blue}] {pos:>3}% {wide_msg}")?
                .progress_chars("=> "),
        );
        pb.set_prefix(label.to_string());
        pb.set_message("submitting");
        Ok(Self { pb })
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

impl ProgressSink for TerminalProgress {
    fn on_status(&mut self, status: &JobStatus) {
        self.pb.set_position(status.progress_percent.clamp(0.0, 100.0) as u64);
        self.pb.set_message(format!("{}: {}", status.stage, status.message));
    }

    fn on_poll_failure(&mut self, attempt: u32, error: &ClientError) {
        self.pb
            .println(format!("  \u{21bb} status check {attempt} failed: {error}"));
    }

    fn on_cancel_requested(&mut self) {
        self.pb.set_message("cancelling...");
    }
}

/// One line per job for `status` and `list`.
pub fn status_line(status: &JobStatus) -> String {
    let mut line = format!(
        "{}  {:<6}  {:<9}  {:>5.1}%  {}: {}",
        status.job_id,
        status.kind.as_str(),
        status.state.as_str(),
        status.progress_percent,
        status.stage,
        status.message
    );
    if let Some(error) = &status.error {
        // A failed job usually carries its reason as the message already.
        if *error != status.message {
            line.push_str(&format!("  ({error})"));
        }
    } else if let Some(result) = &status.result {
        line.push_str(&format!("  ({})", result.summary()));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatshell_core::{JobKind, JobState};

    fn failed_status(message: &str, error: &str) -> JobStatus {
        let now = chrono::Utc::now();
        JobStatus {
            job_id: "abc".into(),
            kind: JobKind::Import,
            state: JobState::Failed,
            stage: "verifying".into(),
            message: message.into(),
            progress_percent: 5.0,
            cancel_requested: false,
            result: None,
            error: Some(error.into()),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_status_line_shows_error_distinct_from_message() {
        let line = status_line(&failed_status("Checking archive", "The backup archive is invalid"));
        assert!(line.starts_with("abc  import  failed"));
        assert!(line.contains("5.0%"));
        assert!(line.ends_with("(The backup archive is invalid)"));
    }

    #[test]
    fn test_status_line_prints_failure_reason_once() {
        let reason = "The backup archive is invalid: bad crc";
        let line = status_line(&failed_status(reason, reason));
        assert_eq!(line.matches(reason).count(), 1, "{line}");
        assert!(line.ends_with(&format!("verifying: {reason}")));
    }
}
