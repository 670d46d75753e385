//! Per-job progress reporting. The orchestrator emits one event as each job reaches a terminal
//! state; the console layer consumes them through a sink.

use std::sync::Arc;

use crate::storage::JobStatus;

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub done: usize,
    pub total: usize,
    pub provider: String,
    pub prompt_id: String,
    pub status: JobStatus,
}

pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

#[must_use]
pub fn format_progress_line(ev: &ProgressEvent) -> String {
    format!(
        "[{}/{}] {} {} {}",
        ev.done,
        ev.total,
        ev.provider,
        ev.prompt_id,
        ev.status.as_str()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_shows_position_and_status() {
        let line = format_progress_line(&ProgressEvent {
            done: 2,
            total: 4,
            provider: "fake".into(),
            prompt_id: "greet".into(),
            status: JobStatus::Timeout,
        });
        assert_eq!(line, "[2/4] fake greet timeout");
    }
}
