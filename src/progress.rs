//! Progress reporting for the executors.

use parking_lot::Mutex;
use tracing::{debug, warn};

/// Receives one `report` per visited node followed by `complete` or `fail`.
pub trait ProgressSink: Send + Sync {
    fn report(&self, message: &str, percent: f64);
    fn complete(&self);
    fn fail(&self);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&self, _message: &str, _percent: f64) {}
    fn complete(&self) {}
    fn fail(&self) {}
}

/// Forwards progress to the log.
#[derive(Debug, Default)]
pub struct TracingProgress {
    current: Mutex<String>,
}

impl ProgressSink for TracingProgress {
    fn report(&self, message: &str, percent: f64) {
        *self.current.lock() = message.to_string();
        debug!(item = message, percent, "Sync progress");
    }

    fn complete(&self) {}

    fn fail(&self) {
        warn!(item = %self.current.lock(), "Item failed");
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Report { message: String, percent: f64 },
    Complete,
    Fail,
}

/// Keeps every event, for tests and end-of-run summaries.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    pub fn failures(&self) -> usize {
        self.count(|e| matches!(e, ProgressEvent::Fail))
    }

    pub fn completions(&self) -> usize {
        self.count(|e| matches!(e, ProgressEvent::Complete))
    }

    pub fn last_percent(&self) -> Option<f64> {
        self.events.lock().iter().rev().find_map(|e| match e {
            ProgressEvent::Report { percent, .. } => Some(*percent),
            _ => None,
        })
    }

    fn count(&self, pred: impl Fn(&ProgressEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }
}

impl ProgressSink for RecordingProgress {
    fn report(&self, message: &str, percent: f64) {
        self.events.lock().push(ProgressEvent::Report {
            message: message.to_string(),
            percent,
        });
    }

    fn complete(&self) {
        self.events.lock().push(ProgressEvent::Complete);
    }

    fn fail(&self) {
        self.events.lock().push(ProgressEvent::Fail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_progress_counts_outcomes() {
        let progress = RecordingProgress::new();
        progress.report("a.txt", 50.0);
        progress.complete();
        progress.report("b.txt", 100.0);
        progress.fail();

        assert_eq!(progress.completions(), 1);
        assert_eq!(progress.failures(), 1);
        assert_eq!(progress.last_percent(), Some(100.0));
        assert_eq!(progress.events().len(), 4);
    }
}
