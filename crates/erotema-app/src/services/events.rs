//! Fire-and-forget stage observability.
//!
//! The pipeline reports stage completions through this sink; emission has no
//! return value and a misbehaving sink can never affect the request result.

use std::time::Duration;

/// Outcome of a completed pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Succeeded,
    Failed,
}

/// One completed stage with its duration.
#[derive(Debug, Clone)]
pub struct StageEvent {
    pub stage: &'static str,
    pub duration: Duration,
    pub outcome: StageOutcome,
}

/// Sink for stage events. Implementations must not block or fail loudly.
pub trait EventSink: Send + Sync {
    fn stage_completed(&self, event: StageEvent);
}

/// Default sink: structured log lines at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn stage_completed(&self, event: StageEvent) {
        tracing::info!(
            stage = event.stage,
            duration_ms = event.duration.as_millis() as u64,
            outcome = ?event.outcome,
            "pipeline stage completed"
        );
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Sink that records events for assertions.
    #[derive(Default)]
    pub struct RecordingSink {
        pub events: Mutex<Vec<StageEvent>>,
    }

    impl EventSink for RecordingSink {
        fn stage_completed(&self, event: StageEvent) {
            self.events.lock().expect("event lock poisoned").push(event);
        }
    }
}
