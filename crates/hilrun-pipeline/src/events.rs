//! Pipeline event reporting
//!
//! The pipeline reports when each action starts, completes or fails so a
//! front end can follow execution without parsing logs.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;

/// A pipeline execution event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    ActionStarted {
        action: String,
        level: String,
    },
    ActionCompleted {
        action: String,
        level: String,
        #[serde(with = "duration_millis")]
        duration: Duration,
    },
    ActionFailed {
        action: String,
        level: String,
        error: String,
    },
}

impl PipelineEvent {
    pub fn action(&self) -> &str {
        match self {
            PipelineEvent::ActionStarted { action, .. }
            | PipelineEvent::ActionCompleted { action, .. }
            | PipelineEvent::ActionFailed { action, .. } => action,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, PipelineEvent::ActionFailed { .. })
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Trait for types that receive pipeline events
pub trait EventReporter: Send + Sync {
    fn report(&self, event: PipelineEvent);
}

/// Discards every event
#[derive(Debug, Default, Clone)]
pub struct NoopReporter;

impl EventReporter for NoopReporter {
    fn report(&self, _event: PipelineEvent) {}
}

/// Keeps every event in order
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<PipelineEvent>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Names of the actions that started, in execution order
    pub fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, PipelineEvent::ActionStarted { .. }))
            .map(|e| e.action().to_string())
            .collect()
    }
}

impl EventReporter for CollectingReporter {
    fn report(&self, event: PipelineEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_reporter() {
        let reporter = CollectingReporter::new();
        reporter.report(PipelineEvent::ActionStarted {
            action: "lava-overlay".to_string(),
            level: "1".to_string(),
        });
        reporter.report(PipelineEvent::ActionFailed {
            action: "lava-overlay".to_string(),
            level: "1".to_string(),
            error: "boom".to_string(),
        });

        assert_eq!(reporter.events().len(), 2);
        assert_eq!(reporter.started(), vec!["lava-overlay".to_string()]);
        assert!(reporter.events()[1].is_failure());
    }

    #[test]
    fn test_event_serialization() {
        let event = PipelineEvent::ActionCompleted {
            action: "compress-overlay".to_string(),
            level: "1.5".to_string(),
            duration: Duration::from_millis(1500),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "action_completed");
        assert_eq!(json["duration"], 1500);

        let back: PipelineEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
