use crate::evaluator::ResolutionStatus;
use crate::selection::SelectionEntry;
use crate::session::QuestionPhase;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: String,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epoch: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
}

impl EventEnvelope {
    pub fn new<T: Serialize>(event: &str, payload: &T, epoch: Option<u64>) -> Self {
        let payload = serde_json::to_value(payload).unwrap_or_else(|err| {
            warn!("failed to encode {} payload: {}", event, err);
            Value::Null
        });
        Self {
            event: event.to_string(),
            payload,
            epoch,
            ts: Some(Utc::now().to_rfc3339()),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SelectionChanged {
    pub question_id: u64,
    pub display_index: usize,
    pub selections: Vec<SelectionEntry>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionChanged {
    pub display_index: usize,
    pub status: ResolutionStatus,
    pub phase: QuestionPhase,
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExplanationReady {
    pub display_index: usize,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerTick {
    pub display_index: usize,
    pub elapsed_ms: u64,
    pub remaining_ms: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerExpired {
    pub display_index: usize,
}

/// Read-only projections of session state. Only the controller sends.
pub struct SessionEvents {
    pub(crate) selection: broadcast::Sender<SelectionChanged>,
    pub(crate) resolution: broadcast::Sender<ResolutionChanged>,
    pub(crate) explanation: broadcast::Sender<ExplanationReady>,
    pub(crate) tick: broadcast::Sender<TimerTick>,
    pub(crate) expired: broadcast::Sender<TimerExpired>,
}

impl SessionEvents {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            selection: broadcast::channel(capacity).0,
            resolution: broadcast::channel(capacity).0,
            explanation: broadcast::channel(capacity).0,
            tick: broadcast::channel(capacity).0,
            expired: broadcast::channel(capacity).0,
        }
    }

    pub fn selection_changed(&self) -> broadcast::Receiver<SelectionChanged> {
        self.selection.subscribe()
    }

    pub fn resolution_changed(&self) -> broadcast::Receiver<ResolutionChanged> {
        self.resolution.subscribe()
    }

    pub fn explanation_ready(&self) -> broadcast::Receiver<ExplanationReady> {
        self.explanation.subscribe()
    }

    pub fn timer_tick(&self) -> broadcast::Receiver<TimerTick> {
        self.tick.subscribe()
    }

    pub fn timer_expired(&self) -> broadcast::Receiver<TimerExpired> {
        self.expired.subscribe()
    }
}
