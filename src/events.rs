//! Progress events pushed to interactive clients.

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

/// Event envelope streamed during an interactive research run.
///
/// Serializes as `{"type": "<kind>", "content": {...}}` so clients can
/// dispatch on the tag without knowing every payload shape.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "content", rename_all = "kebab-case")]
pub enum ResearchEvent {
    ProgressInit(ProgressInit),
    DepthDelta(DepthDelta),
    ActivityDelta(Activity),
    SourceDelta(SourceInfo),
    Finish(Finish),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressInit {
    pub max_depth: usize,
    pub total_steps: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DepthDelta {
    pub current: usize,
    pub max: usize,
    pub completed_steps: usize,
    pub total_steps: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub status: ActivityStatus,
    pub message: String,
    /// ISO-8601 timestamp of emission.
    pub timestamp: String,
    pub depth: usize,
    pub completed_steps: usize,
    pub total_steps: usize,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Search,
    Extract,
    Analyze,
    Reasoning,
    Synthesis,
    Thought,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Pending,
    Complete,
    Error,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SourceInfo {
    pub url: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Finish {
    pub content: String,
}

/// Write-only sink for progress events.
///
/// Emission never fails: a sink with no listener drops the event and the
/// research run carries on.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ResearchEvent);
}

/// Sink used in eval mode, where no progress protocol exists.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ResearchEvent) {}
}

/// Channel-backed sink feeding the interactive NDJSON stream.
pub struct ChannelSink {
    tx: UnboundedSender<ResearchEvent>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<ResearchEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ResearchEvent) {
        // The receiver may be gone if the client disconnected mid-run.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_tag_and_content() {
        let event = ResearchEvent::ProgressInit(ProgressInit {
            max_depth: 7,
            total_steps: 35,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress-init");
        assert_eq!(json["content"]["maxDepth"], 7);
        assert_eq!(json["content"]["totalSteps"], 35);
    }

    #[test]
    fn activity_keeps_its_own_type_field() {
        let event = ResearchEvent::ActivityDelta(Activity {
            kind: ActivityKind::Search,
            status: ActivityStatus::Pending,
            message: "Searching".to_string(),
            timestamp: "2025-01-01T00:00:00Z".to_string(),
            depth: 1,
            completed_steps: 0,
            total_steps: 35,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "activity-delta");
        assert_eq!(json["content"]["type"], "search");
        assert_eq!(json["content"]["status"], "pending");
        assert_eq!(json["content"]["completedSteps"], 0);
    }

    #[test]
    fn channel_sink_survives_dropped_receiver() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        let sink = ChannelSink::new(tx);
        sink.emit(ResearchEvent::Finish(Finish {
            content: "done".to_string(),
        }));
    }
}
