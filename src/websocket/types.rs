use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::historical::structs::TimestampMS;

/// Lifecycle of one series subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionState {
    Idle,
    Backfilling,
    Live,
    /// Push channel dropped; re-enters Backfilling once it is restored
    Stale,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionState::Idle => write!(f, "Idle"),
            SubscriptionState::Backfilling => write!(f, "Backfilling"),
            SubscriptionState::Live => write!(f, "Live"),
            SubscriptionState::Stale => write!(f, "Stale"),
        }
    }
}

/// Outbound topic membership change for the shared push connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCommand {
    Subscribe(String),
    Unsubscribe(String),
}

impl ChannelCommand {
    pub fn topic(&self) -> &str {
        match self {
            ChannelCommand::Subscribe(topic) | ChannelCommand::Unsubscribe(topic) => topic,
        }
    }

    /// Wire frame: `{"id": <id>, "method": "SUBSCRIBE"|"UNSUBSCRIBE", "params": [topic]}`
    pub fn to_frame(&self, id: i64) -> String {
        let method = match self {
            ChannelCommand::Subscribe(_) => "SUBSCRIBE",
            ChannelCommand::Unsubscribe(_) => "UNSUBSCRIBE",
        };
        serde_json::json!({
            "id": id,
            "method": method,
            "params": [self.topic()],
        })
        .to_string()
    }
}

/// State of the shared push connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    /// Waiting out the reconnect delay; `attempt` counts failures since the last session
    Reconnecting { attempt: u32 },
    Closed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connecting => f.write_str("connecting"),
            ConnectionStatus::Connected => f.write_str("connected"),
            ConnectionStatus::Reconnecting { attempt } => write!(f, "reconnecting #{}", attempt),
            ConnectionStatus::Closed => f.write_str("closed"),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum WebSocketError {
    #[error("Push connection failed: {0}")]
    Connection(String),

    #[error("Push frame is not JSON: {0}")]
    Parse(String),

    #[error("Malformed push payload: {0}")]
    MalformedPayload(String),

    #[error("Failed to send channel command: {0}")]
    Subscription(String),
}

/// Push feed counters. The connection counts sessions and raw frames; the
/// sync actor additionally classifies frames and merge outcomes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StreamStats {
    pub frames: u64,
    pub kline_updates: u64,
    pub acks: u64,
    pub ignored_streams: u64,
    pub rejected_frames: u64,
    pub bars_applied: u64,
    pub bars_dropped_late: u64,
    pub sessions: u32,
    pub last_frame_at: Option<TimestampMS>,
    pub session_started_at: Option<TimestampMS>,
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame(&mut self) {
        self.frames += 1;
        self.last_frame_at = Some(chrono::Utc::now().timestamp_millis());
    }

    pub fn record_session(&mut self) {
        self.sessions += 1;
        self.session_started_at = Some(chrono::Utc::now().timestamp_millis());
    }

    /// Share of frames that decoded into something usable
    pub fn accepted_ratio(&self) -> f64 {
        match self.frames {
            0 => 0.0,
            frames => (frames - self.rejected_frames.min(frames)) as f64 / frames as f64,
        }
    }
}
