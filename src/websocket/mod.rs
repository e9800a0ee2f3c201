pub mod actor;
pub mod connection;
pub mod kline;
pub mod merge;
pub mod topics;
pub mod types;

#[cfg(test)]
mod tests;

pub use actor::{KlineSyncActor, KlineSyncAsk, KlineSyncReply, KlineSyncTell, SubscriptionInfo};
pub use connection::ConnectionManager;
pub use kline::{parse_push_frame, PushFrame, PushUpdate};
pub use merge::{MergeOutcome, RealtimeMergeEngine};
pub use topics::ChainRegistry;
pub use types::{ChannelCommand, ConnectionStatus, StreamStats, SubscriptionState, WebSocketError};
