use std::collections::BTreeSet;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use kameo::actor::ActorRef;
use kameo::request::MessageSend;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::websocket::actor::{KlineSyncActor, KlineSyncTell};
use crate::websocket::types::{ChannelCommand, ConnectionStatus, StreamStats, WebSocketError};

type PushStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum SessionEnd {
    /// Server closed the socket or the stream ended
    Closed,
    /// Command channel or the consuming actor is gone
    Shutdown,
}

/// Drives the single push connection shared by every subscription.
pub struct ConnectionManager {
    url: String,
    stats: StreamStats,
    status: ConnectionStatus,
    reconnect_delay: Duration,
    ping_interval: Duration,
    /// Topics joined on the wire; replayed after every reconnect
    active_topics: BTreeSet<String>,
    next_request_id: i64,
}

impl ConnectionManager {
    pub fn new(url: String, ping_interval: Duration, reconnect_delay: Duration) -> Self {
        Self {
            url,
            stats: StreamStats::new(),
            status: ConnectionStatus::Closed,
            reconnect_delay,
            ping_interval,
            active_topics: BTreeSet::new(),
            next_request_id: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn active_topics(&self) -> impl Iterator<Item = &str> {
        self.active_topics.iter().map(String::as_str)
    }

    /// Track topic membership. Returns whether the wire needs a frame for it.
    pub fn apply_command(&mut self, command: &ChannelCommand) -> bool {
        match command {
            ChannelCommand::Subscribe(topic) => self.active_topics.insert(topic.clone()),
            ChannelCommand::Unsubscribe(topic) => self.active_topics.remove(topic),
        }
    }

    fn frame_for(&mut self, command: &ChannelCommand) -> WsMessage {
        self.next_request_id += 1;
        WsMessage::Text(command.to_frame(self.next_request_id))
    }

    /// Connect, stream frames into `sink`, and reconnect after a fixed delay until
    /// the command channel closes. Never returns an error: every failure ends in a retry.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<ChannelCommand>, sink: ActorRef<KlineSyncActor>) {
        let mut attempt: u32 = 0;
        let mut outage_reported = false;

        loop {
            attempt += 1;
            self.status = if attempt == 1 && self.stats.sessions == 0 {
                ConnectionStatus::Connecting
            } else {
                ConnectionStatus::Reconnecting { attempt }
            };
            info!("🔌 Connecting to {} ({})", self.url, self.status);

            match connect_async(self.url.as_str()).await {
                Ok((stream, _)) => {
                    self.status = ConnectionStatus::Connected;
                    self.stats.record_session();
                    attempt = 0;
                    info!("✅ Push connection established, joining {} topics", self.active_topics.len());

                    outage_reported = false;
                    if sink.tell(KlineSyncTell::ConnectionRestored).send().await.is_err() {
                        return;
                    }

                    match self.run_session(stream, &mut commands, &sink).await {
                        Ok(SessionEnd::Shutdown) => {
                            self.status = ConnectionStatus::Closed;
                            info!("🛑 Push connection shut down after {} frames", self.stats.frames);
                            return;
                        }
                        Ok(SessionEnd::Closed) => warn!("Push connection closed by server"),
                        Err(e) => warn!("Push connection failed: {}", e),
                    }
                }
                Err(e) => warn!("❌ Push connection attempt {} failed: {}", attempt, e),
            }

            self.status = ConnectionStatus::Reconnecting { attempt: attempt + 1 };
            if !outage_reported {
                outage_reported = true;
                if sink.tell(KlineSyncTell::ConnectionLost).send().await.is_err() {
                    return;
                }
            }

            if !self.wait_before_reconnect(&mut commands).await {
                return;
            }
        }
    }

    /// Sleep out the reconnect delay while still tracking membership changes.
    /// Returns false once the command channel is closed.
    async fn wait_before_reconnect(&mut self, commands: &mut mpsc::UnboundedReceiver<ChannelCommand>) -> bool {
        let delay = sleep(self.reconnect_delay);
        tokio::pin!(delay);

        loop {
            tokio::select! {
                _ = &mut delay => return true,
                command = commands.recv() => match command {
                    Some(command) => {
                        self.apply_command(&command);
                    }
                    None => return false,
                },
            }
        }
    }

    async fn run_session(
        &mut self,
        stream: PushStream,
        commands: &mut mpsc::UnboundedReceiver<ChannelCommand>,
        sink: &ActorRef<KlineSyncActor>,
    ) -> Result<SessionEnd, WebSocketError> {
        let (mut write, mut read) = stream.split();

        let replay: Vec<ChannelCommand> = self
            .active_topics
            .iter()
            .cloned()
            .map(ChannelCommand::Subscribe)
            .collect();
        for command in &replay {
            let frame = self.frame_for(command);
            write
                .send(frame)
                .await
                .map_err(|e| WebSocketError::Subscription(format!("{}: {}", command.topic(), e)))?;
        }

        let mut heartbeat = tokio::time::interval(self.ping_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    write
                        .send(WsMessage::Ping(Vec::new()))
                        .await
                        .map_err(|e| WebSocketError::Connection(format!("heartbeat failed: {}", e)))?;
                }
                command = commands.recv() => {
                    let Some(command) = command else {
                        let _ = write.send(WsMessage::Close(None)).await;
                        return Ok(SessionEnd::Shutdown);
                    };
                    if self.apply_command(&command) {
                        let frame = self.frame_for(&command);
                        write
                            .send(frame)
                            .await
                            .map_err(|e| WebSocketError::Subscription(format!("{}: {}", command.topic(), e)))?;
                        debug!("📨 Sent {:?}", command);
                    }
                }
                frame = read.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        self.stats.record_frame();
                        if sink.tell(KlineSyncTell::PushFrame(text)).send().await.is_err() {
                            return Ok(SessionEnd::Shutdown);
                        }
                    }
                    Some(Ok(WsMessage::Ping(payload))) => {
                        write
                            .send(WsMessage::Pong(payload))
                            .await
                            .map_err(|e| WebSocketError::Connection(format!("pong failed: {}", e)))?;
                    }
                    Some(Ok(WsMessage::Pong(_))) => debug!("🏓 pong"),
                    Some(Ok(WsMessage::Close(reason))) => {
                        info!("Push connection closed: {:?}", reason);
                        return Ok(SessionEnd::Closed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(WebSocketError::Connection(e.to_string())),
                    None => return Ok(SessionEnd::Closed),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ConnectionManager {
        ConnectionManager::new(
            "wss://example.invalid/stream".to_string(),
            Duration::from_secs(20),
            Duration::from_secs(3),
        )
    }

    #[test]
    fn test_topic_membership_is_deduplicated() {
        let mut manager = manager();
        let subscribe = ChannelCommand::Subscribe("kl@14@0xabc@1m".to_string());

        assert!(manager.apply_command(&subscribe));
        assert!(!manager.apply_command(&subscribe));
        assert_eq!(manager.active_topics().collect::<Vec<_>>(), vec!["kl@14@0xabc@1m"]);

        let unsubscribe = ChannelCommand::Unsubscribe("kl@14@0xabc@1m".to_string());
        assert!(manager.apply_command(&unsubscribe));
        assert!(!manager.apply_command(&unsubscribe));
        assert_eq!(manager.active_topics().count(), 0);
    }

    #[test]
    fn test_frames_use_increasing_request_ids() {
        let mut manager = manager();
        let command = ChannelCommand::Subscribe("kl@16@mint@5m".to_string());

        let ids: Vec<i64> = (0..2)
            .map(|_| match manager.frame_for(&command) {
                WsMessage::Text(text) => {
                    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                    value["id"].as_i64().unwrap()
                }
                other => panic!("unexpected frame {:?}", other),
            })
            .collect();

        assert!(ids[1] > ids[0]);
        assert_eq!(manager.status(), &ConnectionStatus::Closed);
    }
}
