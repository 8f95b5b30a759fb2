//! Real-time event fan-out.
//!
//! Events are published on named channels (`admin`, `tickets.{external_id}`,
//! `users.{actor_id}`) through a tokio broadcast channel. Each connected
//! client holds a [`Subscription`] that filters the shared stream down to the
//! channels it joined and drops events its own connection originated.

use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::core::shared::models::ActorId;
use crate::tickets::error::SideEffectError;

pub const TICKET_SUBMITTED: &str = "TicketSubmitted";
pub const TICKET_CREATED: &str = "TicketCreated";
pub const TICKET_REPLIED: &str = "TicketReplied";

/// Identifies one client connection so it can be excluded from its own events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelScope {
    Admin,
    Ticket(Uuid),
    User(ActorId),
}

impl ChannelScope {
    pub fn parse(name: &str) -> Option<Self> {
        if name == "admin" {
            return Some(Self::Admin);
        }
        if let Some(id) = name.strip_prefix("tickets.") {
            return Uuid::parse_str(id).ok().map(Self::Ticket);
        }
        if let Some(id) = name.strip_prefix("users.") {
            return Uuid::parse_str(id).ok().map(Self::User);
        }
        None
    }
}

impl std::fmt::Display for ChannelScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Admin => write!(f, "admin"),
            Self::Ticket(id) => write!(f, "tickets.{}", id),
            Self::User(id) => write!(f, "users.{}", id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastEvent {
    pub name: String,
    pub channel: ChannelScope,
    pub payload: serde_json::Value,
    pub exclude: Option<ConnectionId>,
}

impl BroadcastEvent {
    pub fn new(name: impl Into<String>, channel: ChannelScope, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            channel,
            payload,
            exclude: None,
        }
    }

    /// Skip delivery to the connection that caused the event.
    pub fn to_others(mut self, origin: Option<ConnectionId>) -> Self {
        self.exclude = origin;
        self
    }
}

#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Returns the number of receivers the event was handed to.
    async fn broadcast(&self, event: BroadcastEvent) -> Result<usize, SideEffectError>;
}

pub struct BroadcastHub {
    sender: broadcast::Sender<BroadcastEvent>,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(
        &self,
        connection: ConnectionId,
        channels: impl IntoIterator<Item = ChannelScope>,
    ) -> Subscription {
        Subscription {
            connection,
            channels: channels.into_iter().collect(),
            receiver: self.sender.subscribe(),
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Broadcaster for BroadcastHub {
    async fn broadcast(&self, event: BroadcastEvent) -> Result<usize, SideEffectError> {
        let name = event.name.clone();
        let channel = event.channel;
        match self.sender.send(event) {
            Ok(receivers) => {
                debug!("Event {} broadcast on {} to {} receivers", name, channel, receivers);
                Ok(receivers)
            }
            Err(_) => {
                debug!("No active receivers for event {} on {}", name, channel);
                Ok(0)
            }
        }
    }
}

pub struct Subscription {
    connection: ConnectionId,
    channels: HashSet<ChannelScope>,
    receiver: broadcast::Receiver<BroadcastEvent>,
}

impl Subscription {
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn join(&mut self, channel: ChannelScope) {
        self.channels.insert(channel);
    }

    fn accepts(&self, event: &BroadcastEvent) -> bool {
        self.channels.contains(&event.channel) && event.exclude != Some(self.connection)
    }

    /// Next event for this connection, or `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<BroadcastEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "Connection {:?} lagged behind, {} events dropped",
                        self.connection, skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Drains already queued events without waiting.
    pub fn try_recv(&mut self) -> Option<BroadcastEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names_round_trip() {
        let id = Uuid::new_v4();
        let ticket = ChannelScope::Ticket(id);
        assert_eq!(ticket.to_string(), format!("tickets.{}", id));
        assert_eq!(ChannelScope::parse(&ticket.to_string()), Some(ticket));
        assert_eq!(ChannelScope::parse("admin"), Some(ChannelScope::Admin));
        assert_eq!(ChannelScope::parse("tickets.not-a-uuid"), None);
        assert_eq!(ChannelScope::parse("lobby"), None);
    }

    #[tokio::test]
    async fn test_broadcast_without_receivers_is_not_an_error() {
        let hub = BroadcastHub::new(8);
        let sent = hub
            .broadcast(BroadcastEvent::new(
                TICKET_CREATED,
                ChannelScope::Admin,
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(sent, 0);
    }

    #[tokio::test]
    async fn test_subscription_filters_channel_and_originator() {
        let hub = BroadcastHub::new(16);
        let ticket = ChannelScope::Ticket(Uuid::new_v4());
        let origin = ConnectionId::new();

        let mut author = hub.subscribe(origin, [ticket]);
        let mut watcher = hub.subscribe(ConnectionId::new(), [ticket]);
        let mut admin = hub.subscribe(ConnectionId::new(), [ChannelScope::Admin]);

        hub.broadcast(
            BroadcastEvent::new(TICKET_REPLIED, ticket, serde_json::json!({"n": 1}))
                .to_others(Some(origin)),
        )
        .await
        .unwrap();

        let received = watcher.recv().await.unwrap();
        assert_eq!(received.name, TICKET_REPLIED);
        assert!(author.try_recv().is_none());
        assert!(admin.try_recv().is_none());
    }
}
