use async_trait::async_trait;
use log::{debug, warn};
use serde_json::json;
use std::sync::Arc;

use super::error::SideEffectError;
use super::hooks::{LifecycleEvent, PostCommitHook};
use crate::core::shared::enums::SenderType;
use crate::core::shared::models::{Reply, Ticket};
use crate::notifications::Notifier;
use crate::realtime::{
    BroadcastEvent, Broadcaster, ChannelScope, ConnectionId, TICKET_CREATED, TICKET_REPLIED,
    TICKET_SUBMITTED,
};

/// Public view of a ticket for real-time payloads. The internal key is left out.
pub fn ticket_payload(ticket: &Ticket) -> serde_json::Value {
    json!({
        "id": ticket.external_id,
        "owner_id": ticket.owner_id,
        "title": ticket.title,
        "status": ticket.status,
        "status_name": ticket.status.name(),
        "sender_type": ticket.sender_type,
        "created_at": ticket.created_at,
        "updated_at": ticket.updated_at,
    })
}

pub fn reply_payload(ticket: &Ticket, reply: &Reply) -> serde_json::Value {
    json!({
        "id": reply.id,
        "ticket_id": ticket.external_id,
        "author_id": reply.author_id,
        "message": reply.message,
        "sender_type": reply.sender_type,
        "attachments": reply.attachments,
        "created_at": reply.created_at,
    })
}

enum Delivery {
    Broadcast(BroadcastEvent),
    NotifyOwner { ticket: Ticket, reply: Reply },
}

/// Sends notifications and broadcasts after a commit.
///
/// By default each delivery is spawned on the runtime and `after_commit`
/// returns at once; [`SideEffectDispatcher::inline`] awaits them in place.
/// Either way a failed delivery is logged and never reported back.
#[derive(Clone)]
pub struct SideEffectDispatcher {
    notifier: Arc<dyn Notifier>,
    broadcaster: Arc<dyn Broadcaster>,
    spawn: bool,
}

impl SideEffectDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            notifier,
            broadcaster,
            spawn: true,
        }
    }

    pub fn inline(mut self) -> Self {
        self.spawn = false;
        self
    }

    fn plan(event: &LifecycleEvent, origin: Option<ConnectionId>) -> Vec<Delivery> {
        match event {
            LifecycleEvent::TicketCreated { ticket } => {
                let payload = json!({ "ticket": ticket_payload(ticket) });
                vec![
                    Delivery::Broadcast(
                        BroadcastEvent::new(
                            TICKET_SUBMITTED,
                            ChannelScope::Ticket(ticket.external_id),
                            payload.clone(),
                        )
                        .to_others(origin),
                    ),
                    Delivery::Broadcast(
                        BroadcastEvent::new(TICKET_CREATED, ChannelScope::Admin, payload)
                            .to_others(origin),
                    ),
                ]
            }
            LifecycleEvent::ReplyCreated { ticket, reply } => {
                let mut deliveries = Vec::with_capacity(2);
                if reply.sender_type == SenderType::Admin {
                    deliveries.push(Delivery::NotifyOwner {
                        ticket: ticket.clone(),
                        reply: reply.clone(),
                    });
                }
                deliveries.push(Delivery::Broadcast(
                    BroadcastEvent::new(
                        TICKET_REPLIED,
                        ChannelScope::Ticket(ticket.external_id),
                        json!({
                            "ticket": ticket_payload(ticket),
                            "reply": reply_payload(ticket, reply),
                        }),
                    )
                    .to_others(origin),
                ));
                deliveries
            }
            _ => Vec::new(),
        }
    }

    async fn deliver(
        notifier: Arc<dyn Notifier>,
        broadcaster: Arc<dyn Broadcaster>,
        delivery: Delivery,
    ) {
        match delivery {
            Delivery::Broadcast(event) => {
                let name = event.name.clone();
                let channel = event.channel;
                match broadcaster.broadcast(event).await {
                    Ok(receivers) => {
                        debug!("{} on {} reached {} receivers", name, channel, receivers)
                    }
                    Err(e) => warn!("Broadcast of {} on {} failed: {}", name, channel, e),
                }
            }
            Delivery::NotifyOwner { ticket, reply } => {
                if let Err(e) = notifier
                    .notify_admin_replied(ticket.owner_id, &ticket, &reply)
                    .await
                {
                    warn!(
                        "Admin reply notification for ticket {} failed: {}",
                        ticket.external_id, e
                    );
                }
            }
        }
    }
}

#[async_trait]
impl PostCommitHook for SideEffectDispatcher {
    fn name(&self) -> &'static str {
        "side_effects"
    }

    async fn after_commit(
        &self,
        event: &LifecycleEvent,
        origin: Option<ConnectionId>,
    ) -> Result<(), SideEffectError> {
        for delivery in Self::plan(event, origin) {
            let notifier = self.notifier.clone();
            let broadcaster = self.broadcaster.clone();
            if self.spawn {
                tokio::spawn(Self::deliver(notifier, broadcaster, delivery));
            } else {
                Self::deliver(notifier, broadcaster, delivery).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared::enums::TicketStatus;
    use crate::core::shared::models::ActorId;
    use crate::realtime::BroadcastHub;
    use chrono::Utc;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(ActorId, Uuid)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        fn channel(&self) -> &'static str {
            "recording"
        }

        async fn notify_admin_replied(
            &self,
            owner_id: ActorId,
            ticket: &Ticket,
            _reply: &Reply,
        ) -> Result<(), SideEffectError> {
            self.sent.lock().await.push((owner_id, ticket.external_id));
            Ok(())
        }
    }

    struct FailingBroadcaster;

    #[async_trait]
    impl Broadcaster for FailingBroadcaster {
        async fn broadcast(&self, _event: BroadcastEvent) -> Result<usize, SideEffectError> {
            Err(SideEffectError::Broadcast("pusher unreachable".into()))
        }
    }

    fn ticket() -> Ticket {
        let now = Utc::now();
        Ticket {
            id: 11,
            external_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            title: "Printer broken".to_string(),
            message: "It jams".to_string(),
            status: TicketStatus::Open,
            sender_type: SenderType::User,
            attachments: Vec::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn reply(ticket: &Ticket, sender_type: SenderType) -> Reply {
        let now = Utc::now();
        Reply {
            id: 3,
            ticket_id: ticket.id,
            author_id: Uuid::new_v4(),
            message: "Fixed".to_string(),
            sender_type,
            attachments: Vec::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn test_payload_hides_internal_key() {
        let ticket = ticket();
        let payload = ticket_payload(&ticket);
        assert_eq!(payload["id"], json!(ticket.external_id));
        assert_eq!(payload["status"], "open");
        assert_eq!(payload["status_name"], "OPEN");
    }

    #[tokio::test]
    async fn test_ticket_created_broadcasts_on_ticket_and_admin_channels() {
        let hub = Arc::new(BroadcastHub::new(16));
        let ticket = ticket();
        let origin = ConnectionId::new();
        let mut watcher = hub.subscribe(
            ConnectionId::new(),
            [ChannelScope::Ticket(ticket.external_id), ChannelScope::Admin],
        );
        let mut author = hub.subscribe(origin, [ChannelScope::Ticket(ticket.external_id)]);

        let dispatcher =
            SideEffectDispatcher::new(Arc::new(RecordingNotifier::default()), hub.clone()).inline();
        dispatcher
            .after_commit(&LifecycleEvent::TicketCreated { ticket }, Some(origin))
            .await
            .unwrap();

        assert_eq!(watcher.recv().await.unwrap().name, TICKET_SUBMITTED);
        assert_eq!(watcher.recv().await.unwrap().name, TICKET_CREATED);
        assert!(author.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_admin_reply_notifies_owner_user_reply_does_not() {
        let hub = Arc::new(BroadcastHub::new(16));
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = SideEffectDispatcher::new(notifier.clone(), hub.clone()).inline();
        let ticket = ticket();
        let mut watcher =
            hub.subscribe(ConnectionId::new(), [ChannelScope::Ticket(ticket.external_id)]);

        let admin_reply = reply(&ticket, SenderType::Admin);
        dispatcher
            .after_commit(
                &LifecycleEvent::ReplyCreated {
                    ticket: ticket.clone(),
                    reply: admin_reply,
                },
                None,
            )
            .await
            .unwrap();

        let user_reply = reply(&ticket, SenderType::User);
        dispatcher
            .after_commit(
                &LifecycleEvent::ReplyCreated {
                    ticket: ticket.clone(),
                    reply: user_reply,
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(
            *notifier.sent.lock().await,
            vec![(ticket.owner_id, ticket.external_id)]
        );
        assert_eq!(watcher.recv().await.unwrap().name, TICKET_REPLIED);
        assert_eq!(watcher.recv().await.unwrap().name, TICKET_REPLIED);
    }

    #[tokio::test]
    async fn test_failing_broadcaster_is_swallowed() {
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher =
            SideEffectDispatcher::new(notifier.clone(), Arc::new(FailingBroadcaster)).inline();
        let ticket = ticket();
        let result = dispatcher
            .after_commit(
                &LifecycleEvent::ReplyCreated {
                    reply: reply(&ticket, SenderType::Admin),
                    ticket,
                },
                None,
            )
            .await;
        assert!(result.is_ok());
        assert_eq!(notifier.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_other_events_dispatch_nothing() {
        let ticket = ticket();
        let event = LifecycleEvent::TicketUpdated { ticket };
        assert!(SideEffectDispatcher::plan(&event, None).is_empty());
    }
}
