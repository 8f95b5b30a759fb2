use async_trait::async_trait;
use log::warn;
use std::sync::Arc;

use super::error::SideEffectError;
use crate::cache::TicketCache;
use crate::core::shared::models::{Reply, Ticket};
use crate::realtime::ConnectionId;

/// A committed mutation, as seen by post-commit hooks.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    TicketCreated { ticket: Ticket },
    TicketUpdated { ticket: Ticket },
    TicketDeleted { ticket: Ticket },
    TicketRestored { ticket: Ticket },
    TicketForceDeleted { ticket: Ticket },
    ReplyCreated { ticket: Ticket, reply: Reply },
    ReplyUpdated { ticket: Ticket, reply: Reply },
    ReplyDeleted { ticket: Ticket, reply: Reply },
}

impl LifecycleEvent {
    /// The affected ticket; for reply events, the reply's parent.
    pub fn ticket(&self) -> &Ticket {
        match self {
            Self::TicketCreated { ticket }
            | Self::TicketUpdated { ticket }
            | Self::TicketDeleted { ticket }
            | Self::TicketRestored { ticket }
            | Self::TicketForceDeleted { ticket }
            | Self::ReplyCreated { ticket, .. }
            | Self::ReplyUpdated { ticket, .. }
            | Self::ReplyDeleted { ticket, .. } => ticket,
        }
    }

    pub fn reply(&self) -> Option<&Reply> {
        match self {
            Self::ReplyCreated { reply, .. }
            | Self::ReplyUpdated { reply, .. }
            | Self::ReplyDeleted { reply, .. } => Some(reply),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::TicketCreated { .. } => "ticket.created",
            Self::TicketUpdated { .. } => "ticket.updated",
            Self::TicketDeleted { .. } => "ticket.deleted",
            Self::TicketRestored { .. } => "ticket.restored",
            Self::TicketForceDeleted { .. } => "ticket.force_deleted",
            Self::ReplyCreated { .. } => "reply.created",
            Self::ReplyUpdated { .. } => "reply.updated",
            Self::ReplyDeleted { .. } => "reply.deleted",
        }
    }
}

#[async_trait]
pub trait PostCommitHook: Send + Sync {
    fn name(&self) -> &'static str;

    async fn after_commit(
        &self,
        event: &LifecycleEvent,
        origin: Option<ConnectionId>,
    ) -> Result<(), SideEffectError>;
}

/// Hooks run one after another in registration order. A failing hook is
/// logged and the next one still runs.
#[derive(Default, Clone)]
pub struct HookChain {
    hooks: Vec<Arc<dyn PostCommitHook>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, hook: Arc<dyn PostCommitHook>) {
        self.hooks.push(hook);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.hooks.iter().map(|h| h.name()).collect()
    }

    pub async fn run(&self, event: &LifecycleEvent, origin: Option<ConnectionId>) {
        for hook in &self.hooks {
            if let Err(e) = hook.after_commit(event, origin).await {
                warn!(
                    "Post-commit hook {} failed for {} on ticket {}: {}",
                    hook.name(),
                    event.name(),
                    event.ticket().external_id,
                    e
                );
            }
        }
    }
}

/// Evicts the global ticket list and the owner's list after every mutation.
pub struct CacheInvalidationHook {
    cache: TicketCache,
}

impl CacheInvalidationHook {
    pub fn new(cache: TicketCache) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl PostCommitHook for CacheInvalidationHook {
    fn name(&self) -> &'static str {
        "cache_invalidation"
    }

    async fn after_commit(
        &self,
        event: &LifecycleEvent,
        _origin: Option<ConnectionId>,
    ) -> Result<(), SideEffectError> {
        self.cache
            .invalidate_ticket_lists(event.ticket().owner_id)
            .await
            .map_err(|e| SideEffectError::Cache(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{owner_tickets_key, CacheStore, InMemoryCacheStore, ALL_TICKETS_KEY};
    use crate::core::shared::enums::{SenderType, TicketStatus};
    use chrono::Utc;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    fn ticket() -> Ticket {
        let now = Utc::now();
        Ticket {
            id: 1,
            external_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            title: "t".to_string(),
            message: "m".to_string(),
            status: TicketStatus::Open,
            sender_type: SenderType::User,
            attachments: Vec::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    struct Recording {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    #[async_trait]
    impl PostCommitHook for Recording {
        fn name(&self) -> &'static str {
            self.label
        }

        async fn after_commit(
            &self,
            _event: &LifecycleEvent,
            _origin: Option<ConnectionId>,
        ) -> Result<(), SideEffectError> {
            self.log.lock().await.push(self.label);
            if self.fail {
                Err(SideEffectError::Broadcast("down".into()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_hooks_run_in_order_past_failures() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = HookChain::new();
        for (label, fail) in [("first", true), ("second", false)] {
            chain.push(Arc::new(Recording {
                label,
                log: log.clone(),
                fail,
            }));
        }

        chain
            .run(&LifecycleEvent::TicketCreated { ticket: ticket() }, None)
            .await;
        assert_eq!(*log.lock().await, vec!["first", "second"]);
        assert_eq!(chain.names(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_cache_hook_evicts_owner_and_global_lists() {
        let store = Arc::new(InMemoryCacheStore::new());
        let cache = TicketCache::new(store.clone(), Duration::from_secs(60));
        let hook = CacheInvalidationHook::new(cache);
        let ticket = ticket();
        let ttl = Duration::from_secs(60);

        store.put(ALL_TICKETS_KEY, "[]".into(), ttl).await.unwrap();
        store
            .put(&owner_tickets_key(ticket.owner_id), "[]".into(), ttl)
            .await
            .unwrap();

        let event = LifecycleEvent::TicketUpdated { ticket };
        hook.after_commit(&event, None).await.unwrap();
        assert!(store.is_empty().await);

        // second eviction finds nothing and still succeeds
        hook.after_commit(&event, None).await.unwrap();
    }
}
