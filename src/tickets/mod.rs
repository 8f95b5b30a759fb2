//! Ticket and reply lifecycle.
//!
//! [`TicketService`] validates input, classifies the sender, performs each
//! mutation as one atomic store call and then runs the post-commit hooks in
//! order: cache invalidation first, then any registered side-effect
//! dispatcher. Authorization is decided by the caller through
//! [`crate::security::policy`] before a method here is invoked.

pub mod dispatch;
pub mod error;
pub mod hooks;
#[cfg(feature = "postgres")]
pub mod pg_store;
pub mod store;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

use crate::cache::{owner_tickets_key, TicketCache, ALL_TICKETS_KEY};
use crate::core::config::TicketsConfig;
use crate::core::shared::enums::{SenderType, TicketStatus};
use crate::core::shared::models::{
    Actor, AttachmentRef, Page, Reply, ReplyFields, Ticket, TicketFields, TicketWithReplies,
};
use crate::realtime::ConnectionId;
use crate::security::rbac::classify;
use crate::security::validation::{ValidationError, ValidationErrors, Validator};

pub use dispatch::SideEffectDispatcher;
pub use error::{HelpdeskError, HelpdeskResult, SideEffectError};
pub use hooks::{CacheInvalidationHook, HookChain, LifecycleEvent, PostCommitHook};
#[cfg(feature = "postgres")]
pub use pg_store::PgTicketStore;
pub use store::{InMemoryTicketStore, NewReply, NewTicket, TicketChanges, TicketStore};

/// List row as kept in the cache. `Ticket` leaves its internal key out of
/// its serialized form, so the cached copy carries it alongside.
#[derive(Serialize, Deserialize)]
struct CachedTicket {
    id: i64,
    ticket: Ticket,
}

impl From<Ticket> for CachedTicket {
    fn from(ticket: Ticket) -> Self {
        Self {
            id: ticket.id,
            ticket,
        }
    }
}

impl From<CachedTicket> for Ticket {
    fn from(cached: CachedTicket) -> Self {
        Ticket {
            id: cached.id,
            ..cached.ticket
        }
    }
}

pub struct TicketService {
    store: Arc<dyn TicketStore>,
    cache: TicketCache,
    hooks: HookChain,
    config: TicketsConfig,
}

impl TicketService {
    /// Registers cache invalidation as the first post-commit hook.
    pub fn new(store: Arc<dyn TicketStore>, cache: TicketCache, config: TicketsConfig) -> Self {
        let mut hooks = HookChain::new();
        hooks.push(Arc::new(CacheInvalidationHook::new(cache.clone())));
        Self {
            store,
            cache,
            hooks,
            config,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn PostCommitHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn with_dispatcher(self, dispatcher: SideEffectDispatcher) -> Self {
        self.with_hook(Arc::new(dispatcher))
    }

    pub fn config(&self) -> &TicketsConfig {
        &self.config
    }

    pub fn cache(&self) -> &TicketCache {
        &self.cache
    }

    pub fn hook_names(&self) -> Vec<&'static str> {
        self.hooks.names()
    }

    /// Runs the hook chain on its own task. Dropping the caller after the
    /// commit does not cancel it.
    async fn committed(&self, event: LifecycleEvent, origin: Option<ConnectionId>) {
        let hooks = self.hooks.clone();
        let name = event.name();
        let task = tokio::spawn(async move { hooks.run(&event, origin).await });
        if let Err(e) = task.await {
            warn!("Post-commit hooks for {} did not complete: {}", name, e);
        }
    }

    async fn cached_list<F, Fut>(&self, key: &str, load: F) -> HelpdeskResult<Vec<Ticket>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = HelpdeskResult<Vec<Ticket>>>,
    {
        let rows: Vec<CachedTicket> = self
            .cache
            .get_or_compute(key, || async move {
                let tickets = load().await?;
                Ok::<_, HelpdeskError>(tickets.into_iter().map(CachedTicket::from).collect())
            })
            .await?;
        Ok(rows.into_iter().map(Ticket::from).collect())
    }

    async fn parent_of(&self, reply: &Reply) -> HelpdeskResult<Ticket> {
        self.store
            .find_ticket_by_id(reply.ticket_id)
            .await?
            .ok_or_else(HelpdeskError::ticket_not_found)
    }

    pub async fn create_ticket(
        &self,
        actor: &Actor,
        fields: TicketFields,
        attachment: Option<AttachmentRef>,
        origin: Option<ConnectionId>,
    ) -> HelpdeskResult<Ticket> {
        Validator::new()
            .required_text(fields.title.as_deref(), "title", self.config.title_max)
            .required_text(fields.message.as_deref(), "message", self.config.message_max)
            .validate()?;

        let ticket = self
            .store
            .insert_ticket(NewTicket {
                external_id: None,
                owner_id: actor.id,
                title: fields.title.unwrap_or_default(),
                message: fields.message.unwrap_or_default(),
                sender_type: classify(actor),
                attachment,
            })
            .await?;

        info!(
            "Ticket {} created by {} as {}",
            ticket.external_id, actor.id, ticket.sender_type
        );
        self.committed(
            LifecycleEvent::TicketCreated {
                ticket: ticket.clone(),
            },
            origin,
        )
        .await;
        Ok(ticket)
    }

    /// Applies only the supplied fields; blank text fields are left as they
    /// are. Status is last-writer-wins.
    pub async fn update_ticket(
        &self,
        ticket: &Ticket,
        fields: TicketFields,
        origin: Option<ConnectionId>,
    ) -> HelpdeskResult<Ticket> {
        let statuses = TicketStatus::values();
        Validator::new()
            .optional_text(fields.title.as_deref(), "title", self.config.title_max)
            .optional_text(fields.message.as_deref(), "message", self.config.message_max)
            .optional_one_of(fields.status.as_deref(), "status", &statuses)
            .validate()?;

        let status = fields
            .status
            .as_deref()
            .map(str::parse::<TicketStatus>)
            .transpose()
            .map_err(|message| {
                let mut errors = ValidationErrors::new();
                errors.add_error(ValidationError::InvalidValue {
                    field: "status".to_string(),
                    message,
                });
                HelpdeskError::Validation(errors)
            })?;

        let changes = TicketChanges {
            title: fields.title.filter(|t| !t.trim().is_empty()),
            message: fields.message.filter(|m| !m.trim().is_empty()),
            status,
        };
        if changes.is_empty() {
            return self
                .store
                .find_ticket_by_id(ticket.id)
                .await?
                .filter(|t| !t.is_trashed())
                .ok_or_else(HelpdeskError::ticket_not_found);
        }

        let updated = self.store.update_ticket(ticket.id, changes).await?;
        info!(
            "Ticket {} updated (status {})",
            updated.external_id, updated.status
        );
        self.committed(
            LifecycleEvent::TicketUpdated {
                ticket: updated.clone(),
            },
            origin,
        )
        .await;
        Ok(updated)
    }

    /// A staff reply forces the ticket to in-progress; any other reply only
    /// touches it. Both happen in the same store call as the insert.
    pub async fn create_reply(
        &self,
        actor: &Actor,
        ticket: &Ticket,
        fields: ReplyFields,
        attachment: Option<AttachmentRef>,
        origin: Option<ConnectionId>,
    ) -> HelpdeskResult<Reply> {
        Validator::new()
            .required_text(fields.message.as_deref(), "message", self.config.message_max)
            .validate()?;

        let sender_type = classify(actor);
        let status = (sender_type == SenderType::Admin).then_some(TicketStatus::InProgress);

        let (reply, ticket) = self
            .store
            .insert_reply(
                NewReply {
                    ticket_id: ticket.id,
                    author_id: actor.id,
                    message: fields.message.unwrap_or_default(),
                    sender_type,
                    attachment,
                },
                status,
            )
            .await?;

        info!(
            "Reply {} added to ticket {} by {} as {}",
            reply.id, ticket.external_id, actor.id, sender_type
        );
        self.committed(
            LifecycleEvent::ReplyCreated {
                ticket,
                reply: reply.clone(),
            },
            origin,
        )
        .await;
        Ok(reply)
    }

    /// Tickets owned by `actor`, newest first.
    pub async fn list_tickets(&self, actor: &Actor, page: usize) -> HelpdeskResult<Page<Ticket>> {
        let owner_id = actor.id;
        let tickets = self
            .cached_list(&owner_tickets_key(owner_id), || {
                self.store.tickets_for_owner(owner_id)
            })
            .await?;
        Ok(Page::from_ordered(&tickets, page, self.config.page_size))
    }

    /// Every ticket, newest first. Staff listing; gate with `viewAny` plus a
    /// staff check before calling.
    pub async fn list_all_tickets(&self, page: usize) -> HelpdeskResult<Page<Ticket>> {
        let tickets = self
            .cached_list(ALL_TICKETS_KEY, || self.store.all_tickets())
            .await?;
        Ok(Page::from_ordered(&tickets, page, self.config.page_size))
    }

    pub async fn find_ticket(&self, external_id: Uuid) -> HelpdeskResult<Ticket> {
        self.store
            .find_ticket(external_id, false)
            .await?
            .ok_or_else(HelpdeskError::ticket_not_found)
    }

    pub async fn find_ticket_with_trashed(&self, external_id: Uuid) -> HelpdeskResult<Ticket> {
        self.store
            .find_ticket(external_id, true)
            .await?
            .ok_or_else(HelpdeskError::ticket_not_found)
    }

    /// The ticket with its live replies, oldest first.
    pub async fn show_ticket(&self, external_id: Uuid) -> HelpdeskResult<TicketWithReplies> {
        let ticket = self.find_ticket(external_id).await?;
        let replies = self.store.replies_for_ticket(ticket.id).await?;
        Ok(TicketWithReplies { ticket, replies })
    }

    /// Replies of a ticket, newest first.
    pub async fn list_replies(&self, ticket: &Ticket, page: usize) -> HelpdeskResult<Page<Reply>> {
        let mut replies = self.store.replies_for_ticket(ticket.id).await?;
        replies.reverse();
        Ok(Page::from_ordered(&replies, page, self.config.page_size))
    }

    /// A live reply of `ticket`. A reply of another ticket is reported missing.
    pub async fn find_reply(&self, ticket: &Ticket, reply_id: i64) -> HelpdeskResult<Reply> {
        self.store
            .find_reply(reply_id)
            .await?
            .filter(|r| r.belongs_to(ticket) && !r.is_trashed())
            .ok_or_else(HelpdeskError::reply_not_found)
    }

    pub async fn update_reply(
        &self,
        reply: &Reply,
        fields: ReplyFields,
        origin: Option<ConnectionId>,
    ) -> HelpdeskResult<Reply> {
        Validator::new()
            .required_text(fields.message.as_deref(), "message", self.config.message_max)
            .validate()?;

        let updated = self
            .store
            .update_reply_message(reply.id, fields.message.unwrap_or_default())
            .await?;
        let ticket = self.parent_of(&updated).await?;

        info!("Reply {} on ticket {} updated", updated.id, ticket.external_id);
        self.committed(
            LifecycleEvent::ReplyUpdated {
                ticket,
                reply: updated.clone(),
            },
            origin,
        )
        .await;
        Ok(updated)
    }

    pub async fn delete_reply(
        &self,
        reply: &Reply,
        origin: Option<ConnectionId>,
    ) -> HelpdeskResult<Reply> {
        let deleted = self.store.soft_delete_reply(reply.id).await?;
        let ticket = self.parent_of(&deleted).await?;

        info!("Reply {} on ticket {} deleted", deleted.id, ticket.external_id);
        self.committed(
            LifecycleEvent::ReplyDeleted {
                ticket,
                reply: deleted.clone(),
            },
            origin,
        )
        .await;
        Ok(deleted)
    }

    pub async fn delete_ticket(
        &self,
        ticket: &Ticket,
        origin: Option<ConnectionId>,
    ) -> HelpdeskResult<Ticket> {
        let deleted = self.store.soft_delete_ticket(ticket.id).await?;
        info!("Ticket {} moved to trash", deleted.external_id);
        self.committed(
            LifecycleEvent::TicketDeleted {
                ticket: deleted.clone(),
            },
            origin,
        )
        .await;
        Ok(deleted)
    }

    pub async fn restore_ticket(
        &self,
        ticket: &Ticket,
        origin: Option<ConnectionId>,
    ) -> HelpdeskResult<Ticket> {
        let restored = self.store.restore_ticket(ticket.id).await?;
        info!("Ticket {} restored", restored.external_id);
        self.committed(
            LifecycleEvent::TicketRestored {
                ticket: restored.clone(),
            },
            origin,
        )
        .await;
        Ok(restored)
    }

    /// Removes the ticket and its replies for good.
    pub async fn force_delete_ticket(
        &self,
        ticket: &Ticket,
        origin: Option<ConnectionId>,
    ) -> HelpdeskResult<Ticket> {
        let removed = self.store.force_delete_ticket(ticket.id).await?;
        info!("Ticket {} permanently deleted", removed.external_id);
        self.committed(
            LifecycleEvent::TicketForceDeleted {
                ticket: removed.clone(),
            },
            origin,
        )
        .await;
        Ok(removed)
    }

    pub async fn attach_to_ticket(
        &self,
        ticket: &Ticket,
        attachment: AttachmentRef,
        origin: Option<ConnectionId>,
    ) -> HelpdeskResult<Ticket> {
        let updated = self.store.attach_to_ticket(ticket.id, attachment).await?;
        self.committed(
            LifecycleEvent::TicketUpdated {
                ticket: updated.clone(),
            },
            origin,
        )
        .await;
        Ok(updated)
    }

    pub async fn attach_to_reply(
        &self,
        reply: &Reply,
        attachment: AttachmentRef,
        origin: Option<ConnectionId>,
    ) -> HelpdeskResult<Reply> {
        let updated = self.store.attach_to_reply(reply.id, attachment).await?;
        let ticket = self.parent_of(&updated).await?;
        self.committed(
            LifecycleEvent::ReplyUpdated {
                ticket,
                reply: updated.clone(),
            },
            origin,
        )
        .await;
        Ok(updated)
    }
}
