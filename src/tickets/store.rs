//! Persistence port for tickets and replies.
//!
//! Every mutating method is one atomic unit: either all of its writes become
//! visible to readers or none do.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::error::{HelpdeskError, HelpdeskResult};
use crate::core::shared::enums::{SenderType, TicketStatus};
use crate::core::shared::models::{ActorId, AttachmentRef, Reply, Ticket};

#[derive(Debug, Clone)]
pub struct NewTicket {
    /// Generated by the store when absent.
    pub external_id: Option<Uuid>,
    pub owner_id: ActorId,
    pub title: String,
    pub message: String,
    pub sender_type: SenderType,
    pub attachment: Option<AttachmentRef>,
}

#[derive(Debug, Clone, Default)]
pub struct TicketChanges {
    pub title: Option<String>,
    pub message: Option<String>,
    pub status: Option<TicketStatus>,
}

impl TicketChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.message.is_none() && self.status.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct NewReply {
    pub ticket_id: i64,
    pub author_id: ActorId,
    pub message: String,
    pub sender_type: SenderType,
    pub attachment: Option<AttachmentRef>,
}

#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn insert_ticket(&self, new: NewTicket) -> HelpdeskResult<Ticket>;

    /// Applies only the supplied changes and bumps `updated_at`.
    async fn update_ticket(&self, id: i64, changes: TicketChanges) -> HelpdeskResult<Ticket>;

    async fn find_ticket(
        &self,
        external_id: Uuid,
        with_trashed: bool,
    ) -> HelpdeskResult<Option<Ticket>>;

    async fn find_ticket_by_id(&self, id: i64) -> HelpdeskResult<Option<Ticket>>;

    /// Non-deleted tickets of one owner, newest first.
    async fn tickets_for_owner(&self, owner_id: ActorId) -> HelpdeskResult<Vec<Ticket>>;

    /// Every non-deleted ticket, newest first.
    async fn all_tickets(&self) -> HelpdeskResult<Vec<Ticket>>;

    /// Inserts the reply and, in the same unit, either forces the parent
    /// ticket to `status` or only touches its `updated_at`.
    async fn insert_reply(
        &self,
        new: NewReply,
        status: Option<TicketStatus>,
    ) -> HelpdeskResult<(Reply, Ticket)>;

    async fn update_reply_message(&self, id: i64, message: String) -> HelpdeskResult<Reply>;

    async fn find_reply(&self, id: i64) -> HelpdeskResult<Option<Reply>>;

    /// Non-deleted replies of one ticket, oldest first.
    async fn replies_for_ticket(&self, ticket_id: i64) -> HelpdeskResult<Vec<Reply>>;

    async fn soft_delete_ticket(&self, id: i64) -> HelpdeskResult<Ticket>;

    async fn restore_ticket(&self, id: i64) -> HelpdeskResult<Ticket>;

    /// Removes the ticket row and all of its replies. Returns the removed ticket.
    async fn force_delete_ticket(&self, id: i64) -> HelpdeskResult<Ticket>;

    async fn soft_delete_reply(&self, id: i64) -> HelpdeskResult<Reply>;

    async fn attach_to_ticket(&self, id: i64, attachment: AttachmentRef) -> HelpdeskResult<Ticket>;

    async fn attach_to_reply(&self, id: i64, attachment: AttachmentRef) -> HelpdeskResult<Reply>;
}

fn newest_first<T, F>(items: &mut [T], key: F)
where
    F: Fn(&T) -> (chrono::DateTime<Utc>, i64),
{
    items.sort_by(|a, b| key(b).cmp(&key(a)));
}

#[derive(Default)]
struct StoreState {
    last_ticket_id: i64,
    last_reply_id: i64,
    tickets: BTreeMap<i64, Ticket>,
    replies: BTreeMap<i64, Reply>,
}

impl StoreState {
    fn live_ticket_mut(&mut self, id: i64) -> HelpdeskResult<&mut Ticket> {
        self.tickets
            .get_mut(&id)
            .filter(|t| !t.is_trashed())
            .ok_or_else(HelpdeskError::ticket_not_found)
    }

    fn live_reply_mut(&mut self, id: i64) -> HelpdeskResult<&mut Reply> {
        self.replies
            .get_mut(&id)
            .filter(|r| !r.is_trashed())
            .ok_or_else(HelpdeskError::reply_not_found)
    }
}

/// Store backed by process memory.
///
/// Each mutation takes the single write lock and finishes without awaiting,
/// so a cancelled caller either sees the whole mutation or none of it.
#[derive(Default)]
pub struct InMemoryTicketStore {
    state: RwLock<StoreState>,
}

impl InMemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Row counts including soft-deleted rows, as `(tickets, replies)`.
    pub async fn row_counts(&self) -> (usize, usize) {
        let state = self.state.read().await;
        (state.tickets.len(), state.replies.len())
    }
}

#[async_trait]
impl TicketStore for InMemoryTicketStore {
    async fn insert_ticket(&self, new: NewTicket) -> HelpdeskResult<Ticket> {
        let mut state = self.state.write().await;
        let external_id = new.external_id.unwrap_or_else(Uuid::new_v4);
        if state.tickets.values().any(|t| t.external_id == external_id) {
            return Err(HelpdeskError::Storage(format!(
                "Duplicate ticket external id {}",
                external_id
            )));
        }

        state.last_ticket_id += 1;
        let now = Utc::now();
        let ticket = Ticket {
            id: state.last_ticket_id,
            external_id,
            owner_id: new.owner_id,
            title: new.title,
            message: new.message,
            status: TicketStatus::Open,
            sender_type: new.sender_type,
            attachments: new.attachment.into_iter().collect(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        state.tickets.insert(ticket.id, ticket.clone());
        Ok(ticket)
    }

    async fn update_ticket(&self, id: i64, changes: TicketChanges) -> HelpdeskResult<Ticket> {
        let mut state = self.state.write().await;
        let ticket = state.live_ticket_mut(id)?;
        if let Some(title) = changes.title {
            ticket.title = title;
        }
        if let Some(message) = changes.message {
            ticket.message = message;
        }
        if let Some(status) = changes.status {
            ticket.status = status;
        }
        ticket.updated_at = Utc::now();
        Ok(ticket.clone())
    }

    async fn find_ticket(
        &self,
        external_id: Uuid,
        with_trashed: bool,
    ) -> HelpdeskResult<Option<Ticket>> {
        let state = self.state.read().await;
        Ok(state
            .tickets
            .values()
            .find(|t| t.external_id == external_id && (with_trashed || !t.is_trashed()))
            .cloned())
    }

    async fn find_ticket_by_id(&self, id: i64) -> HelpdeskResult<Option<Ticket>> {
        Ok(self.state.read().await.tickets.get(&id).cloned())
    }

    async fn tickets_for_owner(&self, owner_id: ActorId) -> HelpdeskResult<Vec<Ticket>> {
        let state = self.state.read().await;
        let mut tickets: Vec<Ticket> = state
            .tickets
            .values()
            .filter(|t| t.owner_id == owner_id && !t.is_trashed())
            .cloned()
            .collect();
        newest_first(&mut tickets, |t| (t.created_at, t.id));
        Ok(tickets)
    }

    async fn all_tickets(&self) -> HelpdeskResult<Vec<Ticket>> {
        let state = self.state.read().await;
        let mut tickets: Vec<Ticket> = state
            .tickets
            .values()
            .filter(|t| !t.is_trashed())
            .cloned()
            .collect();
        newest_first(&mut tickets, |t| (t.created_at, t.id));
        Ok(tickets)
    }

    async fn insert_reply(
        &self,
        new: NewReply,
        status: Option<TicketStatus>,
    ) -> HelpdeskResult<(Reply, Ticket)> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        let ticket = {
            let ticket = state.live_ticket_mut(new.ticket_id)?;
            if let Some(status) = status {
                ticket.status = status;
            }
            ticket.updated_at = now;
            ticket.clone()
        };

        state.last_reply_id += 1;
        let reply = Reply {
            id: state.last_reply_id,
            ticket_id: ticket.id,
            author_id: new.author_id,
            message: new.message,
            sender_type: new.sender_type,
            attachments: new.attachment.into_iter().collect(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        state.replies.insert(reply.id, reply.clone());
        Ok((reply, ticket))
    }

    async fn update_reply_message(&self, id: i64, message: String) -> HelpdeskResult<Reply> {
        let mut state = self.state.write().await;
        let reply = state.live_reply_mut(id)?;
        reply.message = message;
        reply.updated_at = Utc::now();
        Ok(reply.clone())
    }

    async fn find_reply(&self, id: i64) -> HelpdeskResult<Option<Reply>> {
        Ok(self.state.read().await.replies.get(&id).cloned())
    }

    async fn replies_for_ticket(&self, ticket_id: i64) -> HelpdeskResult<Vec<Reply>> {
        let state = self.state.read().await;
        let mut replies: Vec<Reply> = state
            .replies
            .values()
            .filter(|r| r.ticket_id == ticket_id && !r.is_trashed())
            .cloned()
            .collect();
        replies.sort_by_key(|r| (r.created_at, r.id));
        Ok(replies)
    }

    async fn soft_delete_ticket(&self, id: i64) -> HelpdeskResult<Ticket> {
        let mut state = self.state.write().await;
        let ticket = state.live_ticket_mut(id)?;
        ticket.deleted_at = Some(Utc::now());
        Ok(ticket.clone())
    }

    async fn restore_ticket(&self, id: i64) -> HelpdeskResult<Ticket> {
        let mut state = self.state.write().await;
        let ticket = state
            .tickets
            .get_mut(&id)
            .ok_or_else(HelpdeskError::ticket_not_found)?;
        ticket.deleted_at = None;
        ticket.updated_at = Utc::now();
        Ok(ticket.clone())
    }

    async fn force_delete_ticket(&self, id: i64) -> HelpdeskResult<Ticket> {
        let mut state = self.state.write().await;
        let ticket = state
            .tickets
            .remove(&id)
            .ok_or_else(HelpdeskError::ticket_not_found)?;
        state.replies.retain(|_, r| r.ticket_id != id);
        Ok(ticket)
    }

    async fn soft_delete_reply(&self, id: i64) -> HelpdeskResult<Reply> {
        let mut state = self.state.write().await;
        let reply = state.live_reply_mut(id)?;
        reply.deleted_at = Some(Utc::now());
        Ok(reply.clone())
    }

    async fn attach_to_ticket(&self, id: i64, attachment: AttachmentRef) -> HelpdeskResult<Ticket> {
        let mut state = self.state.write().await;
        let ticket = state.live_ticket_mut(id)?;
        ticket.attachments.push(attachment);
        ticket.updated_at = Utc::now();
        Ok(ticket.clone())
    }

    async fn attach_to_reply(&self, id: i64, attachment: AttachmentRef) -> HelpdeskResult<Reply> {
        let mut state = self.state.write().await;
        let reply = state.live_reply_mut(id)?;
        reply.attachments.push(attachment);
        reply.updated_at = Utc::now();
        Ok(reply.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_ticket(owner: ActorId, title: &str) -> NewTicket {
        NewTicket {
            external_id: None,
            owner_id: owner,
            title: title.to_string(),
            message: "details".to_string(),
            sender_type: SenderType::User,
            attachment: None,
        }
    }

    fn new_reply(ticket_id: i64, author: ActorId, sender_type: SenderType) -> NewReply {
        NewReply {
            ticket_id,
            author_id: author,
            message: "reply".to_string(),
            sender_type,
            attachment: None,
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_sequential_ids_and_open_status() {
        let store = InMemoryTicketStore::new();
        let owner = Uuid::new_v4();
        let first = store.insert_ticket(new_ticket(owner, "a")).await.unwrap();
        let second = store.insert_ticket(new_ticket(owner, "b")).await.unwrap();

        assert_eq!(first.id + 1, second.id);
        assert_eq!(first.status, TicketStatus::Open);
        assert_ne!(first.external_id, second.external_id);
        assert!(!first.external_id.is_nil());
    }

    #[tokio::test]
    async fn test_supplied_external_id_is_kept_and_unique() {
        let store = InMemoryTicketStore::new();
        let external_id = Uuid::new_v4();
        let mut new = new_ticket(Uuid::new_v4(), "a");
        new.external_id = Some(external_id);

        let ticket = store.insert_ticket(new.clone()).await.unwrap();
        assert_eq!(ticket.external_id, external_id);
        assert!(matches!(
            store.insert_ticket(new).await,
            Err(HelpdeskError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_listing_is_newest_first_and_scoped() {
        let store = InMemoryTicketStore::new();
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();
        store.insert_ticket(new_ticket(owner, "old")).await.unwrap();
        store.insert_ticket(new_ticket(other, "foreign")).await.unwrap();
        store.insert_ticket(new_ticket(owner, "new")).await.unwrap();

        let mine = store.tickets_for_owner(owner).await.unwrap();
        let titles: Vec<&str> = mine.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["new", "old"]);
        assert_eq!(store.all_tickets().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_reply_forces_status_atomically() {
        let store = InMemoryTicketStore::new();
        let ticket = store
            .insert_ticket(new_ticket(Uuid::new_v4(), "a"))
            .await
            .unwrap();

        let (reply, updated) = store
            .insert_reply(
                new_reply(ticket.id, Uuid::new_v4(), SenderType::Admin),
                Some(TicketStatus::InProgress),
            )
            .await
            .unwrap();
        assert!(reply.belongs_to(&updated));
        assert_eq!(updated.status, TicketStatus::InProgress);

        let (_, touched) = store
            .insert_reply(new_reply(ticket.id, ticket.owner_id, SenderType::User), None)
            .await
            .unwrap();
        assert_eq!(touched.status, TicketStatus::InProgress);
        assert!(touched.updated_at >= updated.updated_at);
    }

    #[tokio::test]
    async fn test_reply_to_missing_ticket_leaves_no_row() {
        let store = InMemoryTicketStore::new();
        let result = store
            .insert_reply(new_reply(42, Uuid::new_v4(), SenderType::Admin), None)
            .await;
        assert!(matches!(result, Err(HelpdeskError::NotFound(_))));
        assert_eq!(store.row_counts().await, (0, 0));
    }

    #[tokio::test]
    async fn test_soft_delete_restore_and_force_delete() {
        let store = InMemoryTicketStore::new();
        let owner = Uuid::new_v4();
        let ticket = store.insert_ticket(new_ticket(owner, "a")).await.unwrap();
        store
            .insert_reply(new_reply(ticket.id, owner, SenderType::User), None)
            .await
            .unwrap();

        store.soft_delete_ticket(ticket.id).await.unwrap();
        assert!(store.find_ticket(ticket.external_id, false).await.unwrap().is_none());
        assert!(store.find_ticket(ticket.external_id, true).await.unwrap().is_some());
        assert!(store.tickets_for_owner(owner).await.unwrap().is_empty());
        assert!(matches!(
            store.update_ticket(ticket.id, TicketChanges::default()).await,
            Err(HelpdeskError::NotFound(_))
        ));

        let restored = store.restore_ticket(ticket.id).await.unwrap();
        assert!(!restored.is_trashed());

        store.force_delete_ticket(ticket.id).await.unwrap();
        assert_eq!(store.row_counts().await, (0, 0));
    }

    #[tokio::test]
    async fn test_replies_oldest_first_without_trashed() {
        let store = InMemoryTicketStore::new();
        let owner = Uuid::new_v4();
        let ticket = store.insert_ticket(new_ticket(owner, "a")).await.unwrap();
        let (first, _) = store
            .insert_reply(new_reply(ticket.id, owner, SenderType::User), None)
            .await
            .unwrap();
        let (second, _) = store
            .insert_reply(new_reply(ticket.id, owner, SenderType::User), None)
            .await
            .unwrap();
        let (third, _) = store
            .insert_reply(new_reply(ticket.id, owner, SenderType::User), None)
            .await
            .unwrap();
        store.soft_delete_reply(second.id).await.unwrap();

        let ids: Vec<i64> = store
            .replies_for_ticket(ticket.id)
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![first.id, third.id]);
    }

    #[tokio::test]
    async fn test_partial_update_leaves_other_fields() {
        let store = InMemoryTicketStore::new();
        let ticket = store
            .insert_ticket(new_ticket(Uuid::new_v4(), "before"))
            .await
            .unwrap();
        let updated = store
            .update_ticket(
                ticket.id,
                TicketChanges {
                    status: Some(TicketStatus::Closed),
                    ..TicketChanges::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "before");
        assert_eq!(updated.message, "details");
        assert_eq!(updated.status, TicketStatus::Closed);
        assert_eq!(updated.external_id, ticket.external_id);
    }
}
