use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use super::enums::{SenderType, TicketStatus};

pub type ActorId = Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Support,
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Support => "support",
            Self::SuperAdmin => "super_admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "support" => Ok(Self::Support),
            "super_admin" => Ok(Self::SuperAdmin),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ViewTickets,
    CreateTickets,
    ReplyToTickets,
    EditTickets,
    DeleteTickets,
    ChangeTicketStatus,
    RestoreDeletedTickets,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Self::ViewTickets,
        Self::CreateTickets,
        Self::ReplyToTickets,
        Self::EditTickets,
        Self::DeleteTickets,
        Self::ChangeTicketStatus,
        Self::RestoreDeletedTickets,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ViewTickets => "view_tickets",
            Self::CreateTickets => "create_tickets",
            Self::ReplyToTickets => "reply_to_tickets",
            Self::EditTickets => "edit_tickets",
            Self::DeleteTickets => "delete_tickets",
            Self::ChangeTicketStatus => "change_ticket_status",
            Self::RestoreDeletedTickets => "restore_deleted_tickets",
        }
    }
}

/// A person acting on the helpdesk. Tickets and replies reference actors by id only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub name: String,
    pub email: Option<String>,
    pub roles: HashSet<Role>,
    pub direct_capabilities: HashSet<Capability>,
}

impl Actor {
    /// An actor with no roles falls back to `user`.
    pub fn new(
        id: ActorId,
        name: impl Into<String>,
        roles: impl IntoIterator<Item = Role>,
    ) -> Self {
        let mut roles: HashSet<Role> = roles.into_iter().collect();
        if roles.is_empty() {
            roles.insert(Role::User);
        }
        Self {
            id,
            name: name.into(),
            email: None,
            roles,
            direct_capabilities: HashSet::new(),
        }
    }

    pub fn user(name: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4(), name, [Role::User])
    }

    pub fn support(name: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4(), name, [Role::Support])
    }

    pub fn super_admin(name: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4(), name, [Role::SuperAdmin])
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.direct_capabilities.insert(capability);
        self
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        roles.iter().any(|r| self.roles.contains(r))
    }
}

/// Opaque reference to a stored blob, attached to a ticket or reply after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttachmentRef {
    pub id: Uuid,
    pub blob_key: String,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

impl AttachmentRef {
    pub fn new(
        blob_key: impl Into<String>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            blob_key: blob_key.into(),
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            size_bytes,
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    /// Internal sequential key. Callers address tickets by `external_id`.
    #[serde(skip)]
    pub(crate) id: i64,
    pub external_id: Uuid,
    pub owner_id: ActorId,
    pub title: String,
    pub message: String,
    pub status: TicketStatus,
    pub sender_type: SenderType,
    pub attachments: Vec<AttachmentRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Ticket {
    pub fn is_owned_by(&self, actor: &Actor) -> bool {
        self.owner_id == actor.id
    }

    pub fn is_trashed(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub id: i64,
    #[serde(skip)]
    pub(crate) ticket_id: i64,
    pub author_id: ActorId,
    pub message: String,
    pub sender_type: SenderType,
    pub attachments: Vec<AttachmentRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Reply {
    pub fn is_authored_by(&self, actor: &Actor) -> bool {
        self.author_id == actor.id
    }

    pub fn belongs_to(&self, ticket: &Ticket) -> bool {
        self.ticket_id == ticket.id
    }

    pub fn is_trashed(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketWithReplies {
    pub ticket: Ticket,
    pub replies: Vec<Reply>,
}

/// Raw, unvalidated ticket input as submitted by a caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TicketFields {
    pub title: Option<String>,
    pub message: Option<String>,
    pub status: Option<String>,
}

impl TicketFields {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            message: Some(message.into()),
            status: None,
        }
    }

    pub fn status_change(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplyFields {
    pub message: Option<String>,
}

impl ReplyFields {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
}

impl<T: Clone> Page<T> {
    /// Slices an already ordered list. Pages are 1-based; page 0 is treated as 1.
    pub fn from_ordered(all: &[T], page: usize, per_page: usize) -> Self {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let start = (page - 1).saturating_mul(per_page);
        let items = all.iter().skip(start).take(per_page).cloned().collect();
        Self {
            items,
            page,
            per_page,
            total: all.len(),
        }
    }
}

impl<T> Page<T> {
    pub fn last_page(&self) -> usize {
        if self.total == 0 {
            1
        } else {
            self.total.div_ceil(self.per_page)
        }
    }

    pub fn has_more(&self) -> bool {
        self.page < self.last_page()
    }
}
