use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use log::error;
use uuid::Uuid;

use super::error::{HelpdeskError, HelpdeskResult};
use super::store::{NewReply, NewTicket, TicketChanges, TicketStore};
use crate::core::config::DatabaseConfig;
use crate::core::shared::enums::TicketStatus;
use crate::core::shared::models::{ActorId, AttachmentRef, Reply, Ticket};
use crate::core::shared::schema::{replies, tickets};

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

impl From<diesel::result::Error> for HelpdeskError {
    fn from(e: diesel::result::Error) -> Self {
        match e {
            diesel::result::Error::NotFound => Self::NotFound("Record not found".to_string()),
            other => {
                error!("Database error: {}", other);
                Self::Storage(other.to_string())
            }
        }
    }
}

#[derive(Debug, Queryable)]
struct TicketRow {
    id: i64,
    external_id: Uuid,
    owner_id: Uuid,
    title: String,
    message: String,
    status: String,
    sender_type: String,
    attachments: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = tickets)]
struct NewTicketRow {
    external_id: Uuid,
    owner_id: Uuid,
    title: String,
    message: String,
    status: String,
    sender_type: String,
    attachments: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, AsChangeset)]
#[diesel(table_name = tickets)]
struct TicketChangeset {
    title: Option<String>,
    message: Option<String>,
    status: Option<String>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Queryable)]
struct ReplyRow {
    id: i64,
    ticket_id: i64,
    author_id: Uuid,
    message: String,
    sender_type: String,
    attachments: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = replies)]
struct NewReplyRow {
    ticket_id: i64,
    author_id: Uuid,
    message: String,
    sender_type: String,
    attachments: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn corrupt(field: &str, detail: impl std::fmt::Display) -> HelpdeskError {
    HelpdeskError::Storage(format!("Corrupt {} column: {}", field, detail))
}

fn decode_attachments(value: serde_json::Value) -> HelpdeskResult<Vec<AttachmentRef>> {
    serde_json::from_value(value).map_err(|e| corrupt("attachments", e))
}

fn encode_attachments(attachments: &[AttachmentRef]) -> HelpdeskResult<serde_json::Value> {
    serde_json::to_value(attachments).map_err(|e| HelpdeskError::Storage(e.to_string()))
}

impl TryFrom<TicketRow> for Ticket {
    type Error = HelpdeskError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            external_id: row.external_id,
            owner_id: row.owner_id,
            title: row.title,
            message: row.message,
            status: row.status.parse().map_err(|e| corrupt("status", e))?,
            sender_type: row.sender_type.parse().map_err(|e| corrupt("sender_type", e))?,
            attachments: decode_attachments(row.attachments)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        })
    }
}

impl TryFrom<ReplyRow> for Reply {
    type Error = HelpdeskError;

    fn try_from(row: ReplyRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            ticket_id: row.ticket_id,
            author_id: row.author_id,
            message: row.message,
            sender_type: row.sender_type.parse().map_err(|e| corrupt("sender_type", e))?,
            attachments: decode_attachments(row.attachments)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        })
    }
}

fn into_tickets(rows: Vec<TicketRow>) -> HelpdeskResult<Vec<Ticket>> {
    rows.into_iter().map(Ticket::try_from).collect()
}

/// PostgreSQL store. Each call runs on the blocking pool and every mutation
/// inside a single `conn.transaction`.
#[derive(Clone)]
pub struct PgTicketStore {
    pool: DbPool,
}

impl PgTicketStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn connect(config: &DatabaseConfig) -> HelpdeskResult<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| HelpdeskError::Storage("database.url is not configured".to_string()))?;
        let pool = Pool::builder()
            .max_size(config.max_connections.max(1))
            .build(ConnectionManager::<PgConnection>::new(url))
            .map_err(|e| HelpdeskError::Storage(format!("Failed to create pool: {}", e)))?;
        Ok(Self::new(pool))
    }

    async fn run<T, F>(&self, f: F) -> HelpdeskResult<T>
    where
        F: FnOnce(&mut PgConnection) -> HelpdeskResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| HelpdeskError::Storage(format!("DB error: {}", e)))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| HelpdeskError::Storage(format!("Database task failed: {}", e)))?
    }
}

#[async_trait]
impl TicketStore for PgTicketStore {
    async fn insert_ticket(&self, new: NewTicket) -> HelpdeskResult<Ticket> {
        self.run(move |conn| {
            let now = Utc::now();
            let row = NewTicketRow {
                external_id: new.external_id.unwrap_or_else(Uuid::new_v4),
                owner_id: new.owner_id,
                title: new.title,
                message: new.message,
                status: TicketStatus::Open.as_str().to_string(),
                sender_type: new.sender_type.as_str().to_string(),
                attachments: encode_attachments(&Vec::from_iter(new.attachment))?,
                created_at: now,
                updated_at: now,
            };
            conn.transaction(|conn| {
                let inserted: TicketRow = diesel::insert_into(tickets::table)
                    .values(&row)
                    .get_result(conn)?;
                Ticket::try_from(inserted)
            })
        })
        .await
    }

    async fn update_ticket(&self, id: i64, changes: TicketChanges) -> HelpdeskResult<Ticket> {
        self.run(move |conn| {
            let changeset = TicketChangeset {
                title: changes.title,
                message: changes.message,
                status: changes.status.map(|s| s.as_str().to_string()),
                updated_at: Utc::now(),
            };
            conn.transaction(|conn| {
                let row: Option<TicketRow> = diesel::update(
                    tickets::table
                        .filter(tickets::id.eq(id))
                        .filter(tickets::deleted_at.is_null()),
                )
                .set(&changeset)
                .get_result(conn)
                .optional()?;
                row.ok_or_else(HelpdeskError::ticket_not_found)
                    .and_then(Ticket::try_from)
            })
        })
        .await
    }

    async fn find_ticket(
        &self,
        external_id: Uuid,
        with_trashed: bool,
    ) -> HelpdeskResult<Option<Ticket>> {
        self.run(move |conn| {
            let mut query = tickets::table
                .filter(tickets::external_id.eq(external_id))
                .into_boxed();
            if !with_trashed {
                query = query.filter(tickets::deleted_at.is_null());
            }
            let row: Option<TicketRow> = query.first(conn).optional()?;
            row.map(Ticket::try_from).transpose()
        })
        .await
    }

    async fn find_ticket_by_id(&self, id: i64) -> HelpdeskResult<Option<Ticket>> {
        self.run(move |conn| {
            let row: Option<TicketRow> = tickets::table.find(id).first(conn).optional()?;
            row.map(Ticket::try_from).transpose()
        })
        .await
    }

    async fn tickets_for_owner(&self, owner_id: ActorId) -> HelpdeskResult<Vec<Ticket>> {
        self.run(move |conn| {
            let rows: Vec<TicketRow> = tickets::table
                .filter(tickets::owner_id.eq(owner_id))
                .filter(tickets::deleted_at.is_null())
                .order((tickets::created_at.desc(), tickets::id.desc()))
                .load(conn)?;
            into_tickets(rows)
        })
        .await
    }

    async fn all_tickets(&self) -> HelpdeskResult<Vec<Ticket>> {
        self.run(move |conn| {
            let rows: Vec<TicketRow> = tickets::table
                .filter(tickets::deleted_at.is_null())
                .order((tickets::created_at.desc(), tickets::id.desc()))
                .load(conn)?;
            into_tickets(rows)
        })
        .await
    }

    async fn insert_reply(
        &self,
        new: NewReply,
        status: Option<TicketStatus>,
    ) -> HelpdeskResult<(Reply, Ticket)> {
        self.run(move |conn| {
            let now = Utc::now();
            let row = NewReplyRow {
                ticket_id: new.ticket_id,
                author_id: new.author_id,
                message: new.message,
                sender_type: new.sender_type.as_str().to_string(),
                attachments: encode_attachments(&Vec::from_iter(new.attachment))?,
                created_at: now,
                updated_at: now,
            };

            conn.transaction(|conn| {
                let target = tickets::table
                    .filter(tickets::id.eq(row.ticket_id))
                    .filter(tickets::deleted_at.is_null());
                let ticket: Option<TicketRow> = match status {
                    Some(status) => diesel::update(target)
                        .set((
                            tickets::status.eq(status.as_str()),
                            tickets::updated_at.eq(now),
                        ))
                        .get_result(conn)
                        .optional()?,
                    None => diesel::update(target)
                        .set(tickets::updated_at.eq(now))
                        .get_result(conn)
                        .optional()?,
                };
                let ticket = Ticket::try_from(ticket.ok_or_else(HelpdeskError::ticket_not_found)?)?;

                let inserted: ReplyRow = diesel::insert_into(replies::table)
                    .values(&row)
                    .get_result(conn)?;
                Ok((Reply::try_from(inserted)?, ticket))
            })
        })
        .await
    }

    async fn update_reply_message(&self, id: i64, message: String) -> HelpdeskResult<Reply> {
        self.run(move |conn| {
            conn.transaction(|conn| {
                let row: Option<ReplyRow> = diesel::update(
                    replies::table
                        .filter(replies::id.eq(id))
                        .filter(replies::deleted_at.is_null()),
                )
                .set((replies::message.eq(message), replies::updated_at.eq(Utc::now())))
                .get_result(conn)
                .optional()?;
                row.ok_or_else(HelpdeskError::reply_not_found)
                    .and_then(Reply::try_from)
            })
        })
        .await
    }

    async fn find_reply(&self, id: i64) -> HelpdeskResult<Option<Reply>> {
        self.run(move |conn| {
            let row: Option<ReplyRow> = replies::table.find(id).first(conn).optional()?;
            row.map(Reply::try_from).transpose()
        })
        .await
    }

    async fn replies_for_ticket(&self, ticket_id: i64) -> HelpdeskResult<Vec<Reply>> {
        self.run(move |conn| {
            let rows: Vec<ReplyRow> = replies::table
                .filter(replies::ticket_id.eq(ticket_id))
                .filter(replies::deleted_at.is_null())
                .order((replies::created_at.asc(), replies::id.asc()))
                .load(conn)?;
            rows.into_iter().map(Reply::try_from).collect()
        })
        .await
    }

    async fn soft_delete_ticket(&self, id: i64) -> HelpdeskResult<Ticket> {
        self.run(move |conn| {
            conn.transaction(|conn| {
                let row: Option<TicketRow> = diesel::update(
                    tickets::table
                        .filter(tickets::id.eq(id))
                        .filter(tickets::deleted_at.is_null()),
                )
                .set(tickets::deleted_at.eq(Some(Utc::now())))
                .get_result(conn)
                .optional()?;
                row.ok_or_else(HelpdeskError::ticket_not_found)
                    .and_then(Ticket::try_from)
            })
        })
        .await
    }

    async fn restore_ticket(&self, id: i64) -> HelpdeskResult<Ticket> {
        self.run(move |conn| {
            conn.transaction(|conn| {
                let row: Option<TicketRow> = diesel::update(tickets::table.find(id))
                    .set((
                        tickets::deleted_at.eq(None::<DateTime<Utc>>),
                        tickets::updated_at.eq(Utc::now()),
                    ))
                    .get_result(conn)
                    .optional()?;
                row.ok_or_else(HelpdeskError::ticket_not_found)
                    .and_then(Ticket::try_from)
            })
        })
        .await
    }

    async fn force_delete_ticket(&self, id: i64) -> HelpdeskResult<Ticket> {
        self.run(move |conn| {
            conn.transaction(|conn| {
                diesel::delete(replies::table.filter(replies::ticket_id.eq(id))).execute(conn)?;
                let row: Option<TicketRow> = diesel::delete(tickets::table.find(id))
                    .get_result(conn)
                    .optional()?;
                row.ok_or_else(HelpdeskError::ticket_not_found)
                    .and_then(Ticket::try_from)
            })
        })
        .await
    }

    async fn soft_delete_reply(&self, id: i64) -> HelpdeskResult<Reply> {
        self.run(move |conn| {
            conn.transaction(|conn| {
                let row: Option<ReplyRow> = diesel::update(
                    replies::table
                        .filter(replies::id.eq(id))
                        .filter(replies::deleted_at.is_null()),
                )
                .set(replies::deleted_at.eq(Some(Utc::now())))
                .get_result(conn)
                .optional()?;
                row.ok_or_else(HelpdeskError::reply_not_found)
                    .and_then(Reply::try_from)
            })
        })
        .await
    }

    async fn attach_to_ticket(&self, id: i64, attachment: AttachmentRef) -> HelpdeskResult<Ticket> {
        self.run(move |conn| {
            conn.transaction(|conn| {
                let current: Option<serde_json::Value> = tickets::table
                    .filter(tickets::id.eq(id))
                    .filter(tickets::deleted_at.is_null())
                    .select(tickets::attachments)
                    .for_update()
                    .first(conn)
                    .optional()?;
                let mut attachments =
                    decode_attachments(current.ok_or_else(HelpdeskError::ticket_not_found)?)?;
                attachments.push(attachment);

                let row: TicketRow = diesel::update(tickets::table.find(id))
                    .set((
                        tickets::attachments.eq(encode_attachments(&attachments)?),
                        tickets::updated_at.eq(Utc::now()),
                    ))
                    .get_result(conn)?;
                Ticket::try_from(row)
            })
        })
        .await
    }

    async fn attach_to_reply(&self, id: i64, attachment: AttachmentRef) -> HelpdeskResult<Reply> {
        self.run(move |conn| {
            conn.transaction(|conn| {
                let current: Option<serde_json::Value> = replies::table
                    .filter(replies::id.eq(id))
                    .filter(replies::deleted_at.is_null())
                    .select(replies::attachments)
                    .for_update()
                    .first(conn)
                    .optional()?;
                let mut attachments =
                    decode_attachments(current.ok_or_else(HelpdeskError::reply_not_found)?)?;
                attachments.push(attachment);

                let row: ReplyRow = diesel::update(replies::table.find(id))
                    .set((
                        replies::attachments.eq(encode_attachments(&attachments)?),
                        replies::updated_at.eq(Utc::now()),
                    ))
                    .get_result(conn)?;
                Reply::try_from(row)
            })
        })
        .await
    }
}
