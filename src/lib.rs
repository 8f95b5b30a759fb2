//! Support-ticket helpdesk engine.
//!
//! End users file tickets, staff reply, and every mutation goes through
//! [`tickets::TicketService`], which keeps the derived list caches, owner
//! notifications and real-time broadcasts consistent with the committed data.
//! Access decisions live in [`security::policy`] and are taken by the caller
//! before a service method runs.

pub mod bootstrap;
pub mod cache;
pub mod core;
pub mod notifications;
pub mod realtime;
pub mod security;
pub mod tickets;

pub use crate::bootstrap::{init_logging, Helpdesk, HelpdeskBuilder};
pub use crate::core::config::HelpdeskConfig;
pub use crate::core::shared::{
    Actor, ActorId, AttachmentRef, Capability, Page, Reply, ReplyFields, Role, SenderType,
    Ticket, TicketFields, TicketStatus, TicketWithReplies,
};
pub use crate::tickets::{HelpdeskError, HelpdeskResult, TicketService};
