//! Owner notifications.
//!
//! The only notification the helpdesk sends is "a support agent replied to
//! your ticket". Delivery goes through [`Notifier`] implementations; the
//! [`NotificationRouter`] fans one notification out to every configured
//! channel and keeps going when one of them fails.

#[cfg(feature = "mail")]
pub mod mail;

use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::shared::models::{ActorId, Reply, Ticket};
use crate::realtime::{BroadcastEvent, Broadcaster, ChannelScope};
use crate::tickets::error::SideEffectError;

#[cfg(feature = "mail")]
pub use mail::{MailDirectory, SmtpNotifier, StaticMailDirectory};

pub const ADMIN_REPLIED: &str = "AdminReplied";

#[async_trait]
pub trait Notifier: Send + Sync {
    fn channel(&self) -> &'static str;

    async fn notify_admin_replied(
        &self,
        owner_id: ActorId,
        ticket: &Ticket,
        reply: &Reply,
    ) -> Result<(), SideEffectError>;
}

/// Rendered content of the "admin replied" notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminRepliedNotification {
    pub owner_id: ActorId,
    pub ticket_id: Uuid,
    pub ticket_title: String,
    pub reply_message: String,
    pub url: String,
}

impl AdminRepliedNotification {
    pub fn new(owner_id: ActorId, ticket: &Ticket, reply: &Reply, app_url: &str) -> Self {
        Self {
            owner_id,
            ticket_id: ticket.external_id,
            ticket_title: ticket.title.clone(),
            reply_message: reply.message.clone(),
            url: format!(
                "{}/tickets/{}",
                app_url.trim_end_matches('/'),
                ticket.external_id
            ),
        }
    }

    pub fn subject(&self) -> String {
        format!("A reply was added to your ticket: {}", self.ticket_title)
    }

    pub fn body(&self) -> String {
        format!(
            "A support agent has replied to your ticket.\n\n\
             Reply: {}\n\n\
             View Ticket: {}\n\n\
             Thank you for using our application!",
            self.reply_message, self.url
        )
    }
}

/// Pushes the notification to the owner's personal real-time channel.
pub struct InAppNotifier {
    broadcaster: Arc<dyn Broadcaster>,
    app_url: String,
}

impl InAppNotifier {
    pub fn new(broadcaster: Arc<dyn Broadcaster>, app_url: impl Into<String>) -> Self {
        Self {
            broadcaster,
            app_url: app_url.into(),
        }
    }
}

#[async_trait]
impl Notifier for InAppNotifier {
    fn channel(&self) -> &'static str {
        "in_app"
    }

    async fn notify_admin_replied(
        &self,
        owner_id: ActorId,
        ticket: &Ticket,
        reply: &Reply,
    ) -> Result<(), SideEffectError> {
        let notification = AdminRepliedNotification::new(owner_id, ticket, reply, &self.app_url);
        let payload = serde_json::to_value(&notification)
            .map_err(|e| SideEffectError::Notification(e.to_string()))?;

        self.broadcaster
            .broadcast(BroadcastEvent::new(
                ADMIN_REPLIED,
                ChannelScope::User(owner_id),
                payload,
            ))
            .await
            .map_err(|e| SideEffectError::Notification(e.to_string()))?;
        Ok(())
    }
}

/// Delivers through every registered notifier.
#[derive(Default, Clone)]
pub struct NotificationRouter {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl NotificationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

#[async_trait]
impl Notifier for NotificationRouter {
    fn channel(&self) -> &'static str {
        "router"
    }

    /// Fails only when every channel failed.
    async fn notify_admin_replied(
        &self,
        owner_id: ActorId,
        ticket: &Ticket,
        reply: &Reply,
    ) -> Result<(), SideEffectError> {
        let mut delivered = 0;
        let mut last_error = None;

        for notifier in &self.notifiers {
            match notifier.notify_admin_replied(owner_id, ticket, reply).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        "Failed to deliver {} notification for ticket {}: {}",
                        notifier.channel(),
                        ticket.external_id,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if delivered == 0 => Err(e),
            _ => {
                info!(
                    "Admin reply notification for ticket {} delivered on {} channel(s)",
                    ticket.external_id, delivered
                );
                Ok(())
            }
        }
    }
}
