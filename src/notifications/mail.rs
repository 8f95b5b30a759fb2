use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Message},
    transport::smtp::authentication::Credentials,
    SmtpTransport, Transport,
};
use log::info;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{AdminRepliedNotification, Notifier};
use crate::core::config::MailConfig;
use crate::core::shared::models::{ActorId, Reply, Ticket};
use crate::tickets::error::SideEffectError;

/// Resolves an actor id to a mailbox.
#[async_trait]
pub trait MailDirectory: Send + Sync {
    async fn email_of(&self, actor: ActorId) -> Option<String>;
}

#[derive(Default)]
pub struct StaticMailDirectory {
    addresses: RwLock<HashMap<ActorId, String>>,
}

impl StaticMailDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, actor: ActorId, email: impl Into<String>) {
        self.addresses.write().await.insert(actor, email.into());
    }
}

#[async_trait]
impl MailDirectory for StaticMailDirectory {
    async fn email_of(&self, actor: ActorId) -> Option<String> {
        self.addresses.read().await.get(&actor).cloned()
    }
}

pub struct SmtpNotifier {
    config: MailConfig,
    directory: Arc<dyn MailDirectory>,
}

impl SmtpNotifier {
    pub fn new(config: MailConfig, directory: Arc<dyn MailDirectory>) -> Self {
        Self { config, directory }
    }

    pub fn build_message(
        &self,
        to: &str,
        notification: &AdminRepliedNotification,
    ) -> Result<Message, SideEffectError> {
        Message::builder()
            .from(
                self.config
                    .from
                    .parse()
                    .map_err(|e| {
                        SideEffectError::Notification(format!("Invalid from address: {}", e))
                    })?,
            )
            .to(to
                .parse()
                .map_err(|e| SideEffectError::Notification(format!("Invalid to address: {}", e)))?)
            .subject(notification.subject())
            .header(ContentType::TEXT_PLAIN)
            .body(notification.body())
            .map_err(|e| SideEffectError::Notification(format!("Failed to build email: {}", e)))
    }

    fn transport(&self) -> Result<SmtpTransport, SideEffectError> {
        let mailer = if let (Some(user), Some(pass)) =
            (self.config.smtp_user.clone(), self.config.smtp_pass.clone())
        {
            SmtpTransport::relay(&self.config.smtp_host)
                .map_err(|e| SideEffectError::Notification(format!("SMTP relay error: {}", e)))?
                .credentials(Credentials::new(user, pass))
                .build()
        } else {
            SmtpTransport::builder_dangerous(&self.config.smtp_host).build()
        };
        Ok(mailer)
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    fn channel(&self) -> &'static str {
        "mail"
    }

    async fn notify_admin_replied(
        &self,
        owner_id: ActorId,
        ticket: &Ticket,
        reply: &Reply,
    ) -> Result<(), SideEffectError> {
        let to = self.directory.email_of(owner_id).await.ok_or_else(|| {
            SideEffectError::Notification(format!("No email address for {}", owner_id))
        })?;

        let notification =
            AdminRepliedNotification::new(owner_id, ticket, reply, &self.config.app_url);
        let email = self.build_message(&to, &notification)?;
        let mailer = self.transport()?;

        tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| SideEffectError::Notification(format!("Mail task failed: {}", e)))?
            .map_err(|e| SideEffectError::Notification(format!("Failed to send email: {}", e)))?;

        info!("Admin reply email sent for ticket {}", ticket.external_id);
        Ok(())
    }
}
