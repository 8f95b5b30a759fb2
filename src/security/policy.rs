use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::shared::models::{Actor, ActorId, Capability, Reply, Ticket};
use crate::realtime::ChannelScope;
use crate::security::rbac::{has_capability, is_staff, is_super_admin};
use crate::tickets::error::HelpdeskError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    ViewAny,
    View,
    Create,
    Update,
    Delete,
    Restore,
    ForceDelete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ViewAny => "viewAny",
            Self::View => "view",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Restore => "restore",
            Self::ForceDelete => "forceDelete",
        }
    }
}

impl std::str::FromStr for Action {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "viewAny" => Ok(Self::ViewAny),
            "view" => Ok(Self::View),
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "restore" => Ok(Self::Restore),
            "forceDelete" => Ok(Self::ForceDelete),
            _ => Err(format!("Unknown action: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    /// The ticket collection itself, for `create` and `viewAny`.
    TicketClass,
    Ticket(&'a Ticket),
    /// The reply collection of one ticket, for `create` and `viewAny`.
    RepliesOf(&'a Ticket),
    Reply {
        reply: &'a Reply,
        ticket: &'a Ticket,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessReason {
    SuperAdmin,
    Capability,
    ResourceOwner,
    AnyAuthenticated,
    InheritedFromTicket,
    DeniedNoPermission,
    DeniedPrivilegedOnly,
    DeniedTargetMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: AccessReason,
}

impl AccessDecision {
    fn allow(reason: AccessReason) -> Self {
        Self {
            allowed: true,
            reason,
        }
    }

    fn deny(reason: AccessReason) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }

    fn capability_or_owner(actor: &Actor, capability: Capability, owner: ActorId) -> Self {
        if has_capability(actor, capability) {
            Self::allow(AccessReason::Capability)
        } else if owner == actor.id {
            Self::allow(AccessReason::ResourceOwner)
        } else {
            Self::deny(AccessReason::DeniedNoPermission)
        }
    }

    fn capability(actor: &Actor, capability: Capability) -> Self {
        if has_capability(actor, capability) {
            Self::allow(AccessReason::Capability)
        } else {
            Self::deny(AccessReason::DeniedNoPermission)
        }
    }
}

/// Decides whether `actor` may perform `action` on `target`.
///
/// The super-admin check runs first and short-circuits every other rule,
/// for tickets and replies alike.
pub fn authorize(actor: &Actor, action: Action, target: Target<'_>) -> AccessDecision {
    if is_super_admin(actor) {
        return AccessDecision::allow(AccessReason::SuperAdmin);
    }

    match target {
        Target::TicketClass => authorize_ticket_class(action),
        Target::Ticket(ticket) => authorize_ticket(actor, action, ticket),
        Target::RepliesOf(ticket) => authorize_replies_of(actor, action, ticket),
        Target::Reply { reply, ticket } => authorize_reply(actor, action, reply, ticket),
    }
}

pub fn can(actor: &Actor, action: Action, target: Target<'_>) -> bool {
    authorize(actor, action, target).allowed
}

/// Turns a denial into [`HelpdeskError::Forbidden`].
pub fn ensure_allowed(
    actor: &Actor,
    action: Action,
    target: Target<'_>,
) -> Result<(), HelpdeskError> {
    let decision = authorize(actor, action, target);
    if decision.allowed {
        Ok(())
    } else {
        debug!(
            "Denied {} for actor {}: {:?}",
            action.as_str(),
            actor.id,
            decision.reason
        );
        Err(HelpdeskError::Forbidden)
    }
}

fn authorize_ticket_class(action: Action) -> AccessDecision {
    match action {
        // listing is filtered to the actor's own tickets downstream
        Action::ViewAny | Action::Create => AccessDecision::allow(AccessReason::AnyAuthenticated),
        _ => AccessDecision::deny(AccessReason::DeniedNoPermission),
    }
}

fn authorize_ticket(actor: &Actor, action: Action, ticket: &Ticket) -> AccessDecision {
    match action {
        Action::ViewAny | Action::Create => authorize_ticket_class(action),
        Action::View => {
            AccessDecision::capability_or_owner(actor, Capability::ViewTickets, ticket.owner_id)
        }
        Action::Update => AccessDecision::capability_or_owner(
            actor,
            Capability::ChangeTicketStatus,
            ticket.owner_id,
        ),
        Action::Delete => AccessDecision::capability(actor, Capability::DeleteTickets),
        Action::Restore => AccessDecision::capability(actor, Capability::RestoreDeletedTickets),
        Action::ForceDelete => AccessDecision::deny(AccessReason::DeniedPrivilegedOnly),
    }
}

fn inherit_ticket_view(actor: &Actor, ticket: &Ticket) -> AccessDecision {
    let decision = authorize_ticket(actor, Action::View, ticket);
    if decision.allowed {
        AccessDecision::allow(AccessReason::InheritedFromTicket)
    } else {
        decision
    }
}

fn authorize_replies_of(actor: &Actor, action: Action, ticket: &Ticket) -> AccessDecision {
    match action {
        Action::ViewAny | Action::View => inherit_ticket_view(actor, ticket),
        Action::Create => {
            AccessDecision::capability_or_owner(actor, Capability::ReplyToTickets, ticket.owner_id)
        }
        _ => AccessDecision::deny(AccessReason::DeniedNoPermission),
    }
}

fn authorize_reply(
    actor: &Actor,
    action: Action,
    reply: &Reply,
    ticket: &Ticket,
) -> AccessDecision {
    if !reply.belongs_to(ticket) {
        return AccessDecision::deny(AccessReason::DeniedTargetMismatch);
    }

    match action {
        Action::ViewAny | Action::View => inherit_ticket_view(actor, ticket),
        Action::Create => authorize_replies_of(actor, action, ticket),
        Action::Update => {
            AccessDecision::capability_or_owner(actor, Capability::ReplyToTickets, reply.author_id)
        }
        Action::Delete | Action::Restore | Action::ForceDelete => {
            AccessDecision::deny(AccessReason::DeniedPrivilegedOnly)
        }
    }
}

/// Decides whether `actor` may listen on a real-time channel.
///
/// `ticket_owner` is the owner of the ticket behind a `tickets.*` channel,
/// or `None` when that ticket does not exist.
pub fn authorize_channel(
    actor: &Actor,
    channel: &ChannelScope,
    ticket_owner: Option<ActorId>,
) -> bool {
    match channel {
        ChannelScope::Admin => is_staff(actor),
        ChannelScope::Ticket(_) => ticket_owner == Some(actor.id),
        ChannelScope::User(id) => *id == actor.id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared::enums::{SenderType, TicketStatus};
    use crate::core::shared::models::Role;
    use chrono::Utc;
    use uuid::Uuid;

    fn ticket_for(owner: &Actor) -> Ticket {
        let now = Utc::now();
        Ticket {
            id: 7,
            external_id: Uuid::new_v4(),
            owner_id: owner.id,
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

    fn reply_on(ticket: &Ticket, author: &Actor) -> Reply {
        let now = Utc::now();
        Reply {
            id: 1,
            ticket_id: ticket.id,
            author_id: author.id,
            message: "Any update?".to_string(),
            sender_type: SenderType::User,
            attachments: Vec::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    const ALL_ACTIONS: [Action; 7] = [
        Action::ViewAny,
        Action::View,
        Action::Create,
        Action::Update,
        Action::Delete,
        Action::Restore,
        Action::ForceDelete,
    ];

    #[test]
    fn test_owner_can_view_and_update() {
        let owner = Actor::user("owner");
        let ticket = ticket_for(&owner);

        let view = authorize(&owner, Action::View, Target::Ticket(&ticket));
        assert!(view.allowed);
        assert_eq!(view.reason, AccessReason::ResourceOwner);
        assert!(can(&owner, Action::Update, Target::Ticket(&ticket)));
    }

    #[test]
    fn test_stranger_is_denied_view_and_update() {
        let owner = Actor::user("owner");
        let stranger = Actor::user("stranger");
        let ticket = ticket_for(&owner);

        assert!(!can(&stranger, Action::View, Target::Ticket(&ticket)));
        assert!(!can(&stranger, Action::Update, Target::Ticket(&ticket)));
        assert!(matches!(
            ensure_allowed(&stranger, Action::View, Target::Ticket(&ticket)),
            Err(HelpdeskError::Forbidden)
        ));
    }

    #[test]
    fn test_support_capabilities() {
        let owner = Actor::user("owner");
        let support = Actor::support("agent");
        let ticket = ticket_for(&owner);

        let view = authorize(&support, Action::View, Target::Ticket(&ticket));
        assert_eq!(view.reason, AccessReason::Capability);
        assert!(can(&support, Action::Update, Target::Ticket(&ticket)));
        assert!(!can(&support, Action::Delete, Target::Ticket(&ticket)));
        assert!(!can(&support, Action::Restore, Target::Ticket(&ticket)));
    }

    #[test]
    fn test_direct_capability_grants_delete() {
        let owner = Actor::user("owner");
        let janitor = Actor::user("janitor").with_capability(Capability::DeleteTickets);
        let ticket = ticket_for(&owner);

        assert!(can(&janitor, Action::Delete, Target::Ticket(&ticket)));
        assert!(!can(&owner, Action::Delete, Target::Ticket(&ticket)));
    }

    #[test]
    fn test_force_delete_only_through_super_admin() {
        let owner = Actor::user("owner");
        let everything = Actor::new(Uuid::new_v4(), "support-with-all", [Role::Support])
            .with_capability(Capability::DeleteTickets)
            .with_capability(Capability::RestoreDeletedTickets);
        let root = Actor::super_admin("root");
        let ticket = ticket_for(&owner);

        let denied = authorize(&everything, Action::ForceDelete, Target::Ticket(&ticket));
        assert!(!denied.allowed);
        assert_eq!(denied.reason, AccessReason::DeniedPrivilegedOnly);
        assert!(can(&root, Action::ForceDelete, Target::Ticket(&ticket)));
    }

    #[test]
    fn test_super_admin_allowed_everything() {
        let owner = Actor::user("owner");
        let root = Actor::super_admin("root");
        let ticket = ticket_for(&owner);
        let reply = reply_on(&ticket, &owner);

        for action in ALL_ACTIONS {
            for target in [
                Target::TicketClass,
                Target::Ticket(&ticket),
                Target::RepliesOf(&ticket),
                Target::Reply {
                    reply: &reply,
                    ticket: &ticket,
                },
            ] {
                let decision = authorize(&root, action, target);
                assert!(decision.allowed, "{} on {:?}", action.as_str(), target);
                assert_eq!(decision.reason, AccessReason::SuperAdmin);
            }
        }
    }

    #[test]
    fn test_ticket_class_rules() {
        let user = Actor::user("u");
        assert!(can(&user, Action::Create, Target::TicketClass));
        assert!(can(&user, Action::ViewAny, Target::TicketClass));
        assert!(!can(&user, Action::Delete, Target::TicketClass));
    }

    #[test]
    fn test_reply_visibility_follows_ticket() {
        let owner = Actor::user("owner");
        let stranger = Actor::user("stranger");
        let support = Actor::support("agent");
        let ticket = ticket_for(&owner);
        let reply = reply_on(&ticket, &support);
        let target = Target::Reply {
            reply: &reply,
            ticket: &ticket,
        };

        let decision = authorize(&owner, Action::View, target);
        assert_eq!(decision.reason, AccessReason::InheritedFromTicket);
        assert!(can(&owner, Action::ViewAny, Target::RepliesOf(&ticket)));
        assert!(!can(&stranger, Action::View, target));
        assert!(!can(&stranger, Action::ViewAny, Target::RepliesOf(&ticket)));
    }

    #[test]
    fn test_reply_create_and_update() {
        let owner = Actor::user("owner");
        let stranger = Actor::user("stranger");
        let support = Actor::support("agent");
        let ticket = ticket_for(&owner);
        let own_reply = reply_on(&ticket, &owner);
        let agent_reply = reply_on(&ticket, &support);

        assert!(can(&owner, Action::Create, Target::RepliesOf(&ticket)));
        assert!(can(&support, Action::Create, Target::RepliesOf(&ticket)));
        assert!(!can(&stranger, Action::Create, Target::RepliesOf(&ticket)));

        let own = Target::Reply {
            reply: &own_reply,
            ticket: &ticket,
        };
        let agents = Target::Reply {
            reply: &agent_reply,
            ticket: &ticket,
        };
        assert!(can(&owner, Action::Update, own));
        assert!(!can(&owner, Action::Update, agents));
        assert!(can(&support, Action::Update, own));
        assert!(!can(&owner, Action::Delete, own));
    }

    #[test]
    fn test_reply_from_other_ticket_is_rejected() {
        let owner = Actor::user("owner");
        let ticket = ticket_for(&owner);
        let mut other = ticket_for(&owner);
        other.id = 99;
        let reply = reply_on(&other, &owner);

        let decision = authorize(
            &owner,
            Action::View,
            Target::Reply {
                reply: &reply,
                ticket: &ticket,
            },
        );
        assert_eq!(decision.reason, AccessReason::DeniedTargetMismatch);
    }

    #[test]
    fn test_channel_authorization() {
        let owner = Actor::user("owner");
        let support = Actor::support("agent");
        let ticket = ticket_for(&owner);
        let channel = ChannelScope::Ticket(ticket.external_id);

        assert!(authorize_channel(&owner, &channel, Some(owner.id)));
        assert!(!authorize_channel(&support, &channel, Some(owner.id)));
        assert!(!authorize_channel(&owner, &channel, None));
        assert!(authorize_channel(&support, &ChannelScope::Admin, None));
        assert!(!authorize_channel(&owner, &ChannelScope::Admin, None));
        assert!(authorize_channel(&owner, &ChannelScope::User(owner.id), None));
        assert!(!authorize_channel(&support, &ChannelScope::User(owner.id), None));
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!("forceDelete".parse::<Action>(), Ok(Action::ForceDelete));
        assert!("destroy".parse::<Action>().is_err());
    }
}
