use crate::core::shared::enums::SenderType;
use crate::core::shared::models::{Actor, Capability, Role};

/// Roles whose members act as staff when they write tickets or replies.
pub const STAFF_ROLES: [Role; 2] = [Role::SuperAdmin, Role::Support];

const SUPPORT_CAPABILITIES: &[Capability] = &[
    Capability::ViewTickets,
    Capability::ReplyToTickets,
    Capability::ChangeTicketStatus,
];

pub fn role_capabilities(role: Role) -> &'static [Capability] {
    match role {
        Role::User => &[],
        Role::Support => SUPPORT_CAPABILITIES,
        Role::SuperAdmin => &Capability::ALL,
    }
}

pub fn has_capability(actor: &Actor, capability: Capability) -> bool {
    actor.direct_capabilities.contains(&capability)
        || actor
            .roles
            .iter()
            .any(|role| role_capabilities(*role).contains(&capability))
}

pub fn is_super_admin(actor: &Actor) -> bool {
    actor.has_role(Role::SuperAdmin)
}

pub fn is_staff(actor: &Actor) -> bool {
    actor.has_any_role(&STAFF_ROLES)
}

/// Sender classification snapshotted onto a ticket or reply at creation.
/// Never yields `System`; that tag is reserved for machine-originated rows.
pub fn classify(actor: &Actor) -> SenderType {
    if is_staff(actor) {
        SenderType::Admin
    } else {
        SenderType::User
    }
}
