pub mod policy;
pub mod rbac;
pub mod validation;

pub use policy::{
    authorize, authorize_channel, can, ensure_allowed, AccessDecision, AccessReason, Action,
    Target,
};
pub use rbac::{classify, has_capability, is_staff, is_super_admin, role_capabilities, STAFF_ROLES};
pub use validation::{
    validate_max_length, validate_one_of, validate_required, ValidationError, ValidationErrors,
    Validator,
};
