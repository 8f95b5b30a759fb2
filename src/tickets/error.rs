use crate::security::validation::ValidationErrors;

#[derive(Debug, thiserror::Error)]
pub enum HelpdeskError {
    #[error("The given data was invalid: {0}")]
    Validation(ValidationErrors),
    #[error("This action is unauthorized.")]
    Forbidden,
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl HelpdeskError {
    /// HTTP-style status an outer layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 422,
            Self::Forbidden => 403,
            Self::NotFound(_) => 404,
            Self::Storage(_) => 500,
        }
    }

    pub fn field_errors(&self) -> Option<&ValidationErrors> {
        match self {
            Self::Validation(errors) => Some(errors),
            _ => None,
        }
    }

    pub fn ticket_not_found() -> Self {
        Self::NotFound("Ticket not found".to_string())
    }

    pub fn reply_not_found() -> Self {
        Self::NotFound("Reply not found".to_string())
    }
}

impl From<ValidationErrors> for HelpdeskError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}

pub type HelpdeskResult<T> = Result<T, HelpdeskError>;

/// Failure of a post-commit side effect. Logged, never returned to the caller
/// of the mutation that triggered it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SideEffectError {
    #[error("Notification failed: {0}")]
    Notification(String),
    #[error("Broadcast failed: {0}")]
    Broadcast(String),
    #[error("Cache invalidation failed: {0}")]
    Cache(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::validation::ValidationError;

    #[test]
    fn test_status_codes_are_distinct() {
        let mut errors = ValidationErrors::new();
        errors.add_error(ValidationError::Required("title".to_string()));

        assert_eq!(HelpdeskError::Validation(errors).status_code(), 422);
        assert_eq!(HelpdeskError::Forbidden.status_code(), 403);
        assert_eq!(HelpdeskError::ticket_not_found().status_code(), 404);
        assert_eq!(HelpdeskError::Storage("down".into()).status_code(), 500);
    }

    #[test]
    fn test_forbidden_message_is_generic() {
        assert_eq!(HelpdeskError::Forbidden.to_string(), "This action is unauthorized.");
    }
}
