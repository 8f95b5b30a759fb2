//! Ticket Enum Types
//!
//! Closed variant types for ticket status and sender classification.
//! Wire values are the snake_case strings persisted in the `status` and
//! `sender_type` columns. Display labels live in a separate lookup table so
//! the domain types stay free of presentation concerns.

use serde::{Deserialize, Serialize};

// ============================================================================
// TICKET STATUS
// ============================================================================

/// Lifecycle status of a support ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Closed,
}

impl Default for TicketStatus {
    fn default() -> Self {
        Self::Open
    }
}

impl TicketStatus {
    pub const ALL: [TicketStatus; 3] = [Self::Open, Self::InProgress, Self::Closed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Closed => "closed",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::InProgress => "IN_PROGRESS",
            Self::Closed => "CLOSED",
        }
    }

    pub fn values() -> Vec<&'static str> {
        Self::ALL.iter().map(|s| s.as_str()).collect()
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|s| s.name()).collect()
    }

    pub fn is_valid_value(value: &str) -> bool {
        Self::ALL.iter().any(|s| s.as_str() == value)
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TicketStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "in_progress" => Ok(Self::InProgress),
            "closed" => Ok(Self::Closed),
            _ => Err(format!("Unknown ticket status: {}", s)),
        }
    }
}

// ============================================================================
// SENDER TYPE
// ============================================================================

/// Who originated a ticket or reply, snapshotted at creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderType {
    User,
    Admin,
    System,
}

impl Default for SenderType {
    fn default() -> Self {
        Self::User
    }
}

impl SenderType {
    pub const ALL: [SenderType; 3] = [Self::User, Self::Admin, Self::System];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
            Self::System => "system",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Admin => "ADMIN",
            Self::System => "SYSTEM",
        }
    }

    pub fn values() -> Vec<&'static str> {
        Self::ALL.iter().map(|s| s.as_str()).collect()
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|s| s.name()).collect()
    }

    pub fn is_valid_value(value: &str) -> bool {
        Self::ALL.iter().any(|s| s.as_str() == value)
    }
}

impl std::fmt::Display for SenderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SenderType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            "system" => Ok(Self::System),
            _ => Err(format!("Unknown sender type: {}", s)),
        }
    }
}

// ============================================================================
// LABELS
// ============================================================================

const STATUS_LABELS: &[(TicketStatus, &str)] = &[
    (TicketStatus::Open, "Open"),
    (TicketStatus::InProgress, "In progress"),
    (TicketStatus::Closed, "Closed"),
];

const SENDER_TYPE_LABELS: &[(SenderType, &str)] = &[
    (SenderType::User, "User"),
    (SenderType::Admin, "Support"),
    (SenderType::System, "System"),
];

/// Human-readable label for a ticket status
pub fn status_label(status: TicketStatus) -> &'static str {
    STATUS_LABELS
        .iter()
        .find(|(s, _)| *s == status)
        .map(|(_, label)| *label)
        .unwrap_or_else(|| status.as_str())
}

/// Human-readable label for a sender classification
pub fn sender_type_label(sender: SenderType) -> &'static str {
    SENDER_TYPE_LABELS
        .iter()
        .find(|(s, _)| *s == sender)
        .map(|(_, label)| *label)
        .unwrap_or_else(|| sender.as_str())
}
