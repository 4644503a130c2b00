use std::fmt;

/// Gameplay failure taxonomy. `Display` is the user-facing message; the
/// service layer logs structured context separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameError {
    /// Bad input: unknown crop, patch number out of range, zero quantity.
    Validation(String),
    /// Not enough currency, water, seeds, boosters, or parts. No partial
    /// deduction has happened when this is returned.
    InsufficientResource(String),
    /// The requested transition conflicts with current state: patch
    /// occupied, contest ended, reward already claimed today.
    StateConflict(String),
    /// Unknown user, patch, or contest.
    NotFound(String),
}

impl GameError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn insufficient(message: impl Into<String>) -> Self {
        Self::InsufficientResource(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::StateConflict(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}

impl fmt::Display for GameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(message)
            | Self::InsufficientResource(message)
            | Self::StateConflict(message)
            | Self::NotFound(message) => f.write_str(message),
        }
    }
}

impl std::error::Error for GameError {}
