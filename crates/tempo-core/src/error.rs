//! Error taxonomy shared by every Tempo crate.

use thiserror::Error;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, TempoError>;

/// Every failure the scheduling engine can surface to a caller.
#[derive(Debug, Error)]
pub enum TempoError {
    /// Malformed, missing, or contradictory input. Nothing was written.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown id, or an id that belongs to another tenant.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The caller is not allowed to mutate the target.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The write collides with an existing record (e.g. duplicate attendee).
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TempoError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Machine-stable error kind, safe to expose to API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::Conflict(_) => "conflict",
            Self::Database(_) => "database_error",
            Self::Config(_) => "config_error",
            Self::Io(_) => "io_error",
        }
    }

    /// The message without the kind prefix.
    pub fn message(&self) -> String {
        match self {
            Self::Validation(m)
            | Self::NotFound(m)
            | Self::Forbidden(m)
            | Self::Conflict(m)
            | Self::Database(m)
            | Self::Config(m) => m.clone(),
            Self::Io(e) => e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_stable() {
        assert_eq!(TempoError::validation("x").kind(), "validation_error");
        assert_eq!(TempoError::not_found("x").kind(), "not_found");
        assert_eq!(TempoError::forbidden("x").kind(), "forbidden");
        assert_eq!(TempoError::conflict("x").kind(), "conflict");
        assert_eq!(TempoError::Database("x".into()).kind(), "database_error");
    }

    #[test]
    fn test_display_and_message() {
        let err = TempoError::validation("end must be after start");
        assert_eq!(err.to_string(), "Validation error: end must be after start");
        assert_eq!(err.message(), "end must be after start");
    }

    #[test]
    fn test_io_from() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: TempoError = io.into();
        assert_eq!(err.kind(), "io_error");
    }
}
