//! Error types for the protocol crate.

use thiserror::Error;

/// Errors raised while interpreting protocol values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A mode name other than `dev` or `prod`.
    #[error("unknown mode: {0:?} (expected \"dev\" or \"prod\")")]
    UnknownMode(String),

    /// A wiki role name that is not recognised.
    #[error("unknown wiki role: {0:?}")]
    UnknownRole(String),

    /// A wiki lifecycle state name that is not recognised.
    #[error("unknown wiki state: {0:?}")]
    UnknownState(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            ProtocolError::UnknownMode("staging".into()).to_string(),
            r#"unknown mode: "staging" (expected "dev" or "prod")"#
        );
        assert_eq!(
            ProtocolError::UnknownRole("boss".into()).to_string(),
            r#"unknown wiki role: "boss""#
        );
    }
}
