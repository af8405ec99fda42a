use thiserror::Error;

use crate::attr::AttrType;

/// Failures raised by the scope stack, attribute validation and scope backends.
///
/// None of these are recoverable locally: a failing operation leaves the stack exactly as it
/// was before the call and the error is surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScopeError {
    #[error("scope stack accessed before the initial scope was installed")]
    Uninitialized,
    #[error("scope stack already holds an initial scope")]
    AlreadyInitialized,
    #[error("scope stack invariant violated: {0}")]
    InvariantViolation(String),
    #[error("unknown scope attribute '{name}'")]
    UnknownAttribute { name: String },
    #[error("scope attribute '{name}' expects {expected}, got {found}")]
    AttrTypeMismatch {
        name: String,
        expected: AttrType,
        found: AttrType,
    },
    #[error("invalid value for scope attribute '{name}': {reason}")]
    InvalidAttrValue { name: String, reason: String },
    #[error("invalid scope name: {0}")]
    InvalidName(String),
    #[error("invalid placement: {0}")]
    InvalidPlacement(String),
    #[error("scope backend error: {0}")]
    Backend(String),
}

impl ScopeError {
    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        ScopeError::InvariantViolation(message.into())
    }

    pub(crate) fn placement(message: impl Into<String>) -> Self {
        ScopeError::InvalidPlacement(message.into())
    }

    /// Whether the error signals caller misuse of the stack rather than bad input.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScopeError::Uninitialized | ScopeError::InvariantViolation(_)
        )
    }
}

pub type ScopeResult<T> = Result<T, ScopeError>;
