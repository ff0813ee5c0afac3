//! Error types for the FIR actions core.
//!
//! Uses `thiserror` for public API error types. Transition failures carry the
//! four-way taxonomy a caller needs to pick a response: invalid transition,
//! permission denied, validation failure or missing entity.

use std::path::PathBuf;

/// Top-level error type for the FIR actions core library.
#[derive(Debug, thiserror::Error)]
pub enum FirError {
    #[error("Transition error: {0}")]
    Transition(#[from] TransitionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Fixture error: {0}")]
    Fixture(#[from] FixtureError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FirError {
    /// The transition taxonomy entry behind this error, if any.
    pub fn transition(&self) -> Option<&TransitionError> {
        match self {
            FirError::Transition(err) => Some(err),
            _ => None,
        }
    }
}

/// Coarse classification of a [`TransitionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The entity is not in a source state of the requested transition.
    InvalidTransition,
    /// The acting user failed the guard.
    PermissionDenied,
    /// A semantic precondition was violated.
    Validation,
    /// A referenced entity does not exist.
    NotFound,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
        }
    }
}

/// Failures of commands and transitions.
///
/// Every variant is raised before any mutation happens.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("Cannot {transition} {entity} #{id} from state '{state}'")]
    InvalidTransition {
        entity: &'static str,
        id: u64,
        transition: String,
        state: String,
    },

    #[error("User '{user}' lacks permission '{permission}' on {entity}")]
    PermissionDenied {
        user: String,
        permission: String,
        entity: String,
    },

    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
}

impl TransitionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransitionError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            TransitionError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            TransitionError::Validation { .. } => ErrorKind::Validation,
            TransitionError::NotFound { .. } => ErrorKind::NotFound,
        }
    }

    /// Whether the message is meant to be shown to the requesting user.
    ///
    /// Denials are reported generically; validation and state errors are not.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, TransitionError::PermissionDenied { .. })
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        TransitionError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        TransitionError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors from the record store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store lock poisoned by a panicking writer")]
    Poisoned,

    #[error("Failed to persist state to {path}: {message}")]
    PersistFailed { path: PathBuf, message: String },

    #[error("Failed to load state from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },
}

/// Errors from action template parsing.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Unclosed template expression in: {template}")]
    Unclosed { template: String },

    #[error("Empty template expression in: {template}")]
    EmptyExpression { template: String },
}

/// Errors from loading fixture files.
#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    #[error("Fixture parse error: {message}")]
    Parse { message: String },

    #[error("Unknown {kind} '{name}' referenced in fixture")]
    UnknownReference { kind: &'static str, name: String },

    #[error("Duplicate {kind} '{name}' in fixture")]
    Duplicate { kind: &'static str, name: String },
}

/// A type alias for results using the top-level `FirError`.
pub type Result<T> = std::result::Result<T, FirError>;
