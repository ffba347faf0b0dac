// Domain-level errors for arena workflows.
//
// None of these end the session: the world task logs them and moves on.

use std::fmt;

/// Reasons an untrusted directed command is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    UnknownSender,
    SenderNotAlive,
    EmptyText,
    TextTooLong { len: usize },
    InvalidDisplayName,
    NonFiniteInput,
    ZeroDirection,
    CooldownActive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArenaError {
    /// Directed command was malformed or violated ownership/cooldown rules.
    Validation(ValidationError),
    /// A bounded resource (the color palette) ran dry.
    ResourceExhausted,
    /// Damage or despawn aimed at an entity that already left that state.
    DuplicateTransition,
    /// Entity lacks a capability the operation needs (e.g. a collider).
    MissingDependency(&'static str),
    /// A non-authority context tried to write replicated state.
    NotAuthority,
    /// The registry ran out of identifiers.
    IdSpaceExhausted,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::UnknownSender => write!(f, "sender is not a registered participant"),
            ValidationError::SenderNotAlive => write!(f, "sender is not alive"),
            ValidationError::EmptyText => write!(f, "text is empty"),
            ValidationError::TextTooLong { len } => write!(f, "text is {len} bytes"),
            ValidationError::InvalidDisplayName => write!(f, "display name is invalid"),
            ValidationError::NonFiniteInput => write!(f, "input contains NaN or infinity"),
            ValidationError::ZeroDirection => write!(f, "direction has zero length"),
            ValidationError::CooldownActive => write!(f, "shoot cooldown still active"),
        }
    }
}

impl fmt::Display for ArenaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArenaError::Validation(reason) => write!(f, "validation failure: {reason}"),
            ArenaError::ResourceExhausted => write!(f, "resource exhausted"),
            ArenaError::DuplicateTransition => write!(f, "duplicate transition"),
            ArenaError::MissingDependency(what) => write!(f, "missing dependency: {what}"),
            ArenaError::NotAuthority => write!(f, "write attempted without authority"),
            ArenaError::IdSpaceExhausted => write!(f, "entity id space exhausted"),
        }
    }
}

impl std::error::Error for ArenaError {}

impl From<ValidationError> for ArenaError {
    fn from(reason: ValidationError) -> Self {
        ArenaError::Validation(reason)
    }
}
