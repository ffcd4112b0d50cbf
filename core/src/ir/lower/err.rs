use thiserror::Error;

use crate::error::{KilnErrorExt, Level};
use crate::location::{Location, Span};

/// Internal faults of the builder: the AST has a shape lowering cannot
/// handle. Runtime-invalid jumps are not errors; they lower to
/// `RaiseLocalJumpError`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    #[error("no binding for local variable '{name}' at depth {depth}")]
    UnresolvedLocal { name: String, depth: u32, location: Location },

    #[error("cannot assign to a {kind} node")]
    InvalidAssignmentTarget { kind: String, location: Location },

    #[error("{kind} node cannot be compiled here: {reason}")]
    NotCompilable { kind: String, reason: String, location: Location },

    #[error("malformed {kind} node: {reason}")]
    MalformedNode { kind: String, reason: String, location: Location },
}

impl BuildError {
    pub fn location(&self) -> &Location {
        match self {
            BuildError::UnresolvedLocal { location, .. }
            | BuildError::InvalidAssignmentTarget { location, .. }
            | BuildError::NotCompilable { location, .. }
            | BuildError::MalformedNode { location, .. } => location,
        }
    }
}

impl KilnErrorExt for BuildError {
    fn level(&self) -> Level {
        Level::Critical
    }

    fn message(&self) -> String {
        self.to_string()
    }

    fn issuer(&self) -> String {
        "kiln.ir.builder".to_string()
    }

    fn span(&self) -> Option<Span> {
        None
    }

    fn location(&self) -> Option<Location> {
        Some(BuildError::location(self).clone())
    }
}
