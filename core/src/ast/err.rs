use crate::error::{Level, KilnErrorExt};
use crate::location::{Location, Span};

/// Raised when an AST document cannot be turned into an `AstNode` tree:
/// unreadable file, malformed JSON, a node kind the loader does not know,
/// or an empty document.
#[derive(Debug, Clone)]
pub struct AstLoadError {
    level: Level,
    message: String,
    issuer: String,
    location: Option<Location>,
    span: Option<Span>,
}

impl AstLoadError {
    /// Default constructor for an empty-document error.
    pub fn empty(issuer: String, location: Option<Location>) -> Self {
        AstLoadError {
            level: Level::Error,
            message: "The provided AST document is empty.".to_string(),
            issuer,
            location,
            span: None,
        }
    }

    /// More explicit constructor when you need to set level/message.
    pub fn with(level: Level, message: String, issuer: String, location: Option<Location>, span: Option<Span>) -> Self {
        AstLoadError {
            level,
            message,
            issuer,
            location,
            span,
        }
    }

    pub fn from_io(path: &std::path::Path, err: std::io::Error) -> Self {
        Self::with(
            Level::Error,
            format!("Unable to read AST document {:?}: {}", path, err),
            "kiln.ast.loader".to_string(),
            None,
            None,
        )
    }

    pub fn from_json(file: &str, err: serde_json::Error) -> Self {
        // serde_json reports 1-based lines/columns; line 0 means "end of input"
        let location = (err.line() > 0).then(|| Location::new(file.to_string(), err.line(), err.column()));
        Self::with(
            Level::Error,
            format!("Malformed AST document: {}", err),
            "kiln.ast.loader".to_string(),
            location,
            None,
        )
    }
}

impl std::fmt::Display for AstLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(loc) = &self.location {
            write!(f, "{} (at {})", self.message, loc)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for AstLoadError {}

impl KilnErrorExt for AstLoadError {
    fn level(&self) -> Level {
        self.level
    }

    fn message(&self) -> String {
        self.message.clone()
    }

    fn issuer(&self) -> String {
        self.issuer.clone()
    }

    fn span(&self) -> Option<Span> {
        self.span.clone()
    }

    fn location(&self) -> Option<Location> {
        self.location.clone()
    }
}
