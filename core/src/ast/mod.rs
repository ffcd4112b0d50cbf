//! file: core/src/ast/mod.rs
//! description: the AST handed over by the external parser.
//!
//! The parser runs out of process and serializes its tree (with static-scope
//! depth annotations already applied) as JSON. `load_ast_from_str` and
//! `load_ast_from_path` turn that document back into `AstNode`s.

pub mod err;
pub mod kind;
pub mod node;

use std::path::Path;

pub use err::AstLoadError;
pub use kind::{ArgsNode, ConstPath, HashPair, KeywordArg, NodeKind, OptArg, RescueClause, RestArg, WhenClause};
pub use node::{AstNode, NodeId};

/// Parse an AST document. `file` is only used to label diagnostics.
pub fn load_ast_from_str(source: &str, file: &str) -> Result<AstNode, AstLoadError> {
    if source.trim().is_empty() {
        return Err(AstLoadError::empty(
            "kiln.ast.loader".to_string(),
            Some(crate::location::Location::new(file.to_string(), 0, 0)),
        ));
    }
    let node: AstNode = serde_json::from_str(source).map_err(|e| AstLoadError::from_json(file, e))?;
    log::debug!("loaded AST document {} (root {})", file, node.kind);
    Ok(node)
}

pub fn load_ast_from_path(path: &Path) -> Result<AstNode, AstLoadError> {
    let content = std::fs::read_to_string(path).map_err(|e| AstLoadError::from_io(path, e))?;
    load_ast_from_str(&content, &path.to_string_lossy())
}
