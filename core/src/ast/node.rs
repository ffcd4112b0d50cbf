use serde::Deserialize;

use crate::location;

use super::kind::NodeKind;

/// Identity of a node within one process; used to match rescue nodes with
/// the ensure regions wrapping them.
pub type NodeId = usize;

#[derive(Clone, PartialEq, Deserialize)]
pub struct AstNode {
    #[serde(skip, default = "AstNode::create_id")]
    id: NodeId,
    pub kind: NodeKind,
    #[serde(default)]
    pub location: Option<location::Location>,
}

impl AstNode {

    fn create_id() -> NodeId {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static COUNTER: AtomicUsize = AtomicUsize::new(1);
        COUNTER.fetch_add(1, Ordering::Relaxed)
    }

    pub fn new(kind: NodeKind, location: Option<location::Location>) -> Self {
        AstNode {
            id: Self::create_id(),
            kind,
            location,
        }
    }

    /// Node without a source position.
    pub fn bare(kind: NodeKind) -> Self {
        Self::new(kind, None)
    }

    pub fn with_location(mut self, location: crate::location::Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn at_line(self, line: usize) -> Self {
        self.with_location(crate::location::Location::at_line(line))
    }

    pub fn boxed(self) -> Box<AstNode> {
        Box::new(self)
    }

    pub fn get_id(&self) -> NodeId {
        self.id
    }
    pub fn get_kind(&self) -> &NodeKind {
        &self.kind
    }
    pub fn get_location(&self) -> Option<&crate::location::Location> {
        self.location.as_ref()
    }
    pub fn line(&self) -> usize {
        self.location.as_ref().map(|l| l.line).unwrap_or(0)
    }
}

use std::fmt;

impl fmt::Display for AstNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn fmt_indent(f: &mut fmt::Formatter<'_>, s: &str, indent: usize) -> fmt::Result {
            for _ in 0..indent { write!(f, " ")?; }
            write!(f, "{}", s)
        }

        writeln!(f, "AstNode {{")?;
        fmt_indent(f, &format!("id: {},\n", self.id), 2)?;
        fmt_indent(f, "kind: ", 2)?;
        writeln!(f, "{:#?},", &self.kind)?;

        match &self.location {
            Some(loc) => fmt_indent(f, &format!("location: {}\n", loc), 2)?,
            None => fmt_indent(f, "location: None\n", 2)?,
        }

        writeln!(f, "}}")?;
        Ok(())
    }
}

impl fmt::Debug for AstNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // nested nodes inside `{:#?}` of a kind would otherwise print the
        // whole header block per child
        if f.alternate() {
            write!(f, "{}#{}", self.kind.name(), self.id)?;
            match &self.location {
                Some(loc) => write!(f, "@{}", loc.line),
                None => Ok(()),
            }
        } else {
            write!(f, "{}", self)
        }
    }
}
