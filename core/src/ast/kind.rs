//! file: core/src/ast/kind.rs
//! description: AST node kind definitions and the clause/argument records
//! hanging off them.
//!
//! `NodeKind` is the closed vocabulary handed over by the parser. Every
//! lowering routine matches on it exhaustively, so adding a kind here is a
//! compile error until the builder knows how to lower it.
//!
use serde::Deserialize;

use super::node::AstNode;

/// Where a constant declaration or a class/module definition puts its name.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(tag = "type")]
pub enum ConstPath {
    /// `Foo`: the lexically enclosing module.
    #[default]
    Lexical,
    /// `Left::Foo`
    Scoped { left: Box<AstNode> },
    /// `::Foo`
    TopLevel,
}

/// One `when a, b, c` clause of a `case`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WhenClause {
    pub guards: Vec<AstNode>,
    #[serde(default)]
    pub body: Option<Box<AstNode>>,
}

/// One `rescue A, B => e` clause.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RescueClause {
    /// Exception class expressions. Empty means the default exception type.
    #[serde(default)]
    pub exceptions: Vec<AstNode>,
    /// Assignable node receiving the exception (`=> e`).
    #[serde(default)]
    pub binding: Option<Box<AstNode>>,
    #[serde(default)]
    pub body: Option<Box<AstNode>>,
}

/// `key => value`; a missing key marks a `**splat` entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HashPair {
    #[serde(default)]
    pub key: Option<AstNode>,
    pub value: AstNode,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OptArg {
    pub name: String,
    pub value: AstNode,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RestArg {
    /// `None` for an anonymous `*`.
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KeywordArg {
    pub name: String,
    /// `None` marks a required keyword.
    #[serde(default)]
    pub value: Option<AstNode>,
}

/// Formal parameter list of a method, block or lambda.
///
/// `pre` and `post` hold `Argument` nodes or `MultipleAsgn` destructuring
/// patterns.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct ArgsNode {
    pub pre: Vec<AstNode>,
    pub opt: Vec<OptArg>,
    pub rest: Option<RestArg>,
    pub post: Vec<AstNode>,
    pub keywords: Vec<KeywordArg>,
    pub kw_rest: Option<String>,
    pub block: Option<String>,
}

impl ArgsNode {
    pub fn required_count(&self) -> usize {
        self.pre.len() + self.post.len()
    }

    pub fn has_kwargs(&self) -> bool {
        !self.keywords.is_empty() || self.kw_rest.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.pre.is_empty()
            && self.opt.is_empty()
            && self.rest.is_none()
            && self.post.is_empty()
            && !self.has_kwargs()
            && self.block.is_none()
    }
}

fn evaluate_at_start() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum NodeKind {
    /// Script root, carrying the top-level static scope.
    Root {
        #[serde(default)]
        body: Option<Box<AstNode>>,
        #[serde(default)]
        scope: Vec<String>,
    },

    // literals
    Nil,
    True,
    False,
    SelfRef,
    Fixnum { value: i64 },
    Float { value: f64 },
    Bignum { value: String },
    Str { value: String },
    Symbol { name: String },
    Regexp {
        source: String,
        #[serde(default)]
        options: u32,
    },
    DStr { parts: Vec<AstNode> },
    DSymbol { parts: Vec<AstNode> },
    DRegexp {
        parts: Vec<AstNode>,
        #[serde(default)]
        options: u32,
    },
    XStr { value: String },
    DXStr { parts: Vec<AstNode> },
    EvStr {
        #[serde(default)]
        body: Option<Box<AstNode>>,
    },
    Array { elements: Vec<AstNode> },
    ZArray,
    Hash { pairs: Vec<HashPair> },
    Dot {
        begin: Box<AstNode>,
        end: Box<AstNode>,
        #[serde(default)]
        exclusive: bool,
    },
    Splat { value: Box<AstNode> },
    SValue { value: Box<AstNode> },
    ArgsCat { first: Box<AstNode>, second: Box<AstNode> },
    ArgsPush { first: Box<AstNode>, second: Box<AstNode> },
    BlockPass { body: Box<AstNode> },
    NthRef { number: u32 },
    BackRef { kind: char },

    // variables and assignment
    Argument { name: String },
    LocalVar { name: String, depth: u32 },
    LocalAsgn {
        name: String,
        depth: u32,
        #[serde(default)]
        value: Option<Box<AstNode>>,
    },
    InstVar { name: String },
    InstAsgn {
        name: String,
        #[serde(default)]
        value: Option<Box<AstNode>>,
    },
    GlobalVar { name: String },
    GlobalAsgn {
        name: String,
        #[serde(default)]
        value: Option<Box<AstNode>>,
    },
    ClassVar { name: String },
    ClassVarAsgn {
        name: String,
        #[serde(default)]
        value: Option<Box<AstNode>>,
    },
    ClassVarDecl {
        name: String,
        #[serde(default)]
        value: Option<Box<AstNode>>,
    },
    Const { name: String },
    Colon2 {
        #[serde(default)]
        left: Option<Box<AstNode>>,
        name: String,
    },
    Colon3 { name: String },
    ConstDecl {
        #[serde(default)]
        path: ConstPath,
        name: String,
        #[serde(default)]
        value: Option<Box<AstNode>>,
    },
    MultipleAsgn {
        #[serde(default)]
        pre: Vec<AstNode>,
        #[serde(default)]
        rest: Option<Box<AstNode>>,
        #[serde(default)]
        post: Vec<AstNode>,
        #[serde(default)]
        value: Option<Box<AstNode>>,
    },
    /// Anonymous `*` in a destructuring pattern.
    Star,
    OpAsgn {
        receiver: Box<AstNode>,
        attr: String,
        op: String,
        value: Box<AstNode>,
    },
    OpAsgnAnd { first: Box<AstNode>, second: Box<AstNode> },
    OpAsgnOr { first: Box<AstNode>, second: Box<AstNode> },
    OpElementAsgn {
        receiver: Box<AstNode>,
        #[serde(default)]
        args: Option<Box<AstNode>>,
        op: String,
        value: Box<AstNode>,
    },
    AttrAssign {
        receiver: Box<AstNode>,
        name: String,
        #[serde(default)]
        args: Option<Box<AstNode>>,
    },

    // calls
    Call {
        receiver: Box<AstNode>,
        name: String,
        #[serde(default)]
        args: Option<Box<AstNode>>,
        #[serde(default)]
        iter: Option<Box<AstNode>>,
    },
    FCall {
        name: String,
        #[serde(default)]
        args: Option<Box<AstNode>>,
        #[serde(default)]
        iter: Option<Box<AstNode>>,
    },
    VCall { name: String },
    Super {
        #[serde(default)]
        args: Option<Box<AstNode>>,
        #[serde(default)]
        iter: Option<Box<AstNode>>,
    },
    ZSuper {
        #[serde(default)]
        iter: Option<Box<AstNode>>,
    },
    Yield {
        #[serde(default)]
        args: Option<Box<AstNode>>,
    },
    Iter {
        #[serde(default)]
        args: ArgsNode,
        #[serde(default)]
        body: Option<Box<AstNode>>,
        #[serde(default)]
        scope: Vec<String>,
    },
    Lambda {
        #[serde(default)]
        args: ArgsNode,
        #[serde(default)]
        body: Option<Box<AstNode>>,
        #[serde(default)]
        scope: Vec<String>,
    },

    // control flow
    Block { body: Vec<AstNode> },
    Newline { body: Box<AstNode> },
    Begin {
        #[serde(default)]
        body: Option<Box<AstNode>>,
    },
    If {
        condition: Box<AstNode>,
        #[serde(default)]
        then_body: Option<Box<AstNode>>,
        #[serde(default)]
        else_body: Option<Box<AstNode>>,
    },
    And { first: Box<AstNode>, second: Box<AstNode> },
    Or { first: Box<AstNode>, second: Box<AstNode> },
    Case {
        #[serde(default)]
        subject: Option<Box<AstNode>>,
        whens: Vec<WhenClause>,
        #[serde(default)]
        else_body: Option<Box<AstNode>>,
    },
    While {
        condition: Box<AstNode>,
        #[serde(default)]
        body: Option<Box<AstNode>>,
        #[serde(default = "evaluate_at_start")]
        evaluate_at_start: bool,
    },
    Until {
        condition: Box<AstNode>,
        #[serde(default)]
        body: Option<Box<AstNode>>,
        #[serde(default = "evaluate_at_start")]
        evaluate_at_start: bool,
    },
    For {
        var: Box<AstNode>,
        iter: Box<AstNode>,
        #[serde(default)]
        body: Option<Box<AstNode>>,
        #[serde(default)]
        scope: Vec<String>,
    },
    Break {
        #[serde(default)]
        value: Option<Box<AstNode>>,
    },
    Next {
        #[serde(default)]
        value: Option<Box<AstNode>>,
    },
    Redo,
    Retry,
    Return {
        #[serde(default)]
        value: Option<Box<AstNode>>,
    },
    Flip {
        begin: Box<AstNode>,
        end: Box<AstNode>,
        #[serde(default)]
        exclusive: bool,
    },
    Rescue {
        #[serde(default)]
        body: Option<Box<AstNode>>,
        #[serde(default)]
        clauses: Vec<RescueClause>,
        #[serde(default)]
        else_body: Option<Box<AstNode>>,
    },
    Ensure {
        #[serde(default)]
        body: Option<Box<AstNode>>,
        #[serde(default)]
        ensure: Option<Box<AstNode>>,
    },
    Defined { expression: Box<AstNode> },
    Match { regexp: Box<AstNode> },
    Match2 { receiver: Box<AstNode>, value: Box<AstNode> },
    Match3 { receiver: Box<AstNode>, value: Box<AstNode> },

    // definitions
    Defn {
        name: String,
        #[serde(default)]
        args: ArgsNode,
        #[serde(default)]
        body: Option<Box<AstNode>>,
        #[serde(default)]
        scope: Vec<String>,
    },
    Defs {
        receiver: Box<AstNode>,
        name: String,
        #[serde(default)]
        args: ArgsNode,
        #[serde(default)]
        body: Option<Box<AstNode>>,
        #[serde(default)]
        scope: Vec<String>,
    },
    Class {
        name: String,
        #[serde(default)]
        path: ConstPath,
        #[serde(default)]
        superclass: Option<Box<AstNode>>,
        #[serde(default)]
        body: Option<Box<AstNode>>,
        #[serde(default)]
        scope: Vec<String>,
    },
    Module {
        name: String,
        #[serde(default)]
        path: ConstPath,
        #[serde(default)]
        body: Option<Box<AstNode>>,
        #[serde(default)]
        scope: Vec<String>,
    },
    SClass {
        receiver: Box<AstNode>,
        #[serde(default)]
        body: Option<Box<AstNode>>,
        #[serde(default)]
        scope: Vec<String>,
    },
    PreExe {
        #[serde(default)]
        body: Option<Box<AstNode>>,
    },
    PostExe {
        #[serde(default)]
        body: Option<Box<AstNode>>,
    },
    Alias { new_name: Box<AstNode>, old_name: Box<AstNode> },
    VAlias { new_name: String, old_name: String },
    Undef { name: Box<AstNode> },
}

impl NodeKind {
    /// Evaluates to a truthy value no matter what.
    pub fn always_true(&self) -> bool {
        matches!(
            self,
            NodeKind::True
                | NodeKind::SelfRef
                | NodeKind::Fixnum { .. }
                | NodeKind::Float { .. }
                | NodeKind::Bignum { .. }
                | NodeKind::Str { .. }
                | NodeKind::DStr { .. }
                | NodeKind::Symbol { .. }
                | NodeKind::DSymbol { .. }
                | NodeKind::Regexp { .. }
                | NodeKind::DRegexp { .. }
                | NodeKind::Array { .. }
                | NodeKind::ZArray
                | NodeKind::Hash { .. }
                | NodeKind::Dot { .. }
                | NodeKind::Lambda { .. }
        )
    }

    pub fn always_false(&self) -> bool {
        matches!(self, NodeKind::Nil | NodeKind::False)
    }

    /// Literal whose value is known without running anything; `case` uses a
    /// direct equality branch for these.
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            NodeKind::Nil
                | NodeKind::True
                | NodeKind::False
                | NodeKind::Fixnum { .. }
                | NodeKind::Float { .. }
                | NodeKind::Bignum { .. }
                | NodeKind::Str { .. }
                | NodeKind::Symbol { .. }
                | NodeKind::Regexp { .. }
        )
    }

    /// Reading this node may fail at run time because the thing it names
    /// does not exist yet (`@a ||= 1` must not warn or raise).
    pub fn needs_definition_check(&self) -> bool {
        matches!(
            self,
            NodeKind::InstVar { .. }
                | NodeKind::GlobalVar { .. }
                | NodeKind::ClassVar { .. }
                | NodeKind::Const { .. }
                | NodeKind::Colon2 { .. }
                | NodeKind::Colon3 { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Root { .. } => "Root",
            NodeKind::Nil => "Nil",
            NodeKind::True => "True",
            NodeKind::False => "False",
            NodeKind::SelfRef => "Self",
            NodeKind::Fixnum { .. } => "Fixnum",
            NodeKind::Float { .. } => "Float",
            NodeKind::Bignum { .. } => "Bignum",
            NodeKind::Str { .. } => "Str",
            NodeKind::Symbol { .. } => "Symbol",
            NodeKind::Regexp { .. } => "Regexp",
            NodeKind::DStr { .. } => "DStr",
            NodeKind::DSymbol { .. } => "DSymbol",
            NodeKind::DRegexp { .. } => "DRegexp",
            NodeKind::XStr { .. } => "XStr",
            NodeKind::DXStr { .. } => "DXStr",
            NodeKind::EvStr { .. } => "EvStr",
            NodeKind::Array { .. } => "Array",
            NodeKind::ZArray => "ZArray",
            NodeKind::Hash { .. } => "Hash",
            NodeKind::Dot { .. } => "Dot",
            NodeKind::Splat { .. } => "Splat",
            NodeKind::SValue { .. } => "SValue",
            NodeKind::ArgsCat { .. } => "ArgsCat",
            NodeKind::ArgsPush { .. } => "ArgsPush",
            NodeKind::BlockPass { .. } => "BlockPass",
            NodeKind::NthRef { .. } => "NthRef",
            NodeKind::BackRef { .. } => "BackRef",
            NodeKind::Argument { .. } => "Argument",
            NodeKind::LocalVar { .. } => "LocalVar",
            NodeKind::LocalAsgn { .. } => "LocalAsgn",
            NodeKind::InstVar { .. } => "InstVar",
            NodeKind::InstAsgn { .. } => "InstAsgn",
            NodeKind::GlobalVar { .. } => "GlobalVar",
            NodeKind::GlobalAsgn { .. } => "GlobalAsgn",
            NodeKind::ClassVar { .. } => "ClassVar",
            NodeKind::ClassVarAsgn { .. } => "ClassVarAsgn",
            NodeKind::ClassVarDecl { .. } => "ClassVarDecl",
            NodeKind::Const { .. } => "Const",
            NodeKind::Colon2 { .. } => "Colon2",
            NodeKind::Colon3 { .. } => "Colon3",
            NodeKind::ConstDecl { .. } => "ConstDecl",
            NodeKind::MultipleAsgn { .. } => "MultipleAsgn",
            NodeKind::Star => "Star",
            NodeKind::OpAsgn { .. } => "OpAsgn",
            NodeKind::OpAsgnAnd { .. } => "OpAsgnAnd",
            NodeKind::OpAsgnOr { .. } => "OpAsgnOr",
            NodeKind::OpElementAsgn { .. } => "OpElementAsgn",
            NodeKind::AttrAssign { .. } => "AttrAssign",
            NodeKind::Call { .. } => "Call",
            NodeKind::FCall { .. } => "FCall",
            NodeKind::VCall { .. } => "VCall",
            NodeKind::Super { .. } => "Super",
            NodeKind::ZSuper { .. } => "ZSuper",
            NodeKind::Yield { .. } => "Yield",
            NodeKind::Iter { .. } => "Iter",
            NodeKind::Lambda { .. } => "Lambda",
            NodeKind::Block { .. } => "Block",
            NodeKind::Newline { .. } => "Newline",
            NodeKind::Begin { .. } => "Begin",
            NodeKind::If { .. } => "If",
            NodeKind::And { .. } => "And",
            NodeKind::Or { .. } => "Or",
            NodeKind::Case { .. } => "Case",
            NodeKind::While { .. } => "While",
            NodeKind::Until { .. } => "Until",
            NodeKind::For { .. } => "For",
            NodeKind::Break { .. } => "Break",
            NodeKind::Next { .. } => "Next",
            NodeKind::Redo => "Redo",
            NodeKind::Retry => "Retry",
            NodeKind::Return { .. } => "Return",
            NodeKind::Flip { .. } => "Flip",
            NodeKind::Rescue { .. } => "Rescue",
            NodeKind::Ensure { .. } => "Ensure",
            NodeKind::Defined { .. } => "Defined",
            NodeKind::Match { .. } => "Match",
            NodeKind::Match2 { .. } => "Match2",
            NodeKind::Match3 { .. } => "Match3",
            NodeKind::Defn { .. } => "Defn",
            NodeKind::Defs { .. } => "Defs",
            NodeKind::Class { .. } => "Class",
            NodeKind::Module { .. } => "Module",
            NodeKind::SClass { .. } => "SClass",
            NodeKind::PreExe { .. } => "PreExe",
            NodeKind::PostExe { .. } => "PostExe",
            NodeKind::Alias { .. } => "Alias",
            NodeKind::VAlias { .. } => "VAlias",
            NodeKind::Undef { .. } => "Undef",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
