//! file: core/src/ir/scope.rs
//! description: compilation units of the IR.
//!
//! A `Scope` owns an instruction list and a local-variable table. Scopes
//! live in the `IrModule` arena and refer to their lexical parent by
//! `ScopeId`, so a parent never borrows its children.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use super::op::IROp;
use super::operand::{Label, LocalVariable, Operand, Variable};

/// Handle into `IrModule::scopes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ScopeId(pub usize);

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScopeKind {
    Script,
    /// `instance: false` for `def self.x`.
    Method { instance: bool },
    Closure,
    Lambda,
    For,
    ClassBody,
    ModuleBody,
    MetaClassBody,
    Eval,
    PreExe,
    PostExe,
}

impl ScopeKind {
    pub fn is_closure(&self) -> bool {
        matches!(
            self,
            ScopeKind::Closure
                | ScopeKind::Lambda
                | ScopeKind::For
                | ScopeKind::Eval
                | ScopeKind::PreExe
                | ScopeKind::PostExe
        )
    }

    pub fn is_module_body(&self) -> bool {
        matches!(
            self,
            ScopeKind::Script | ScopeKind::ClassBody | ScopeKind::ModuleBody | ScopeKind::MetaClassBody
        )
    }

    pub fn is_method(&self) -> bool {
        matches!(self, ScopeKind::Method { .. })
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScopeKind::Script => "script",
            ScopeKind::Method { instance: true } => "method",
            ScopeKind::Method { instance: false } => "class_method",
            ScopeKind::Closure => "closure",
            ScopeKind::Lambda => "lambda",
            ScopeKind::For => "for",
            ScopeKind::ClassBody => "class_body",
            ScopeKind::ModuleBody => "module_body",
            ScopeKind::MetaClassBody => "metaclass_body",
            ScopeKind::Eval => "eval",
            ScopeKind::PreExe => "pre_exe",
            ScopeKind::PostExe => "post_exe",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ScopeFlag {
    HasLoops,
    HasBreakInstrs,
    HasNonlocalReturns,
    CanReceiveNonlocalReturns,
    ReceivesClosureArg,
    ReceivesKeywordArgs,
    UsesZsuper,
    /// Owned by downstream passes; the builder never sets it.
    DynamicScopeEliminated,
}

/// How one formal parameter is replayed by a zero-argument `super`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ArgDescriptor {
    Req(Operand),
    Opt(Operand),
    Rest(Operand),
    Keyword { name: String, value: Operand },
    KeywordRest(Operand),
}

#[derive(Debug, Clone, Serialize)]
pub struct Scope {
    pub id: ScopeId,
    pub kind: ScopeKind,
    pub name: String,
    pub line: usize,
    pub parent: Option<ScopeId>,
    pub instrs: Vec<IROp>,
    pub locals: Vec<LocalVariable>,
    #[serde(skip)]
    local_index: HashMap<String, usize>,
    /// Names the static-scope analysis placed in this scope.
    pub declared: Vec<String>,
    pub flags: BTreeSet<ScopeFlag>,
    pub closures: Vec<ScopeId>,
    /// Redo target of closure-like scopes.
    pub start_label: Option<Label>,
    pub arg_descs: Vec<ArgDescriptor>,
    /// `BEGIN { }` closures, recorded on the script scope only.
    pub begin_blocks: Vec<ScopeId>,
    next_label: u32,
    next_temp: u32,
    next_flip: u32,
}

impl Scope {
    pub fn new(id: ScopeId, kind: ScopeKind, name: &str, line: usize, parent: Option<ScopeId>) -> Self {
        Scope {
            id,
            kind,
            name: name.to_string(),
            line,
            parent,
            instrs: Vec::new(),
            locals: Vec::new(),
            local_index: HashMap::new(),
            declared: Vec::new(),
            flags: BTreeSet::new(),
            closures: Vec::new(),
            start_label: None,
            arg_descs: Vec::new(),
            begin_blocks: Vec::new(),
            next_label: 0,
            next_temp: 0,
            next_flip: 0,
        }
    }

    pub fn new_temp(&mut self) -> Variable {
        let t = self.next_temp;
        self.next_temp += 1;
        Variable::Temp(t)
    }

    /// Index the next `new_temp` will hand out.
    pub fn temp_mark(&self) -> u32 {
        self.next_temp
    }

    pub fn new_label(&mut self) -> Label {
        let l = self.next_label;
        self.next_label += 1;
        Label(l)
    }

    pub fn add_instr(&mut self, op: IROp) {
        self.instrs.push(op);
    }

    /// Preamble patching: prepend `op` to the instruction list.
    pub fn add_instr_at_beginning(&mut self, op: IROp) {
        self.instrs.insert(0, op);
    }

    pub fn set_flag(&mut self, flag: ScopeFlag) {
        self.flags.insert(flag);
    }

    pub fn clear_flag(&mut self, flag: ScopeFlag) {
        self.flags.remove(&flag);
    }

    pub fn has_flag(&self, flag: ScopeFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn declares(&self, name: &str) -> bool {
        self.declared.iter().any(|d| d == name)
    }

    /// Local of this scope seen at depth 0, if already bound.
    pub fn find_local(&self, name: &str) -> Option<&LocalVariable> {
        self.local_index.get(name).map(|&i| &self.locals[i])
    }

    /// Find or define `name` at depth 0.
    pub fn get_or_define_local(&mut self, name: &str) -> LocalVariable {
        if let Some(l) = self.find_local(name) {
            return l.clone();
        }
        let local = LocalVariable::new(name, 0, self.locals.len() as u32);
        self.local_index.insert(name.to_string(), self.locals.len());
        self.locals.push(local.clone());
        local
    }

    /// State variable for one flip-flop, allocated in this (non-closure) scope.
    pub fn new_flip_state_variable(&mut self) -> LocalVariable {
        let n = self.next_flip;
        self.next_flip += 1;
        self.get_or_define_local(&format!("%flip_{}", n))
    }
}
