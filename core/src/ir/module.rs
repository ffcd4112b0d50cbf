//! file: core/src/ir/module.rs
//! description: `IrModule`, the arena owning every scope of one compilation.

use log::debug;
use serde::Serialize;
use std::fmt;

use super::operand::LocalVariable;
use super::scope::{Scope, ScopeFlag, ScopeId, ScopeKind};

#[derive(Debug, Clone, Serialize)]
pub struct IrModule {
    pub file_name: String,
    pub root: ScopeId,
    pub scopes: Vec<Scope>,
}

impl IrModule {
    pub fn new(file_name: &str) -> Self {
        IrModule { file_name: file_name.to_string(), root: ScopeId(0), scopes: Vec::new() }
    }

    /// Allocate a scope. Closure-like scopes are listed on their parent.
    pub fn new_scope(
        &mut self,
        kind: ScopeKind,
        name: &str,
        line: usize,
        parent: Option<ScopeId>,
        declared: &[String],
    ) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        let mut scope = Scope::new(id, kind, name, line, parent);
        scope.declared = declared.to_vec();
        self.scopes.push(scope);
        if let Some(p) = parent {
            if kind.is_closure() {
                self.scopes[p.0].closures.push(id);
            }
        }
        debug!("new {} scope {} '{}' at line {}", kind, id, name, line);
        id
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0]
    }

    pub fn root_scope(&self) -> &Scope {
        self.scope(self.root)
    }

    pub fn parent_of(&self, id: ScopeId) -> Option<ScopeId> {
        self.scope(id).parent
    }

    /// Resolve `name` at lexical `depth` from scope `s`.
    ///
    /// Depth 0 finds or defines in `s`. Depth N walks N parents; the target
    /// must bind or declare the name. A walk that runs off a parentless eval
    /// scope resolves against the evaluating binding at run time, so the
    /// local is returned unbound. Anything else is `None`.
    ///
    /// `for` bodies have no variables of their own: every hop starts from
    /// the scope that owns their locals.
    pub fn local_variable(&mut self, s: ScopeId, name: &str, depth: u32) -> Option<LocalVariable> {
        let mut current = self.static_owner(s);
        if depth == 0 {
            return Some(self.scope_mut(current).get_or_define_local(name));
        }
        for _ in 0..depth {
            match self.scope(current).parent {
                Some(p) => current = self.static_owner(p),
                None if self.scope(current).kind == ScopeKind::Eval => {
                    return Some(LocalVariable::new(name, depth, 0));
                }
                None => return None,
            }
        }
        let target = self.scope_mut(current);
        if let Some(l) = target.find_local(name) {
            return Some(l.clone_for_depth(depth));
        }
        if target.declares(name) {
            return Some(target.get_or_define_local(name).clone_for_depth(depth));
        }
        None
    }

    /// Nearest enclosing method, `s` included.
    pub fn nearest_method(&self, s: ScopeId) -> Option<ScopeId> {
        let mut current = Some(s);
        while let Some(id) = current {
            if self.scope(id).kind.is_method() {
                return Some(id);
            }
            current = self.scope(id).parent;
        }
        None
    }

    /// Nearest scope that is not closure-like; owns flip-flop state.
    pub fn nearest_flip_scope(&self, s: ScopeId) -> ScopeId {
        let mut current = s;
        while self.scope(current).kind.is_closure() {
            match self.scope(current).parent {
                Some(p) => current = p,
                None => break,
            }
        }
        current
    }

    /// Static-scope hops from `s` to its nearest non-closure scope. `for`
    /// bodies share the static scope of their parent and do not count.
    pub fn closure_depth(&self, s: ScopeId) -> u32 {
        let flip = self.nearest_flip_scope(s);
        let mut n = 0;
        let mut current = s;
        while current != flip {
            n += self.static_hop(current);
            match self.scope(current).parent {
                Some(p) => current = p,
                None => break,
            }
        }
        n
    }

    /// `s`, or the nearest ancestor of a `for` body that is not one.
    fn static_owner(&self, s: ScopeId) -> ScopeId {
        let mut current = s;
        while self.scope(current).kind == ScopeKind::For {
            match self.scope(current).parent {
                Some(p) => current = p,
                None => break,
            }
        }
        current
    }

    fn static_hop(&self, s: ScopeId) -> u32 {
        if self.scope(s).kind == ScopeKind::For { 0 } else { 1 }
    }

    /// Hops from `s` to the nearest module body, or -1 when an eval scope
    /// or the tree root is reached first.
    pub fn nearest_module_referencing_depth(&self, s: ScopeId) -> i32 {
        let mut n = 0;
        let mut current = s;
        loop {
            let scope = self.scope(current);
            if scope.kind.is_module_body() {
                return n;
            }
            if scope.kind == ScopeKind::Eval {
                return -1;
            }
            n += self.static_hop(current) as i32;
            match scope.parent {
                Some(p) => current = p,
                None => return -1,
            }
        }
    }

    pub fn set_flag(&mut self, s: ScopeId, flag: ScopeFlag) {
        self.scope_mut(s).set_flag(flag);
    }

    pub fn has_flag(&self, s: ScopeId, flag: ScopeFlag) -> bool {
        self.scope(s).has_flag(flag)
    }

    pub fn instruction_count(&self) -> usize {
        self.scopes.iter().map(|s| s.instrs.len()).sum()
    }
}

impl fmt::Display for IrModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, scope) in self.scopes.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{} {} '{}' line {}", scope.kind, scope.id, scope.name, scope.line)?;
            if let Some(p) = scope.parent {
                write!(f, " parent {}", p)?;
            }
            writeln!(f)?;
            if !scope.flags.is_empty() {
                let flags: Vec<String> = scope.flags.iter().map(|fl| format!("{:?}", fl)).collect();
                writeln!(f, "  flags: {}", flags.join(", "))?;
            }
            if !scope.locals.is_empty() {
                let locals: Vec<&str> = scope.locals.iter().map(|l| l.name.as_str()).collect();
                writeln!(f, "  locals: {}", locals.join(", "))?;
            }
            for op in &scope.instrs {
                match op {
                    super::op::IROp::Label { .. } => writeln!(f, "  {}", op)?,
                    _ => writeln!(f, "    {}", op)?,
                }
            }
        }
        Ok(())
    }
}
