//! file: core/src/ir/lower/mod.rs
//! description: the AST -> IR builder.
//!
//! `IrBuilder::build` is the single entry point every node goes through.
//! It returns `Ok(Some(operand))` for the value of the node, or `Ok(None)`
//! when control never falls through the node (a `return`, a `raise`, both
//! arms of an `if` jumping away, ...). Callers stop emitting as soon as
//! they see `None`.
//!
//! One builder lowers one scope. Nested scopes (methods, blocks, class
//! bodies) are lowered by a fresh builder sharing only the `IrModule`.

/// Unwrap a lowered value or propagate "unreachable" to the caller.
macro_rules! reachable {
    ($e:expr) => {
        match $e? {
            Some(v) => v,
            None => return Ok(None),
        }
    };
}

pub mod definition;
pub mod err;
pub mod function_builder;
pub mod lower_expr;
pub mod lower_objects;
pub mod lower_rescue;
pub mod lower_stmt;
pub mod lowering_context;

pub use err::BuildError;
pub use lowering_context::LoweringContext;

use log::debug;

use crate::ast::{AstNode, NodeKind};
use crate::ir::module::IrModule;
use crate::ir::op::{IROp, JumpErrorKind};
use crate::ir::operand::{Label, Operand, Variable};
use crate::ir::scope::{ScopeId, ScopeKind};
use crate::location::Location;

/// Result of lowering one node; `None` marks unreachable.
pub type Lowered = Result<Option<Operand>, BuildError>;

/// Knobs of one lowering run.
#[derive(Debug, Clone)]
pub struct BuilderOptions {
    /// Emit `LineNumber` at newline nodes whose line differs from the last.
    pub emit_line_numbers: bool,
    /// Recorded on the module and used to label diagnostics.
    pub file_name: String,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        BuilderOptions { emit_line_numbers: true, file_name: "-".to_string() }
    }
}

pub struct IrBuilder<'m> {
    pub(crate) module: &'m mut IrModule,
    pub(crate) ctx: LoweringContext,
    pub(crate) options: BuilderOptions,
}

impl<'m> IrBuilder<'m> {
    pub fn new(module: &'m mut IrModule, options: BuilderOptions) -> Self {
        IrBuilder { module, ctx: LoweringContext::new(), options }
    }

    /// Builder for a nested scope, with its own empty control stacks.
    pub(crate) fn nested(&mut self) -> IrBuilder<'_> {
        IrBuilder::new(&mut *self.module, self.options.clone())
    }

    /// Lower a script. The root node must be a `Root`.
    pub fn build_root(&mut self, root: &AstNode) -> Result<ScopeId, BuildError> {
        let NodeKind::Root { body, scope } = &root.kind else {
            return Err(self.malformed(root, "expected a Root node at the top of the tree"));
        };
        let name = self.options.file_name.clone();
        let s = self.module.new_scope(ScopeKind::Script, &name, root.line(), None, scope);
        self.module.root = s;

        self.prepare_implicit_state(s);
        self.add_current_scope_and_module(s, 0);
        if let Some(value) = self.build_opt(body.as_deref(), s)? {
            self.emit(s, IROp::Return { value });
        }
        self.finish_scope(s);
        Ok(s)
    }

    /// Lower the body of an `eval` string evaluated at `line`.
    pub fn build_eval_root(&mut self, root: &AstNode, line: usize) -> Result<ScopeId, BuildError> {
        let NodeKind::Root { body, scope } = &root.kind else {
            return Err(self.malformed(root, "expected a Root node at the top of the tree"));
        };
        let name = self.options.file_name.clone();
        let s = self.module.new_scope(ScopeKind::Eval, &name, line, None, scope);
        self.module.root = s;

        self.emit(s, IROp::LineNumber { line });
        self.ctx.last_line = Some(line);
        self.add_current_scope_and_module(s, 0);
        if let Some(value) = self.build_opt(body.as_deref(), s)? {
            self.emit(s, IROp::Return { value });
        }
        self.finish_scope(s);
        Ok(s)
    }

    pub(crate) fn finish_scope(&self, s: ScopeId) {
        let scope = self.module.scope(s);
        debug!("finished {} scope {} '{}' with {} instructions", scope.kind, s, scope.name, scope.instrs.len());
    }

    // ---- emission helpers ----

    /// Append `op` to the current sink: the innermost ensure template under
    /// construction, or the scope itself.
    pub(crate) fn emit(&mut self, s: ScopeId, op: IROp) {
        match self.ctx.active_sink() {
            Some(buf) => buf.push(op),
            None => self.module.scope_mut(s).add_instr(op),
        }
    }

    pub(crate) fn temp(&mut self, s: ScopeId) -> Variable {
        self.module.scope_mut(s).new_temp()
    }

    pub(crate) fn label(&mut self, s: ScopeId) -> Label {
        self.module.scope_mut(s).new_label()
    }

    pub(crate) fn emit_label(&mut self, s: ScopeId, label: Label) {
        self.emit(s, IROp::Label { label });
    }

    pub(crate) fn jump(&mut self, s: ScopeId, target: Label) {
        self.emit(s, IROp::Jump { target });
    }

    pub(crate) fn copy(&mut self, s: ScopeId, result: Variable, value: Operand) {
        self.emit(s, IROp::Copy { result, value });
    }

    /// Fresh temporary holding `value`.
    pub(crate) fn copy_to_temp(&mut self, s: ScopeId, value: Operand) -> Variable {
        let t = self.temp(s);
        self.copy(s, t.clone(), value);
        t
    }

    /// `value` itself when it already is a temporary, else a copy of it.
    pub(crate) fn value_in_temp(&mut self, s: ScopeId, value: Operand) -> Variable {
        match value {
            Operand::Var(v @ Variable::Temp(_)) => v,
            other => self.copy_to_temp(s, other),
        }
    }

    pub(crate) fn raise_jump_error(&mut self, s: ScopeId, node: &AstNode, reason: JumpErrorKind) {
        log::warn!("{}: {} used where it cannot transfer control; it will raise at run time", self.location_of(node), reason);
        self.emit(s, IROp::RaiseLocalJumpError { reason });
    }

    // ---- diagnostics ----

    pub(crate) fn location_of(&self, node: &AstNode) -> Location {
        let mut loc = node.location.clone().unwrap_or_default();
        if loc.file.is_empty() {
            loc.file = self.options.file_name.clone();
        }
        loc
    }

    pub(crate) fn not_compilable(&self, node: &AstNode, reason: &str) -> BuildError {
        BuildError::NotCompilable {
            kind: node.kind.name().to_string(),
            reason: reason.to_string(),
            location: self.location_of(node),
        }
    }

    pub(crate) fn malformed(&self, node: &AstNode, reason: &str) -> BuildError {
        BuildError::MalformedNode {
            kind: node.kind.name().to_string(),
            reason: reason.to_string(),
            location: self.location_of(node),
        }
    }

    // ---- dispatch ----

    /// Lower an optional child; an absent node is `nil`.
    pub(crate) fn build_opt(&mut self, node: Option<&AstNode>, s: ScopeId) -> Lowered {
        match node {
            Some(n) => self.build(n, s),
            None => Ok(Some(Operand::Nil)),
        }
    }

    pub fn build(&mut self, node: &AstNode, s: ScopeId) -> Lowered {
        match &node.kind {
            NodeKind::Root { .. } => Err(self.not_compilable(node, "a nested Root node")),

            NodeKind::Nil => Ok(Some(Operand::Nil)),
            NodeKind::True => Ok(Some(Operand::True)),
            NodeKind::False => Ok(Some(Operand::False)),
            NodeKind::SelfRef => Ok(Some(Operand::Var(Variable::SelfVar))),
            NodeKind::Fixnum { value } => Ok(Some(Operand::Fixnum(*value))),
            NodeKind::Float { value } => Ok(Some(Operand::Float(*value))),
            NodeKind::Bignum { value } => Ok(Some(Operand::Bignum(value.clone()))),
            NodeKind::Str { value } => Ok(Some(self.copy_to_temp(s, Operand::Str(value.clone())).into())),
            NodeKind::Symbol { name } => Ok(Some(Operand::Symbol(name.clone()))),
            NodeKind::Regexp { source, options } => {
                Ok(Some(Operand::Regexp { source: source.clone(), options: *options }))
            }
            NodeKind::DStr { parts } => self.build_dstr(parts, s),
            NodeKind::DSymbol { parts } => self.build_dsymbol(parts, s),
            NodeKind::DRegexp { parts, options } => self.build_dregexp(parts, *options, s),
            NodeKind::XStr { value } => self.build_xstr(value, s),
            NodeKind::DXStr { parts } => self.build_dxstr(parts, s),
            NodeKind::EvStr { body } => self.build_opt(body.as_deref(), s),
            NodeKind::Array { elements } => self.build_array(elements, s),
            NodeKind::ZArray => Ok(Some(self.copy_to_temp(s, Operand::Array(Vec::new())).into())),
            NodeKind::Hash { pairs } => self.build_hash(pairs, s),
            NodeKind::Dot { begin, end, exclusive } => self.build_dot(begin, end, *exclusive, s),
            NodeKind::Splat { value } => self.build_splat(value, s),
            NodeKind::SValue { value } => {
                let v = reachable!(self.build(value, s));
                Ok(Some(Operand::SValue(Box::new(v))))
            }
            NodeKind::ArgsCat { first, second } => self.build_compound_array(first, second, false, s),
            NodeKind::ArgsPush { first, second } => self.build_compound_array(first, second, true, s),
            NodeKind::BlockPass { .. } => Err(self.not_compilable(node, "a block argument outside of a call")),
            NodeKind::NthRef { number } => Ok(Some(Operand::NthRef(*number))),
            NodeKind::BackRef { kind } => Ok(Some(Operand::Backref(*kind))),

            NodeKind::Argument { .. } | NodeKind::Star => {
                Err(self.not_compilable(node, "a parameter pattern outside of an assignment"))
            }
            NodeKind::LocalVar { name, depth } => {
                let local = self.local_variable(node, s, name, *depth)?;
                Ok(Some(local.into()))
            }
            NodeKind::LocalAsgn { value, .. }
            | NodeKind::InstAsgn { value, .. }
            | NodeKind::GlobalAsgn { value, .. }
            | NodeKind::ClassVarAsgn { value, .. }
            | NodeKind::ClassVarDecl { value, .. }
            | NodeKind::ConstDecl { value, .. } => {
                let Some(value) = value else {
                    return Err(self.not_compilable(node, "an assignment without a value"));
                };
                let v = reachable!(self.build(value, s));
                self.build_assignment(node, v.clone(), s)?;
                Ok(Some(v))
            }
            NodeKind::InstVar { name } => self.build_inst_var(name, s),
            NodeKind::GlobalVar { name } => self.build_global_var(name, s),
            NodeKind::ClassVar { name } => self.build_class_var(name, s),
            NodeKind::Const { name } => Ok(Some(self.search_const(s, name).into())),
            NodeKind::Colon2 { left, name } => self.build_colon2(left.as_deref(), name, s),
            NodeKind::Colon3 { name } => {
                Ok(Some(self.search_const_in_inheritance_hierarchy(s, Operand::ObjectClass, name).into()))
            }
            NodeKind::MultipleAsgn { value, .. } => match value {
                Some(value) => self.build_multiple_asgn(node, value, s),
                None => Err(self.not_compilable(node, "a destructuring pattern outside of an assignment")),
            },
            NodeKind::OpAsgn { receiver, attr, op, value } => self.build_op_asgn(receiver, attr, op, value, s),
            NodeKind::OpAsgnAnd { first, second } => self.build_op_asgn_and(first, second, s),
            NodeKind::OpAsgnOr { first, second } => self.build_op_asgn_or(first, second, s),
            NodeKind::OpElementAsgn { receiver, args, op, value } => {
                self.build_op_element_asgn(receiver, args.as_deref(), op, value, s)
            }
            NodeKind::AttrAssign { receiver, name, args } => self.build_attr_assign(receiver, name, args.as_deref(), s),

            NodeKind::Call { receiver, name, args, iter } => {
                self.build_call(node, receiver, name, args.as_deref(), iter.as_deref(), s)
            }
            NodeKind::FCall { name, args, iter } => self.build_fcall(name, args.as_deref(), iter.as_deref(), s),
            NodeKind::VCall { name } => self.build_vcall(name, s),
            NodeKind::Super { args, iter } => self.build_super(args.as_deref(), iter.as_deref(), s),
            NodeKind::ZSuper { iter } => self.build_zsuper(iter.as_deref(), s),
            NodeKind::Yield { args } => self.build_yield(args.as_deref(), s),
            NodeKind::Iter { args, body, scope } => {
                let closure = self.build_iter(node, args, body.as_deref(), scope, s)?;
                Ok(Some(Operand::Closure(closure)))
            }
            NodeKind::Lambda { args, body, scope } => self.build_lambda(node, args, body.as_deref(), scope, s),

            NodeKind::Block { body } => self.build_block(body, s),
            NodeKind::Newline { body } => self.build_newline(node, body, s),
            NodeKind::Begin { body } => self.build_opt(body.as_deref(), s),
            NodeKind::If { condition, then_body, else_body } => {
                self.build_if(condition, then_body.as_deref(), else_body.as_deref(), s)
            }
            NodeKind::And { first, second } => self.build_and(first, second, s),
            NodeKind::Or { first, second } => self.build_or(first, second, s),
            NodeKind::Case { subject, whens, else_body } => {
                self.build_case(subject.as_deref(), whens, else_body.as_deref(), s)
            }
            NodeKind::While { condition, body, evaluate_at_start } => {
                self.build_conditional_loop(condition, body.as_deref(), true, *evaluate_at_start, s)
            }
            NodeKind::Until { condition, body, evaluate_at_start } => {
                self.build_conditional_loop(condition, body.as_deref(), false, *evaluate_at_start, s)
            }
            NodeKind::For { var, iter, body, scope } => self.build_for(node, var, iter, body.as_deref(), scope, s),
            NodeKind::Break { value } => self.build_break(node, value.as_deref(), s),
            NodeKind::Next { value } => self.build_next(node, value.as_deref(), s),
            NodeKind::Redo => self.build_redo(node, s),
            NodeKind::Retry => self.build_retry(node, s),
            NodeKind::Return { value } => self.build_return(node, value.as_deref(), s),
            NodeKind::Flip { begin, end, exclusive } => self.build_flip(begin, end, *exclusive, s),
            NodeKind::Rescue { .. } => self.build_rescue(node, s),
            NodeKind::Ensure { body, ensure } => self.build_ensure(body.as_deref(), ensure.as_deref(), s),
            NodeKind::Defined { expression } => self.build_defined(expression, s),
            NodeKind::Match { regexp } => self.build_match(regexp, s),
            NodeKind::Match2 { receiver, value } => self.build_match2(receiver, value, s),
            NodeKind::Match3 { receiver, value } => self.build_match3(receiver, value, s),

            NodeKind::Defn { name, args, body, scope } => {
                let method = self.define_new_method(node, name, args, body.as_deref(), scope, true, s)?;
                self.emit(s, IROp::DefineInstanceMethod { method });
                Ok(Some(Operand::Symbol(name.clone())))
            }
            NodeKind::Defs { receiver, name, args, body, scope } => {
                let container = reachable!(self.build(receiver, s));
                let method = self.define_new_method(node, name, args, body.as_deref(), scope, false, s)?;
                self.emit(s, IROp::DefineClassMethod { container, method });
                Ok(Some(Operand::Symbol(name.clone())))
            }
            NodeKind::Class { name, path, superclass, body, scope } => {
                self.build_class(node, name, path, superclass.as_deref(), body.as_deref(), scope, s)
            }
            NodeKind::Module { name, path, body, scope } => {
                self.build_module(node, name, path, body.as_deref(), scope, s)
            }
            NodeKind::SClass { receiver, body, scope } => self.build_sclass(node, receiver, body.as_deref(), scope, s),
            NodeKind::PreExe { body } => self.build_pre_exe(node, body.as_deref(), s),
            NodeKind::PostExe { body } => self.build_post_exe(node, body.as_deref(), s),
            NodeKind::Alias { new_name, old_name } => self.build_alias(new_name, old_name, s),
            NodeKind::VAlias { new_name, old_name } => {
                self.emit(s, IROp::GVarAlias { new_name: new_name.clone(), old_name: old_name.clone() });
                Ok(Some(Operand::Nil))
            }
            NodeKind::Undef { name } => {
                let name = reachable!(self.build(name, s));
                let result = self.temp(s);
                self.emit(s, IROp::UndefMethod { result: result.clone(), name });
                Ok(Some(result.into()))
            }
        }
    }

    fn build_block(&mut self, body: &[AstNode], s: ScopeId) -> Lowered {
        let mut last = Operand::Nil;
        for child in body {
            last = reachable!(self.build(child, s));
        }
        Ok(Some(last))
    }

    fn build_newline(&mut self, node: &AstNode, body: &AstNode, s: ScopeId) -> Lowered {
        let line = match node.location.as_ref() {
            Some(loc) => loc.line,
            None => body.line(),
        };
        if self.options.emit_line_numbers && self.ctx.last_line != Some(line) {
            self.emit(s, IROp::LineNumber { line });
            self.ctx.last_line = Some(line);
        }
        self.build(body, s)
    }
}
