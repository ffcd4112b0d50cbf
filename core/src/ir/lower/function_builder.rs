//! file: core/src/ir/lower/function_builder.rs
//! description: scope preambles and formal-parameter receipt for methods,
//! blocks, lambdas, `for` bodies and BEGIN/END blocks.
//!
//! Every nested scope is lowered by a fresh `IrBuilder` (see `nested`), so
//! the loop, rescue and ensure stacks of the defining scope never leak into
//! the scope being defined.
//!
use crate::ast::{ArgsNode, AstNode, NodeKind};
use crate::ir::op::{CallType, IROp};
use crate::ir::operand::{Operand, Variable};
use crate::ir::scope::{ArgDescriptor, ScopeFlag, ScopeId, ScopeKind};

use super::{BuildError, IrBuilder, Lowered};

impl<'m> IrBuilder<'m> {
    /// Self, the block passed to this scope, and the block `yield` targets.
    pub(crate) fn prepare_implicit_state(&mut self, s: ScopeId) {
        self.emit(s, IROp::ReceiveSelf { result: Variable::SelfVar });
        self.emit(s, IROp::LoadImplicitClosure { result: Variable::ImplicitClosure });

        // singleton bodies yield to the block of the scope they are opened in
        match self.module.scope(s).kind {
            ScopeKind::Method { .. } | ScopeKind::MetaClassBody => {
                self.emit(s, IROp::LoadImplicitClosure { result: Variable::YieldClosure })
            }
            _ => self.emit(s, IROp::LoadFrameClosure { result: Variable::YieldClosure }),
        }
    }

    pub(crate) fn add_current_scope_and_module(&mut self, s: ScopeId, depth: u32) {
        self.copy(s, Variable::CurrentScope, Operand::ScopeFor(depth));
        self.copy(s, Variable::CurrentModule, Operand::ModuleFor(depth));
    }

    /// Build the scope of a `def`. The caller emits the definition itself.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn define_new_method(
        &mut self,
        node: &AstNode,
        name: &str,
        args: &ArgsNode,
        body: Option<&AstNode>,
        declared: &[String],
        instance: bool,
        s: ScopeId,
    ) -> Result<ScopeId, BuildError> {
        let depth = match self.module.nearest_module_referencing_depth(s) {
            -1 => 1,
            d => d as u32,
        };
        let m = self.module.new_scope(ScopeKind::Method { instance }, name, node.line(), Some(s), declared);

        let mut builder = self.nested();
        builder.prepare_implicit_state(m);
        // before the arguments: default values may reference constants
        builder.add_current_scope_and_module(m, depth);
        builder.receive_args(m, args, true)?;
        builder.emit(m, IROp::ThreadPoll { on_back_edge: false });

        if let Some(rv) = builder.build_opt(body, m)? {
            builder.emit(m, IROp::Return { value: rv });
        }
        if builder.module.has_flag(m, ScopeFlag::CanReceiveNonlocalReturns) {
            builder.handle_nonlocal_return_in_method(m);
        }
        builder.finish_scope(m);
        Ok(m)
    }

    /// Shared body of blocks and lambdas.
    fn build_closure_body(&mut self, c: ScopeId, args: &ArgsNode, body: Option<&AstNode>) -> Result<(), BuildError> {
        let mut builder = self.nested();
        builder.prepare_implicit_state(c);
        builder.receive_args(c, args, false)?;
        builder.add_current_scope_and_module(c, 0);
        builder.emit(c, IROp::ThreadPoll { on_back_edge: false });

        // redo target
        let start = builder.label(c);
        builder.module.scope_mut(c).start_label = Some(start);
        builder.emit_label(c, start);

        if let Some(rv) = builder.build_opt(body, c)? {
            builder.emit(c, IROp::Return { value: rv });
        }
        builder.handle_break_and_returns_in_lambdas(c);
        builder.finish_scope(c);
        Ok(())
    }

    /// The enclosing scope reloads its own block so the closure can capture it.
    fn reload_yield_closure(&mut self, s: ScopeId) {
        if self.module.scope(s).kind.is_method() {
            self.emit(s, IROp::LoadImplicitClosure { result: Variable::YieldClosure });
        } else {
            self.emit(s, IROp::LoadFrameClosure { result: Variable::YieldClosure });
        }
    }

    pub(crate) fn build_iter(
        &mut self,
        node: &AstNode,
        args: &ArgsNode,
        body: Option<&AstNode>,
        declared: &[String],
        s: ScopeId,
    ) -> Result<ScopeId, BuildError> {
        let c = self.module.new_scope(ScopeKind::Closure, "_block_", node.line(), Some(s), declared);
        self.reload_yield_closure(s);
        self.build_closure_body(c, args, body)?;
        Ok(c)
    }

    pub(crate) fn build_lambda(
        &mut self,
        node: &AstNode,
        args: &ArgsNode,
        body: Option<&AstNode>,
        declared: &[String],
        s: ScopeId,
    ) -> Lowered {
        let c = self.module.new_scope(ScopeKind::Lambda, "_lambda_", node.line(), Some(s), declared);
        self.build_closure_body(c, args, body)?;

        let result = self.temp(s);
        self.emit(s, IROp::BuildLambda { result: result.clone(), closure: Operand::Closure(c) });
        Ok(Some(result.into()))
    }

    /// `for var in iter` is `iter.each { |var| ... }` where `var` and the
    /// body's locals belong to the enclosing scope.
    pub(crate) fn build_for(
        &mut self,
        node: &AstNode,
        var: &AstNode,
        iter: &AstNode,
        body: Option<&AstNode>,
        declared: &[String],
        s: ScopeId,
    ) -> Lowered {
        let receiver = reachable!(self.build(iter, s));

        let c = self.module.new_scope(ScopeKind::For, "_for_", node.line(), Some(s), declared);
        {
            let mut builder = self.nested();
            builder.prepare_implicit_state(c);
            let arg = builder.temp(c);
            builder.emit(c, IROp::ReceivePreReqdArg { result: arg.clone(), index: 0 });
            builder.build_assignment(var, arg.into(), c)?;
            builder.add_current_scope_and_module(c, 0);
            builder.emit(c, IROp::ThreadPoll { on_back_edge: false });

            let start = builder.label(c);
            builder.module.scope_mut(c).start_label = Some(start);
            builder.emit_label(c, start);

            if let Some(rv) = builder.build_opt(body, c)? {
                builder.emit(c, IROp::Return { value: rv });
            }
            builder.finish_scope(c);
        }

        let closure = Operand::Closure(c);
        let result = self.temp(s);
        let call = IROp::Call {
            result: Some(result.clone()),
            call_type: CallType::Normal,
            name: "each".to_string(),
            receiver,
            args: Vec::new(),
            closure: Some(closure.clone()),
            proc_new: false,
        };
        self.receive_break_exception(s, Some(&closure), &result, |b| b.emit(s, call));
        Ok(Some(result.into()))
    }

    /// Lower a BEGIN/END body into closure `c`; it always returns nil.
    fn build_exe_body(&mut self, c: ScopeId, body: Option<&AstNode>) -> Result<(), BuildError> {
        let mut builder = self.nested();
        builder.add_current_scope_and_module(c, 0);
        builder.build_opt(body, c)?;
        builder.emit(c, IROp::Return { value: Operand::Nil });
        builder.finish_scope(c);
        Ok(())
    }

    /// `BEGIN { }` runs before the script; it is only recorded here.
    pub(crate) fn build_pre_exe(&mut self, node: &AstNode, body: Option<&AstNode>, s: ScopeId) -> Lowered {
        let root = self.module.root;
        let declared = self.module.scope(root).declared.clone();
        let c = self.module.new_scope(ScopeKind::PreExe, "_BEGIN_", node.line(), Some(s), &declared);
        self.build_exe_body(c, body)?;
        self.module.scope_mut(root).begin_blocks.push(c);
        Ok(Some(Operand::Nil))
    }

    pub(crate) fn build_post_exe(&mut self, node: &AstNode, body: Option<&AstNode>, s: ScopeId) -> Lowered {
        let owner = self.module.nearest_flip_scope(s);
        let declared = self.module.scope(owner).declared.clone();
        let c = self.module.new_scope(ScopeKind::PostExe, "_END_", node.line(), Some(s), &declared);
        self.build_exe_body(c, body)?;
        self.emit(s, IROp::RecordEndBlock { closure: Operand::Closure(c) });
        Ok(Some(Operand::Nil))
    }

    // ---- formal parameters ----

    /// Receive the formal parameters of `s` in declaration order: pre, opt,
    /// rest, post, keywords, keyword rest, block.
    pub(crate) fn receive_args(&mut self, s: ScopeId, args: &ArgsNode, is_method: bool) -> Result<(), BuildError> {
        let pre_count = args.pre.len();
        let post_count = args.post.len();
        let required = args.required_count();
        let opt = args.opt.len();

        if is_method || args.has_kwargs() {
            self.emit(
                s,
                IROp::CheckArity {
                    required,
                    opt,
                    rest: args.rest.is_some(),
                    has_kwargs: args.has_kwargs(),
                    kw_rest: args.kw_rest.is_some(),
                },
            );
        }
        if args.has_kwargs() {
            self.module.set_flag(s, ScopeFlag::ReceivesKeywordArgs);
        }

        for (i, arg) in args.pre.iter().enumerate() {
            self.receive_required_arg(s, arg, i, None)?;
        }

        for (j, o) in args.opt.iter().enumerate() {
            let local = self.arg_local(s, &o.name);
            let supplied = self.label(s);
            self.emit(s, IROp::ReceiveOptArg { result: local.clone(), required, pre_count, index: j });
            self.emit(s, IROp::bne(local.clone().into(), Operand::Undefined, supplied));
            // the default may read earlier parameters
            if let Some(v) = self.build(&o.value, s)? {
                self.copy(s, local.clone(), v);
            }
            self.emit_label(s, supplied);
            self.add_arg_desc(s, ArgDescriptor::Opt(local.into()));
        }

        if let Some(rest) = &args.rest {
            let name = rest.name.as_deref().unwrap_or("*");
            let local = self.arg_local(s, name);
            self.emit(s, IROp::ReceiveRestArg { result: local.clone(), required: required + opt, index: pre_count + opt });
            self.add_arg_desc(s, ArgDescriptor::Rest(local.into()));
        }

        for (i, arg) in args.post.iter().enumerate() {
            self.receive_required_arg(s, arg, i, Some((pre_count, post_count)))?;
        }

        for kw in &args.keywords {
            let local = self.arg_local(s, &kw.name);
            let supplied = self.label(s);
            self.emit(s, IROp::ReceiveKeywordArg { result: local.clone(), name: kw.name.clone(), required });
            self.emit(s, IROp::bne(local.clone().into(), Operand::Undefined, supplied));
            match &kw.value {
                Some(default) => {
                    if let Some(v) = self.build(default, s)? {
                        self.copy(s, local.clone(), v);
                    }
                }
                None => self.emit(s, IROp::RaiseRequiredKeywordArgumentError { name: kw.name.clone() }),
            }
            self.emit_label(s, supplied);
            self.add_arg_desc(s, ArgDescriptor::Keyword { name: kw.name.clone(), value: local.into() });
        }

        if let Some(name) = &args.kw_rest {
            let local = self.arg_local(s, name);
            self.emit(s, IROp::ReceiveKeywordRestArg { result: local.clone(), required });
            self.add_arg_desc(s, ArgDescriptor::KeywordRest(local.into()));
        }

        if let Some(name) = &args.block {
            let local = self.arg_local(s, name);
            self.module.set_flag(s, ScopeFlag::ReceivesClosureArg);
            self.emit(s, IROp::ReifyClosure { result: local, source: Variable::ImplicitClosure.into() });
        }
        Ok(())
    }

    /// `post`: `(pre_count, post_count)` for a parameter after the rest.
    fn receive_required_arg(&mut self, s: ScopeId, arg: &AstNode, index: usize, post: Option<(usize, usize)>) -> Result<(), BuildError> {
        let receive = |result: Variable| match post {
            Some((pre_count, post_count)) => IROp::ReceivePostReqdArg { result, index, pre_count, post_count },
            None => IROp::ReceivePreReqdArg { result, index },
        };

        match &arg.kind {
            NodeKind::Argument { name } => {
                let local = self.arg_local(s, name);
                self.emit(s, receive(local.clone()));
                self.add_arg_desc(s, ArgDescriptor::Req(local.into()));
            }
            NodeKind::MultipleAsgn { .. } => {
                // keep the whole value in a hidden local for zero-arg super
                let slot = format!("%destructured_{}{}", if post.is_some() { "post_" } else { "" }, index);
                let local = self.arg_local(s, &slot);
                self.emit(s, receive(local.clone()));
                self.add_arg_desc(s, ArgDescriptor::Req(local.clone().into()));
                self.build_assignment(arg, local.into(), s)?;
            }
            _ => return Err(self.not_compilable(arg, "unexpected node in a parameter list")),
        }
        Ok(())
    }

    fn arg_local(&mut self, s: ScopeId, name: &str) -> Variable {
        Variable::Local(self.module.scope_mut(s).get_or_define_local(name))
    }

    fn add_arg_desc(&mut self, s: ScopeId, desc: ArgDescriptor) {
        self.module.scope_mut(s).arg_descs.push(desc);
    }
}
