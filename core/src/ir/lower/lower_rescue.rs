//! file: core/src/ir/lower/lower_rescue.rs
//! description: `begin/rescue/else/ensure`, `retry`, and the catch-all
//! handlers installed around methods, blocks and protected expressions.
//!
//! An ensure body is built once, into a side buffer, before the code it
//! protects. Every exit from the protected region then replays a clone of
//! that template: the normal fallthrough, each `break`/`next`/`return`
//! crossing it, and the catch-all handler that runs it on the exceptional
//! path before rethrowing. The template itself is never emitted.
//!
use log::trace;

use crate::ast::{AstNode, NodeKind, RescueClause};
use crate::ir::clone::CloneMap;
use crate::ir::op::{IROp, JumpErrorKind, RuntimeHelper};
use crate::ir::operand::{Label, Operand, Variable};
use crate::ir::scope::{ScopeFlag, ScopeId};

use super::lowering_context::{EnsureContext, RescueContext};
use super::{BuildError, IrBuilder, Lowered};

impl<'m> IrBuilder<'m> {
    pub(crate) fn build_ensure(&mut self, body: Option<&AstNode>, ensure: Option<&AstNode>, s: ScopeId) -> Lowered {
        let rescue_body = body.filter(|b| matches!(b.kind, NodeKind::Rescue { .. }));

        let region_start = self.label(s);
        let start = self.label(s);
        let end = self.label(s);
        let dummy_rescue = self.label(s);

        // template first, so exits inside the body can replay it
        let first_temp = self.module.scope(s).temp_mark();
        self.ctx.begin_ensure_build();
        let ensure_value = self.build_opt(ensure, s)?;
        let instrs = self.ctx.end_ensure_build();
        let temps = first_temp..self.module.scope(s).temp_mark();

        self.ctx.push_ensure(EnsureContext {
            region_start,
            start,
            end,
            dummy_rescue,
            saved_exception: None,
            innermost_loop: self.ctx.current_loop_id(),
            matching_rescue: rescue_body.map(|b| b.get_id()),
            body_rescuer: self.ctx.current_rescuer(),
            instrs,
            temps,
        });

        self.emit_label(s, region_start);
        self.emit(s, IROp::ExceptionRegionStart { handler: Some(dummy_rescue) });
        self.ctx.push_rescuer(dummy_rescue);

        let rv = match rescue_body {
            Some(r) => self.build_rescue_internal(r, true, s)?,
            None => self.build_opt(body, s)?,
        };

        self.emit(s, IROp::ExceptionRegionEnd);
        self.ctx.pop_rescuer();

        let mut result = rv.clone();
        if rescue_body.is_none() {
            if let Some(v) = rv {
                let value = self.copy_to_temp(s, v);
                let top = self.ctx.ensures.len() - 1;
                self.clone_ensure(s, top);
                self.jump(s, end);
                result = Some(value.into());
            }
        }

        let Some(ctx) = self.ctx.pop_ensure() else {
            return Ok(result);
        };

        // exceptional path: run the ensure body, then rethrow
        self.emit_label(s, dummy_rescue);
        let exc = self.temp(s);
        self.emit(s, IROp::ReceiveException { result: exc.clone(), any: true });
        let map = CloneMap::for_template(&ctx.instrs, &[], &ctx.temps, self.module.scope_mut(s));
        for op in map.clone_all(&ctx.instrs) {
            self.emit(s, op);
        }
        self.emit(s, IROp::Throw { exception: exc.into() });
        self.emit_label(s, end);

        if ensure_value.is_none() {
            return Ok(None);
        }
        Ok(result)
    }

    /// Replay ensure `index` of the active stack at the current point.
    pub(crate) fn clone_ensure(&mut self, s: ScopeId, index: usize) {
        let Some(ctx) = self.ctx.ensures.get(index) else { return };
        let saved = ctx.saved_exception.clone();
        let start = ctx.start;
        let rescuer = ctx.body_rescuer;
        let temps = ctx.temps.clone();
        let instrs = ctx.instrs.clone();

        if let Some(saved) = saved {
            self.emit(s, IROp::RestoreErrorInfo { value: saved.into() });
        }
        let map = CloneMap::for_template(&instrs, &[start], &temps, self.module.scope_mut(s));
        let start = map.renamed_label(start);
        trace!("replaying ensure body ({} instructions) in {} at {}", instrs.len(), s, start);

        self.emit_label(s, start);
        self.emit(s, IROp::ExceptionRegionStart { handler: rescuer });
        for op in map.clone_all(&instrs) {
            self.emit(s, op);
        }
        self.emit(s, IROp::ExceptionRegionEnd);
    }

    /// Replay active ensures innermost first. With `target_loop`, stop at
    /// the first ensure that lies outside that loop.
    pub(crate) fn emit_ensure_blocks(&mut self, s: ScopeId, target_loop: Option<u32>) {
        for index in (0..self.ctx.ensures.len()).rev() {
            if target_loop.is_some() && self.ctx.ensures[index].innermost_loop != target_loop {
                break;
            }
            self.clone_ensure(s, index);
        }
    }

    pub(crate) fn build_rescue(&mut self, node: &AstNode, s: ScopeId) -> Lowered {
        self.build_rescue_internal(node, false, s)
    }

    /// `with_ensure`: the rescue is the direct body of the ensure on top of
    /// the stack, which then owns the region's end label.
    fn build_rescue_internal(&mut self, node: &AstNode, with_ensure: bool, s: ScopeId) -> Lowered {
        let NodeKind::Rescue { body, clauses, else_body } = &node.kind else {
            return Err(self.malformed(node, "expected a Rescue node"));
        };

        let begin_label = self.label(s);
        let end_label = match self.ctx.ensures.last() {
            Some(e) if with_ensure => e.end,
            _ => self.label(s),
        };
        let rescue_label = self.label(s);

        let saved = self.temp(s);
        self.emit(s, IROp::GetErrorInfo { result: saved.clone() });
        if with_ensure {
            if let Some(e) = self.ctx.ensures.last_mut() {
                e.saved_exception = Some(saved.clone());
            }
        }

        self.emit_label(s, begin_label);
        self.emit(s, IROp::ExceptionRegionStart { handler: Some(rescue_label) });
        self.ctx.push_rescuer(rescue_label);

        let rv = self.temp(s);
        let mut value = self.build_opt(body.as_deref(), s)?;

        // pushed after the body: a retry in the body belongs to an outer rescue
        self.ctx.push_rescue(RescueContext {
            node: node.get_id(),
            entry: begin_label,
            saved_exception: saved.clone(),
            innermost_loop: self.ctx.current_loop_id(),
        });
        self.emit(s, IROp::ExceptionRegionEnd);
        self.ctx.pop_rescuer();

        if let (Some(_), Some(else_body)) = (&value, else_body) {
            let else_label = self.label(s);
            self.emit_label(s, else_label);
            value = self.build(else_body, s)?;
        }
        let mut falls_through = value.is_some();
        if let Some(v) = value {
            self.copy(s, rv.clone(), v);
            if with_ensure {
                self.clone_ensure(s, self.ctx.ensures.len() - 1);
            }
            self.jump(s, end_label);
        }

        self.emit_label(s, rescue_label);
        let exc = self.temp(s);
        self.emit(s, IROp::ReceiveException { result: exc.clone(), any: false });
        for clause in clauses {
            falls_through |= self.build_rescue_clause(node, clause, &exc, &rv, end_label, s)?;
        }
        self.emit(s, IROp::Throw { exception: exc.into() });

        if !with_ensure {
            self.emit_label(s, end_label);
        }
        self.ctx.pop_rescue();

        Ok(falls_through.then(|| rv.into()))
    }

    /// One `rescue Types => e` clause. Returns whether its body can fall
    /// through to the end of the region.
    fn build_rescue_clause(
        &mut self,
        node: &AstNode,
        clause: &RescueClause,
        exc: &Variable,
        rv: &Variable,
        end_label: Label,
        s: ScopeId,
    ) -> Result<bool, BuildError> {
        let uncaught = self.label(s);

        let types = match clause.exceptions.as_slice() {
            [] => {
                // looked up at run time: StandardError may be redefined
                let t = self.temp(s);
                self.emit(
                    s,
                    IROp::InheritanceSearchConst {
                        result: t.clone(),
                        module: Variable::CurrentModule.into(),
                        name: "StandardError".to_string(),
                        no_private: false,
                    },
                );
                t.into()
            }
            [AstNode { kind: NodeKind::Splat { value }, .. }] => match self.build(value, s)? {
                Some(v) => v,
                None => return Ok(false),
            },
            list => {
                let mut types = Vec::with_capacity(list.len());
                for t in list {
                    match self.build(t, s)? {
                        Some(v) => types.push(v),
                        None => return Ok(false),
                    }
                }
                Operand::Array(types)
            }
        };
        let matched = self.temp(s);
        self.emit(s, IROp::RescueEqq { result: matched.clone(), types, exception: exc.clone().into() });
        self.emit(s, IROp::beq(matched.into(), Operand::False, uncaught));

        if let Some(binding) = clause.binding.as_deref() {
            self.build_assignment(binding, exc.clone().into(), s)?;
        }
        let value = self.build_opt(clause.body.as_deref(), s)?;
        let falls_through = value.is_some();
        if let Some(x) = value {
            if let Some(saved) = self.ctx.current_rescue().map(|r| r.saved_exception.clone()) {
                self.emit(s, IROp::RestoreErrorInfo { value: saved.into() });
            }
            self.copy(s, rv.clone(), x);
            let matching = self.ctx.ensures.last().and_then(|e| e.matching_rescue) == Some(node.get_id());
            if matching {
                self.clone_ensure(s, self.ctx.ensures.len() - 1);
            }
            self.jump(s, end_label);
        }

        self.emit_label(s, uncaught);
        Ok(falls_through)
    }

    /// `retry`: back to the entry of the innermost rescue region, with `$!`
    /// as it was when that region was first entered.
    pub(crate) fn build_retry(&mut self, node: &AstNode, s: ScopeId) -> Lowered {
        let Some(rescue) = self.ctx.current_rescue().cloned() else {
            self.raise_jump_error(s, node, JumpErrorKind::Retry);
            return Ok(None);
        };
        self.emit(s, IROp::ThreadPoll { on_back_edge: true });
        self.emit(s, IROp::RestoreErrorInfo { value: rescue.saved_exception.into() });
        self.jump(s, rescue.entry);
        // a retry closes a loop
        self.module.set_flag(s, ScopeFlag::HasLoops);
        Ok(None)
    }

    /// Wrap everything emitted so far into `s` in a region whose catch-all
    /// handler routes the received exception through `helper` and returns
    /// its result.
    fn protect_scope_body(&mut self, s: ScopeId, helper: RuntimeHelper) {
        let begin = self.label(s);
        let handler = self.label(s);
        {
            let scope = self.module.scope_mut(s);
            // reverse order: the label must end up first
            scope.add_instr_at_beginning(IROp::ExceptionRegionStart { handler: Some(handler) });
            scope.add_instr_at_beginning(IROp::Label { label: begin });
        }
        self.emit(s, IROp::ExceptionRegionEnd);

        self.emit_label(s, handler);
        let exc = self.temp(s);
        self.emit(s, IROp::ReceiveException { result: exc.clone(), any: true });
        let ret = self.temp(s);
        self.emit(s, IROp::RuntimeHelperCall { result: Some(ret.clone()), helper, args: vec![exc.into()] });
        self.emit(s, IROp::Return { value: ret.into() });
    }

    /// Catch returns unwinding out of nested closures and turn the one
    /// aimed at this method into its own return.
    pub(crate) fn handle_nonlocal_return_in_method(&mut self, s: ScopeId) {
        self.protect_scope_body(s, RuntimeHelper::HandleNonlocalReturn);
    }

    /// Blocks and lambdas: a lambda turns an escaping `break` or `return`
    /// into its own return, a plain block rethrows.
    pub(crate) fn handle_break_and_returns_in_lambdas(&mut self, s: ScopeId) {
        self.protect_scope_body(s, RuntimeHelper::HandleBreakAndReturnsInLambda);
    }

    /// Evaluate `protected`; if it raises any language-level exception the
    /// value is `nil` instead, and `$!` is reset to `restore` when given.
    pub(crate) fn protect_code_with_rescue(
        &mut self,
        s: ScopeId,
        restore: Option<Variable>,
        protected: impl FnOnce(&mut Self) -> Lowered,
    ) -> Lowered {
        let rv = self.temp(s);
        let begin = self.label(s);
        let end = self.label(s);
        let rescue = self.label(s);

        self.emit_label(s, begin);
        self.emit(s, IROp::ExceptionRegionStart { handler: Some(rescue) });
        self.ctx.push_rescuer(rescue);
        let value = protected(self)?;
        self.ctx.pop_rescuer();
        if let Some(v) = value {
            self.copy(s, rv.clone(), v);
            self.jump(s, end);
        }
        self.emit(s, IROp::ExceptionRegionEnd);

        let caught = self.label(s);
        let exc = self.temp(s);
        let exc_type = self.temp(s);
        self.emit_label(s, rescue);
        self.emit(s, IROp::ReceiveException { result: exc.clone(), any: true });
        self.emit(
            s,
            IROp::InheritanceSearchConst {
                result: exc_type.clone(),
                module: Operand::ObjectClass,
                name: "Exception".to_string(),
                no_private: false,
            },
        );
        let matched = self.temp(s);
        self.emit(s, IROp::RescueEqq { result: matched.clone(), types: exc_type.into(), exception: exc.clone().into() });
        self.emit(s, IROp::beq(matched.into(), Operand::True, caught));
        self.emit(s, IROp::Throw { exception: exc.into() });

        self.emit_label(s, caught);
        if let Some(saved) = restore {
            self.emit(s, IROp::RestoreErrorInfo { value: saved.into() });
        }
        self.copy(s, rv.clone(), Operand::Nil);
        self.emit_label(s, end);
        Ok(Some(rv.into()))
    }
}
