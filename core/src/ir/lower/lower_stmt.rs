//! file: core/src/ir/lower/lower_stmt.rs
//! description: conditionals, loops and the local control transfers.
//!
//! `break`/`next`/`redo`/`return` consult the loop stack of the current
//! builder and the kind of the scope they appear in. A transfer that has
//! no valid target is not a build error: it lowers to an instruction that
//! raises a local jump error when executed.
//!
use crate::ast::{AstNode, WhenClause};
use crate::ir::op::{IROp, JumpErrorKind, RuntimeHelper};
use crate::ir::operand::{Label, Operand, Variable};
use crate::ir::scope::{ScopeFlag, ScopeId, ScopeKind};

use super::{IrBuilder, Lowered};

impl<'m> IrBuilder<'m> {
    pub(crate) fn build_if(&mut self, condition: &AstNode, then_body: Option<&AstNode>, else_body: Option<&AstNode>, s: ScopeId) -> Lowered {
        let false_label = self.label(s);
        let done_label = self.label(s);

        let cond = reachable!(self.build(condition, s));
        self.emit(s, IROp::beq(cond, Operand::False, false_label));

        let mut then_unreachable = false;
        let result = match then_body {
            Some(body) => match self.build(body, s)? {
                Some(v) => {
                    let r = self.value_in_temp(s, v);
                    self.jump(s, done_label);
                    r
                }
                None => {
                    then_unreachable = true;
                    self.temp(s)
                }
            },
            None => {
                let r = self.copy_to_temp(s, Operand::Nil);
                self.jump(s, done_label);
                r
            }
        };

        self.emit_label(s, false_label);
        let mut else_unreachable = false;
        match else_body {
            Some(body) => match self.build(body, s)? {
                Some(v) => self.copy(s, result.clone(), v),
                None => else_unreachable = true,
            },
            None => self.copy(s, result.clone(), Operand::Nil),
        }

        if then_unreachable && else_unreachable {
            return Ok(None);
        }
        self.emit_label(s, done_label);
        if then_body.is_none() && else_body.is_none() {
            return Ok(Some(Operand::Nil));
        }
        Ok(Some(result.into()))
    }

    /// `case`: guards are tested in source order, each with its own branch
    /// to the clause body; bodies are laid out after all the tests.
    pub(crate) fn build_case(&mut self, subject: Option<&AstNode>, whens: &[WhenClause], else_body: Option<&AstNode>, s: ScopeId) -> Lowered {
        let scrutinee = match subject {
            Some(n) => Some(reachable!(self.build(n, s))),
            None => None,
        };

        let end_label = self.label(s);
        let else_label = self.label(s);
        let result = self.temp(s);

        let mut bodies: Vec<(Label, Option<&AstNode>)> = Vec::with_capacity(whens.len() + 1);
        for clause in whens {
            let body_label = self.label(s);
            for guard in &clause.guards {
                let g = reachable!(self.build(guard, s));
                match &scrutinee {
                    // user `==` need not be symmetric: keep the written order
                    Some(v) if guard.kind.is_literal() => {
                        self.emit(s, IROp::BEq { a: v.clone(), b: g, target: body_label })
                    }
                    Some(v) => {
                        let eqq = self.temp(s);
                        self.emit(s, IROp::Eqq { result: eqq.clone(), target: g, value: v.clone() });
                        self.emit(s, IROp::beq(eqq.into(), Operand::True, body_label));
                    }
                    None => self.emit(s, IROp::beq(g, Operand::True, body_label)),
                }
            }
            bodies.push((body_label, clause.body.as_deref()));
        }
        self.jump(s, else_label);

        if let Some(e) = else_body {
            bodies.push((else_label, Some(e)));
        }

        let mut falls_through = else_body.is_none();
        for (label, body) in bodies {
            self.emit_label(s, label);
            if let Some(v) = self.build_opt(body, s)? {
                self.copy(s, result.clone(), v);
                self.jump(s, end_label);
                falls_through = true;
            }
        }

        if else_body.is_none() {
            self.emit_label(s, else_label);
            self.copy(s, result.clone(), Operand::Nil);
            self.jump(s, end_label);
        }

        if !falls_through {
            return Ok(None);
        }
        self.emit_label(s, end_label);
        Ok(Some(result.into()))
    }

    /// `while`/`until`, pre- or post-test. One preemption checkpoint runs
    /// per iteration, right after the redo target.
    pub(crate) fn build_conditional_loop(
        &mut self,
        condition: &AstNode,
        body: Option<&AstNode>,
        is_while: bool,
        head_condition: bool,
        s: ScopeId,
    ) -> Lowered {
        let never_entered = if is_while { condition.kind.always_false() } else { condition.kind.always_true() };
        if head_condition && never_entered {
            reachable!(self.build(condition, s));
            return Ok(Some(Operand::Nil));
        }

        self.module.set_flag(s, ScopeFlag::HasLoops);
        let loop_start = self.label(s);
        let iter_start = self.label(s);
        let iter_end = self.label(s);
        let loop_end = self.label(s);
        let setup_result = self.label(s);
        let result = self.temp(s);
        self.ctx.push_loop(loop_start, iter_start, iter_end, loop_end, result.clone());

        self.emit_label(s, loop_start);
        if head_condition {
            let Some(cv) = self.build(condition, s)? else {
                self.ctx.pop_loop();
                return Ok(None);
            };
            let exit_on = if is_while { Operand::False } else { Operand::True };
            self.emit(s, IROp::beq(cv, exit_on, setup_result));
        }

        self.emit_label(s, iter_start);
        self.emit(s, IROp::ThreadPoll { on_back_edge: true });
        self.build_opt(body, s)?;

        self.emit_label(s, iter_end);
        if head_condition {
            self.jump(s, loop_start);
        } else if let Some(cv) = self.build(condition, s)? {
            let again_on = if is_while { Operand::True } else { Operand::False };
            self.emit(s, IROp::beq(cv, again_on, iter_start));
        }

        self.emit_label(s, setup_result);
        self.copy(s, result.clone(), Operand::Nil);
        // breaks land here, past the nil result
        self.emit_label(s, loop_end);

        self.ctx.pop_loop();
        Ok(Some(result.into()))
    }

    pub(crate) fn build_break(&mut self, node: &AstNode, value: Option<&AstNode>, s: ScopeId) -> Lowered {
        let rv = reachable!(self.build_opt(value, s));
        self.restore_rescued_error_info(s);

        if let Some(lp) = self.ctx.current_loop().cloned() {
            self.emit_ensure_blocks(s, Some(lp.id));
            self.copy(s, lp.result, rv);
            self.jump(s, lp.loop_end);
            return Ok(None);
        }

        let scope = self.module.scope(s);
        match (scope.kind, scope.parent) {
            (ScopeKind::Eval, _) | (_, None) => self.raise_jump_error(s, node, JumpErrorKind::Break),
            (kind, Some(parent)) if kind.is_closure() => {
                // enclosing ensures run when the break unwinds past their handlers
                let scope_name = self.module.scope(parent).name.clone();
                self.emit(s, IROp::Break { value: rv, scope_name });
                self.module.set_flag(s, ScopeFlag::HasBreakInstrs);
            }
            _ => self.raise_jump_error(s, node, JumpErrorKind::Break),
        }
        Ok(None)
    }

    pub(crate) fn build_next(&mut self, node: &AstNode, value: Option<&AstNode>, s: ScopeId) -> Lowered {
        let rv = reachable!(self.build_opt(value, s));
        let current = self.ctx.current_loop().cloned();
        self.emit_ensure_blocks(s, current.as_ref().map(|l| l.id));
        self.restore_rescued_error_info(s);

        if let Some(lp) = current {
            self.jump(s, lp.iter_end);
            return Ok(None);
        }

        let kind = self.module.scope(s).kind;
        if kind.is_closure() && kind != ScopeKind::Eval {
            self.emit(s, IROp::ThreadPoll { on_back_edge: true });
            self.emit(s, IROp::Return { value: rv });
        } else {
            self.raise_jump_error(s, node, JumpErrorKind::Next);
        }
        Ok(None)
    }

    /// A `break`/`next` leaving a rescue clause puts back the `$!` saved on
    /// entry to the region. With an ensure active, the ensure replay does it.
    fn restore_rescued_error_info(&mut self, s: ScopeId) {
        if !self.ctx.ensures.is_empty() {
            return;
        }
        let Some(rescue) = self.ctx.current_rescue() else { return };
        if rescue.innermost_loop == self.ctx.current_loop_id() {
            let saved = rescue.saved_exception.clone();
            self.emit(s, IROp::RestoreErrorInfo { value: saved.into() });
        }
    }

    pub(crate) fn build_redo(&mut self, node: &AstNode, s: ScopeId) -> Lowered {
        let current = self.ctx.current_loop().cloned();
        self.emit_ensure_blocks(s, current.as_ref().map(|l| l.id));

        if let Some(lp) = current {
            self.jump(s, lp.iter_start);
            return Ok(None);
        }

        let scope = self.module.scope(s);
        match scope.start_label {
            Some(start) if scope.kind.is_closure() && scope.kind != ScopeKind::Eval => {
                self.emit(s, IROp::ThreadPoll { on_back_edge: true });
                self.jump(s, start);
            }
            _ => self.raise_jump_error(s, node, JumpErrorKind::Redo),
        }
        Ok(None)
    }

    pub(crate) fn build_return(&mut self, node: &AstNode, value: Option<&AstNode>, s: ScopeId) -> Lowered {
        let rv = reachable!(self.build_opt(value, s));
        let kind = self.module.scope(s).kind;
        let method = self.module.nearest_method(s);
        let method_name = method.map(|m| self.module.scope(m).name.clone());

        if kind.is_closure() {
            if !matches!(kind, ScopeKind::Eval | ScopeKind::For) {
                let in_method = if method.is_some() { Operand::True } else { Operand::False };
                self.emit(
                    s,
                    IROp::RuntimeHelperCall { result: None, helper: RuntimeHelper::CheckForLje, args: vec![in_method] },
                );
            }
            if let Some(rescue) = self.ctx.current_rescue() {
                let saved = rescue.saved_exception.clone();
                self.emit(s, IROp::RestoreErrorInfo { value: saved.into() });
            }
            // enclosing ensures run in their catch-all handler (`dummy_rescue` in build_ensure)
            self.emit(s, IROp::NonlocalReturn { value: rv, method: method_name });
            self.module.set_flag(s, ScopeFlag::HasNonlocalReturns);
            if let Some(m) = method {
                self.module.set_flag(m, ScopeFlag::CanReceiveNonlocalReturns);
            }
        } else if kind.is_module_body() {
            match method {
                None => self.raise_jump_error(s, node, JumpErrorKind::Return),
                Some(m) => {
                    self.emit(s, IROp::NonlocalReturn { value: rv, method: method_name });
                    self.module.set_flag(m, ScopeFlag::CanReceiveNonlocalReturns);
                }
            }
        } else {
            let rv = self.process_ensure_rescue_blocks(s, rv);
            self.emit(s, IROp::Return { value: rv });
        }
        Ok(None)
    }

    /// Run every active ensure before a method-level return; `$!` is reset
    /// by the ensure replays themselves, or directly when only rescues are
    /// active.
    pub(crate) fn process_ensure_rescue_blocks(&mut self, s: ScopeId, value: Operand) -> Operand {
        if !self.ctx.ensures.is_empty() {
            let saved = self.copy_to_temp(s, value);
            self.emit_ensure_blocks(s, None);
            return saved.into();
        }
        if let Some(rescue) = self.ctx.current_rescue() {
            let saved = rescue.saved_exception.clone();
            self.emit(s, IROp::RestoreErrorInfo { value: saved.into() });
        }
        value
    }

    /// Flip-flop: a two-state automaton whose state lives in the nearest
    /// non-closure scope, initialised once at that scope's entry.
    pub(crate) fn build_flip(&mut self, begin: &AstNode, end: &AstNode, exclusive: bool, s: ScopeId) -> Lowered {
        let s1 = Operand::Fixnum(1);
        let s2 = Operand::Fixnum(2);

        let flip_scope = self.module.nearest_flip_scope(s);
        let state = self.module.scope_mut(flip_scope).new_flip_state_variable();
        self.module
            .scope_mut(flip_scope)
            .add_instr_at_beginning(IROp::Copy { result: Variable::Local(state.clone()), value: s1.clone() });
        let depth = self.module.closure_depth(s);
        let state_var = Variable::Local(if depth > 0 { state.clone_for_depth(depth) } else { state });
        let state: Operand = state_var.clone().into();

        let result = self.temp(s);
        let s2_label = self.label(s);
        let done = self.label(s);

        self.copy(s, result.clone(), Operand::False);
        self.emit(s, IROp::bne(state.clone(), s1.clone(), s2_label));

        let v1 = reachable!(self.build(begin, s));
        self.emit(s, IROp::bne(v1, Operand::True, s2_label));
        self.copy(s, result.clone(), Operand::True);
        self.copy(s, state_var.clone(), s2.clone());

        self.emit_label(s, s2_label);
        if exclusive {
            self.emit(s, IROp::beq(result.clone().into(), Operand::True, done));
        }
        self.emit(s, IROp::bne(state, s2, done));

        let v2 = reachable!(self.build(end, s));
        self.copy(s, result.clone(), Operand::True);
        self.emit(s, IROp::bne(v2, Operand::True, done));
        self.copy(s, state_var, s1);

        self.emit_label(s, done);
        Ok(Some(result.into()))
    }
}
