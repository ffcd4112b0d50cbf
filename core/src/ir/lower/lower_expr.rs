//! file: core/src/ir/lower/lower_expr.rs
//! description: expression lowering.
//!
//! Literals, variables, assignment targets, calls, `super`/`yield`, the
//! boolean operators and the op-assign family. Everything here evaluates
//! strictly left to right: receiver before arguments, arguments before the
//! block.
//!
use crate::ast::{AstNode, HashPair, NodeKind};
use crate::ir::op::{CallType, IROp, RuntimeHelper, SuperKind};
use crate::ir::operand::{Operand, Variable};
use crate::ir::scope::{ArgDescriptor, ScopeFlag, ScopeId, ScopeKind};

use super::{BuildError, IrBuilder, Lowered};

impl<'m> IrBuilder<'m> {
    // ---- strings and other literals ----

    /// Pieces of an interpolated literal. Plain parts stay constant.
    fn build_dstr_pieces(&mut self, parts: &[AstNode], s: ScopeId) -> Result<Option<Vec<Operand>>, BuildError> {
        let mut pieces = Vec::with_capacity(parts.len());
        for part in parts {
            let piece = match &part.kind {
                NodeKind::Str { value } => Operand::Str(value.clone()),
                _ => reachable!(self.build(part, s)),
            };
            pieces.push(piece);
        }
        Ok(Some(pieces))
    }

    pub(crate) fn build_dstr(&mut self, parts: &[AstNode], s: ScopeId) -> Lowered {
        let pieces = reachable!(self.build_dstr_pieces(parts, s));
        let result = self.temp(s);
        self.emit(s, IROp::BuildCompoundString { result: result.clone(), pieces });
        Ok(Some(result.into()))
    }

    pub(crate) fn build_dsymbol(&mut self, parts: &[AstNode], s: ScopeId) -> Lowered {
        let pieces = reachable!(self.build_dstr_pieces(parts, s));
        let sym = Operand::DynamicSymbol(Box::new(Operand::CompoundString(pieces)));
        Ok(Some(self.copy_to_temp(s, sym).into()))
    }

    pub(crate) fn build_dregexp(&mut self, parts: &[AstNode], options: u32, s: ScopeId) -> Lowered {
        let pieces = reachable!(self.build_dstr_pieces(parts, s));
        let result = self.temp(s);
        self.emit(s, IROp::BuildDynRegExp { result: result.clone(), pieces, options });
        Ok(Some(result.into()))
    }

    pub(crate) fn build_xstr(&mut self, value: &str, s: ScopeId) -> Lowered {
        let result = self.temp(s);
        self.emit(s, IROp::Backtick { result: result.clone(), pieces: vec![Operand::Str(value.to_string())] });
        Ok(Some(result.into()))
    }

    pub(crate) fn build_dxstr(&mut self, parts: &[AstNode], s: ScopeId) -> Lowered {
        let pieces = reachable!(self.build_dstr_pieces(parts, s));
        let result = self.temp(s);
        self.emit(s, IROp::Backtick { result: result.clone(), pieces });
        Ok(Some(result.into()))
    }

    pub(crate) fn build_array(&mut self, elements: &[AstNode], s: ScopeId) -> Lowered {
        let mut elts = Vec::with_capacity(elements.len());
        for e in elements {
            elts.push(reachable!(self.build(e, s)));
        }
        Ok(Some(self.copy_to_temp(s, Operand::Array(elts)).into()))
    }

    /// Literal pairs are collected until a `**splat` entry forces a merge;
    /// the hash under construction lives in one temporary throughout.
    pub(crate) fn build_hash(&mut self, pairs: &[HashPair], s: ScopeId) -> Lowered {
        let mut args: Vec<(Operand, Operand)> = Vec::new();
        let mut hash: Option<Variable> = None;

        for pair in pairs {
            let Some(key) = &pair.key else {
                let h = match hash.take() {
                    None => self.copy_to_temp(s, Operand::Hash(std::mem::take(&mut args))),
                    Some(h) => {
                        if !args.is_empty() {
                            let literal = Operand::Hash(std::mem::take(&mut args));
                            self.merge_kwargs(s, &h, literal);
                        }
                        h
                    }
                };
                let splat = reachable!(self.build(&pair.value, s));
                self.merge_kwargs(s, &h, splat);
                hash = Some(h);
                continue;
            };
            let k = reachable!(self.build(key, s));
            let v = reachable!(self.build(&pair.value, s));
            args.push((k, v));
        }

        let result = match hash {
            None => self.copy_to_temp(s, Operand::Hash(args)),
            Some(h) => {
                if !args.is_empty() {
                    self.merge_kwargs(s, &h, Operand::Hash(args));
                }
                h
            }
        };
        Ok(Some(result.into()))
    }

    fn merge_kwargs(&mut self, s: ScopeId, hash: &Variable, other: Operand) {
        self.emit(
            s,
            IROp::RuntimeHelperCall {
                result: Some(hash.clone()),
                helper: RuntimeHelper::MergeKwargs,
                args: vec![hash.clone().into(), other],
            },
        );
    }

    pub(crate) fn build_dot(&mut self, begin: &AstNode, end: &AstNode, exclusive: bool, s: ScopeId) -> Lowered {
        let begin = reachable!(self.build(begin, s));
        let end = reachable!(self.build(end, s));
        let result = self.temp(s);
        self.emit(s, IROp::BuildRange { result: result.clone(), begin, end, exclusive });
        Ok(Some(result.into()))
    }

    pub(crate) fn build_splat(&mut self, value: &AstNode, s: ScopeId) -> Lowered {
        let value = reachable!(self.build(value, s));
        let result = self.temp(s);
        self.emit(s, IROp::BuildSplat { result: result.clone(), value });
        Ok(Some(result.into()))
    }

    pub(crate) fn build_compound_array(&mut self, first: &AstNode, second: &AstNode, is_push: bool, s: ScopeId) -> Lowered {
        let first = reachable!(self.build(first, s));
        let second = reachable!(self.build(second, s));
        let result = self.temp(s);
        self.emit(s, IROp::BuildCompoundArray { result: result.clone(), first, second, is_push });
        Ok(Some(result.into()))
    }

    // ---- variables ----

    pub(crate) fn local_variable(&mut self, node: &AstNode, s: ScopeId, name: &str, depth: u32) -> Result<Variable, BuildError> {
        match self.module.local_variable(s, name, depth) {
            Some(local) => Ok(Variable::Local(local)),
            None => Err(BuildError::UnresolvedLocal {
                name: name.to_string(),
                depth,
                location: self.location_of(node),
            }),
        }
    }

    pub(crate) fn build_inst_var(&mut self, name: &str, s: ScopeId) -> Lowered {
        let result = self.temp(s);
        self.emit(s, IROp::GetField { result: result.clone(), object: Variable::SelfVar.into(), name: name.to_string() });
        Ok(Some(result.into()))
    }

    pub(crate) fn build_global_var(&mut self, name: &str, s: ScopeId) -> Lowered {
        let result = self.temp(s);
        if name == "$!" {
            self.emit(s, IROp::GetErrorInfo { result: result.clone() });
        } else {
            self.emit(s, IROp::GetGlobalVar { result: result.clone(), name: name.to_string() });
        }
        Ok(Some(result.into()))
    }

    /// Store `value` into the target described by `node`. The value is
    /// already computed; only the target's own sub-expressions (receiver,
    /// index arguments) are evaluated here.
    pub(crate) fn build_assignment(&mut self, node: &AstNode, value: Operand, s: ScopeId) -> Result<(), BuildError> {
        match &node.kind {
            NodeKind::LocalAsgn { name, depth, .. } => {
                let var = self.local_variable(node, s, name, *depth)?;
                self.copy(s, var, value);
            }
            NodeKind::Argument { name } => {
                let var = self.local_variable(node, s, name, 0)?;
                self.copy(s, var, value);
            }
            NodeKind::InstAsgn { name, .. } => {
                self.emit(s, IROp::PutField { object: Variable::SelfVar.into(), name: name.clone(), value });
            }
            NodeKind::GlobalAsgn { name, .. } => {
                if name == "$!" {
                    self.emit(s, IROp::RestoreErrorInfo { value });
                } else {
                    self.emit(s, IROp::PutGlobalVar { name: name.clone(), value });
                }
            }
            NodeKind::ClassVarAsgn { name, .. } | NodeKind::ClassVarDecl { name, .. } => {
                let module = self.class_var_container(s, true);
                self.emit(s, IROp::PutClassVariable { module, name: name.clone(), value });
            }
            NodeKind::ConstDecl { path, name, .. } => {
                self.put_constant(path, name, value, s)?;
            }
            NodeKind::AttrAssign { receiver, name, args } => {
                let Some(obj) = self.build(receiver, s)? else { return Ok(()) };
                let Some(mut args) = self.setup_call_args(args.as_deref(), s)? else { return Ok(()) };
                args.push(value);
                self.emit(s, IROp::AttrAssign { receiver: obj, name: name.clone(), args });
            }
            NodeKind::MultipleAsgn { .. } => {
                let array = self.temp(s);
                self.emit(s, IROp::ToAry { result: array.clone(), value });
                self.build_multiple_asgn_assignment(node, array.into(), s)?;
            }
            NodeKind::Splat { value: target } => self.build_assignment(target, value, s)?,
            NodeKind::Star => {}
            other => {
                return Err(BuildError::InvalidAssignmentTarget {
                    kind: other.name().to_string(),
                    location: self.location_of(node),
                });
            }
        }
        Ok(())
    }

    /// `a, b = v`: the value of the whole expression is `v` itself.
    pub(crate) fn build_multiple_asgn(&mut self, node: &AstNode, value: &AstNode, s: ScopeId) -> Lowered {
        let values = reachable!(self.build(value, s));
        let ret = self.value_in_temp(s, values);
        let array = self.temp(s);
        self.emit(s, IROp::ToAry { result: array.clone(), value: ret.clone().into() });
        self.build_multiple_asgn_assignment(node, array.into(), s)?;
        Ok(Some(ret.into()))
    }

    /// Destructure `array` into the pre, rest and post targets of a
    /// `MultipleAsgn` pattern.
    pub(crate) fn build_multiple_asgn_assignment(&mut self, node: &AstNode, array: Operand, s: ScopeId) -> Result<(), BuildError> {
        let NodeKind::MultipleAsgn { pre, rest, post, .. } = &node.kind else {
            return Err(self.malformed(node, "expected a destructuring pattern"));
        };

        for (i, target) in pre.iter().enumerate() {
            let elt = self.temp(s);
            self.emit(
                s,
                IROp::ReqdArgMultipleAsgn { result: elt.clone(), array: array.clone(), pre_count: 0, post_count: 0, index: i },
            );
            self.build_assignment(target, elt.into(), s)?;
        }

        let pre_count = pre.len();
        let post_count = post.len();
        if let Some(rest) = rest.as_deref() {
            if !matches!(rest.kind, NodeKind::Star) {
                let elt = self.temp(s);
                self.emit(
                    s,
                    IROp::RestArgMultipleAsgn { result: elt.clone(), array: array.clone(), pre_count, post_count, index: 0 },
                );
                self.build_assignment(rest, elt.into(), s)?;
            }
        }

        for (j, target) in post.iter().enumerate() {
            let elt = self.temp(s);
            self.emit(
                s,
                IROp::ReqdArgMultipleAsgn { result: elt.clone(), array: array.clone(), pre_count, post_count, index: j },
            );
            self.build_assignment(target, elt.into(), s)?;
        }
        Ok(())
    }

    // ---- op-assign ----

    /// `recv.attr op= value`, `recv.attr ||= value`, `recv.attr &&= value`
    pub(crate) fn build_op_asgn(&mut self, receiver: &AstNode, attr: &str, op: &str, value: &AstNode, s: ScopeId) -> Lowered {
        let obj = reachable!(self.build(receiver, s));
        let reader = self.temp(s);
        self.emit_call(s, Some(reader.clone()), CallType::Normal, attr, obj.clone(), Vec::new(), None);
        let writer = format!("{}=", attr);

        if op == "||" || op == "&&" {
            let done = self.label(s);
            let skip_on = if op == "||" { Operand::True } else { Operand::False };
            self.emit(s, IROp::beq(reader.clone().into(), skip_on, done));
            if let Some(v) = self.build(value, s)? {
                self.emit(s, IROp::AttrAssign { receiver: obj, name: writer, args: vec![v.clone()] });
                // the reader's value, not whatever the writer returns
                self.copy(s, reader.clone(), v);
            }
            self.emit_label(s, done);
            return Ok(Some(reader.into()));
        }

        let v = reachable!(self.build(value, s));
        let set_value = self.temp(s);
        self.emit_call(s, Some(set_value.clone()), CallType::Normal, op, reader.into(), vec![v], None);
        self.emit(s, IROp::AttrAssign { receiver: obj, name: writer, args: vec![set_value.clone().into()] });
        Ok(Some(set_value.into()))
    }

    /// `recv[args] op= value` and its `||=` / `&&=` forms.
    pub(crate) fn build_op_element_asgn(
        &mut self,
        receiver: &AstNode,
        args: Option<&AstNode>,
        op: &str,
        value: &AstNode,
        s: ScopeId,
    ) -> Lowered {
        let array = reachable!(self.build(receiver, s));
        let args = reachable!(self.setup_call_args(args, s));
        let elt = self.temp(s);
        self.emit_call(s, Some(elt.clone()), CallType::Normal, "[]", array.clone(), args.clone(), None);

        if op == "||" || op == "&&" {
            let done = self.label(s);
            let skip_on = if op == "||" { Operand::True } else { Operand::False };
            self.emit(s, IROp::beq(elt.clone().into(), skip_on, done));
            if let Some(v) = self.build(value, s)? {
                let mut set_args = args;
                set_args.push(v.clone());
                self.emit(s, IROp::AttrAssign { receiver: array, name: "[]=".to_string(), args: set_args });
                self.copy(s, elt.clone(), v);
            }
            self.emit_label(s, done);
            return Ok(Some(elt.into()));
        }

        let v = reachable!(self.build(value, s));
        self.emit_call(s, Some(elt.clone()), CallType::Normal, op, elt.clone().into(), vec![v], None);
        let mut set_args = args;
        set_args.push(elt.clone().into());
        self.emit(s, IROp::AttrAssign { receiver: array, name: "[]=".to_string(), args: set_args });
        Ok(Some(elt.into()))
    }

    /// `x ||= v`. Reading an undefined instance/global/class variable or
    /// constant must not warn or raise, so those are probed with a
    /// `defined?` check first.
    pub(crate) fn build_op_asgn_or(&mut self, first: &AstNode, second: &AstNode, s: ScopeId) -> Lowered {
        let done = self.label(s);
        let flag = self.temp(s);
        let mut undefined_path = None;

        if first.kind.needs_definition_check() {
            let l2 = self.label(s);
            let defined = reachable!(self.build_get_definition_base(first, s));
            self.copy(s, flag.clone(), defined);
            self.emit(s, IROp::beq(flag.clone().into(), Operand::Nil, l2));
            undefined_path = Some(l2);
        }

        let v1 = reachable!(self.build(first, s));
        self.copy(s, flag.clone(), v1.clone());
        let result = self.value_in_temp(s, v1);
        if let Some(l2) = undefined_path {
            self.emit_label(s, l2);
        }
        self.emit(s, IROp::beq(flag.into(), Operand::True, done));
        if let Some(v2) = self.build(second, s)? {
            self.copy(s, result.clone(), v2);
        }
        self.emit_label(s, done);
        Ok(Some(result.into()))
    }

    /// `x &&= v`
    pub(crate) fn build_op_asgn_and(&mut self, first: &AstNode, second: &AstNode, s: ScopeId) -> Lowered {
        let done = self.label(s);
        let v1 = reachable!(self.build(first, s));
        let result = self.value_in_temp(s, v1.clone());
        self.emit(s, IROp::beq(v1, Operand::False, done));
        if let Some(v2) = self.build(second, s)? {
            self.copy(s, result.clone(), v2);
        }
        self.emit_label(s, done);
        Ok(Some(result.into()))
    }

    /// `recv.name = v` / `recv[i] = v` as an expression; its value is `v`.
    pub(crate) fn build_attr_assign(&mut self, receiver: &AstNode, name: &str, args: Option<&AstNode>, s: ScopeId) -> Lowered {
        let obj = reachable!(self.build(receiver, s));
        let args = reachable!(self.setup_call_args(args, s));
        let value = args.last().cloned().unwrap_or(Operand::Nil);
        self.emit(s, IROp::AttrAssign { receiver: obj, name: name.to_string(), args });
        Ok(Some(value))
    }

    // ---- boolean operators ----

    pub(crate) fn build_and(&mut self, first: &AstNode, second: &AstNode, s: ScopeId) -> Lowered {
        if first.kind.always_true() {
            reachable!(self.build(first, s));
            return self.build(second, s);
        }
        if first.kind.always_false() {
            return self.build(first, s);
        }
        let done = self.label(s);
        let v1 = reachable!(self.build(first, s));
        let ret = self.value_in_temp(s, v1.clone());
        self.emit(s, IROp::beq(v1, Operand::False, done));
        if let Some(v2) = self.build(second, s)? {
            self.copy(s, ret.clone(), v2);
        }
        self.emit_label(s, done);
        Ok(Some(ret.into()))
    }

    pub(crate) fn build_or(&mut self, first: &AstNode, second: &AstNode, s: ScopeId) -> Lowered {
        if first.kind.always_true() {
            return self.build(first, s);
        }
        if first.kind.always_false() {
            reachable!(self.build(first, s));
            return self.build(second, s);
        }
        let done = self.label(s);
        let v1 = reachable!(self.build(first, s));
        let ret = self.value_in_temp(s, v1.clone());
        self.emit(s, IROp::beq(v1, Operand::True, done));
        if let Some(v2) = self.build(second, s)? {
            self.copy(s, ret.clone(), v2);
        }
        self.emit_label(s, done);
        Ok(Some(ret.into()))
    }

    // ---- calls ----

    #[allow(clippy::too_many_arguments)]
    fn emit_call(
        &mut self,
        s: ScopeId,
        result: Option<Variable>,
        call_type: CallType,
        name: &str,
        receiver: Operand,
        args: Vec<Operand>,
        closure: Option<Operand>,
    ) {
        self.emit(
            s,
            IROp::Call { result, call_type, name: name.to_string(), receiver, args, closure, proc_new: false },
        );
    }

    /// Positional operands of a call. A splatted list collapses into a
    /// single splat operand.
    pub(crate) fn setup_call_args(&mut self, args: Option<&AstNode>, s: ScopeId) -> Result<Option<Vec<Operand>>, BuildError> {
        let Some(args) = args else { return Ok(Some(Vec::new())) };
        let list = match &args.kind {
            NodeKind::ArgsCat { .. } | NodeKind::ArgsPush { .. } => {
                let v = reachable!(self.build(args, s));
                vec![Operand::Splat(Box::new(v))]
            }
            NodeKind::Array { elements } => {
                let mut list = Vec::with_capacity(elements.len());
                for e in elements {
                    list.push(reachable!(self.build(e, s)));
                }
                list
            }
            NodeKind::Splat { .. } => {
                let v = reachable!(self.build(args, s));
                vec![Operand::Splat(Box::new(v))]
            }
            _ => return Err(self.not_compilable(args, "unexpected node in a call argument list")),
        };
        Ok(Some(list))
    }

    pub(crate) fn setup_call_closure(&mut self, iter: &AstNode, s: ScopeId) -> Lowered {
        match &iter.kind {
            NodeKind::Iter { .. } | NodeKind::Lambda { .. } => self.build(iter, s),
            NodeKind::BlockPass { body } => self.build(body, s),
            _ => Err(self.not_compilable(iter, "unexpected node in block position")),
        }
    }

    fn call_closure(&mut self, iter: Option<&AstNode>, s: ScopeId) -> Result<Option<Option<Operand>>, BuildError> {
        match iter {
            None => Ok(Some(None)),
            Some(n) => Ok(self.setup_call_closure(n, s)?.map(Some)),
        }
    }

    /// Emit the code `emit_body` produces. When it passes a literal block
    /// containing `break`, that code is protected so a break unwinding out
    /// of the block lands here with the break value in `result`.
    pub(crate) fn receive_break_exception(
        &mut self,
        s: ScopeId,
        closure: Option<&Operand>,
        result: &Variable,
        emit_body: impl FnOnce(&mut Self),
    ) {
        let breaks = match closure {
            Some(Operand::Closure(id)) => self.module.has_flag(*id, ScopeFlag::HasBreakInstrs),
            _ => false,
        };
        if !breaks {
            emit_body(self);
            return;
        }

        let begin = self.label(s);
        let end = self.label(s);
        let rescue = self.label(s);
        self.emit_label(s, begin);
        self.emit(s, IROp::ExceptionRegionStart { handler: Some(rescue) });
        emit_body(self);
        self.jump(s, end);
        self.emit(s, IROp::ExceptionRegionEnd);

        self.emit_label(s, rescue);
        let exc = self.temp(s);
        self.emit(s, IROp::ReceiveException { result: exc.clone(), any: true });
        self.emit(
            s,
            IROp::RuntimeHelperCall {
                result: Some(result.clone()),
                helper: RuntimeHelper::HandlePropagatedBreak,
                args: vec![exc.into()],
            },
        );
        self.emit_label(s, end);
    }

    pub(crate) fn build_call(
        &mut self,
        _node: &AstNode,
        receiver: &AstNode,
        name: &str,
        args: Option<&AstNode>,
        iter: Option<&AstNode>,
        s: ScopeId,
    ) -> Lowered {
        if let NodeKind::Str { value } = &receiver.kind {
            if name == "freeze" && args.is_none() && iter.is_none() {
                return Ok(Some(Operand::FrozenStr(value.clone())));
            }
        }

        let recv = reachable!(self.build(receiver, s));
        let args = reachable!(self.setup_call_args(args, s));
        let closure = reachable!(self.call_closure(iter, s));
        let proc_new = name == "new" && matches!(&receiver.kind, NodeKind::Const { name } if name == "Proc");

        let result = self.temp(s);
        let call = IROp::Call {
            result: Some(result.clone()),
            call_type: CallType::Normal,
            name: name.to_string(),
            receiver: recv,
            args,
            closure: closure.clone(),
            proc_new,
        };
        self.receive_break_exception(s, closure.as_ref(), &result, |b| b.emit(s, call));
        Ok(Some(result.into()))
    }

    pub(crate) fn build_fcall(&mut self, name: &str, args: Option<&AstNode>, iter: Option<&AstNode>, s: ScopeId) -> Lowered {
        let args = reachable!(self.setup_call_args(args, s));
        let closure = reachable!(self.call_closure(iter, s));
        let result = self.temp(s);
        let call = IROp::Call {
            result: Some(result.clone()),
            call_type: CallType::Functional,
            name: name.to_string(),
            receiver: Variable::SelfVar.into(),
            args,
            closure: closure.clone(),
            proc_new: false,
        };
        self.receive_break_exception(s, closure.as_ref(), &result, |b| b.emit(s, call));
        Ok(Some(result.into()))
    }

    pub(crate) fn build_vcall(&mut self, name: &str, s: ScopeId) -> Lowered {
        let result = self.temp(s);
        self.emit_call(s, Some(result.clone()), CallType::Variable, name, Variable::SelfVar.into(), Vec::new(), None);
        Ok(Some(result.into()))
    }

    // ---- super and yield ----

    fn build_super_in_module_body(&mut self, s: ScopeId) -> Lowered {
        let result = self.temp(s);
        self.emit(
            s,
            IROp::Super {
                result: result.clone(),
                kind: SuperKind::Unresolved,
                target: Variable::SelfVar.into(),
                name: None,
                args: Vec::new(),
                closure: None,
            },
        );
        Ok(Some(result.into()))
    }

    /// A method whose lexical parent is a class body knows statically which
    /// module to start the lookup from; anything else resolves at run time.
    fn build_super_instr(&mut self, s: ScopeId, closure: Operand, args: Vec<Operand>) -> Operand {
        let scope = self.module.scope(s);
        let parent_is_class = scope
            .parent
            .map(|p| self.module.scope(p).kind == ScopeKind::ClassBody)
            .unwrap_or(false);
        let (kind, target, name) = match scope.kind {
            ScopeKind::Method { instance } if parent_is_class => {
                let kind = if instance { SuperKind::Instance } else { SuperKind::Class };
                (kind, Operand::from(Variable::CurrentModule), Some(scope.name.clone()))
            }
            _ => (SuperKind::Unresolved, Operand::from(Variable::SelfVar), None),
        };

        let result = self.temp(s);
        let instr = IROp::Super { result: result.clone(), kind, target, name, args, closure: Some(closure.clone()) };
        self.receive_break_exception(s, Some(&closure), &result, |b| b.emit(s, instr));
        result.into()
    }

    pub(crate) fn build_super(&mut self, args: Option<&AstNode>, iter: Option<&AstNode>, s: ScopeId) -> Lowered {
        if self.module.scope(s).kind.is_module_body() {
            return self.build_super_in_module_body(s);
        }
        let args = reachable!(self.setup_call_args(args, s));
        let closure = reachable!(self.call_closure(iter, s)).unwrap_or(Variable::YieldClosure.into());
        Ok(Some(self.build_super_instr(s, closure, args)))
    }

    /// Zero-argument `super` forwards the parameters of the scope it is
    /// written in. Inside blocks the forwarding scope is only known at run
    /// time (`define_method`, `instance_eval`), so every candidate depth is
    /// tried in turn.
    pub(crate) fn build_zsuper(&mut self, iter: Option<&AstNode>, s: ScopeId) -> Lowered {
        if self.module.scope(s).kind.is_module_body() {
            return self.build_super_in_module_body(s);
        }
        let closure = reachable!(self.call_closure(iter, s)).unwrap_or(Variable::YieldClosure.into());

        self.module.set_flag(s, ScopeFlag::UsesZsuper);
        if let Some(m) = self.module.nearest_method(s) {
            self.module.set_flag(m, ScopeFlag::UsesZsuper);
        }

        if self.module.scope(s).kind.is_method() {
            let args = self.zsuper_call_args(s, s, 0);
            return Ok(Some(self.build_super_instr(s, closure, args)));
        }

        let result = self.temp(s);
        self.receive_break_exception(s, Some(&closure), &result, |b| b.build_zsuper_if_nested(s, &closure, &result));
        Ok(Some(result.into()))
    }

    fn build_zsuper_if_nested(&mut self, s: ScopeId, closure: &Operand, result: &Variable) {
        let depth_var = self.temp(s);
        self.emit(s, IROp::ArgScopeDepth { result: depth_var.clone() });
        let all_done = self.label(s);

        let mut next = None;
        let mut depth = 0u32;
        let mut super_scope = Some(s);
        while let Some(current) = super_scope.filter(|&c| self.module.scope(c).kind.is_closure()) {
            if let Some(l) = next {
                self.emit_label(s, l);
            }
            let l = self.label(s);
            next = Some(l);
            self.emit(s, IROp::bne(depth_var.clone().into(), Operand::Fixnum(depth as i64), l));
            let args = self.zsuper_call_args(s, current, depth);
            self.emit_zsuper(s, result, closure, args);
            self.jump(s, all_done);

            super_scope = self.module.parent_of(current);
            depth += 1;
        }
        if let Some(l) = next {
            self.emit_label(s, l);
        }

        // the outermost candidate is the method, or nothing at all
        let args = match super_scope {
            Some(m) if self.module.scope(m).kind.is_method() => self.zsuper_call_args(s, m, depth),
            _ => Vec::new(),
        };
        self.emit_zsuper(s, result, closure, args);
        self.emit_label(s, all_done);
    }

    fn emit_zsuper(&mut self, s: ScopeId, result: &Variable, closure: &Operand, args: Vec<Operand>) {
        self.emit(
            s,
            IROp::Super {
                result: result.clone(),
                kind: SuperKind::Zsuper,
                target: Variable::SelfVar.into(),
                name: None,
                args,
                closure: Some(closure.clone()),
            },
        );
    }

    /// Arguments `owner`'s parameters forward, seen from `depth` levels
    /// below it. Keyword parameters travel as one trailing hash.
    fn zsuper_call_args(&mut self, s: ScopeId, owner: ScopeId, depth: u32) -> Vec<Operand> {
        let descs = self.module.scope(owner).arg_descs.clone();
        let mut args = Vec::new();
        let mut keywords = Vec::new();
        let mut kw_rest = None;
        for desc in descs {
            match desc {
                ArgDescriptor::Req(v) | ArgDescriptor::Opt(v) => args.push(v.clone_for_depth(depth)),
                ArgDescriptor::Rest(v) => args.push(Operand::Splat(Box::new(v.clone_for_depth(depth)))),
                ArgDescriptor::Keyword { name, value } => {
                    keywords.push((Operand::Symbol(name), value.clone_for_depth(depth)))
                }
                ArgDescriptor::KeywordRest(v) => kw_rest = Some(v.clone_for_depth(depth)),
            }
        }
        match kw_rest {
            Some(rest) if keywords.is_empty() => args.push(rest),
            Some(rest) => {
                let hash = self.copy_to_temp(s, Operand::Hash(keywords));
                self.merge_kwargs(s, &hash, rest);
                args.push(hash.into());
            }
            None if !keywords.is_empty() => args.push(Operand::Hash(keywords)),
            None => {}
        }
        args
    }

    pub(crate) fn build_yield(&mut self, args: Option<&AstNode>, s: ScopeId) -> Lowered {
        let (arg, unwrap) = match args {
            None => (Operand::Undefined, true),
            Some(AstNode { kind: NodeKind::Array { elements }, .. }) if elements.len() == 1 => {
                (reachable!(self.build(&elements[0], s)), false)
            }
            Some(a) => (reachable!(self.build(a, s)), true),
        };
        let result = self.temp(s);
        self.emit(s, IROp::Yield { result: result.clone(), closure: Variable::YieldClosure.into(), arg, unwrap });
        Ok(Some(result.into()))
    }

    // ---- pattern matching and method table edits ----

    pub(crate) fn build_match(&mut self, regexp: &AstNode, s: ScopeId) -> Lowered {
        let regexp = reachable!(self.build(regexp, s));
        let result = self.temp(s);
        self.emit(s, IROp::Match { result: result.clone(), regexp });
        Ok(Some(result.into()))
    }

    pub(crate) fn build_match2(&mut self, receiver: &AstNode, value: &AstNode, s: ScopeId) -> Lowered {
        let receiver = reachable!(self.build(receiver, s));
        let value = reachable!(self.build(value, s));
        let result = self.temp(s);
        self.emit(s, IROp::Match2 { result: result.clone(), receiver, value });
        Ok(Some(result.into()))
    }

    pub(crate) fn build_match3(&mut self, receiver: &AstNode, value: &AstNode, s: ScopeId) -> Lowered {
        let receiver = reachable!(self.build(receiver, s));
        let value = reachable!(self.build(value, s));
        let result = self.temp(s);
        self.emit(s, IROp::Match3 { result: result.clone(), receiver, value });
        Ok(Some(result.into()))
    }

    pub(crate) fn build_alias(&mut self, new_name: &AstNode, old_name: &AstNode, s: ScopeId) -> Lowered {
        let new_name = reachable!(self.build(new_name, s));
        let old_name = reachable!(self.build(old_name, s));
        self.emit(s, IROp::Alias { new_name, old_name });
        Ok(Some(Operand::Nil))
    }
}
