//! file: core/src/ir/lower/definition.rs
//! description: `defined?(expr)` lowering.
//!
//! The value is a frozen description string ("method", "local-variable",
//! ...) or nil. Expressions whose definedness is known at build time fold
//! to a constant; the rest consult runtime helpers, and anything that has
//! to evaluate user code to find out runs inside a protected region so a
//! raise turns into nil.
//!
use crate::ast::{AstNode, NodeKind};
use crate::ir::op::{IROp, RuntimeHelper};
use crate::ir::operand::{Label, Operand, Variable};
use crate::ir::scope::ScopeId;

use super::{IrBuilder, Lowered};

fn described(what: &str) -> Lowered {
    Ok(Some(Operand::FrozenStr(what.to_string())))
}

impl<'m> IrBuilder<'m> {
    pub(crate) fn build_defined(&mut self, node: &AstNode, s: ScopeId) -> Lowered {
        let mut node = node;
        while let NodeKind::Newline { body } = &node.kind {
            node = body;
        }

        match &node.kind {
            NodeKind::ClassVarAsgn { .. }
            | NodeKind::ClassVarDecl { .. }
            | NodeKind::ConstDecl { .. }
            | NodeKind::LocalAsgn { .. }
            | NodeKind::GlobalAsgn { .. }
            | NodeKind::InstAsgn { .. }
            | NodeKind::MultipleAsgn { .. }
            | NodeKind::OpAsgn { .. }
            | NodeKind::OpAsgnAnd { .. }
            | NodeKind::OpAsgnOr { .. }
            | NodeKind::OpElementAsgn { .. } => described("assignment"),
            NodeKind::And { .. } | NodeKind::Or { .. } => described("expression"),
            NodeKind::False => described("false"),
            NodeKind::True => described("true"),
            NodeKind::Nil => described("nil"),
            NodeKind::SelfRef => described("self"),
            NodeKind::LocalVar { .. } => described("local-variable"),
            NodeKind::Match2 { .. } | NodeKind::Match3 { .. } => described("method"),

            // defined as long as building the pieces does not raise
            NodeKind::DStr { .. } | NodeKind::DRegexp { .. } => self.protect_code_with_rescue(s, None, |b| {
                reachable!(b.build(node, s));
                described("expression")
            }),
            NodeKind::Array { elements } => {
                let undefined = self.label(s);
                let done = self.label(s);
                let result = self.temp(s);
                for e in elements {
                    let d = reachable!(self.build_defined(e, s));
                    self.emit(s, IROp::beq(d, Operand::Nil, undefined));
                }
                self.copy(s, result.clone(), Operand::FrozenStr("expression".to_string()));
                self.jump(s, done);
                self.emit_label(s, undefined);
                self.copy(s, result.clone(), Operand::Nil);
                self.emit_label(s, done);
                Ok(Some(result.into()))
            }

            NodeKind::BackRef { .. } => Ok(Some(self.defined_helper(s, RuntimeHelper::IsDefinedBackref, Vec::new()).into())),
            NodeKind::NthRef { number } => Ok(Some(
                self.defined_helper(s, RuntimeHelper::IsDefinedNthRef, vec![Operand::Fixnum(*number as i64)]).into(),
            )),
            NodeKind::GlobalVar { name } => Ok(Some(
                self.defined_helper(s, RuntimeHelper::IsDefinedGlobal, vec![Operand::FrozenStr(name.clone())]).into(),
            )),
            NodeKind::InstVar { name } => {
                let args = vec![Variable::SelfVar.into(), Operand::FrozenStr(name.clone())];
                Ok(Some(self.defined_helper(s, RuntimeHelper::IsDefinedInstanceVar, args).into()))
            }
            NodeKind::ClassVar { name } => {
                let container = self.class_var_container(s, false);
                let args = vec![container, Operand::FrozenStr(name.clone())];
                Ok(Some(self.defined_helper(s, RuntimeHelper::IsDefinedClassVar, args).into()))
            }
            NodeKind::VCall { name } => {
                let args = vec![Variable::SelfVar.into(), Operand::FrozenStr(name.clone()), Operand::False];
                Ok(Some(self.defined_helper(s, RuntimeHelper::IsDefinedMethod, args).into()))
            }
            NodeKind::ZSuper { .. } => {
                Ok(Some(self.defined_helper(s, RuntimeHelper::IsDefinedSuper, vec![Variable::SelfVar.into()]).into()))
            }
            NodeKind::Super { args, .. } => {
                let undefined = self.label(s);
                let t = self.defined_helper(s, RuntimeHelper::IsDefinedSuper, vec![Variable::SelfVar.into()]);
                self.emit(s, IROp::beq(t.into(), Operand::Nil, undefined));
                let args_defined = reachable!(self.build_argument_definition(args.as_deref(), "super", s));
                Ok(Some(self.defined_check_paths(s, undefined, args_defined).into()))
            }
            NodeKind::FCall { name, args, .. } => {
                let undefined = self.label(s);
                let call_args = vec![Variable::SelfVar.into(), Operand::FrozenStr(name.clone()), Operand::False];
                let t = self.defined_helper(s, RuntimeHelper::IsDefinedMethod, call_args);
                self.emit(s, IROp::beq(t.into(), Operand::Nil, undefined));
                let args_defined = reachable!(self.build_argument_definition(args.as_deref(), "method", s));
                Ok(Some(self.defined_check_paths(s, undefined, args_defined).into()))
            }
            NodeKind::Yield { .. } => {
                let undefined = self.label(s);
                let given = self.temp(s);
                self.emit(s, IROp::BlockGiven { result: given.clone(), closure: Variable::YieldClosure.into() });
                self.emit(s, IROp::beq(given.into(), Operand::False, undefined));
                let yields = Operand::FrozenStr("yield".to_string());
                Ok(Some(self.defined_check_paths(s, undefined, yields).into()))
            }

            NodeKind::Const { name } => {
                let found = self.label(s);
                let done = self.label(s);
                let result = self.temp(s);
                let scope = self.starting_search_scope(s);
                self.emit(s, IROp::SearchConst { result: result.clone(), name: name.clone(), scope, no_private: false });
                self.emit(s, IROp::bne(result.clone().into(), Operand::Undefined, found));
                let module = self.find_container_module(s);
                self.emit(
                    s,
                    IROp::InheritanceSearchConst { result: result.clone(), module, name: name.clone(), no_private: false },
                );
                self.emit(s, IROp::bne(result.clone().into(), Operand::Undefined, found));
                self.copy(s, result.clone(), Operand::Nil);
                self.jump(s, done);
                self.emit_label(s, found);
                self.copy(s, result.clone(), Operand::FrozenStr("constant".to_string()));
                self.emit_label(s, done);
                Ok(Some(result.into()))
            }
            NodeKind::Colon2 { left: Some(left), name } => self.build_scoped_const_defined(Some(left), name, s),
            NodeKind::Colon2 { left: None, name } | NodeKind::Colon3 { name } => {
                self.build_scoped_const_defined(None, name, s)
            }

            NodeKind::Call { receiver, name, .. } => {
                let undefined = self.label(s);
                let receiver_defined = reachable!(self.build_defined(receiver, s));
                self.emit(s, IROp::beq(receiver_defined, Operand::Nil, undefined));
                self.protect_code_with_rescue(s, None, |b| {
                    let recv = reachable!(b.build(receiver, s));
                    let t = b.defined_helper(s, RuntimeHelper::IsDefinedCall, vec![recv, Operand::FrozenStr(name.clone())]);
                    Ok(Some(b.defined_check_paths(s, undefined, t.into()).into()))
                })
            }
            NodeKind::AttrAssign { receiver, name, args } => {
                let undefined = self.label(s);
                let receiver_defined = reachable!(self.build_defined(receiver, s));
                self.emit(s, IROp::beq(receiver_defined, Operand::Nil, undefined));
                self.protect_code_with_rescue(s, None, |b| {
                    let recv = reachable!(b.build(receiver, s));
                    let call_args = vec![recv, Operand::FrozenStr(name.clone()), Operand::True];
                    let t = b.defined_helper(s, RuntimeHelper::IsDefinedMethod, call_args);
                    b.emit(s, IROp::beq(t.into(), Operand::Nil, undefined));
                    let args_defined = reachable!(b.build_argument_definition(args.as_deref(), "assignment", s));
                    Ok(Some(b.defined_check_paths(s, undefined, args_defined).into()))
                })
            }

            _ => described("expression"),
        }
    }

    /// Probe used by `x ||= v` before reading `x`.
    pub(crate) fn build_get_definition_base(&mut self, node: &AstNode, s: ScopeId) -> Lowered {
        if node.kind.needs_definition_check() {
            return self.build_defined(node, s);
        }
        let saved = self.temp(s);
        self.emit(s, IROp::GetErrorInfo { result: saved.clone() });
        self.protect_code_with_rescue(s, Some(saved), |b| b.build_defined(node, s))
    }

    fn defined_helper(&mut self, s: ScopeId, helper: RuntimeHelper, args: Vec<Operand>) -> Variable {
        let result = self.temp(s);
        self.emit(s, IROp::RuntimeHelperCall { result: Some(result.clone()), helper, args });
        result
    }

    /// `value` on the fallthrough path, nil when control arrives at
    /// `undefined`.
    fn defined_check_paths(&mut self, s: ScopeId, undefined: Label, value: Operand) -> Variable {
        let defined = self.label(s);
        let result = self.value_in_temp(s, value);
        self.jump(s, defined);
        self.emit_label(s, undefined);
        self.copy(s, result.clone(), Operand::Nil);
        self.emit_label(s, defined);
        result
    }

    /// `Left::Name` or `::Name`. Evaluating `Left` may raise; `$!` is put
    /// back when it does.
    fn build_scoped_const_defined(&mut self, left: Option<&AstNode>, name: &str, s: ScopeId) -> Lowered {
        let saved = self.temp(s);
        self.emit(s, IROp::GetErrorInfo { result: saved.clone() });
        self.protect_code_with_rescue(s, Some(saved), |b| {
            let module = match left {
                Some(l) => reachable!(b.build(l, s)),
                None => Operand::ObjectClass,
            };
            let found = b.label(s);
            let done = b.label(s);
            let result = b.temp(s);
            b.emit(
                s,
                IROp::InheritanceSearchConst { result: result.clone(), module, name: name.to_string(), no_private: false },
            );
            b.emit(s, IROp::bne(result.clone().into(), Operand::Undefined, found));
            b.copy(s, result.clone(), Operand::Nil);
            b.jump(s, done);
            b.emit_label(s, found);
            b.copy(s, result.clone(), Operand::FrozenStr("constant".to_string()));
            b.emit_label(s, done);
            Ok(Some(result.into()))
        })
    }

    /// `what` when every argument expression is defined, else nil.
    fn build_argument_definition(&mut self, args: Option<&AstNode>, what: &str, s: ScopeId) -> Lowered {
        let Some(args) = args else { return described(what) };
        let elements: Vec<&AstNode> = match &args.kind {
            NodeKind::Array { elements } => elements.iter().collect(),
            _ => vec![args],
        };

        let failed = self.label(s);
        let mut needs_fail_path = false;
        let mut value = Operand::FrozenStr(what.to_string());
        for e in elements {
            match reachable!(self.build_defined(e, s)) {
                Operand::Nil => {
                    value = Operand::Nil;
                    break;
                }
                // statically defined
                Operand::FrozenStr(_) => {}
                d => {
                    needs_fail_path = true;
                    self.emit(s, IROp::beq(d, Operand::Nil, failed));
                }
            }
        }

        if needs_fail_path {
            Ok(Some(self.defined_check_paths(s, failed, value).into()))
        } else {
            Ok(Some(value))
        }
    }
}
