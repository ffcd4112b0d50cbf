//! file: core/src/ir/op.rs
//! description: the closed instruction vocabulary of the IR.
//!
//! Every result-producing instruction carries exactly one result variable.
//! Branches are built through `IROp::beq` / `IROp::bne`, which pick the
//! fast-path forms when comparing against a boolean or a known constant.

use serde::Serialize;
use std::fmt;

use super::operand::{Label, Operand, Variable};
use super::scope::ScopeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallType {
    /// `recv.m(...)`
    Normal,
    /// `m(...)` with an implicit self receiver.
    Functional,
    /// Bare `m`, indistinguishable from a variable read at parse time.
    Variable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SuperKind {
    Instance,
    Class,
    Unresolved,
    Zsuper,
}

/// The runtime "local jump error" flavours a misplaced control transfer
/// raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JumpErrorKind {
    Retry,
    Redo,
    Break,
    Next,
    Return,
}

impl fmt::Display for JumpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JumpErrorKind::Retry => "retry",
            JumpErrorKind::Redo => "redo",
            JumpErrorKind::Break => "break",
            JumpErrorKind::Next => "next",
            JumpErrorKind::Return => "return",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RuntimeHelper {
    CheckForLje,
    HandleNonlocalReturn,
    HandleBreakAndReturnsInLambda,
    HandlePropagatedBreak,
    MergeKwargs,
    IsDefinedBackref,
    IsDefinedNthRef,
    IsDefinedGlobal,
    IsDefinedInstanceVar,
    IsDefinedClassVar,
    IsDefinedSuper,
    IsDefinedMethod,
    IsDefinedCall,
}

impl fmt::Display for RuntimeHelper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RuntimeHelper::CheckForLje => "check_for_lje",
            RuntimeHelper::HandleNonlocalReturn => "handle_nonlocal_return",
            RuntimeHelper::HandleBreakAndReturnsInLambda => "handle_break_and_returns_in_lambda",
            RuntimeHelper::HandlePropagatedBreak => "handle_propagated_break",
            RuntimeHelper::MergeKwargs => "merge_kwargs",
            RuntimeHelper::IsDefinedBackref => "is_defined_backref",
            RuntimeHelper::IsDefinedNthRef => "is_defined_nth_ref",
            RuntimeHelper::IsDefinedGlobal => "is_defined_global",
            RuntimeHelper::IsDefinedInstanceVar => "is_defined_instance_var",
            RuntimeHelper::IsDefinedClassVar => "is_defined_class_var",
            RuntimeHelper::IsDefinedSuper => "is_defined_super",
            RuntimeHelper::IsDefinedMethod => "is_defined_method",
            RuntimeHelper::IsDefinedCall => "is_defined_call",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum IROp {
    Label { label: Label },
    Jump { target: Label },
    BEq { a: Operand, b: Operand, target: Label },
    BNe { a: Operand, b: Operand, target: Label },
    BTrue { value: Operand, target: Label },
    BFalse { value: Operand, target: Label },
    BNil { value: Operand, target: Label },
    BUndef { value: Operand, target: Label },
    Copy { result: Variable, value: Operand },

    Call {
        result: Option<Variable>,
        call_type: CallType,
        name: String,
        receiver: Operand,
        args: Vec<Operand>,
        closure: Option<Operand>,
        proc_new: bool,
    },
    AttrAssign { receiver: Operand, name: String, args: Vec<Operand> },
    Super {
        result: Variable,
        kind: SuperKind,
        /// `%current_module` for resolved supers, `%self` otherwise.
        target: Operand,
        name: Option<String>,
        args: Vec<Operand>,
        closure: Option<Operand>,
    },
    Yield { result: Variable, closure: Operand, arg: Operand, unwrap: bool },
    ArgScopeDepth { result: Variable },
    BlockGiven { result: Variable, closure: Operand },
    RuntimeHelperCall { result: Option<Variable>, helper: RuntimeHelper, args: Vec<Operand> },

    // scope preamble and argument receipt
    ReceiveSelf { result: Variable },
    LoadImplicitClosure { result: Variable },
    LoadFrameClosure { result: Variable },
    ReifyClosure { result: Variable, source: Operand },
    CheckArity { required: usize, opt: usize, rest: bool, has_kwargs: bool, kw_rest: bool },
    ReceivePreReqdArg { result: Variable, index: usize },
    ReceiveOptArg { result: Variable, required: usize, pre_count: usize, index: usize },
    ReceiveRestArg { result: Variable, required: usize, index: usize },
    ReceivePostReqdArg { result: Variable, index: usize, pre_count: usize, post_count: usize },
    ReceiveKeywordArg { result: Variable, name: String, required: usize },
    ReceiveKeywordRestArg { result: Variable, required: usize },
    RaiseRequiredKeywordArgumentError { name: String },
    ToAry { result: Variable, value: Operand },
    /// Element `index` of `array`; counted from the end when `post_count` > 0.
    ReqdArgMultipleAsgn { result: Variable, array: Operand, pre_count: usize, post_count: usize, index: usize },
    RestArgMultipleAsgn { result: Variable, array: Operand, pre_count: usize, post_count: usize, index: usize },

    // exceptions
    /// `handler: None` marks code that no handler of this scope covers.
    ExceptionRegionStart { handler: Option<Label> },
    ExceptionRegionEnd,
    /// `any: false` receives only language-level exceptions; `true` also
    /// receives internal unwinding signals (break/return propagation).
    ReceiveException { result: Variable, any: bool },
    Throw { exception: Operand },
    RaiseLocalJumpError { reason: JumpErrorKind },
    /// Snapshot of the process-wide current-exception slot (`$!`).
    GetErrorInfo { result: Variable },
    RestoreErrorInfo { value: Operand },
    RescueEqq { result: Variable, types: Operand, exception: Operand },
    Eqq { result: Variable, target: Operand, value: Operand },

    // exits
    Return { value: Operand },
    NonlocalReturn { value: Operand, method: Option<String> },
    Break { value: Operand, scope_name: String },
    ThreadPoll { on_back_edge: bool },
    LineNumber { line: usize },

    // definitions
    DefineClass { result: Variable, body: ScopeId, container: Operand, superclass: Option<Operand> },
    DefineModule { result: Variable, body: ScopeId, container: Operand },
    DefineMetaClass { result: Variable, receiver: Operand, body: ScopeId },
    ProcessModuleBody { result: Variable, module: Operand, block: Option<Operand> },
    DefineInstanceMethod { method: ScopeId },
    DefineClassMethod { container: Operand, method: ScopeId },
    BuildLambda { result: Variable, closure: Operand },
    RecordEndBlock { closure: Operand },
    Alias { new_name: Operand, old_name: Operand },
    GVarAlias { new_name: String, old_name: String },
    UndefMethod { result: Variable, name: Operand },

    // variables and constants
    GetField { result: Variable, object: Operand, name: String },
    PutField { object: Operand, name: String, value: Operand },
    GetGlobalVar { result: Variable, name: String },
    PutGlobalVar { name: String, value: Operand },
    GetClassVariable { result: Variable, module: Operand, name: String },
    PutClassVariable { module: Operand, name: String, value: Operand },
    GetClassVarContainerModule { result: Variable, scope: Operand, object: Option<Operand> },
    SearchConst { result: Variable, name: String, scope: Operand, no_private: bool },
    InheritanceSearchConst { result: Variable, module: Operand, name: String, no_private: bool },
    ConstMissing { result: Variable, module: Operand, name: String },
    PutConst { module: Operand, name: String, value: Operand },

    // builders
    BuildRange { result: Variable, begin: Operand, end: Operand, exclusive: bool },
    BuildSplat { result: Variable, value: Operand },
    BuildCompoundArray { result: Variable, first: Operand, second: Operand, is_push: bool },
    BuildCompoundString { result: Variable, pieces: Vec<Operand> },
    BuildDynRegExp { result: Variable, pieces: Vec<Operand>, options: u32 },
    Backtick { result: Variable, pieces: Vec<Operand> },
    Match { result: Variable, regexp: Operand },
    Match2 { result: Variable, receiver: Operand, value: Operand },
    Match3 { result: Variable, receiver: Operand, value: Operand },
}

/// Mutable walk over the pieces of an instruction that a structural clone
/// may rename.
pub trait OpVisitorMut {
    fn label(&mut self, _label: &mut Label) {}
    fn result(&mut self, _var: &mut Variable) {}
    fn operand(&mut self, _op: &mut Operand) {}
}

impl IROp {
    /// Branch if `a == b`, using the dedicated forms for known constants.
    pub fn beq(a: Operand, b: Operand, target: Label) -> IROp {
        match b {
            Operand::True => IROp::BTrue { value: a, target },
            Operand::False => IROp::BFalse { value: a, target },
            Operand::Nil => IROp::BNil { value: a, target },
            Operand::Undefined => IROp::BUndef { value: a, target },
            b => IROp::BEq { a, b, target },
        }
    }

    /// Branch if `a != b`.
    pub fn bne(a: Operand, b: Operand, target: Label) -> IROp {
        match b {
            Operand::True => IROp::BFalse { value: a, target },
            Operand::False => IROp::BTrue { value: a, target },
            b => IROp::BNe { a, b, target },
        }
    }

    pub fn result(&self) -> Option<&Variable> {
        match self {
            IROp::Copy { result, .. }
            | IROp::Super { result, .. }
            | IROp::Yield { result, .. }
            | IROp::ArgScopeDepth { result }
            | IROp::BlockGiven { result, .. }
            | IROp::ReceiveSelf { result }
            | IROp::LoadImplicitClosure { result }
            | IROp::LoadFrameClosure { result }
            | IROp::ReifyClosure { result, .. }
            | IROp::ReceivePreReqdArg { result, .. }
            | IROp::ReceiveOptArg { result, .. }
            | IROp::ReceiveRestArg { result, .. }
            | IROp::ReceivePostReqdArg { result, .. }
            | IROp::ReceiveKeywordArg { result, .. }
            | IROp::ReceiveKeywordRestArg { result, .. }
            | IROp::ToAry { result, .. }
            | IROp::ReqdArgMultipleAsgn { result, .. }
            | IROp::RestArgMultipleAsgn { result, .. }
            | IROp::ReceiveException { result, .. }
            | IROp::GetErrorInfo { result }
            | IROp::RescueEqq { result, .. }
            | IROp::Eqq { result, .. }
            | IROp::DefineClass { result, .. }
            | IROp::DefineModule { result, .. }
            | IROp::DefineMetaClass { result, .. }
            | IROp::ProcessModuleBody { result, .. }
            | IROp::BuildLambda { result, .. }
            | IROp::UndefMethod { result, .. }
            | IROp::GetField { result, .. }
            | IROp::GetGlobalVar { result, .. }
            | IROp::GetClassVariable { result, .. }
            | IROp::GetClassVarContainerModule { result, .. }
            | IROp::SearchConst { result, .. }
            | IROp::InheritanceSearchConst { result, .. }
            | IROp::ConstMissing { result, .. }
            | IROp::BuildRange { result, .. }
            | IROp::BuildSplat { result, .. }
            | IROp::BuildCompoundArray { result, .. }
            | IROp::BuildCompoundString { result, .. }
            | IROp::BuildDynRegExp { result, .. }
            | IROp::Backtick { result, .. }
            | IROp::Match { result, .. }
            | IROp::Match2 { result, .. }
            | IROp::Match3 { result, .. } => Some(result),
            IROp::Call { result, .. } | IROp::RuntimeHelperCall { result, .. } => result.as_ref(),
            _ => None,
        }
    }

    /// Jump or branch target, if any.
    pub fn jump_target(&self) -> Option<Label> {
        match self {
            IROp::Jump { target }
            | IROp::BEq { target, .. }
            | IROp::BNe { target, .. }
            | IROp::BTrue { target, .. }
            | IROp::BFalse { target, .. }
            | IROp::BNil { target, .. }
            | IROp::BUndef { target, .. } => Some(*target),
            _ => None,
        }
    }

    /// Control never falls through to the next instruction.
    pub fn transfers_control(&self) -> bool {
        matches!(
            self,
            IROp::Jump { .. }
                | IROp::Return { .. }
                | IROp::NonlocalReturn { .. }
                | IROp::Break { .. }
                | IROp::Throw { .. }
                | IROp::RaiseLocalJumpError { .. }
                | IROp::RaiseRequiredKeywordArgumentError { .. }
        )
    }

    pub fn visit_mut(&mut self, v: &mut dyn OpVisitorMut) {
        fn ops(v: &mut dyn OpVisitorMut, list: &mut [Operand]) {
            for o in list.iter_mut() {
                v.operand(o);
            }
        }
        fn opt(v: &mut dyn OpVisitorMut, o: &mut Option<Operand>) {
            if let Some(o) = o {
                v.operand(o);
            }
        }

        match self {
            IROp::Label { label } => v.label(label),
            IROp::Jump { target } => v.label(target),
            IROp::BEq { a, b, target } | IROp::BNe { a, b, target } => {
                v.operand(a);
                v.operand(b);
                v.label(target);
            }
            IROp::BTrue { value, target }
            | IROp::BFalse { value, target }
            | IROp::BNil { value, target }
            | IROp::BUndef { value, target } => {
                v.operand(value);
                v.label(target);
            }
            IROp::Copy { result, value } => {
                v.operand(value);
                v.result(result);
            }
            IROp::Call { result, receiver, args, closure, .. } => {
                v.operand(receiver);
                ops(v, args);
                opt(v, closure);
                if let Some(r) = result {
                    v.result(r);
                }
            }
            IROp::AttrAssign { receiver, args, .. } => {
                v.operand(receiver);
                ops(v, args);
            }
            IROp::Super { result, target, args, closure, .. } => {
                v.operand(target);
                ops(v, args);
                opt(v, closure);
                v.result(result);
            }
            IROp::Yield { result, closure, arg, .. } => {
                v.operand(closure);
                v.operand(arg);
                v.result(result);
            }
            IROp::BlockGiven { result, closure } => {
                v.operand(closure);
                v.result(result);
            }
            IROp::RuntimeHelperCall { result, args, .. } => {
                ops(v, args);
                if let Some(r) = result {
                    v.result(r);
                }
            }
            IROp::ArgScopeDepth { result }
            | IROp::ReceiveSelf { result }
            | IROp::LoadImplicitClosure { result }
            | IROp::LoadFrameClosure { result }
            | IROp::ReceivePreReqdArg { result, .. }
            | IROp::ReceiveOptArg { result, .. }
            | IROp::ReceiveRestArg { result, .. }
            | IROp::ReceivePostReqdArg { result, .. }
            | IROp::ReceiveKeywordArg { result, .. }
            | IROp::ReceiveKeywordRestArg { result, .. }
            | IROp::ReceiveException { result, .. }
            | IROp::GetErrorInfo { result }
            | IROp::GetGlobalVar { result, .. } => v.result(result),
            IROp::ReifyClosure { result, source } => {
                v.operand(source);
                v.result(result);
            }
            IROp::ToAry { result, value } | IROp::BuildSplat { result, value } => {
                v.operand(value);
                v.result(result);
            }
            IROp::ReqdArgMultipleAsgn { result, array, .. } | IROp::RestArgMultipleAsgn { result, array, .. } => {
                v.operand(array);
                v.result(result);
            }
            IROp::ExceptionRegionStart { handler } => {
                if let Some(h) = handler {
                    v.label(h);
                }
            }
            IROp::Throw { exception } => v.operand(exception),
            IROp::RestoreErrorInfo { value } => v.operand(value),
            IROp::RescueEqq { result, types, exception } => {
                v.operand(types);
                v.operand(exception);
                v.result(result);
            }
            IROp::Eqq { result, target, value } => {
                v.operand(target);
                v.operand(value);
                v.result(result);
            }
            IROp::Return { value } | IROp::NonlocalReturn { value, .. } | IROp::Break { value, .. } => v.operand(value),
            IROp::DefineClass { result, container, superclass, .. } => {
                v.operand(container);
                opt(v, superclass);
                v.result(result);
            }
            IROp::DefineModule { result, container, .. } => {
                v.operand(container);
                v.result(result);
            }
            IROp::DefineMetaClass { result, receiver, .. } => {
                v.operand(receiver);
                v.result(result);
            }
            IROp::ProcessModuleBody { result, module, block } => {
                v.operand(module);
                opt(v, block);
                v.result(result);
            }
            IROp::DefineClassMethod { container, .. } => v.operand(container),
            IROp::BuildLambda { result, closure } => {
                v.operand(closure);
                v.result(result);
            }
            IROp::RecordEndBlock { closure } => v.operand(closure),
            IROp::Alias { new_name, old_name } => {
                v.operand(new_name);
                v.operand(old_name);
            }
            IROp::UndefMethod { result, name } => {
                v.operand(name);
                v.result(result);
            }
            IROp::GetField { result, object, .. } => {
                v.operand(object);
                v.result(result);
            }
            IROp::PutField { object, value, .. } => {
                v.operand(object);
                v.operand(value);
            }
            IROp::PutGlobalVar { value, .. } => v.operand(value),
            IROp::GetClassVariable { result, module, .. } => {
                v.operand(module);
                v.result(result);
            }
            IROp::PutClassVariable { module, value, .. } => {
                v.operand(module);
                v.operand(value);
            }
            IROp::GetClassVarContainerModule { result, scope, object } => {
                v.operand(scope);
                opt(v, object);
                v.result(result);
            }
            IROp::SearchConst { result, scope, .. } => {
                v.operand(scope);
                v.result(result);
            }
            IROp::InheritanceSearchConst { result, module, .. } | IROp::ConstMissing { result, module, .. } => {
                v.operand(module);
                v.result(result);
            }
            IROp::PutConst { module, value, .. } => {
                v.operand(module);
                v.operand(value);
            }
            IROp::BuildRange { result, begin, end, .. } => {
                v.operand(begin);
                v.operand(end);
                v.result(result);
            }
            IROp::BuildCompoundArray { result, first, second, .. } => {
                v.operand(first);
                v.operand(second);
                v.result(result);
            }
            IROp::BuildDynRegExp { result, pieces, .. }
            | IROp::BuildCompoundString { result, pieces }
            | IROp::Backtick { result, pieces } => {
                ops(v, pieces);
                v.result(result);
            }
            IROp::Match { result, regexp } => {
                v.operand(regexp);
                v.result(result);
            }
            IROp::Match2 { result, receiver, value } | IROp::Match3 { result, receiver, value } => {
                v.operand(receiver);
                v.operand(value);
                v.result(result);
            }
            IROp::CheckArity { .. }
            | IROp::RaiseRequiredKeywordArgumentError { .. }
            | IROp::ExceptionRegionEnd
            | IROp::RaiseLocalJumpError { .. }
            | IROp::ThreadPoll { .. }
            | IROp::LineNumber { .. }
            | IROp::DefineInstanceMethod { .. }
            | IROp::GVarAlias { .. } => {}
        }
    }
}

struct Args<'a>(&'a [Operand]);

impl fmt::Display for Args<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, arg) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, "]")
    }
}

fn closure_suffix(closure: &Option<Operand>) -> String {
    match closure {
        Some(c) => format!(", &{}", c),
        None => String::new(),
    }
}

impl fmt::Display for IROp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(result) = self.result() {
            write!(f, "{} = ", result)?;
        }
        match self {
            IROp::Label { label } => write!(f, "{}:", label),
            IROp::Jump { target } => write!(f, "jump {}", target),
            IROp::BEq { a, b, target } => write!(f, "beq({}, {}, {})", a, b, target),
            IROp::BNe { a, b, target } => write!(f, "bne({}, {}, {})", a, b, target),
            IROp::BTrue { value, target } => write!(f, "b_true({}, {})", value, target),
            IROp::BFalse { value, target } => write!(f, "b_false({}, {})", value, target),
            IROp::BNil { value, target } => write!(f, "b_nil({}, {})", value, target),
            IROp::BUndef { value, target } => write!(f, "b_undef({}, {})", value, target),
            IROp::Copy { value, .. } => write!(f, "copy({})", value),
            IROp::Call { call_type, name, receiver, args, closure, proc_new, .. } => {
                write!(f, "call_{:?}({:?}, {}, {}{})", call_type, name, receiver, Args(args), closure_suffix(closure))?;
                if *proc_new {
                    write!(f, " [proc_new]")?;
                }
                Ok(())
            }
            IROp::AttrAssign { receiver, name, args } => write!(f, "attr_assign({}, {:?}, {})", receiver, name, Args(args)),
            IROp::Super { kind, target, name, args, closure, .. } => write!(
                f,
                "super_{:?}({}, {}, {}{})",
                kind,
                target,
                name.as_deref().unwrap_or("-"),
                Args(args),
                closure_suffix(closure)
            ),
            IROp::Yield { closure, arg, unwrap, .. } => write!(f, "yield({}, {}, unwrap: {})", closure, arg, unwrap),
            IROp::ArgScopeDepth { .. } => write!(f, "arg_scope_depth"),
            IROp::BlockGiven { closure, .. } => write!(f, "block_given({})", closure),
            IROp::RuntimeHelperCall { helper, args, .. } => write!(f, "runtime_helper({}, {})", helper, Args(args)),
            IROp::ReceiveSelf { .. } => write!(f, "recv_self"),
            IROp::LoadImplicitClosure { .. } => write!(f, "load_implicit_closure"),
            IROp::LoadFrameClosure { .. } => write!(f, "load_frame_closure"),
            IROp::ReifyClosure { source, .. } => write!(f, "reify_closure({})", source),
            IROp::CheckArity { required, opt, rest, has_kwargs, kw_rest } => write!(
                f,
                "check_arity(req: {}, opt: {}, rest: {}, kwargs: {}, kwrest: {})",
                required, opt, rest, has_kwargs, kw_rest
            ),
            IROp::ReceivePreReqdArg { index, .. } => write!(f, "recv_pre_reqd_arg({})", index),
            IROp::ReceiveOptArg { required, pre_count, index, .. } => {
                write!(f, "recv_opt_arg(req: {}, pre: {}, {})", required, pre_count, index)
            }
            IROp::ReceiveRestArg { required, index, .. } => write!(f, "recv_rest_arg(req: {}, {})", required, index),
            IROp::ReceivePostReqdArg { index, pre_count, post_count, .. } => {
                write!(f, "recv_post_reqd_arg({}, pre: {}, post: {})", index, pre_count, post_count)
            }
            IROp::ReceiveKeywordArg { name, required, .. } => write!(f, "recv_kw_arg({:?}, req: {})", name, required),
            IROp::ReceiveKeywordRestArg { required, .. } => write!(f, "recv_kw_rest_arg(req: {})", required),
            IROp::RaiseRequiredKeywordArgumentError { name } => write!(f, "raise_missing_keyword({:?})", name),
            IROp::ToAry { value, .. } => write!(f, "to_ary({})", value),
            IROp::ReqdArgMultipleAsgn { array, pre_count, post_count, index, .. } => {
                write!(f, "reqd_arg_masgn({}, {}, pre: {}, post: {})", array, index, pre_count, post_count)
            }
            IROp::RestArgMultipleAsgn { array, pre_count, post_count, index, .. } => {
                write!(f, "rest_arg_masgn({}, {}, pre: {}, post: {})", array, index, pre_count, post_count)
            }
            IROp::ExceptionRegionStart { handler } => match handler {
                Some(h) => write!(f, "exc_region_start({})", h),
                None => write!(f, "exc_region_start(unrescued)"),
            },
            IROp::ExceptionRegionEnd => write!(f, "exc_region_end"),
            IROp::ReceiveException { any, .. } => {
                if *any {
                    write!(f, "recv_any_exception")
                } else {
                    write!(f, "recv_exception")
                }
            }
            IROp::Throw { exception } => write!(f, "throw({})", exception),
            IROp::RaiseLocalJumpError { reason } => write!(f, "raise_local_jump_error({})", reason),
            IROp::GetErrorInfo { .. } => write!(f, "get_error_info"),
            IROp::RestoreErrorInfo { value } => write!(f, "restore_error_info({})", value),
            IROp::RescueEqq { types, exception, .. } => write!(f, "rescue_eqq({}, {})", types, exception),
            IROp::Eqq { target, value, .. } => write!(f, "eqq({}, {})", target, value),
            IROp::Return { value } => write!(f, "return({})", value),
            IROp::NonlocalReturn { value, method } => {
                write!(f, "nonlocal_return({}, {})", value, method.as_deref().unwrap_or("--none--"))
            }
            IROp::Break { value, scope_name } => write!(f, "break({}, {})", value, scope_name),
            IROp::ThreadPoll { on_back_edge } => {
                if *on_back_edge {
                    write!(f, "thread_poll(back_edge)")
                } else {
                    write!(f, "thread_poll")
                }
            }
            IROp::LineNumber { line } => write!(f, "line_num({})", line),
            IROp::DefineClass { body, container, superclass, .. } => match superclass {
                Some(sup) => write!(f, "def_class({}, {}, {})", body, container, sup),
                None => write!(f, "def_class({}, {})", body, container),
            },
            IROp::DefineModule { body, container, .. } => write!(f, "def_module({}, {})", body, container),
            IROp::DefineMetaClass { receiver, body, .. } => write!(f, "def_meta_class({}, {})", receiver, body),
            IROp::ProcessModuleBody { module, block, .. } => match block {
                Some(b) => write!(f, "process_module_body({}, {})", module, b),
                None => write!(f, "process_module_body({})", module),
            },
            IROp::DefineInstanceMethod { method } => write!(f, "def_inst_meth({})", method),
            IROp::DefineClassMethod { container, method } => write!(f, "def_class_meth({}, {})", container, method),
            IROp::BuildLambda { closure, .. } => write!(f, "build_lambda({})", closure),
            IROp::RecordEndBlock { closure } => write!(f, "record_end_block({})", closure),
            IROp::Alias { new_name, old_name } => write!(f, "alias({}, {})", new_name, old_name),
            IROp::GVarAlias { new_name, old_name } => write!(f, "gvar_alias({}, {})", new_name, old_name),
            IROp::UndefMethod { name, .. } => write!(f, "undef_method({})", name),
            IROp::GetField { object, name, .. } => write!(f, "get_field({}, {})", object, name),
            IROp::PutField { object, name, value } => write!(f, "put_field({}, {}, {})", object, name, value),
            IROp::GetGlobalVar { name, .. } => write!(f, "get_global_var({})", name),
            IROp::PutGlobalVar { name, value } => write!(f, "put_global_var({}, {})", name, value),
            IROp::GetClassVariable { module, name, .. } => write!(f, "get_cvar({}, {})", module, name),
            IROp::PutClassVariable { module, name, value } => write!(f, "put_cvar({}, {}, {})", module, name, value),
            IROp::GetClassVarContainerModule { scope, object, .. } => match object {
                Some(o) => write!(f, "get_cvar_container({}, {})", scope, o),
                None => write!(f, "get_cvar_container({})", scope),
            },
            IROp::SearchConst { name, scope, no_private, .. } => {
                write!(f, "search_const({}, {}, no_priv: {})", name, scope, no_private)
            }
            IROp::InheritanceSearchConst { module, name, no_private, .. } => {
                write!(f, "inheritance_search_const({}, {}, no_priv: {})", module, name, no_private)
            }
            IROp::ConstMissing { module, name, .. } => write!(f, "const_missing({}, {})", module, name),
            IROp::PutConst { module, name, value } => write!(f, "put_const({}, {}, {})", module, name, value),
            IROp::BuildRange { begin, end, exclusive, .. } => {
                write!(f, "build_range({}, {}, {})", begin, end, if *exclusive { "..." } else { ".." })
            }
            IROp::BuildSplat { value, .. } => write!(f, "build_splat({})", value),
            IROp::BuildCompoundArray { first, second, is_push, .. } => {
                write!(f, "build_compound_array({}, {}, push: {})", first, second, is_push)
            }
            IROp::BuildDynRegExp { pieces, options, .. } => write!(f, "build_dregexp({}, {})", Args(pieces), options),
            IROp::BuildCompoundString { pieces, .. } => write!(f, "build_compound_string({})", Args(pieces)),
            IROp::Backtick { pieces, .. } => write!(f, "backtick({})", Args(pieces)),
            IROp::Match { regexp, .. } => write!(f, "match({})", regexp),
            IROp::Match2 { receiver, value, .. } => write!(f, "match2({}, {})", receiver, value),
            IROp::Match3 { receiver, value, .. } => write!(f, "match3({}, {})", receiver, value),
        }
    }
}
