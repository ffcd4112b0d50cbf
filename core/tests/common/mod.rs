//! Shared helpers for the lowering tests: terse AST constructors and a toy
//! interpreter that runs lowered IR so control-flow properties can be
//! checked by execution instead of by pattern.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use kiln_core::ast::{ArgsNode, AstNode, HashPair, KeywordArg, NodeKind, OptArg, RescueClause, RestArg, WhenClause};
use kiln_core::ir::op::{IROp, RuntimeHelper};
use kiln_core::ir::operand::{Label, Operand, Variable};
use kiln_core::ir::scope::{ScopeId, ScopeKind};
use kiln_core::{lower_ast_to_ir, IrModule};

// ---------------------------------------------------------------------
// AST construction

pub fn n(kind: NodeKind) -> AstNode {
    AstNode::bare(kind)
}

pub fn b(kind: NodeKind) -> Box<AstNode> {
    AstNode::bare(kind).boxed()
}

pub fn root(body: Vec<AstNode>, scope: &[&str]) -> AstNode {
    n(NodeKind::Root { body: Some(block(body).boxed()), scope: names(scope) })
}

pub fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

pub fn block(body: Vec<AstNode>) -> AstNode {
    n(NodeKind::Block { body })
}

pub fn int(value: i64) -> AstNode {
    n(NodeKind::Fixnum { value })
}

pub fn sym(name: &str) -> AstNode {
    n(NodeKind::Symbol { name: name.to_string() })
}

pub fn string(value: &str) -> AstNode {
    n(NodeKind::Str { value: value.to_string() })
}

pub fn nil() -> AstNode {
    n(NodeKind::Nil)
}

pub fn lvar(name: &str, depth: u32) -> AstNode {
    n(NodeKind::LocalVar { name: name.to_string(), depth })
}

pub fn lasgn(name: &str, depth: u32, value: AstNode) -> AstNode {
    n(NodeKind::LocalAsgn { name: name.to_string(), depth, value: Some(value.boxed()) })
}

pub fn gvar(name: &str) -> AstNode {
    n(NodeKind::GlobalVar { name: name.to_string() })
}

pub fn constant(name: &str) -> AstNode {
    n(NodeKind::Const { name: name.to_string() })
}

pub fn array(elements: Vec<AstNode>) -> AstNode {
    n(NodeKind::Array { elements })
}

/// `recv.name(args)`
pub fn call(receiver: AstNode, name: &str, args: Vec<AstNode>) -> AstNode {
    let args = (!args.is_empty()).then(|| array(args).boxed());
    n(NodeKind::Call { receiver: receiver.boxed(), name: name.to_string(), args, iter: None })
}

pub fn call_with_block(receiver: AstNode, name: &str, args: Vec<AstNode>, iter: AstNode) -> AstNode {
    let args = (!args.is_empty()).then(|| array(args).boxed());
    n(NodeKind::Call { receiver: receiver.boxed(), name: name.to_string(), args, iter: Some(iter.boxed()) })
}

/// `name(args)`
pub fn fcall(name: &str, args: Vec<AstNode>) -> AstNode {
    let args = (!args.is_empty()).then(|| array(args).boxed());
    n(NodeKind::FCall { name: name.to_string(), args, iter: None })
}

pub fn fcall_with_block(name: &str, args: Vec<AstNode>, iter: AstNode) -> AstNode {
    let args = (!args.is_empty()).then(|| array(args).boxed());
    n(NodeKind::FCall { name: name.to_string(), args, iter: Some(iter.boxed()) })
}

/// `record(value)`: appends `value` to the interpreter trace.
pub fn record(value: AstNode) -> AstNode {
    fcall("record", vec![value])
}

pub fn raise(class: &str) -> AstNode {
    fcall("raise", vec![constant(class)])
}

pub fn iter(args: ArgsNode, body: Vec<AstNode>, scope: &[&str]) -> AstNode {
    n(NodeKind::Iter { args, body: Some(block(body).boxed()), scope: names(scope) })
}

pub fn lambda(args: ArgsNode, body: Vec<AstNode>, scope: &[&str]) -> AstNode {
    n(NodeKind::Lambda { args, body: Some(block(body).boxed()), scope: names(scope) })
}

pub fn defn(name: &str, args: ArgsNode, body: Vec<AstNode>, scope: &[&str]) -> AstNode {
    n(NodeKind::Defn { name: name.to_string(), args, body: Some(block(body).boxed()), scope: names(scope) })
}

pub fn args_pre(list: &[&str]) -> ArgsNode {
    ArgsNode { pre: list.iter().map(|a| argument(a)).collect(), ..ArgsNode::default() }
}

pub fn argument(name: &str) -> AstNode {
    n(NodeKind::Argument { name: name.to_string() })
}

pub fn opt_arg(name: &str, value: AstNode) -> OptArg {
    OptArg { name: name.to_string(), value }
}

pub fn rest_arg(name: &str) -> RestArg {
    RestArg { name: Some(name.to_string()) }
}

pub fn keyword(name: &str, value: Option<AstNode>) -> KeywordArg {
    KeywordArg { name: name.to_string(), value }
}

pub fn hash(pairs: Vec<(AstNode, AstNode)>) -> AstNode {
    n(NodeKind::Hash { pairs: pairs.into_iter().map(|(k, v)| HashPair { key: Some(k), value: v }).collect() })
}

pub fn if_node(condition: AstNode, then_body: Option<AstNode>, else_body: Option<AstNode>) -> AstNode {
    n(NodeKind::If { condition: condition.boxed(), then_body: then_body.map(|t| t.boxed()), else_body: else_body.map(|e| e.boxed()) })
}

pub fn while_loop(condition: AstNode, body: Vec<AstNode>, evaluate_at_start: bool) -> AstNode {
    n(NodeKind::While { condition: condition.boxed(), body: Some(block(body).boxed()), evaluate_at_start })
}

pub fn case(subject: AstNode, whens: Vec<(Vec<AstNode>, AstNode)>, else_body: Option<AstNode>) -> AstNode {
    let whens = whens.into_iter().map(|(guards, body)| WhenClause { guards, body: Some(body.boxed()) }).collect();
    n(NodeKind::Case { subject: Some(subject.boxed()), whens, else_body: else_body.map(|e| e.boxed()) })
}

pub fn rescue(body: Vec<AstNode>, clauses: Vec<RescueClause>, else_body: Option<AstNode>) -> AstNode {
    n(NodeKind::Rescue { body: Some(block(body).boxed()), clauses, else_body: else_body.map(|e| e.boxed()) })
}

pub fn clause(exceptions: &[&str], binding: Option<AstNode>, body: Vec<AstNode>) -> RescueClause {
    RescueClause {
        exceptions: exceptions.iter().map(|e| constant(e)).collect(),
        binding: binding.map(|b| b.boxed()),
        body: Some(block(body).boxed()),
    }
}

pub fn ensure(body: AstNode, ensure: Vec<AstNode>) -> AstNode {
    n(NodeKind::Ensure { body: Some(body.boxed()), ensure: Some(block(ensure).boxed()) })
}

pub fn ret(value: Option<AstNode>) -> AstNode {
    n(NodeKind::Return { value: value.map(|v| v.boxed()) })
}

pub fn brk(value: Option<AstNode>) -> AstNode {
    n(NodeKind::Break { value: value.map(|v| v.boxed()) })
}

pub fn next(value: Option<AstNode>) -> AstNode {
    n(NodeKind::Next { value: value.map(|v| v.boxed()) })
}

/// Lower `ast`, panicking with the error report on failure.
pub fn lower(ast: &AstNode) -> IrModule {
    match lower_ast_to_ir(ast) {
        Ok(module) => module,
        Err(e) => panic!("lowering failed: {}", kiln_core::generate_error_report(&e)),
    }
}

/// All instructions of the scope with the given name, for structural checks.
pub fn instrs_of<'a>(module: &'a IrModule, name: &str) -> &'a [IROp] {
    match module.scopes.iter().find(|s| s.name == name) {
        Some(scope) => &scope.instrs,
        None => panic!("no scope named {} in\n{}", name, module),
    }
}

// ---------------------------------------------------------------------
// Toy interpreter

pub struct Frame {
    locals: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Frame>>,
}

impl Frame {
    fn new(parent: Option<Rc<Frame>>) -> Rc<Frame> {
        Rc::new(Frame { locals: RefCell::new(HashMap::new()), parent })
    }

    fn at_depth(self: &Rc<Frame>, depth: u32) -> Rc<Frame> {
        let mut frame = self.clone();
        for _ in 0..depth {
            frame = match &frame.parent {
                Some(p) => p.clone(),
                None => panic!("local depth {} runs off the frame chain", depth),
            };
        }
        frame
    }
}

pub struct Proc {
    scope: ScopeId,
    frame: Rc<Frame>,
    self_value: Value,
    yield_closure: Value,
    lambda: bool,
}

#[derive(Clone)]
pub enum Value {
    Nil,
    Undefined,
    Bool(bool),
    Int(i64),
    Str(String),
    Sym(String),
    Array(Vec<Value>),
    Hash(Vec<(Value, Value)>),
    Class(String),
    Exception(String),
    Proc(Rc<Proc>),
    /// A caught unwinding signal held in a variable until it is rethrown.
    Signal(Box<Signal>),
}

impl Value {
    pub fn truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false) | Value::Undefined)
    }

    pub fn sym(name: &str) -> Value {
        Value::Sym(name.to_string())
    }

    pub fn str(text: &str) -> Value {
        Value::Str(text.to_string())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) | (Value::Undefined, Value::Undefined) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) | (Value::Sym(a), Value::Sym(b)) => a == b,
            (Value::Class(a), Value::Class(b)) | (Value::Exception(a), Value::Exception(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Hash(a), Value::Hash(b)) => a == b,
            (Value::Proc(a), Value::Proc(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Undefined => write!(f, "undefined"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Sym(s) => write!(f, ":{}", s),
            Value::Array(a) => f.debug_list().entries(a).finish(),
            Value::Hash(h) => f.debug_map().entries(h.iter().map(|(k, v)| (k, v))).finish(),
            Value::Class(c) => write!(f, "{}", c),
            Value::Exception(c) => write!(f, "#<{}>", c),
            Value::Proc(p) => write!(f, "#<Proc {}>", p.scope),
            Value::Signal(s) => write!(f, "#<signal {:?}>", s),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Signal {
    Raise(Value),
    Break(Value),
    NonlocalReturn { value: Value, method: Option<String> },
}

/// Superclass chain of the built-in exception classes the tests raise.
fn exception_parent(class: &str) -> Option<&'static str> {
    match class {
        "StandardError" | "ScriptError" => Some("Exception"),
        "RuntimeError" | "ArgumentError" | "LocalJumpError" | "TypeError" | "NameError" | "ZeroDivisionError" => {
            Some("StandardError")
        }
        "NoMethodError" => Some("NameError"),
        _ => None,
    }
}

fn is_a(class: &str, ancestor: &str) -> bool {
    let mut current = Some(class);
    while let Some(c) = current {
        if c == ancestor {
            return true;
        }
        current = exception_parent(c);
    }
    false
}

/// One activation of a scope.
struct Activation {
    scope: ScopeId,
    frame: Rc<Frame>,
    vars: HashMap<Variable, Value>,
    args: Vec<Value>,
    kwargs: Vec<(Value, Value)>,
    block: Value,
    method_name: Option<String>,
}

pub struct Interpreter<'m> {
    module: &'m IrModule,
    /// Values passed to `record(...)`, in execution order.
    pub trace: Vec<Value>,
    /// Executed `ThreadPoll` instructions.
    pub polls: usize,
    /// Per (scope, label): times control passed the label.
    pub label_hits: HashMap<(ScopeId, Label), usize>,
    error_info: Value,
    globals: HashMap<String, Value>,
    constants: HashMap<String, Value>,
    methods: HashMap<String, ScopeId>,
    fuel: usize,
}

impl<'m> Interpreter<'m> {
    pub fn new(module: &'m IrModule) -> Self {
        Interpreter {
            module,
            trace: Vec::new(),
            polls: 0,
            label_hits: HashMap::new(),
            error_info: Value::Nil,
            globals: HashMap::new(),
            constants: HashMap::new(),
            methods: HashMap::new(),
            fuel: 100_000,
        }
    }

    /// Run the script scope.
    pub fn run(&mut self) -> Result<Value, Signal> {
        let root = self.module.root;
        let frame = Frame::new(None);
        self.execute(root, frame, Value::Class("main".to_string()), Vec::new(), Value::Nil, None)
    }

    /// Call a method defined by the script, as if from the top level.
    pub fn call_method(&mut self, name: &str, args: Vec<Value>) -> Result<Value, Signal> {
        self.invoke(name, Value::Class("main".to_string()), args, Value::Nil)
    }

    /// Times control passed label `label` of the scope named `scope_name`.
    pub fn hits(&self, scope_name: &str, label: Label) -> usize {
        let scope = self.module.scopes.iter().find(|s| s.name == scope_name).map(|s| s.id);
        scope.and_then(|s| self.label_hits.get(&(s, label)).copied()).unwrap_or(0)
    }

    pub fn error_info(&self) -> &Value {
        &self.error_info
    }

    fn execute(
        &mut self,
        scope: ScopeId,
        frame: Rc<Frame>,
        self_value: Value,
        args: Vec<Value>,
        block: Value,
        yield_closure: Option<Value>,
    ) -> Result<Value, Signal> {
        let module = self.module;
        let ir = module.scope(scope);
        let method_name = module.nearest_method(scope).map(|m| module.scope(m).name.clone());
        let (args, kwargs) = split_kwargs(ir, args);
        let mut act = Activation { scope, frame, vars: HashMap::new(), args, kwargs, block: block.clone(), method_name };
        act.vars.insert(Variable::SelfVar, self_value);
        if let Some(y) = yield_closure {
            act.vars.insert(Variable::YieldClosure, y);
        }

        let instrs = &ir.instrs;
        let labels: HashMap<Label, usize> = instrs
            .iter()
            .enumerate()
            .filter_map(|(i, op)| match op {
                IROp::Label { label } => Some((*label, i)),
                _ => None,
            })
            .collect();
        let handlers = handler_coverage(instrs);

        let mut pc = 0;
        let mut pending: Option<Signal> = None;
        while pc < instrs.len() {
            self.fuel = self.fuel.checked_sub(1).unwrap_or_else(|| panic!("interpreter ran out of fuel in {}", scope));
            let op = &instrs[pc];
            match self.step(op, &mut act, &mut pending) {
                Ok(Step::Next) => pc += 1,
                Ok(Step::Jump(label)) => pc = labels[&label],
                Ok(Step::Return(v)) => return Ok(v),
                Err(signal) => match handlers[pc] {
                    Some(handler) => {
                        pending = Some(signal);
                        pc = labels[&handler];
                    }
                    None => return Err(signal),
                },
            }
        }
        panic!("fell off the end of scope {}", scope)
    }

    fn step(&mut self, op: &IROp, act: &mut Activation, pending: &mut Option<Signal>) -> Result<Step, Signal> {
        match op {
            IROp::Label { label } => {
                *self.label_hits.entry((act.scope, *label)).or_insert(0) += 1;
            }
            IROp::Jump { target } => return Ok(Step::Jump(*target)),
            IROp::BEq { a, b, target } => {
                if self.eval(a, act) == self.eval(b, act) {
                    return Ok(Step::Jump(*target));
                }
            }
            IROp::BNe { a, b, target } => {
                if self.eval(a, act) != self.eval(b, act) {
                    return Ok(Step::Jump(*target));
                }
            }
            IROp::BTrue { value, target } => {
                if self.eval(value, act).truthy() {
                    return Ok(Step::Jump(*target));
                }
            }
            IROp::BFalse { value, target } => {
                if !self.eval(value, act).truthy() {
                    return Ok(Step::Jump(*target));
                }
            }
            IROp::BNil { value, target } => {
                if self.eval(value, act) == Value::Nil {
                    return Ok(Step::Jump(*target));
                }
            }
            IROp::BUndef { value, target } => {
                if self.eval(value, act) == Value::Undefined {
                    return Ok(Step::Jump(*target));
                }
            }
            IROp::Copy { result, value } => {
                let v = self.eval(value, act);
                self.store(act, result, v);
            }

            IROp::Call { result, name, receiver, args, closure, .. } => {
                let recv = self.eval(receiver, act);
                let args = self.eval_args(args, act);
                let block = match closure {
                    Some(c) => self.eval(c, act),
                    None => Value::Nil,
                };
                let v = self.dispatch(name, recv, args, block)?;
                if let Some(r) = result {
                    self.store(act, r, v);
                }
            }
            IROp::Yield { result, closure, arg, unwrap } => {
                let closure = self.eval(closure, act);
                let arg = self.eval(arg, act);
                let args = match (arg, unwrap) {
                    (Value::Undefined, _) => Vec::new(),
                    (Value::Array(items), true) => items,
                    (v, _) => vec![v],
                };
                let v = self.call_proc(&closure, args)?;
                self.store(act, result, v);
            }
            IROp::BlockGiven { result, closure } => {
                let given = !matches!(self.eval(closure, act), Value::Nil);
                self.store(act, result, Value::Bool(given));
            }
            IROp::RuntimeHelperCall { result, helper, args } => {
                let args = self.eval_args(args, act);
                let v = self.helper(*helper, act, args)?;
                if let Some(r) = result {
                    self.store(act, r, v);
                }
            }

            IROp::ReceiveSelf { .. } => {}
            IROp::LoadImplicitClosure { result } => {
                let block = act.block.clone();
                self.store(act, result, block);
            }
            IROp::LoadFrameClosure { result } => {
                if !act.vars.contains_key(result) {
                    self.store(act, result, Value::Nil);
                }
            }
            IROp::ReifyClosure { result, source } => {
                let v = self.eval(source, act);
                self.store(act, result, v);
            }
            IROp::CheckArity { required, opt, rest, .. } => {
                let n = act.args.len();
                if n < *required || (!rest && n > required + opt) {
                    return Err(self.raise("ArgumentError"));
                }
            }
            IROp::ReceivePreReqdArg { result, index } => {
                let v = act.args.get(*index).cloned().unwrap_or(Value::Nil);
                self.store(act, result, v);
            }
            IROp::ReceiveOptArg { result, required, pre_count, index } => {
                let v = if act.args.len() > required + index {
                    act.args[pre_count + index].clone()
                } else {
                    Value::Undefined
                };
                self.store(act, result, v);
            }
            IROp::ReceiveRestArg { result, required, index } => {
                let post = required - index;
                let end = act.args.len().saturating_sub(post).max(*index);
                let rest = act.args.get(*index..end).map(|s| s.to_vec()).unwrap_or_default();
                self.store(act, result, Value::Array(rest));
            }
            IROp::ReceivePostReqdArg { result, index, pre_count, post_count } => {
                let n = act.args.len();
                let at = if n >= pre_count + post_count { n - post_count + index } else { pre_count + index };
                let v = act.args.get(at).cloned().unwrap_or(Value::Nil);
                self.store(act, result, v);
            }
            IROp::ReceiveKeywordArg { result, name, .. } => {
                let key = Value::sym(name);
                let v = act.kwargs.iter().find(|(k, _)| *k == key).map(|(_, v)| v.clone()).unwrap_or(Value::Undefined);
                self.store(act, result, v);
            }
            IROp::ReceiveKeywordRestArg { result, .. } => {
                let v = Value::Hash(act.kwargs.clone());
                self.store(act, result, v);
            }
            IROp::RaiseRequiredKeywordArgumentError { .. } => return Err(self.raise("ArgumentError")),
            IROp::ToAry { result, value } => {
                let v = match self.eval(value, act) {
                    Value::Array(a) => Value::Array(a),
                    other => Value::Array(vec![other]),
                };
                self.store(act, result, v);
            }
            IROp::ReqdArgMultipleAsgn { result, array, pre_count, post_count, index } => {
                let Value::Array(items) = self.eval(array, act) else { panic!("destructuring a non-array") };
                let at = if *post_count == 0 { *index } else { items.len().saturating_sub(*post_count).max(*pre_count) + index };
                let v = items.get(at).cloned().unwrap_or(Value::Nil);
                self.store(act, result, v);
            }
            IROp::RestArgMultipleAsgn { result, array, pre_count, post_count, .. } => {
                let Value::Array(items) = self.eval(array, act) else { panic!("destructuring a non-array") };
                let end = items.len().saturating_sub(*post_count).max(*pre_count);
                let v = Value::Array(items.get(*pre_count..end).map(|s| s.to_vec()).unwrap_or_default());
                self.store(act, result, v);
            }

            IROp::ExceptionRegionStart { .. } | IROp::ExceptionRegionEnd => {}
            IROp::ReceiveException { result, any } => {
                let signal = pending.take().unwrap_or_else(|| panic!("no exception to receive"));
                let value = match signal {
                    Signal::Raise(exc) => exc,
                    // language-level handlers let unwinding signals through
                    other if !*any => return Err(other),
                    other => Value::Signal(Box::new(other)),
                };
                self.store(act, result, value);
            }
            IROp::Throw { exception } => {
                return Err(match self.eval(exception, act) {
                    Value::Signal(s) => *s,
                    other => Signal::Raise(other),
                });
            }
            IROp::RaiseLocalJumpError { .. } => return Err(self.raise("LocalJumpError")),
            IROp::GetErrorInfo { result } => {
                let v = self.error_info.clone();
                self.store(act, result, v);
            }
            IROp::RestoreErrorInfo { value } => self.error_info = self.eval(value, act),
            IROp::RescueEqq { result, types, exception } => {
                let exc = self.eval(exception, act);
                let types = match self.eval(types, act) {
                    Value::Array(list) => list,
                    single => vec![single],
                };
                let matched = match exc {
                    Value::Exception(class) => types.iter().any(|t| matches!(t, Value::Class(c) if is_a(&class, c))),
                    _ => false,
                };
                self.store(act, result, Value::Bool(matched));
            }
            IROp::Eqq { result, target, value } => {
                let target = self.eval(target, act);
                let value = self.eval(value, act);
                let matched = match (&target, &value) {
                    (Value::Class(c), Value::Exception(e)) => is_a(e, c),
                    _ => target == value,
                };
                self.store(act, result, Value::Bool(matched));
            }

            IROp::Return { value } => return Ok(Step::Return(self.eval(value, act))),
            IROp::NonlocalReturn { value, method } => {
                return Err(Signal::NonlocalReturn { value: self.eval(value, act), method: method.clone() });
            }
            IROp::Break { value, .. } => return Err(Signal::Break(self.eval(value, act))),
            IROp::ThreadPoll { .. } => self.polls += 1,
            IROp::LineNumber { .. } => {}

            IROp::DefineInstanceMethod { method } | IROp::DefineClassMethod { method, .. } => {
                let name = self.module.scope(*method).name.clone();
                self.methods.insert(name, *method);
            }
            IROp::BuildLambda { result, closure } => {
                let Value::Proc(p) = self.eval(closure, act) else { panic!("lambda of a non-closure") };
                let lambda = Proc {
                    scope: p.scope,
                    frame: p.frame.clone(),
                    self_value: p.self_value.clone(),
                    yield_closure: p.yield_closure.clone(),
                    lambda: true,
                };
                self.store(act, result, Value::Proc(Rc::new(lambda)));
            }
            IROp::GetGlobalVar { result, name } => {
                let v = self.globals.get(name).cloned().unwrap_or(Value::Nil);
                self.store(act, result, v);
            }
            IROp::PutGlobalVar { name, value } => {
                let v = self.eval(value, act);
                self.globals.insert(name.clone(), v);
            }
            IROp::SearchConst { result, name, .. } | IROp::InheritanceSearchConst { result, name, .. } => {
                let v = self.lookup_const(name);
                self.store(act, result, v);
            }
            IROp::ConstMissing { name, .. } => return Err(self.raise_named("NameError", name)),
            IROp::PutConst { name, value, .. } => {
                let v = self.eval(value, act);
                self.constants.insert(name.clone(), v);
            }
            IROp::BuildSplat { result, value } => {
                let v = self.eval(value, act);
                self.store(act, result, v);
            }
            IROp::BuildCompoundString { result, pieces } => {
                let mut text = String::new();
                for p in pieces {
                    match self.eval(p, act) {
                        Value::Str(s) | Value::Sym(s) => text.push_str(&s),
                        Value::Int(i) => text.push_str(&i.to_string()),
                        other => text.push_str(&format!("{:?}", other)),
                    }
                }
                self.store(act, result, Value::Str(text));
            }
            other => panic!("the test interpreter does not model {}", other),
        }
        Ok(Step::Next)
    }

    fn helper(&mut self, helper: RuntimeHelper, act: &Activation, args: Vec<Value>) -> Result<Value, Signal> {
        let signal = |v: &Value| match v {
            Value::Signal(s) => Some((**s).clone()),
            _ => None,
        };
        match helper {
            RuntimeHelper::CheckForLje => Ok(Value::Nil),
            RuntimeHelper::HandlePropagatedBreak => match signal(&args[0]) {
                Some(Signal::Break(v)) => Ok(v),
                Some(other) => Err(other),
                None => Err(Signal::Raise(args[0].clone())),
            },
            RuntimeHelper::HandleNonlocalReturn => match signal(&args[0]) {
                Some(Signal::NonlocalReturn { value, method }) if method == act.method_name => Ok(value),
                Some(other) => Err(other),
                None => Err(Signal::Raise(args[0].clone())),
            },
            RuntimeHelper::HandleBreakAndReturnsInLambda => {
                let is_lambda = self.module.scope(act.scope).kind == ScopeKind::Lambda;
                match signal(&args[0]) {
                    Some(Signal::Break(v)) | Some(Signal::NonlocalReturn { value: v, .. }) if is_lambda => Ok(v),
                    Some(other) => Err(other),
                    None => Err(Signal::Raise(args[0].clone())),
                }
            }
            RuntimeHelper::IsDefinedGlobal => match &args[0] {
                Value::Str(name) if self.globals.contains_key(name) => Ok(Value::str("global-variable")),
                _ => Ok(Value::Nil),
            },
            RuntimeHelper::IsDefinedMethod => match &args[1] {
                Value::Str(name) if self.methods.contains_key(name) || is_builtin(name) => Ok(Value::str("method")),
                _ => Ok(Value::Nil),
            },
            other => panic!("the test interpreter does not model helper {}", other),
        }
    }

    fn dispatch(&mut self, name: &str, recv: Value, args: Vec<Value>, block: Value) -> Result<Value, Signal> {
        match (name, &recv, args.as_slice()) {
            ("record", _, [v]) => {
                self.trace.push(v.clone());
                Ok(v.clone())
            }
            // a guard that records its evaluation, then yields its argument
            ("guard", _, [v]) => {
                self.trace.push(Value::Str(format!("guard {:?}", v)));
                Ok(v.clone())
            }
            ("raise", _, [Value::Class(class)]) => Err(self.raise(class)),
            ("+", Value::Int(a), [Value::Int(b)]) => Ok(Value::Int(a + b)),
            ("-", Value::Int(a), [Value::Int(b)]) => Ok(Value::Int(a - b)),
            ("<", Value::Int(a), [Value::Int(b)]) => Ok(Value::Bool(a < b)),
            (">", Value::Int(a), [Value::Int(b)]) => Ok(Value::Bool(a > b)),
            ("==", a, [b]) => Ok(Value::Bool(*a == *b)),
            ("call", Value::Proc(_), _) => self.call_proc(&recv, args),
            ("each", Value::Array(items), []) => {
                for item in items.clone() {
                    self.call_proc(&block, vec![item])?;
                }
                Ok(recv)
            }
            _ => self.invoke(name, recv, args, block),
        }
    }

    fn invoke(&mut self, name: &str, recv: Value, args: Vec<Value>, block: Value) -> Result<Value, Signal> {
        let Some(&method) = self.methods.get(name) else {
            return Err(self.raise_named("NoMethodError", name));
        };
        self.execute(method, Frame::new(None), recv, args, block, None)
    }

    fn call_proc(&mut self, closure: &Value, args: Vec<Value>) -> Result<Value, Signal> {
        let Value::Proc(p) = closure else {
            return Err(self.raise("LocalJumpError"));
        };
        let p = p.clone();
        // `for` bodies run in the frame of the scope that owns their variables
        let frame = match self.module.scope(p.scope).kind {
            ScopeKind::For => p.frame.clone(),
            _ => Frame::new(Some(p.frame.clone())),
        };
        self.execute(p.scope, frame, p.self_value.clone(), args, Value::Nil, Some(p.yield_closure.clone()))
    }

    fn raise(&mut self, class: &str) -> Signal {
        let exc = Value::Exception(class.to_string());
        self.error_info = exc.clone();
        Signal::Raise(exc)
    }

    fn raise_named(&mut self, class: &str, _name: &str) -> Signal {
        self.raise(class)
    }

    fn lookup_const(&self, name: &str) -> Value {
        if let Some(v) = self.constants.get(name) {
            return v.clone();
        }
        if name == "Exception" || exception_parent(name).is_some() || name == "Object" {
            return Value::Class(name.to_string());
        }
        Value::Undefined
    }

    fn eval_args(&self, args: &[Operand], act: &Activation) -> Vec<Value> {
        let mut out = Vec::with_capacity(args.len());
        for a in args {
            match a {
                Operand::Splat(inner) => match self.eval(inner, act) {
                    Value::Array(items) => out.extend(items),
                    other => out.push(other),
                },
                other => out.push(self.eval(other, act)),
            }
        }
        out
    }

    fn eval(&self, operand: &Operand, act: &Activation) -> Value {
        match operand {
            Operand::Nil => Value::Nil,
            Operand::True => Value::Bool(true),
            Operand::False => Value::Bool(false),
            Operand::Undefined => Value::Undefined,
            Operand::Fixnum(i) => Value::Int(*i),
            Operand::Str(s) | Operand::FrozenStr(s) => Value::Str(s.clone()),
            Operand::Symbol(s) => Value::Sym(s.clone()),
            Operand::Array(items) => Value::Array(self.eval_args(items, act)),
            Operand::Hash(pairs) => {
                Value::Hash(pairs.iter().map(|(k, v)| (self.eval(k, act), self.eval(v, act))).collect())
            }
            Operand::Splat(inner) | Operand::SValue(inner) => self.eval(inner, act),
            Operand::Var(v) => self.load(act, v),
            Operand::Closure(scope) => {
                let yield_closure = act.vars.get(&Variable::YieldClosure).cloned().unwrap_or(Value::Nil);
                let self_value = act.vars.get(&Variable::SelfVar).cloned().unwrap_or(Value::Nil);
                Value::Proc(Rc::new(Proc {
                    scope: *scope,
                    frame: act.frame.clone(),
                    self_value,
                    yield_closure,
                    lambda: false,
                }))
            }
            Operand::ScopeFor(_) | Operand::ModuleFor(_) | Operand::ObjectClass => Value::Class("Object".to_string()),
            other => panic!("the test interpreter does not model operand {}", other),
        }
    }

    fn load(&self, act: &Activation, var: &Variable) -> Value {
        match var {
            Variable::Local(l) => {
                let frame = act.frame.at_depth(l.depth);
                let v = frame.locals.borrow().get(&l.name).cloned();
                v.unwrap_or(Value::Nil)
            }
            other => act.vars.get(other).cloned().unwrap_or(Value::Nil),
        }
    }

    fn store(&self, act: &mut Activation, var: &Variable, value: Value) {
        match var {
            Variable::Local(l) => {
                let frame = act.frame.at_depth(l.depth);
                frame.locals.borrow_mut().insert(l.name.clone(), value);
            }
            other => {
                act.vars.insert(other.clone(), value);
            }
        }
    }
}

enum Step {
    Next,
    Jump(Label),
    Return(Value),
}

fn is_builtin(name: &str) -> bool {
    matches!(name, "record" | "guard" | "raise")
}

/// A trailing hash is the keyword arguments of scopes that take them.
fn split_kwargs(scope: &kiln_core::ir::scope::Scope, mut args: Vec<Value>) -> (Vec<Value>, Vec<(Value, Value)>) {
    use kiln_core::ir::scope::ScopeFlag;
    if scope.has_flag(ScopeFlag::ReceivesKeywordArgs) {
        if let Some(Value::Hash(_)) = args.last() {
            if let Some(Value::Hash(pairs)) = args.pop() {
                return (args, pairs);
            }
        }
    }
    (args, Vec::new())
}

/// Handler covering each instruction, from the textual nesting of region
/// markers.
fn handler_coverage(instrs: &[IROp]) -> Vec<Option<Label>> {
    let mut stack: Vec<Option<Label>> = Vec::new();
    let mut coverage = Vec::with_capacity(instrs.len());
    for op in instrs {
        match op {
            IROp::ExceptionRegionStart { handler } => {
                coverage.push(stack.last().copied().flatten());
                stack.push(*handler);
            }
            IROp::ExceptionRegionEnd => {
                stack.pop();
                coverage.push(stack.last().copied().flatten());
            }
            _ => coverage.push(stack.last().copied().flatten()),
        }
    }
    coverage
}
