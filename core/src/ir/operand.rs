//! file: core/src/ir/operand.rs
//! description: operands, variables and labels of the IR.
//!
//! Constants are plain values; `Var` wraps the variables a scope owns.
//! Labels and temporaries are numbered per scope, so two scopes may both
//! contain `L3` and `%v_3` without clashing.

use serde::Serialize;
use std::fmt;

use super::scope::ScopeId;

/// Opaque jump target, unique within the scope that allocated it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// A named source-level variable bound to a fixed lexical depth relative to
/// the scope that references it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct LocalVariable {
    pub name: String,
    pub depth: u32,
    /// Slot in the defining scope.
    pub offset: u32,
}

impl LocalVariable {
    pub fn new(name: &str, depth: u32, offset: u32) -> Self {
        LocalVariable { name: name.to_string(), depth, offset }
    }

    /// The same logical local seen from a scope `depth` levels below the
    /// one defining it.
    pub fn clone_for_depth(&self, depth: u32) -> Self {
        LocalVariable { name: self.name.clone(), depth, offset: self.offset }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Variable {
    /// Builder-introduced, scope-local, unnamed.
    Temp(u32),
    Local(LocalVariable),
    /// `%self`
    SelfVar,
    /// `%current_scope`
    CurrentScope,
    /// `%current_module`
    CurrentModule,
    /// `%_block`: the block passed to this very scope.
    ImplicitClosure,
    /// `%yield`: the block `yield` dispatches to.
    YieldClosure,
}

impl Variable {
    pub fn is_temp(&self) -> bool {
        matches!(self, Variable::Temp(_))
    }

    pub fn as_local(&self) -> Option<&LocalVariable> {
        match self {
            Variable::Local(l) => Some(l),
            _ => None,
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variable::Temp(n) => write!(f, "%v_{}", n),
            Variable::Local(l) if l.depth == 0 => write!(f, "{}", l.name),
            Variable::Local(l) => write!(f, "{}(^{})", l.name, l.depth),
            Variable::SelfVar => write!(f, "%self"),
            Variable::CurrentScope => write!(f, "%current_scope"),
            Variable::CurrentModule => write!(f, "%current_module"),
            Variable::ImplicitClosure => write!(f, "%_block"),
            Variable::YieldClosure => write!(f, "%yield"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Operand {
    Nil,
    True,
    False,
    /// "No value supplied", e.g. an optional argument that was not passed.
    Undefined,
    Fixnum(i64),
    Float(f64),
    Bignum(String),
    Str(String),
    FrozenStr(String),
    Symbol(String),
    Regexp { source: String, options: u32 },
    CompoundString(Vec<Operand>),
    DynamicSymbol(Box<Operand>),
    Array(Vec<Operand>),
    Hash(Vec<(Operand, Operand)>),
    Splat(Box<Operand>),
    SValue(Box<Operand>),
    Var(Variable),
    /// A closure scope wrapped as a value.
    Closure(ScopeId),
    /// Lexical scope `n` levels up from the executing one.
    ScopeFor(u32),
    /// Module of the lexical scope `n` levels up.
    ModuleFor(u32),
    ObjectClass,
    NthRef(u32),
    Backref(char),
}

impl Operand {
    pub fn temp(n: u32) -> Self {
        Operand::Var(Variable::Temp(n))
    }

    pub fn as_var(&self) -> Option<&Variable> {
        match self {
            Operand::Var(v) => Some(v),
            _ => None,
        }
    }

    /// Constant with a fixed identity that needs no copy into a temporary.
    pub fn is_immutable_literal(&self) -> bool {
        matches!(
            self,
            Operand::Nil
                | Operand::True
                | Operand::False
                | Operand::Undefined
                | Operand::Fixnum(_)
                | Operand::Float(_)
                | Operand::Bignum(_)
                | Operand::FrozenStr(_)
                | Operand::Symbol(_)
        )
    }

    /// Re-parent every local inside this operand to `depth`. Used when the
    /// parameters of an outer scope are replayed from a nested closure.
    pub fn clone_for_depth(&self, depth: u32) -> Operand {
        match self {
            Operand::Var(Variable::Local(l)) => Operand::Var(Variable::Local(l.clone_for_depth(depth))),
            Operand::Splat(inner) => Operand::Splat(Box::new(inner.clone_for_depth(depth))),
            Operand::Array(elts) => Operand::Array(elts.iter().map(|e| e.clone_for_depth(depth)).collect()),
            Operand::Hash(pairs) => Operand::Hash(
                pairs
                    .iter()
                    .map(|(k, v)| (k.clone_for_depth(depth), v.clone_for_depth(depth)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Visit every variable nested in this operand.
    pub fn for_each_var_mut(&mut self, f: &mut dyn FnMut(&mut Variable)) {
        match self {
            Operand::Var(v) => f(v),
            Operand::CompoundString(parts) | Operand::Array(parts) => {
                for p in parts.iter_mut() {
                    p.for_each_var_mut(f);
                }
            }
            Operand::Hash(pairs) => {
                for (k, v) in pairs.iter_mut() {
                    k.for_each_var_mut(f);
                    v.for_each_var_mut(f);
                }
            }
            Operand::DynamicSymbol(inner) | Operand::Splat(inner) | Operand::SValue(inner) => {
                inner.for_each_var_mut(f)
            }
            _ => {}
        }
    }
}

impl From<Variable> for Operand {
    fn from(v: Variable) -> Self {
        Operand::Var(v)
    }
}

fn join(f: &mut fmt::Formatter<'_>, items: &[Operand]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Nil => write!(f, "nil"),
            Operand::True => write!(f, "true"),
            Operand::False => write!(f, "false"),
            Operand::Undefined => write!(f, "%undefined"),
            Operand::Fixnum(n) => write!(f, "{}", n),
            Operand::Float(x) => write!(f, "{:?}", x),
            Operand::Bignum(s) => write!(f, "{}", s),
            Operand::Str(s) => write!(f, "{:?}", s),
            Operand::FrozenStr(s) => write!(f, "frozen:{:?}", s),
            Operand::Symbol(s) => write!(f, ":{}", s),
            Operand::Regexp { source, options } => write!(f, "/{}/{}", source, options),
            Operand::CompoundString(parts) => {
                write!(f, "\"")?;
                join(f, parts)?;
                write!(f, "\"")
            }
            Operand::DynamicSymbol(inner) => write!(f, ":{}", inner),
            Operand::Array(elts) => {
                write!(f, "[")?;
                join(f, elts)?;
                write!(f, "]")
            }
            Operand::Hash(pairs) => {
                write!(f, "{{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}=>{}", k, v)?;
                }
                write!(f, "}}")
            }
            Operand::Splat(inner) => write!(f, "*{}", inner),
            Operand::SValue(inner) => write!(f, "svalue({})", inner),
            Operand::Var(v) => write!(f, "{}", v),
            Operand::Closure(id) => write!(f, "closure<{}>", id),
            Operand::ScopeFor(n) => write!(f, "scope<{}>", n),
            Operand::ModuleFor(n) => write!(f, "module<{}>", n),
            Operand::ObjectClass => write!(f, "<Object>"),
            Operand::NthRef(n) => write!(f, "${}", n),
            Operand::Backref(c) => write!(f, "${}", c),
        }
    }
}
