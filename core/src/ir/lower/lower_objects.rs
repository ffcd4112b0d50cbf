//! file: core/src/ir/lower/lower_objects.rs
//! description: class, module and singleton-class bodies, constants and
//! class variables.
//!
//! Module bodies are their own scopes, lowered by a nested builder. The
//! parent only sees `DefineClass`/`DefineModule`/`DefineMetaClass`
//! followed by a `ProcessModuleBody` that runs the body.
//!
use crate::ast::{AstNode, ConstPath};
use crate::ir::op::IROp;
use crate::ir::operand::{Label, Operand, Variable};
use crate::ir::scope::{ScopeId, ScopeKind};

use super::{BuildError, IrBuilder, Lowered};

impl<'m> IrBuilder<'m> {
    // ---- class variables ----

    /// Module owning the class variables visible from `s`: the nearest
    /// class or module body, unless an eval scope is crossed first, in
    /// which case the lookup happens at run time.
    pub(crate) fn class_var_container(&mut self, s: ScopeId, declaring: bool) -> Operand {
        let mut n = 0;
        let mut current = Some(s);
        while let Some(c) = current {
            let kind = self.module.scope(c).kind;
            if kind == ScopeKind::Eval {
                break;
            }
            if matches!(kind, ScopeKind::ClassBody | ScopeKind::ModuleBody) {
                return Operand::ModuleFor(n);
            }
            // `for` bodies have no static scope of their own
            if kind != ScopeKind::For {
                n += 1;
            }
            current = self.module.parent_of(c);
        }

        let result = self.temp(s);
        let object = if declaring { None } else { Some(Variable::SelfVar.into()) };
        self.emit(
            s,
            IROp::GetClassVarContainerModule { result: result.clone(), scope: Variable::CurrentScope.into(), object },
        );
        result.into()
    }

    pub(crate) fn build_class_var(&mut self, name: &str, s: ScopeId) -> Lowered {
        let module = self.class_var_container(s, false);
        let result = self.temp(s);
        self.emit(s, IROp::GetClassVariable { result: result.clone(), module, name: name.to_string() });
        Ok(Some(result.into()))
    }

    // ---- constants ----

    /// Lexical scope a constant lookup starts from.
    pub(crate) fn starting_search_scope(&self, s: ScopeId) -> Operand {
        match self.module.nearest_module_referencing_depth(s) {
            -1 => Variable::CurrentScope.into(),
            d => Operand::ScopeFor(d as u32),
        }
    }

    /// Module that receives definitions made in `s`.
    pub(crate) fn find_container_module(&self, s: ScopeId) -> Operand {
        match self.module.nearest_module_referencing_depth(s) {
            -1 => Variable::CurrentModule.into(),
            d => Operand::ModuleFor(d as u32),
        }
    }

    pub(crate) fn search_const(&mut self, s: ScopeId, name: &str) -> Variable {
        let scope = self.starting_search_scope(s);
        let result = self.temp(s);
        self.emit(s, IROp::SearchConst { result: result.clone(), name: name.to_string(), scope, no_private: false });
        result
    }

    /// `module::name`, falling back to `const_missing` when nothing in the
    /// ancestry defines it.
    pub(crate) fn search_const_in_inheritance_hierarchy(&mut self, s: ScopeId, module: Operand, name: &str) -> Variable {
        let result = self.temp(s);
        self.emit(
            s,
            IROp::InheritanceSearchConst { result: result.clone(), module: module.clone(), name: name.to_string(), no_private: true },
        );
        let found: Label = self.label(s);
        self.emit(s, IROp::bne(result.clone().into(), Operand::Undefined, found));
        self.emit(s, IROp::ConstMissing { result: result.clone(), module, name: name.to_string() });
        self.emit_label(s, found);
        result
    }

    pub(crate) fn build_colon2(&mut self, left: Option<&AstNode>, name: &str, s: ScopeId) -> Lowered {
        let Some(left) = left else {
            return Ok(Some(self.search_const(s, name).into()));
        };
        let module = reachable!(self.build(left, s));
        Ok(Some(self.search_const_in_inheritance_hierarchy(s, module, name).into()))
    }

    fn container_from_path(&mut self, path: &ConstPath, s: ScopeId) -> Lowered {
        match path {
            ConstPath::Lexical => Ok(Some(self.find_container_module(s))),
            ConstPath::Scoped { left } => self.build(left, s),
            ConstPath::TopLevel => Ok(Some(Operand::ObjectClass)),
        }
    }

    pub(crate) fn put_constant(&mut self, path: &ConstPath, name: &str, value: Operand, s: ScopeId) -> Result<(), BuildError> {
        let Some(module) = self.container_from_path(path, s)? else { return Ok(()) };
        self.emit(s, IROp::PutConst { module, name: name.to_string(), value });
        Ok(())
    }

    // ---- module bodies ----

    /// Lower the body of a class/module/singleton scope `body_scope`.
    fn build_module_body(&mut self, body_scope: ScopeId, body: Option<&AstNode>) -> Result<(), BuildError> {
        let mut builder = self.nested();
        builder.prepare_implicit_state(body_scope);
        builder.add_current_scope_and_module(body_scope, 0);
        if let Some(rv) = builder.build_opt(body, body_scope)? {
            builder.emit(body_scope, IROp::Return { value: rv });
        }
        builder.finish_scope(body_scope);
        Ok(())
    }

    fn process_module_body(&mut self, s: ScopeId, module: Variable, block: Option<Operand>) -> Operand {
        let result = self.temp(s);
        self.emit(s, IROp::ProcessModuleBody { result: result.clone(), module: module.into(), block });
        result.into()
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn build_class(
        &mut self,
        node: &AstNode,
        name: &str,
        path: &ConstPath,
        superclass: Option<&AstNode>,
        body: Option<&AstNode>,
        scope: &[String],
        s: ScopeId,
    ) -> Lowered {
        let container = reachable!(self.container_from_path(path, s));
        let superclass = match superclass {
            Some(n) => Some(reachable!(self.build(n, s))),
            None => None,
        };

        let body_scope = self.module.new_scope(ScopeKind::ClassBody, name, node.line(), Some(s), scope);
        let class = self.temp(s);
        self.emit(s, IROp::DefineClass { result: class.clone(), body: body_scope, container, superclass });
        let result = self.process_module_body(s, class, None);

        self.build_module_body(body_scope, body)?;
        Ok(Some(result))
    }

    pub(crate) fn build_module(
        &mut self,
        node: &AstNode,
        name: &str,
        path: &ConstPath,
        body: Option<&AstNode>,
        scope: &[String],
        s: ScopeId,
    ) -> Lowered {
        let container = reachable!(self.container_from_path(path, s));

        let body_scope = self.module.new_scope(ScopeKind::ModuleBody, name, node.line(), Some(s), scope);
        let module = self.temp(s);
        self.emit(s, IROp::DefineModule { result: module.clone(), body: body_scope, container });
        let result = self.process_module_body(s, module, None);

        self.build_module_body(body_scope, body)?;
        Ok(Some(result))
    }

    /// `class << obj`. The singleton body sees the block of the scope it is
    /// opened in.
    pub(crate) fn build_sclass(&mut self, node: &AstNode, receiver: &AstNode, body: Option<&AstNode>, scope: &[String], s: ScopeId) -> Lowered {
        let receiver = reachable!(self.build(receiver, s));

        let body_scope = self.module.new_scope(ScopeKind::MetaClassBody, "<singleton class>", node.line(), Some(s), scope);
        let meta = self.temp(s);
        self.emit(s, IROp::DefineMetaClass { result: meta.clone(), receiver, body: body_scope });
        let result = self.process_module_body(s, meta, Some(Variable::YieldClosure.into()));

        self.build_module_body(body_scope, body)?;
        Ok(Some(result))
    }
}
