//! file: core/src/ir/mod.rs
//! description: the intermediate representation and the entry points that
//! lower an AST into it.

pub mod clone;
pub mod lower;
pub mod module;
pub mod op;
pub mod operand;
pub mod scope;

use log::info;

use crate::ast::AstNode;

pub use self::lower::{BuildError, BuilderOptions, IrBuilder};
pub use self::module::IrModule;

/// Lower a script with the default options.
pub fn lower_ast_to_ir(ast: &AstNode) -> Result<IrModule, BuildError> {
    lower_ast_to_ir_with(ast, BuilderOptions::default())
}

pub fn lower_ast_to_ir_with(ast: &AstNode, options: BuilderOptions) -> Result<IrModule, BuildError> {
    let mut module = IrModule::new(&options.file_name);
    IrBuilder::new(&mut module, options).build_root(ast)?;
    info!("lowered {} into {} scopes, {} instructions", module.file_name, module.scopes.len(), module.instruction_count());
    Ok(module)
}

/// Lower the tree of a string passed to `eval`, evaluated at `line`.
pub fn lower_eval_to_ir(ast: &AstNode, line: usize, options: BuilderOptions) -> Result<IrModule, BuildError> {
    let mut module = IrModule::new(&options.file_name);
    IrBuilder::new(&mut module, options).build_eval_root(ast, line)?;
    info!("lowered eval at line {} into {} scopes", line, module.scopes.len());
    Ok(module)
}
