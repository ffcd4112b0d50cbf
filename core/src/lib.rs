pub mod ast;
pub mod error;
pub mod ir;
pub mod location;

pub use ast::{load_ast_from_path, load_ast_from_str, AstLoadError, AstNode, NodeKind};
pub use error::{KilnErrorExt, Level};
pub use ir::{lower_ast_to_ir, lower_ast_to_ir_with, lower_eval_to_ir, BuildError, BuilderOptions, IrModule};
pub use location::{Location, Span};

pub fn generate_error_report<E: KilnErrorExt + ?Sized>(error: &E) -> String {
    let level = error.level();
    let location = match error.location() {
        Some(loc) => loc.to_string(),
        None => "unknown location".to_string(),
    };
    let message = error.message();

    format!("KILN | {} | {} | {}", level, location, message)
}
