pub mod canonicalize;
pub mod diagnostic;
pub mod ir;
pub mod lower;
pub mod span;
pub mod syntax;

use diagnostic::render_diagnostics;

pub use canonicalize::canonicalize;
pub use diagnostic::Diagnostic;
pub use ir::Module;
pub use lower::lower;
pub use syntax::{parse_module, print_module};

/// Runs the full middle tier on a textual module and returns the lowered
/// loop-nest program in textual form: parse, verify, canonicalize to
/// fixpoint, lower, verify again. On error nothing lowered is returned;
/// the module never escapes half-converted.
pub fn compile_silent(source: &str) -> Result<String, Vec<Diagnostic>> {
    let mut module = syntax::parse_module(source, 0)?;
    ir::verify::verify_module(&module)?;
    canonicalize::canonicalize(&mut module).map_err(|diag| vec![diag])?;
    ir::verify::verify_module(&module)?;
    lower::lower(&mut module).map_err(|diag| vec![diag])?;
    ir::verify::verify_module(&module)?;
    Ok(syntax::print_module(&module))
}

/// Like [`compile_silent`], rendering diagnostics to stderr on failure.
pub fn compile(source: &str, filename: &str) -> Result<String, Vec<Diagnostic>> {
    match compile_silent(source) {
        Ok(text) => Ok(text),
        Err(diagnostics) => {
            render_diagnostics(&diagnostics, filename, source);
            Err(diagnostics)
        }
    }
}
