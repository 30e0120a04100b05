//! Textual form of the IR.
//!
//! The printer emits one canonical surface form per operation and the
//! parser accepts exactly that grammar, so printing then re-parsing yields
//! a structurally equivalent module (and printing is idempotent on its own
//! output). Attributes — bounds, offsets, the merge dimension — are the
//! only persisted state and travel through this form.

pub mod lexeme;
pub mod lexer;
pub mod parser;
pub mod printer;

use crate::diagnostic::Diagnostic;
use crate::ir::Module;

/// Parses the textual form of a module.
pub fn parse_module(source: &str, file_id: u16) -> Result<Module, Vec<Diagnostic>> {
    let (tokens, lex_errors) = lexer::Lexer::new(source, file_id).tokenize();
    if !lex_errors.is_empty() {
        return Err(lex_errors);
    }
    parser::Parser::new(tokens).parse_module()
}

/// Prints a module in its canonical textual form.
pub fn print_module(module: &Module) -> String {
    printer::Printer::new(module).print()
}
