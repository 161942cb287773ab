mod token;
pub use token::*;
mod lex;
pub use lex::*;
mod session;
pub use session::*;
mod emit;
pub use emit::*;
mod mangle;
pub use mangle::*;

/// Declaration, statement and expression parsing
pub mod parse;
pub use parse::Parser;

/// The template engine: registry, deduction, substitution, constraint
/// evaluation and the instantiation protocols
pub mod tpl;
pub use tpl::{ConceptOutcome, ConceptRegistry, SubstMap, TemplateRegistry};

#[cfg(test)]
mod tests;
