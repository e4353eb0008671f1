//! Formula references, dependency graph and OpenFormula translation

pub mod graph;
pub mod lexer;
pub mod openformula;

pub use graph::{validate_formulas, DependencyGraph, Node};
pub use lexer::{lex, references, Lexeme, RefTarget, RefToken};
pub use openformula::{from_openformula, to_openformula};
