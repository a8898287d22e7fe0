//! Front end for debuggee scripts: a small JavaScript subset.

pub mod ast;
mod lexer;
mod parser;

pub use parser::parse_script;
