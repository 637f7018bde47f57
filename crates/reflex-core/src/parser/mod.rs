// Parser module - the structural parser/printer port and its Reflex source
// implementation
use std::path::Path;

use anyhow::Result;

use crate::ast::{Expr, StructuralTree, Stmt, ToSource};

pub mod reflex_parser;

#[cfg(test)]
mod tests;

pub use reflex_parser::ReflexParser;

/// Parse failure with the position where the grammar gave up
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("parse error at line {line}, column {column}: {message}")]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

/// Converts source text to editable structural trees and back.
///
/// The engine only calls `print` when regenerating source for compilation;
/// every edit in between is a tree-to-tree operation.
pub trait StructuralParser: Send + Sync {
    /// Parse one source unit (package, imports, one or more classes)
    fn parse_unit(&self, source: &str) -> Result<Vec<StructuralTree>, ParseError>;

    /// Parse a single expression
    fn parse_expression(&self, source: &str) -> Result<Expr, ParseError>;

    /// Parse a statement list, with or without enclosing braces
    fn parse_body(&self, source: &str) -> Result<Vec<Stmt>, ParseError>;

    /// Regenerate source text for a tree
    fn print(&self, tree: &StructuralTree) -> String {
        tree.to_source()
    }

    /// Parse a file
    fn parse_file(&self, path: &Path) -> Result<Vec<StructuralTree>> {
        let source = std::fs::read_to_string(path)?;
        Ok(self.parse_unit(&source)?)
    }

    /// Get parser name for debugging
    fn name(&self) -> &'static str;
}

/// Create a parser based on type
pub fn create_parser(parser_type: &str) -> Result<Box<dyn StructuralParser>> {
    match parser_type {
        "reflex" => Ok(Box::new(ReflexParser::new())),
        _ => anyhow::bail!("Unknown parser type: {}", parser_type),
    }
}
