//! Cut and weight expression parsing
//!
//! Selection cuts and the event-weight formula arrive as strings in the
//! C-style syntax common to event-analysis configs:
//!
//! ```text
//! nJets == 6 && nBTags_70 == 3
//! fabs(weight_mc * weight_pileup)
//! ```
//!
//! Rather than hand-rolling a grammar, the string is normalized into SQL
//! operator spelling (`&&` → `AND`, `==` → `=`, ...) and handed to
//! `sqlparser`, whose expression AST is then compiled against a table schema
//! into an index-bound evaluator ([`CompiledExpr`], see [`eval`]).
//!
//! Supported constructs: column identifiers, numeric literals, `+ - * / %`,
//! comparisons, `&& || !`, parentheses, and the functions `fabs`/`abs`,
//! `sqrt`, `log`, `exp`, `pow`, `min`, `max`. Anything else is rejected at
//! parse or compile time with a configuration error — never at row time.

mod eval;

pub use eval::CompiledExpr;

use sqlparser::ast::Expr as SqlExpr;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;

use crate::{Error, Result};
use arrow::datatypes::SchemaRef;

/// A parsed, schema-independent expression.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    ast: SqlExpr,
}

impl Expression {
    /// Parse an expression string.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] on malformed syntax or trailing
    /// input.
    pub fn parse(source: &str) -> Result<Self> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(Error::Configuration(
                "empty expression".to_string(),
            ));
        }
        let normalized = normalize(trimmed);
        let dialect = GenericDialect {};
        let mut parser = Parser::new(&dialect)
            .try_with_sql(&normalized)
            .map_err(|e| Error::Configuration(format!("expression '{trimmed}': {e}")))?;
        let ast = parser
            .parse_expr()
            .map_err(|e| Error::Configuration(format!("expression '{trimmed}': {e}")))?;
        if parser.peek_token().token != Token::EOF {
            return Err(Error::Configuration(format!(
                "expression '{trimmed}': unexpected trailing input"
            )));
        }
        Ok(Self {
            source: trimmed.to_string(),
            ast,
        })
    }

    /// The original expression text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Bind column references against a schema, producing an evaluator.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if the expression references a
    /// column absent from the schema or uses an unsupported construct.
    pub fn compile(&self, schema: &SchemaRef) -> Result<CompiledExpr> {
        eval::compile(&self.source, &self.ast, schema)
    }
}

/// Rewrite C-style operator spelling into SQL spelling.
///
/// Order matters: `!=` must be consumed before the bare `!`.
fn normalize(source: &str) -> String {
    let mut out = String::with_capacity(source.len() + 8);
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '&' if chars.peek() == Some(&'&') => {
                chars.next();
                out.push_str(" AND ");
            }
            '|' if chars.peek() == Some(&'|') => {
                chars.next();
                out.push_str(" OR ");
            }
            '=' if chars.peek() == Some(&'=') => {
                chars.next();
                out.push_str(" = ");
            }
            '!' if chars.peek() == Some(&'=') => {
                chars.next();
                out.push_str(" <> ");
            }
            '!' => out.push_str(" NOT "),
            c => out.push(c),
        }
    }
    out
}
