//! Formula Evaluation
//!
//! Sandboxed arithmetic for user-authored ecosystem-service formulas.
//!
//! The grammar is closed: numeric literals, identifiers bound in a
//! [`FormulaContext`], `+ - * / % **` (`^` is accepted as a power alias),
//! parentheses and a fixed table of math functions. There is no assignment,
//! member access, control flow or way to reach anything outside the context
//! and the function table, because the parser has no production for them.
//!
//! Pipeline: `lexer` → `parser` (AST) → `eval` (tree walk).

pub mod lexer;
pub mod parser;
pub mod functions;
pub mod eval;

use rustc_hash::FxHashMap;
use serde::Serialize;
use thiserror::Error;

pub use parser::{BinaryOp, Expr, Formula, UnaryOp};
pub use functions::Function;

/// Longest formula accepted, in characters.
pub const MAX_FORMULA_LEN: usize = 2_000;

/// Deepest nesting of parentheses / unary / power chains accepted.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Classified evaluation failure
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormulaError {
    /// Malformed or disallowed syntax. `column` is 1-based.
    #[error("syntax error at column {column}: {message}")]
    Syntax { column: usize, message: String },

    #[error("unknown variable `{0}`")]
    UnknownVariable(String),

    /// Division by zero, domain error, overflow in a power or function, or a null operand
    #[error("math error: {0}")]
    MathEvaluation(String),

    #[error("formula produced a non-finite result")]
    NonFiniteResult,
}

impl FormulaError {
    pub(crate) fn syntax(column: usize, message: impl Into<String>) -> Self {
        FormulaError::Syntax {
            column,
            message: message.into(),
        }
    }

    pub(crate) fn math(message: impl Into<String>) -> Self {
        FormulaError::MathEvaluation(message.into())
    }

    /// Stable classification label used in JSON payloads
    pub fn kind(&self) -> &'static str {
        match self {
            FormulaError::Syntax { .. } => "FormulaSyntaxError",
            FormulaError::UnknownVariable(_) => "UnknownVariableError",
            FormulaError::MathEvaluation(_) => "MathEvaluationError",
            FormulaError::NonFiniteResult => "NonFiniteResultError",
        }
    }
}

/// Serializable `{kind, message}` pair for API responses
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorMarker {
    pub kind: String,
    pub message: String,
}

impl From<&FormulaError> for ErrorMarker {
    fn from(err: &FormulaError) -> Self {
        ErrorMarker {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Name → value bindings visible to a formula.
///
/// A `None` value means the name exists but has no numeric value (e.g. a
/// text-typed custom variable). Referencing it is a math error, not an
/// unknown variable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormulaContext {
    bindings: FxHashMap<String, Option<f64>>,
}

impl FormulaContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name`, replacing any earlier binding
    pub fn insert(&mut self, name: impl Into<String>, value: Option<f64>) {
        self.bindings.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<Option<f64>> {
        self.bindings.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Bound names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.bindings.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl<K: Into<String>> FromIterator<(K, Option<f64>)> for FormulaContext {
    fn from_iter<I: IntoIterator<Item = (K, Option<f64>)>>(iter: I) -> Self {
        let mut ctx = FormulaContext::new();
        for (name, value) in iter {
            ctx.insert(name, value);
        }
        ctx
    }
}

/// Parse and evaluate in one step
pub fn evaluate(source: &str, ctx: &FormulaContext) -> Result<f64, FormulaError> {
    Formula::parse(source)?.evaluate(ctx)
}

/// Check that `source` parses and references only `known` names (or
/// built-in constants). Does not evaluate.
pub fn check_identifiers<'a, I>(source: &str, known: I) -> Result<Formula, FormulaError>
where
    I: IntoIterator<Item = &'a str>,
{
    let formula = Formula::parse(source)?;
    let known: rustc_hash::FxHashSet<&str> = known.into_iter().collect();
    for name in formula.identifiers() {
        if !known.contains(name) && functions::constant(name).is_none() {
            return Err(FormulaError::UnknownVariable(name.to_string()));
        }
    }
    Ok(formula)
}
