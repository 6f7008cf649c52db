//! Tree-walking evaluator
//!
//! Identifier resolution happens before any arithmetic, so an unknown name
//! is reported as such even when another part of the formula would fault
//! first (`1/0 + foo` → unknown variable `foo`).

use smallvec::SmallVec;

use super::functions::{self, power};
use super::parser::{BinaryOp, Expr, Formula, UnaryOp};
use super::{FormulaContext, FormulaError};

impl Formula {
    /// Evaluate against `ctx`, returning a finite number at full precision
    pub fn evaluate(&self, ctx: &FormulaContext) -> Result<f64, FormulaError> {
        for name in self.identifiers() {
            if !ctx.contains(name) && functions::constant(name).is_none() {
                return Err(FormulaError::UnknownVariable(name.to_string()));
            }
        }

        let value = eval_expr(self.root(), ctx)?;
        if !value.is_finite() {
            return Err(FormulaError::NonFiniteResult);
        }
        Ok(value)
    }
}

fn eval_expr(expr: &Expr, ctx: &FormulaContext) -> Result<f64, FormulaError> {
    match expr {
        Expr::Number(value) => Ok(*value),
        Expr::Variable { name, .. } => lookup(name, ctx),
        Expr::Unary { op, operand } => {
            let value = eval_expr(operand, ctx)?;
            Ok(match op {
                UnaryOp::Plus => value,
                UnaryOp::Neg => -value,
            })
        }
        Expr::Binary { op, lhs, rhs } => {
            let a = eval_expr(lhs, ctx)?;
            let b = eval_expr(rhs, ctx)?;
            binary(*op, a, b)
        }
        Expr::Call { function, args } => {
            let values = args
                .iter()
                .map(|arg| eval_expr(arg, ctx))
                .collect::<Result<SmallVec<[f64; 2]>, _>>()?;
            function.apply(&values)
        }
    }
}

fn lookup(name: &str, ctx: &FormulaContext) -> Result<f64, FormulaError> {
    match ctx.get(name) {
        Some(Some(value)) => Ok(value),
        Some(None) => Err(FormulaError::math(format!("variable `{}` has no numeric value", name))),
        None => functions::constant(name).ok_or_else(|| FormulaError::UnknownVariable(name.to_string())),
    }
}

fn binary(op: BinaryOp, a: f64, b: f64) -> Result<f64, FormulaError> {
    let value = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(FormulaError::math("division by zero"));
            }
            a / b
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                return Err(FormulaError::math("modulo by zero"));
            }
            // Floored modulo: result takes the sign of the divisor
            a - b * libm::floor(a / b)
        }
        BinaryOp::Pow => return power(a, b),
    };
    // Arithmetic overflow carries on as ±inf; the final result check flags it
    Ok(value)
}
