//! Closed function and constant table
//!
//! The only callables a formula can reach. Domain checks live here so the
//! evaluator reports `log(0)` or `sqrt(-1)` as math errors instead of
//! letting NaN leak into the result.

use super::FormulaError;

/// Allowed math function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    Ln,
    /// `log(x)` is natural; `log(x, base)` uses the given base
    Log,
    Log10,
    Log2,
    Exp,
    Sqrt,
    Pow,
    Abs,
    Min,
    Max,
    Floor,
    Ceil,
    Round,
    Sin,
    Cos,
    Tan,
}

/// Accepted argument counts, inclusive. `None` upper bound means variadic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min: usize,
    pub max: Option<usize>,
}

impl Arity {
    const fn exactly(n: usize) -> Self {
        Arity { min: n, max: Some(n) }
    }

    pub fn accepts(&self, n: usize) -> bool {
        n >= self.min && self.max.map_or(true, |max| n <= max)
    }

    pub fn describe(&self) -> String {
        match self.max {
            Some(max) if max == self.min => format!("{}", self.min),
            Some(max) => format!("{} to {}", self.min, max),
            None => format!("at least {}", self.min),
        }
    }
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        let function = match name {
            "ln" => Function::Ln,
            "log" => Function::Log,
            "log10" => Function::Log10,
            "log2" => Function::Log2,
            "exp" => Function::Exp,
            "sqrt" => Function::Sqrt,
            "pow" => Function::Pow,
            "abs" | "fabs" => Function::Abs,
            "min" => Function::Min,
            "max" => Function::Max,
            "floor" => Function::Floor,
            "ceil" => Function::Ceil,
            "round" => Function::Round,
            "sin" => Function::Sin,
            "cos" => Function::Cos,
            "tan" => Function::Tan,
            _ => return None,
        };
        Some(function)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Function::Ln => "ln",
            Function::Log => "log",
            Function::Log10 => "log10",
            Function::Log2 => "log2",
            Function::Exp => "exp",
            Function::Sqrt => "sqrt",
            Function::Pow => "pow",
            Function::Abs => "abs",
            Function::Min => "min",
            Function::Max => "max",
            Function::Floor => "floor",
            Function::Ceil => "ceil",
            Function::Round => "round",
            Function::Sin => "sin",
            Function::Cos => "cos",
            Function::Tan => "tan",
        }
    }

    pub fn arity(&self) -> Arity {
        match self {
            Function::Log => Arity { min: 1, max: Some(2) },
            Function::Pow => Arity::exactly(2),
            Function::Min | Function::Max => Arity { min: 1, max: None },
            _ => Arity::exactly(1),
        }
    }

    /// Apply to already-evaluated arguments. Arity was checked at parse time.
    pub fn apply(&self, args: &[f64]) -> Result<f64, FormulaError> {
        let x = args.first().copied().unwrap_or(f64::NAN);
        let value = match self {
            Function::Ln => natural_log(x)?,
            Function::Log => match args.get(1) {
                None => natural_log(x)?,
                Some(&base) => {
                    if base <= 0.0 || base == 1.0 {
                        return Err(FormulaError::math(format!("invalid logarithm base {}", base)));
                    }
                    natural_log(x)? / libm::log(base)
                }
            },
            Function::Log10 => {
                check_log_domain(x)?;
                libm::log10(x)
            }
            Function::Log2 => {
                check_log_domain(x)?;
                libm::log2(x)
            }
            Function::Exp => libm::exp(x),
            Function::Sqrt => {
                if x < 0.0 {
                    return Err(FormulaError::math(format!("sqrt of negative number {}", x)));
                }
                libm::sqrt(x)
            }
            Function::Pow => power(x, args[1])?,
            Function::Abs => x.abs(),
            Function::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            Function::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Function::Floor => libm::floor(x),
            Function::Ceil => libm::ceil(x),
            Function::Round => libm::round(x),
            Function::Sin => libm::sin(x),
            Function::Cos => libm::cos(x),
            Function::Tan => libm::tan(x),
        };

        if value.is_infinite() && args.iter().all(|a| a.is_finite()) {
            return Err(FormulaError::math(format!("overflow in {}()", self.name())));
        }
        Ok(value)
    }
}

/// Built-in constant by name
pub fn constant(name: &str) -> Option<f64> {
    match name {
        "pi" => Some(std::f64::consts::PI),
        "e" => Some(std::f64::consts::E),
        "tau" => Some(std::f64::consts::TAU),
        _ => None,
    }
}

/// `base ** exponent` with the same fault classes as the rest of the grammar
pub fn power(base: f64, exponent: f64) -> Result<f64, FormulaError> {
    if base == 0.0 && exponent < 0.0 {
        return Err(FormulaError::math("zero raised to a negative power"));
    }
    let value = libm::pow(base, exponent);
    if value.is_nan() && !base.is_nan() && !exponent.is_nan() {
        return Err(FormulaError::math(format!(
            "negative base {} raised to fractional power {}",
            base, exponent
        )));
    }
    if value.is_infinite() && base.is_finite() && exponent.is_finite() {
        return Err(FormulaError::math("overflow in power"));
    }
    Ok(value)
}

fn check_log_domain(x: f64) -> Result<(), FormulaError> {
    if x <= 0.0 {
        return Err(FormulaError::math(format!("logarithm of non-positive number {}", x)));
    }
    Ok(())
}

fn natural_log(x: f64) -> Result<f64, FormulaError> {
    check_log_domain(x)?;
    Ok(libm::log(x))
}
