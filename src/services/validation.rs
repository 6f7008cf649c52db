//! Formula validation for the configuration screens
//!
//! Evaluates a draft formula against illustrative biometrics and
//! placeholder variable values and reports a verdict the editor can show.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::data::{Biometrics, TreeVariable};
use crate::formula::{Formula, FormulaError};
use crate::utils::round_display;

use super::context::sample_context;

/// Illustrative tree used when no real tree is involved
pub const SAMPLE_BIOMETRICS: Biometrics = Biometrics { dap: 30.0, altura: 10.0 };

/// Verdict returned to the formula editor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormulaVerdict {
    pub valid: bool,
    /// Rounded to 4 decimals
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_result: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl FormulaVerdict {
    fn success(value: f64) -> Self {
        let rounded = round_display(value);
        FormulaVerdict {
            valid: true,
            sample_result: Some(rounded),
            message: Some(format!("Formula is valid. Sample result: {}", rounded)),
            error: None,
            error_kind: None,
        }
    }

    fn failure(kind: &str, error: String) -> Self {
        FormulaVerdict {
            valid: false,
            sample_result: None,
            message: None,
            error: Some(error),
            error_kind: Some(kind.to_string()),
        }
    }
}

impl From<FormulaError> for FormulaVerdict {
    fn from(err: FormulaError) -> Self {
        FormulaVerdict::failure(err.kind(), err.to_string())
    }
}

/// Validate `formula` with `coefficients` and the active `variables`
pub fn validate_formula(
    formula: &str,
    coefficients: &BTreeMap<String, f64>,
    variables: &[TreeVariable],
    sample: Biometrics,
) -> FormulaVerdict {
    let ctx = sample_context(sample, coefficients, variables);
    let outcome = Formula::parse(formula).and_then(|f| f.evaluate(&ctx));

    match outcome {
        Ok(value) => {
            tracing::debug!("Formula {:?} valid, sample result {}", formula, value);
            FormulaVerdict::success(value)
        }
        Err(err) => {
            tracing::debug!("Formula {:?} rejected: {}", formula, err);
            err.into()
        }
    }
}

/// Coefficient mapping as posted by the editor.
///
/// Accepts a JSON object or a string holding one (the editor posts the
/// mapping as serialized text). Empty string or `null` is an empty mapping.
pub fn parse_coefficients(raw: &Value) -> Result<BTreeMap<String, f64>, String> {
    let parsed;
    let object = match raw {
        Value::Null => return Ok(BTreeMap::new()),
        Value::String(text) if text.trim().is_empty() => return Ok(BTreeMap::new()),
        Value::String(text) => {
            parsed = serde_json::from_str::<Value>(text)
                .map_err(|e| format!("coefficients are not valid JSON: {}", e))?;
            match &parsed {
                Value::Object(map) => map,
                _ => return Err("coefficients must be a JSON object".to_string()),
            }
        }
        Value::Object(map) => map,
        _ => return Err("coefficients must be a JSON object".to_string()),
    };

    let mut coefficients = BTreeMap::new();
    for (name, value) in object {
        let number = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("coefficient `{}` is not a number", name))?;
        coefficients.insert(name.clone(), number);
    }
    Ok(coefficients)
}
