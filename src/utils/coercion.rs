//! Write-time typed parsing of variable defaults
//!
//! Form input arrives as text. It is parsed once, against the variable's
//! declared type, before anything is stored; readers never re-coerce.

use thiserror::Error;

use crate::data::{DataType, VariableValue};

#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot read `{raw}` as {data_type:?}: {reason}")]
pub struct TypeCoercionError {
    pub data_type: DataType,
    pub raw: String,
    pub reason: String,
}

impl TypeCoercionError {
    pub(crate) fn new(data_type: DataType, raw: &str, reason: impl Into<String>) -> Self {
        TypeCoercionError {
            data_type,
            raw: raw.to_string(),
            reason: reason.into(),
        }
    }
}

/// Parse `raw` into a value of `data_type`.
///
/// - empty input → `Ok(None)` (no default)
/// - FLOAT → finite `f64`
/// - INTEGER → parsed as a float, then truncated toward zero (`"3.7"` → 3)
/// - TEXT → stored verbatim
pub fn parse_typed(data_type: DataType, raw: &str) -> Result<Option<VariableValue>, TypeCoercionError> {
    if raw.is_empty() {
        return Ok(None);
    }

    match data_type {
        DataType::Text => Ok(Some(VariableValue::Text(raw.to_string()))),
        DataType::Float => parse_finite(data_type, raw).map(|v| Some(VariableValue::Float(v))),
        DataType::Integer => {
            let value = parse_finite(data_type, raw)?.trunc();
            if value < i64::MIN as f64 || value > i64::MAX as f64 {
                return Err(TypeCoercionError::new(data_type, raw, "out of integer range"));
            }
            Ok(Some(VariableValue::Integer(value as i64)))
        }
    }
}

fn parse_finite(data_type: DataType, raw: &str) -> Result<f64, TypeCoercionError> {
    let trimmed = raw.trim();
    // Accept a decimal comma as typed in pt-BR forms ("2,5")
    let normalized = if trimmed.contains(',') && !trimmed.contains('.') {
        trimmed.replace(',', ".")
    } else {
        trimmed.to_string()
    };
    let value: f64 = normalized
        .parse()
        .map_err(|_| TypeCoercionError::new(data_type, raw, "not a number"))?;
    if !value.is_finite() {
        return Err(TypeCoercionError::new(data_type, raw, "not a finite number"));
    }
    Ok(value)
}
