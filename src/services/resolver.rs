//! Variable Resolver
//!
//! Effective value of a custom variable for one tree:
//! species override (when present and non-null) → general default → null.
//! Inactive variables are not resolved at all.

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::data::{TreeVariable, VariableId, VariableValue};

/// Overrides stored for a single species, keyed by variable id
pub type SpeciesDefaults = FxHashMap<VariableId, Option<VariableValue>>;

/// Where a resolved value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    SpeciesOverride,
    GeneralDefault,
    Unset,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolved<'a> {
    pub value: Option<&'a VariableValue>,
    pub source: ValueSource,
}

impl<'a> Resolved<'a> {
    /// Numeric view used by the formula context
    pub fn as_number(&self) -> Option<f64> {
        self.value.and_then(VariableValue::as_number)
    }
}

/// Resolve `variable` against one species' overrides.
///
/// Returns `None` for inactive variables: they are excluded from the
/// context rather than bound to null.
pub fn resolve_variable<'a>(
    variable: &'a TreeVariable,
    species_defaults: &'a SpeciesDefaults,
) -> Option<Resolved<'a>> {
    if !variable.active {
        return None;
    }

    if let Some(Some(value)) = species_defaults.get(&variable.id) {
        return Some(Resolved {
            value: Some(value),
            source: ValueSource::SpeciesOverride,
        });
    }

    Some(match &variable.default_value {
        Some(value) => Resolved {
            value: Some(value),
            source: ValueSource::GeneralDefault,
        },
        None => Resolved {
            value: None,
            source: ValueSource::Unset,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataType;

    fn variable(default_value: Option<VariableValue>, active: bool) -> TreeVariable {
        TreeVariable {
            id: 7,
            name: "Densidade da madeira".into(),
            code: "densidade".into(),
            data_type: DataType::Float,
            unit: "g/cm3".into(),
            description: String::new(),
            default_value,
            active,
        }
    }

    #[test]
    fn test_species_override_wins() {
        let var = variable(Some(VariableValue::Float(0.6)), true);
        let mut overrides = SpeciesDefaults::default();
        overrides.insert(7, Some(VariableValue::Float(0.9)));

        let resolved = resolve_variable(&var, &overrides).unwrap();
        assert_eq!(resolved.as_number(), Some(0.9));
        assert_eq!(resolved.source, ValueSource::SpeciesOverride);
    }

    #[test]
    fn test_general_default_for_other_species() {
        let var = variable(Some(VariableValue::Float(0.6)), true);
        let mut other_species = SpeciesDefaults::default();
        other_species.insert(99, Some(VariableValue::Float(0.9)));

        let resolved = resolve_variable(&var, &other_species).unwrap();
        assert_eq!(resolved.as_number(), Some(0.6));
        assert_eq!(resolved.source, ValueSource::GeneralDefault);
    }

    #[test]
    fn test_null_override_falls_through() {
        let var = variable(Some(VariableValue::Float(0.6)), true);
        let mut overrides = SpeciesDefaults::default();
        overrides.insert(7, None);

        let resolved = resolve_variable(&var, &overrides).unwrap();
        assert_eq!(resolved.as_number(), Some(0.6));
    }

    #[test]
    fn test_unset() {
        let var = variable(None, true);
        let defaults = SpeciesDefaults::default();
        let resolved = resolve_variable(&var, &defaults).unwrap();
        assert_eq!(resolved.value, None);
        assert_eq!(resolved.source, ValueSource::Unset);
    }

    #[test]
    fn test_inactive_excluded() {
        let var = variable(Some(VariableValue::Float(0.6)), false);
        assert!(resolve_variable(&var, &SpeciesDefaults::default()).is_none());
    }
}
