//! Coefficient/Context Builder
//!
//! Assembles the bindings a service formula is evaluated against. Write
//! order fixes precedence on name collisions: fixed names first, then the
//! service's coefficients, then active custom variables (later wins).

use std::collections::BTreeMap;

use crate::data::{Biometrics, TreeVariable};
use crate::formula::FormulaContext;
use crate::utils::estimate_biomass;

use super::resolver::{resolve_variable, SpeciesDefaults};

pub const DAP: &str = "dap";
pub const ALTURA: &str = "altura";
pub const BIOMASSA: &str = "biomassa";

/// Names bound in every context
pub const FIXED_NAMES: [&str; 3] = [DAP, ALTURA, BIOMASSA];

/// Value bound to numeric variables when validating a formula without a tree
pub const PLACEHOLDER_VALUE: f64 = 1.0;

fn fixed_context(biometrics: Biometrics) -> FormulaContext {
    let mut ctx = FormulaContext::new();
    ctx.insert(DAP, Some(biometrics.dap));
    ctx.insert(ALTURA, Some(biometrics.altura));
    ctx.insert(BIOMASSA, estimate_biomass(biometrics.dap, biometrics.altura));
    ctx
}

fn insert_coefficients(ctx: &mut FormulaContext, coefficients: &BTreeMap<String, f64>) {
    for (name, value) in coefficients {
        ctx.insert(name.as_str(), Some(*value));
    }
}

/// Context for a real tree: variables resolved through its species' overrides
pub fn tree_context(
    biometrics: Biometrics,
    coefficients: &BTreeMap<String, f64>,
    variables: &[TreeVariable],
    species_defaults: &SpeciesDefaults,
) -> FormulaContext {
    let mut ctx = fixed_context(biometrics);
    insert_coefficients(&mut ctx, coefficients);
    for variable in variables {
        if let Some(resolved) = resolve_variable(variable, species_defaults) {
            ctx.insert(variable.code.as_str(), resolved.as_number());
        }
    }
    ctx
}

/// Context for validating a formula in isolation: numeric variables get
/// [`PLACEHOLDER_VALUE`], text variables are bound to null
pub fn sample_context(
    biometrics: Biometrics,
    coefficients: &BTreeMap<String, f64>,
    variables: &[TreeVariable],
) -> FormulaContext {
    let mut ctx = fixed_context(biometrics);
    insert_coefficients(&mut ctx, coefficients);
    for variable in variables.iter().filter(|v| v.active) {
        let value = variable.data_type.is_numeric().then_some(PLACEHOLDER_VALUE);
        ctx.insert(variable.code.as_str(), value);
    }
    ctx
}

/// Every name a formula may reference, for write-time checks
pub fn known_names<'a>(
    coefficients: &'a BTreeMap<String, f64>,
    variables: &'a [TreeVariable],
) -> Vec<&'a str> {
    FIXED_NAMES
        .iter()
        .copied()
        .chain(coefficients.keys().map(|k| k.as_str()))
        .chain(variables.iter().filter(|v| v.active).map(|v| v.code.as_str()))
        .collect()
}
