//! Allometric Biomass Estimate
//!
//! Fixed, non-configurable estimator feeding the `biomassa` binding:
//!
//! ```text
//! biomassa = exp(-0.906586 + 1.60421 * ln(dap) + 0.37162 * ln(altura)) / 1000
//! ```
//!
//! Computed with plain `libm` calls, never through the user formula path.

const INTERCEPT: f64 = -0.906586;
const DAP_EXPONENT: f64 = 1.60421;
const HEIGHT_EXPONENT: f64 = 0.37162;
const KG_PER_TONNE: f64 = 1000.0;

/// Biomass estimate for the given diameter and height.
///
/// Returns `None` when the inputs are outside the estimator's domain
/// (non-positive or non-finite), so the binding is present but null.
pub fn estimate_biomass(dap: f64, altura: f64) -> Option<f64> {
    if !(dap.is_finite() && altura.is_finite()) || dap <= 0.0 || altura <= 0.0 {
        return None;
    }
    let ln_biomass = INTERCEPT + DAP_EXPONENT * libm::log(dap) + HEIGHT_EXPONENT * libm::log(altura);
    let value = libm::exp(ln_biomass) / KG_PER_TONNE;
    value.is_finite().then_some(value)
}
