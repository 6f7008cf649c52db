//! Utility modules shared by the service layer
//!
//! - Biomass: the fixed allometric estimator
//! - Coercion: typed parsing of variable defaults at write time
//! - Precision: display rounding

pub mod biomass;
pub mod coercion;
pub mod precision;

// Re-export commonly used items
pub use biomass::estimate_biomass;
pub use coercion::{parse_typed, TypeCoercionError};
pub use precision::{round_display, round_to, DISPLAY_DECIMALS};
