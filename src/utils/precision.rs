//! Display rounding

/// Fractional digits shown in validation feedback
pub const DISPLAY_DECIMALS: i32 = 4;

/// Round half away from zero to `decimals` fractional digits
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    let scaled = value * factor;
    if !scaled.is_finite() {
        return value;
    }
    scaled.round() / factor
}

pub fn round_display(value: f64) -> f64 {
    round_to(value, DISPLAY_DECIMALS)
}
