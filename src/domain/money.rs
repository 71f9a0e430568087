//! Fixed-scale money rounding.
//!
//! Average price, commission, and PnL aggregates are recomputed from scratch
//! whenever a sibling order's fill state changes. Half-even rounding at a
//! fixed scale keeps those recomputations stable instead of oscillating.

/// Scale used for all money aggregates.
pub const MONEY_SCALE: u32 = 5;

/// Round `value` to `scale` decimal digits using half-even (banker's) rounding.
pub fn round_half_even(value: f64, scale: u32) -> f64 {
    let factor = 10f64.powi(scale as i32);
    let scaled = value * factor;
    let floor = scaled.floor();
    let diff = scaled - floor;

    // Exact .5 midpoints go to the even neighbor; everything else rounds
    // to nearest as usual. The epsilon absorbs binary representation noise.
    let rounded = if (diff - 0.5).abs() < 1e-9 {
        if (floor as i64) % 2 == 0 {
            floor
        } else {
            floor + 1.0
        }
    } else {
        scaled.round()
    };
    rounded / factor
}

/// Round to the standard 5-digit money scale.
pub fn round5(value: f64) -> f64 {
    round_half_even(value, MONEY_SCALE)
}
