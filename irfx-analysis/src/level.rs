//! Level conversions between linear gain and decibels

/// Floor used for meters and dB conversions (-100 dBFS)
pub const MINIMUM_DB_LEVEL: f32 = -100.0;

/// Linear equivalent of [`MINIMUM_DB_LEVEL`]
pub const MINIMUM_LINEAR_LEVEL: f32 = 1e-5;

/// Convert a 20*log10 decibel value to a linear gain factor
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

/// Convert a linear gain factor to decibels, clamped at [`MINIMUM_DB_LEVEL`]
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= MINIMUM_LINEAR_LEVEL {
        MINIMUM_DB_LEVEL
    } else {
        20.0 * linear.log10()
    }
}

/// Largest absolute sample value in a buffer
#[inline]
pub fn peak_abs(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
}
