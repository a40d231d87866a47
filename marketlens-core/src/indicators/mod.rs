//! Indicator math over closing-price series.
//!
//! Every indicator maps a series to an output series of the same length; the
//! first `lookback()` values are `NaN` (warmup). A `NaN` input poisons every
//! window that contains it.

pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;

pub use bollinger::{Bollinger, BollingerBand};
pub use ema::{ema_of_series, Ema};
pub use macd::{Macd, MacdLine};
pub use rsi::Rsi;
pub use sma::Sma;

/// A pure function from series to series.
pub trait Indicator: Send + Sync {
    /// e.g. `sma_20`, `rsi_14`.
    fn name(&self) -> &str;

    /// Number of leading values that are warmup.
    fn lookback(&self) -> usize;

    fn compute(&self, series: &[f64]) -> Vec<f64>;
}

/// Last finite value of a computed series.
pub fn last_valid(series: &[f64]) -> Option<f64> {
    series.last().copied().filter(|v| v.is_finite())
}

/// Assert two f64 values are approximately equal (within epsilon).
#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;
