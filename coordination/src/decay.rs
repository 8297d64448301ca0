//! Pure numeric decay functions for task intensity and status inhibition.

use thiserror::Error;

/// A decay function applied to task intensity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayType {
    Exponential,
    Linear,
}

#[derive(Debug, Error, PartialEq)]
pub enum DecayError {
    #[error("decay rate must be non-negative, got {0}")]
    NegativeRate(f64),
}

fn clamp_unit(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

/// Decay a task's intensity by one step.
///
/// `exponential` multiplies by `e^(-rate)`; `linear` subtracts `rate`
/// directly. Both clamp the result to `[0, 1]`. A negative rate is
/// rejected outright rather than silently inverted into growth.
pub fn decay_intensity(value: f64, decay_type: DecayType, rate: f64) -> Result<f64, DecayError> {
    if rate < 0.0 {
        return Err(DecayError::NegativeRate(rate));
    }
    let decayed = match decay_type {
        DecayType::Exponential => value * (-rate).exp(),
        DecayType::Linear => value - rate,
    };
    Ok(clamp_unit(decayed))
}

/// Decay a status entry's inhibition by one step. Always exponential.
pub fn decay_inhibition(value: f64, rate: f64) -> Result<f64, DecayError> {
    if rate < 0.0 {
        return Err(DecayError::NegativeRate(rate));
    }
    Ok(clamp_unit(value * (-rate).exp()))
}
