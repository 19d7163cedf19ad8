use crate::core::resolution::ResolutionSampleSet;
use crate::core::sqw::ScatteringFunction;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConvolutionError {
    #[error("Model returned a non-finite value {value} at resolution sample {sample}")]
    NonFinite { sample: usize, value: f64 },
    #[error("Resolution weights sum to {0}")]
    InvalidWeights(f64),
}

/// Resolution-weighted average of the model over a sample set.
pub fn convolve(
    model: &mut dyn ScatteringFunction,
    set: &ResolutionSampleSet,
) -> Result<f64, ConvolutionError> {
    let mut weighted = 0.0;
    let mut total = 0.0;
    for (i, s) in set.iter().enumerate() {
        let p = &s.point;
        let value = model.evaluate(p.h, p.k, p.l, p.e);
        if !value.is_finite() {
            return Err(ConvolutionError::NonFinite { sample: i, value });
        }
        weighted += s.weight * value;
        total += s.weight;
    }
    if !(total.is_finite() && total > 0.0) {
        return Err(ConvolutionError::InvalidWeights(total));
    }
    Ok(weighted / total)
}

/// Predicted intensity `scale · ⟨S⟩ + offset` for one scan point.
pub fn predict(
    model: &mut dyn ScatteringFunction,
    set: &ResolutionSampleSet,
    scale: f64,
    offset: f64,
) -> Result<f64, ConvolutionError> {
    let value = scale * convolve(model, set)? + offset;
    if !value.is_finite() {
        return Err(ConvolutionError::NonFinite {
            sample: set.len(),
            value,
        });
    }
    Ok(value)
}
