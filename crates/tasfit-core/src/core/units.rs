//! Neutron kinematics and unit conversions.
//!
//! Wavevectors are in Å⁻¹, energies in meV, angles in radians unless a
//! function name says otherwise. All functions are pure.

use std::f64::consts::PI;
use thiserror::Error;

/// ħ²/(2mₙ) in meV·Å², so that `E = KSQ2E · k²`.
pub const KSQ2E: f64 = 2.072_124_6;

/// Boltzmann constant in meV/K.
pub const KB_MEV_PER_K: f64 = 0.086_173_33;

/// Converts a Gaussian FWHM into its standard deviation.
pub const FWHM_TO_SIGMA: f64 = 0.424_660_900_144_009_5;

const MIN_BOSE_ENERGY: f64 = 1e-6;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum UnitError {
    #[error("Negative energy {0} meV has no real wavevector")]
    NegativeEnergy(f64),
    #[error("Wavelength must be positive, got {0} Å")]
    NonPositiveWavelength(f64),
    #[error("Scattering triangle does not close for ki={ki}, kf={kf}, Q={q}")]
    OpenScatteringTriangle { ki: f64, kf: f64, q: f64 },
    #[error("No Bragg reflection for d={d} Å at k={k} Å⁻¹")]
    NoBraggReflection { d: f64, k: f64 },
}

#[inline]
pub fn k2e(k: f64) -> f64 {
    KSQ2E * k * k
}

pub fn e2k(e: f64) -> Result<f64, UnitError> {
    if e < 0.0 {
        return Err(UnitError::NegativeEnergy(e));
    }
    Ok((e / KSQ2E).sqrt())
}

pub fn lambda2k(lambda: f64) -> Result<f64, UnitError> {
    if lambda <= 0.0 {
        return Err(UnitError::NonPositiveWavelength(lambda));
    }
    Ok(2.0 * PI / lambda)
}

pub fn k2lambda(k: f64) -> f64 {
    2.0 * PI / k
}

/// Energy transfer `E = Ei − Ef` for the given wavevectors.
#[inline]
pub fn energy_transfer(ki: f64, kf: f64) -> f64 {
    k2e(ki) - k2e(kf)
}

/// Unsigned scattering angle 2θ between `ki` and `kf` for momentum transfer `q`.
pub fn scattering_angle(ki: f64, kf: f64, q: f64) -> Result<f64, UnitError> {
    let cos_2theta = (ki * ki + kf * kf - q * q) / (2.0 * ki * kf);
    if !cos_2theta.is_finite() || cos_2theta.abs() > 1.0 {
        return Err(UnitError::OpenScatteringTriangle { ki, kf, q });
    }
    Ok(cos_2theta.acos())
}

/// Bragg angle θ of a crystal with d-spacing `d` (Å) for wavevector `k`.
pub fn bragg_angle(d: f64, k: f64) -> Result<f64, UnitError> {
    let sin_theta = PI / (d * k);
    if !sin_theta.is_finite() || sin_theta.abs() > 1.0 {
        return Err(UnitError::NoBraggReflection { d, k });
    }
    Ok(sin_theta.asin())
}

/// Detailed-balance population factor: `n(E) + 1` for energy loss (E > 0)
/// and `n(|E|)` for energy gain (E < 0).
///
/// Near `E = 0` the energy is clamped to a small magnitude to keep the factor
/// finite. A non-positive temperature yields the zero-temperature limit.
pub fn bose_factor(e: f64, temperature: f64) -> f64 {
    if temperature <= 0.0 {
        return if e >= 0.0 { 1.0 } else { 0.0 };
    }
    let e = if e.abs() < MIN_BOSE_ENERGY {
        MIN_BOSE_ENERGY.copysign(if e == 0.0 { 1.0 } else { e })
    } else {
        e
    };
    let n = 1.0 / ((e.abs() / (KB_MEV_PER_K * temperature)).exp() - 1.0);
    if e >= 0.0 { n + 1.0 } else { n }
}

/// Converts a collimation or mosaic FWHM in arcminutes into a Gaussian
/// standard deviation in radians.
#[inline]
pub fn arcmin_fwhm_to_sigma(arcmin: f64) -> f64 {
    (arcmin / 60.0).to_radians() * FWHM_TO_SIGMA
}
