//! Cooper–Nathans resolution covariance.
//!
//! The eight angular deviations (horizontal and vertical divergences of the
//! four collimators) are constrained by the Bragg conditions at the
//! monochromator and analyser (mosaic widths) and projected onto the
//! scattering coordinates `(Q∥, Q⊥, Qz, E)`:
//!
//! `Σ = B · A · (G + Cᵀ F C)⁻¹ · Aᵀ · Bᵀ`
//!
//! with `G` the collimation precisions, `F` the mosaic precisions, `C` the
//! Bragg constraints, `A` the map onto the incident and final wavevector
//! deviations and `B` the map onto the scattering frame. The sample mosaic is
//! added to the transverse and vertical momentum variances afterwards.

use super::{Focusing, ResolutionError};
use crate::core::io::instrument::Instrument;
use crate::core::models::point::ScanPoint;
use crate::core::units::{self, KSQ2E};
use nalgebra::{Matrix4, SMatrix};

/// Collimation used for a focused axis, in arcminutes.
pub const OPEN_COLLIMATION_ARCMIN: f64 = 10_000.0;

/// Mosaic width below which a crystal is treated as this sharp, in radians.
const MIN_MOSAIC_SIGMA: f64 = 1e-6;

fn mosaic_precision(arcmin: f64) -> f64 {
    let sigma = units::arcmin_fwhm_to_sigma(arcmin).max(MIN_MOSAIC_SIGMA);
    1.0 / (sigma * sigma)
}

/// Covariance of the resolution ellipsoid at `point`, with `q` the length of
/// the momentum transfer in Å⁻¹.
pub fn covariance(
    instrument: &Instrument,
    focusing: &Focusing,
    point: &ScanPoint,
    q: f64,
) -> Result<Matrix4<f64>, ResolutionError> {
    let (ki, kf) = (point.ki, point.kf);
    let mono = &instrument.monochromator;
    let ana = &instrument.analyser;

    let theta_m = f64::from(mono.sense) * units::bragg_angle(mono.d_spacing, ki)?;
    let theta_a = f64::from(ana.sense) * units::bragg_angle(ana.d_spacing, kf)?;
    let two_theta_s = f64::from(instrument.sample.sense) * units::scattering_angle(ki, kf, q)?;
    let phi = (-kf * two_theta_s.sin()).atan2(ki - kf * two_theta_s.cos());

    let mut horizontal = instrument.collimation.horizontal;
    let mut vertical = instrument.collimation.vertical;
    if focusing.mono_h {
        horizontal[1] = OPEN_COLLIMATION_ARCMIN;
    }
    if focusing.mono_v {
        vertical[1] = OPEN_COLLIMATION_ARCMIN;
    }
    if focusing.ana_h {
        horizontal[2] = OPEN_COLLIMATION_ARCMIN;
    }
    if focusing.ana_v {
        vertical[2] = OPEN_COLLIMATION_ARCMIN;
    }

    let divergences = [
        horizontal[0],
        horizontal[1],
        vertical[0],
        vertical[1],
        horizontal[2],
        horizontal[3],
        vertical[2],
        vertical[3],
    ];
    let mut g = SMatrix::<f64, 8, 8>::zeros();
    for (i, &arcmin) in divergences.iter().enumerate() {
        let sigma = units::arcmin_fwhm_to_sigma(arcmin);
        g[(i, i)] = 1.0 / (sigma * sigma);
    }

    let f = Matrix4::from_diagonal(&nalgebra::Vector4::new(
        mosaic_precision(mono.mosaic),
        mosaic_precision(mono.vertical_mosaic()),
        mosaic_precision(ana.mosaic),
        mosaic_precision(ana.vertical_mosaic()),
    ));

    let mut c = SMatrix::<f64, 4, 8>::zeros();
    c[(0, 0)] = 0.5;
    c[(0, 1)] = 0.5;
    c[(2, 4)] = 0.5;
    c[(2, 5)] = 0.5;
    c[(1, 2)] = 0.5 / theta_m.sin();
    c[(1, 3)] = -c[(1, 2)];
    c[(3, 6)] = 0.5 / theta_a.sin();
    c[(3, 7)] = -c[(3, 6)];

    let mut a = SMatrix::<f64, 6, 8>::zeros();
    a[(0, 0)] = 0.5 * ki / theta_m.tan();
    a[(0, 1)] = -a[(0, 0)];
    a[(1, 1)] = ki;
    a[(2, 3)] = ki;
    a[(3, 4)] = 0.5 * kf / theta_a.tan();
    a[(3, 5)] = -a[(3, 4)];
    a[(4, 4)] = kf;
    a[(5, 7)] = kf;

    let mut b = SMatrix::<f64, 4, 6>::zeros();
    let rotated = phi - two_theta_s;
    b[(0, 0)] = phi.cos();
    b[(0, 1)] = phi.sin();
    b[(0, 3)] = -rotated.cos();
    b[(0, 4)] = -rotated.sin();
    b[(1, 0)] = -b[(0, 1)];
    b[(1, 1)] = b[(0, 0)];
    b[(1, 3)] = -b[(0, 4)];
    b[(1, 4)] = b[(0, 3)];
    b[(2, 2)] = 1.0;
    b[(2, 5)] = -1.0;
    b[(3, 0)] = 2.0 * KSQ2E * ki;
    b[(3, 3)] = -2.0 * KSQ2E * kf;

    let h = g + c.transpose() * f * c;
    let h_inv = h.try_inverse().ok_or_else(|| {
        ResolutionError::Singular("angular precision matrix is not invertible".to_string())
    })?;
    let ba = b * a;
    let mut sigma = ba * h_inv * ba.transpose();

    let eta_s = units::arcmin_fwhm_to_sigma(instrument.sample.mosaic);
    let eta_s_v = units::arcmin_fwhm_to_sigma(instrument.sample.vertical_mosaic());
    sigma[(1, 1)] += q * q * eta_s * eta_s;
    sigma[(2, 2)] += q * q * eta_s_v * eta_s_v;

    if sigma.iter().any(|v| !v.is_finite()) {
        return Err(ResolutionError::Singular(format!(
            "non-finite covariance at ki={ki}, kf={kf}, Q={q}"
        )));
    }
    Ok(0.5 * (sigma + sigma.transpose()))
}
