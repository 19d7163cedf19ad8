//! # Instrument Resolution
//!
//! Describes the finite resolution of a triple-axis spectrometer as a
//! Gaussian covariance in the local frame `(Q∥, Q⊥, Qz, E)` around a nominal
//! scan point, and turns it into weighted sets of sample points.
//!
//! - [`cooper_nathans`] - covariance from the instrument geometry
//! - [`sampler`] - deterministic quadrature and seeded Monte-Carlo sample sets

pub mod cooper_nathans;
pub mod sampler;

pub use sampler::{ResolutionSample, ResolutionSampleSet, ResolutionSampler};

use crate::core::models::sample::LatticeError;
use crate::core::units::UnitError;
use thiserror::Error;

/// Focusing flags. A focused axis has its collimation opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Focusing {
    pub mono_h: bool,
    pub mono_v: bool,
    pub ana_h: bool,
    pub ana_v: bool,
}

/// Standard deviations of a fixed-width resolution ellipsoid, in Å⁻¹ and meV.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedWidths {
    pub q_par: f64,
    pub q_perp: f64,
    pub q_z: f64,
    pub e: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionAlgorithm {
    CooperNathans,
    Fixed(FixedWidths),
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingStrategy {
    /// Gauss–Hermite product grid with `order` nodes per axis.
    Quadrature { order: usize },
    /// `samples` Gaussian draws; the generator for point `i` is seeded with
    /// `seed + i`.
    MonteCarlo { samples: usize, seed: u64 },
}

impl Default for SamplingStrategy {
    fn default() -> Self {
        SamplingStrategy::Quadrature { order: 3 }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("Kinematics error: {0}")]
    Kinematics(#[from] UnitError),
    #[error("Sample geometry error: {0}")]
    Lattice(#[from] LatticeError),
    #[error("Quadrature order {0} is not supported (expected 1 to 5)")]
    UnsupportedOrder(usize),
    #[error("Monte-Carlo sampling needs at least one sample")]
    NoSamples,
    #[error("Cooper-Nathans resolution needs an instrument description")]
    MissingInstrument,
    #[error("Resolution covariance could not be computed: {0}")]
    Singular(String),
}
