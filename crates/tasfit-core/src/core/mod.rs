//! # Core Module
//!
//! Stateless building blocks of the resolution-convolution fitter: the
//! measured data model, neutron kinematics, the instrument resolution, the
//! scattering-function model contract and file I/O.
//!
//! ## Architecture
//!
//! - **Data Model** ([`models`]) - Scan points, sample geometry, measured scans and fit parameters
//! - **Kinematics** ([`units`]) - Wavevector, energy and angle conversions, Bose factor
//! - **Resolution** ([`resolution`]) - Cooper–Nathans covariance and weighted resolution samples
//! - **Models** ([`sqw`]) - The scattering-function contract, built-in models and the loader
//! - **File I/O** ([`io`]) - Scan and instrument readers, curve, log and report writers
//!
//! Nothing in this layer holds mutable state across calls; the fitting loop
//! and its caches live in [`crate::engine`].

pub mod io;
pub mod models;
pub mod resolution;
pub mod sqw;
pub mod units;
