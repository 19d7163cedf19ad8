//! # Engine Module
//!
//! The stateful fitting machinery: everything that runs between loading a
//! scan and writing the final parameters.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - fit and simulation settings with builders
//! - **Error Handling** ([`error`]) - the aggregated [`error::EngineError`]
//! - **Progress Monitoring** ([`progress`]) - phase, task and iteration events
//! - **Resolution Cache** ([`cache`]) - per-point sample sets, computed once
//! - **Convolution** ([`convolution`]) - resolution-weighted model prediction
//! - **Minimizers** ([`minimizer`]) - derivative-free ask/tell optimizers
//! - **Covariance** ([`covariance`]) - parameter errors from the χ² curvature
//! - **Fit Loop** ([`fit`]) - the state machine tying the above together
//!
//! Scan points are predicted in parallel when the `parallel` feature is on;
//! each worker evaluates its own copy of the model.

pub mod cache;
pub mod config;
pub mod convolution;
pub mod covariance;
pub mod error;
pub mod fit;
pub mod minimizer;
pub mod progress;
