//! # tasfit Core Library
//!
//! Resolution-convolution fitting of triple-axis neutron scattering scans:
//! a scattering-function model `S(Q, ω)` is averaged over the instrument
//! resolution at every scan point and its parameters are adjusted to the
//! measured counts.
//!
//! ## Architectural Philosophy
//!
//! The library is split into three layers.
//!
//! - **[`core`]: The Foundation.** Stateless data models (`Scan`,
//!   `ScanPoint`, `ParameterSet`), neutron kinematics, the instrument
//!   resolution, file I/O and the [`ScatteringFunction`](core::sqw::ScatteringFunction)
//!   plugin contract with its loader.
//!
//! - **[`engine`]: The Logic Core.** The stateful fitting machinery: the
//!   resolution cache, convolution, derivative-free minimizers, error
//!   estimation and the fit state machine.
//!
//! - **[`workflows`]: The Public API.** End-to-end `fit` and `simulate`
//!   procedures that load the inputs, run the engine and write the results.

pub mod core;
pub mod engine;
pub mod workflows;
