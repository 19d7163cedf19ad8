//! Job configuration: the TOML job file, command-line overrides and
//! built-in defaults merged into the core's config structs.
//!
//! Precedence is command-line flag, then `-S key=value`, then the job file,
//! then [`defaults::DefaultsConfig`]. Relative paths in the job file are
//! resolved against the directory holding it.

mod builder;
mod defaults;
mod file;
mod models;

pub use builder::{build_fit_job, build_simulate_job};
pub use models::{FitJob, SimulateJob};
