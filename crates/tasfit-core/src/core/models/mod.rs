//! # Core Models Module
//!
//! Data structures describing a measured triple-axis scan and the parameters
//! of the models fitted against it.
//!
//! ## Key Components
//!
//! - [`point`] - A nominal scan point in reciprocal space and energy, with consistent kinematics
//! - [`sample`] - Crystal lattice, reciprocal-lattice B matrix and the scattering plane
//! - [`scan`] - The measured trajectory with counts, monitor, errors and path interpolation
//! - [`params`] - Tagged parameter values and the ordered fit parameter set
//!
//! ## Usage
//!
//! ```ignore
//! use tasfit::core::models::scan::Scan;
//!
//! let scan: Scan = reader.read_from_path(path)?;
//! let midpoint = scan.interp_point(64, 129)?;
//! ```

pub mod params;
pub mod point;
pub mod sample;
pub mod scan;
