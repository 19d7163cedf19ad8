//! Provides input/output for measured scans, instrument descriptions and
//! fit results.
//!
//! Scans are read through the [`traits::ScanReader`] trait so that other
//! file formats can be plugged in; a plain-text reader ships with the crate.
//! Results are written as CSV curves and logs plus a TOML parameter report.

pub mod instrument;
pub mod report;
pub mod scan_file;
pub mod traits;
