use super::point::ScanPoint;
use super::sample::{Sample, ScatteringPlane};
use crate::core::units;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScanError {
    #[error("A scan must contain at least one point")]
    Empty,
    #[error("Column '{column}' has {actual} entries but the scan has {expected} points")]
    LengthMismatch {
        column: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Interpolation needs at least two points along the path, got {0}")]
    DegenerateInterpolation(usize),
    #[error("Interpolation index {index} is out of range for {count} points")]
    InterpolationIndex { index: usize, count: usize },
    #[error("No scan point has a positive monitor value")]
    NoMonitor,
}

/// Provenance of a loaded scan, kept for diagnostics and reports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanMetadata {
    pub source: Option<PathBuf>,
    pub title: Option<String>,
    pub counts_column: String,
    pub monitor_column: String,
}

/// One measured scan: a sample, the nominal trajectory and the recorded
/// counts and monitor values with their Poisson errors.
#[derive(Debug, Clone)]
pub struct Scan {
    sample: Sample,
    plane: ScatteringPlane,
    points: Vec<ScanPoint>,
    counts: Vec<f64>,
    counts_err: Vec<f64>,
    monitor: Vec<f64>,
    monitor_err: Vec<f64>,
    metadata: ScanMetadata,
}

impl Scan {
    /// Assembles a scan from raw columns. Errors are derived as the square
    /// root of each raw value.
    pub fn new(
        sample: Sample,
        plane: ScatteringPlane,
        points: Vec<ScanPoint>,
        counts: Vec<f64>,
        monitor: Vec<f64>,
        metadata: ScanMetadata,
    ) -> Result<Self, ScanError> {
        if points.is_empty() {
            return Err(ScanError::Empty);
        }
        for (column, values) in [("counts", &counts), ("monitor", &monitor)] {
            if values.len() != points.len() {
                return Err(ScanError::LengthMismatch {
                    column,
                    expected: points.len(),
                    actual: values.len(),
                });
            }
        }

        let poisson = |values: &[f64]| values.iter().map(|&v| v.max(0.0).sqrt()).collect();
        let counts_err = poisson(&counts);
        let monitor_err = poisson(&monitor);

        Ok(Self {
            sample,
            plane,
            points,
            counts,
            counts_err,
            monitor,
            monitor_err,
            metadata,
        })
    }

    /// Records the file the scan was read from.
    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.metadata.source = Some(source.into());
        self
    }

    pub fn sample(&self) -> &Sample {
        &self.sample
    }

    pub fn plane(&self) -> &ScatteringPlane {
        &self.plane
    }

    pub fn points(&self) -> &[ScanPoint] {
        &self.points
    }

    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    pub fn counts_err(&self) -> &[f64] {
        &self.counts_err
    }

    pub fn monitor(&self) -> &[f64] {
        &self.monitor
    }

    pub fn monitor_err(&self) -> &[f64] {
        &self.monitor_err
    }

    pub fn metadata(&self) -> &ScanMetadata {
        &self.metadata
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Measured values and their errors, optionally normalized to monitor.
    ///
    /// Normalized values are `counts / monitor` with relative errors added in
    /// quadrature. A point without monitor counts was not measured and yields
    /// NaN for both; a zero count propagates a zero error that the fit engine
    /// replaces with its error floor.
    pub fn measured(&self, normalize_to_monitor: bool) -> (Vec<f64>, Vec<f64>) {
        if !normalize_to_monitor {
            return (self.counts.clone(), self.counts_err.clone());
        }
        self.counts
            .iter()
            .zip(&self.counts_err)
            .zip(self.monitor.iter().zip(&self.monitor_err))
            .map(|((&c, &dc), (&m, &dm))| {
                if m.is_nan() || m <= 0.0 {
                    return (f64::NAN, f64::NAN);
                }
                let y = c / m;
                let rel_c = if c > 0.0 { dc / c } else { 0.0 };
                let rel_m = dm / m;
                (y, y.abs() * (rel_c * rel_c + rel_m * rel_m).sqrt())
            })
            .unzip()
    }

    /// Reconstructs the `index`-th of `count` evenly spaced points on the
    /// straight path from the first to the last measured point.
    ///
    /// `h, k, l, E, Ei, Ef` are interpolated linearly; `ki` and `kf` are
    /// re-derived from the interpolated energies.
    pub fn interp_point(&self, index: usize, count: usize) -> Result<ScanPoint, ScanError> {
        if count < 2 {
            return Err(ScanError::DegenerateInterpolation(count));
        }
        if index >= count {
            return Err(ScanError::InterpolationIndex { index, count });
        }

        let first = &self.points[0];
        let last = &self.points[self.points.len() - 1];
        let t = index as f64 / (count - 1) as f64;
        let lerp = |a: f64, b: f64| a + (b - a) * t;

        let ei = lerp(first.ei, last.ei);
        let ef = lerp(first.ef, last.ef);
        Ok(ScanPoint {
            h: lerp(first.h, last.h),
            k: lerp(first.k, last.k),
            l: lerp(first.l, last.l),
            ki: (ei.max(0.0) / units::KSQ2E).sqrt(),
            kf: (ef.max(0.0) / units::KSQ2E).sqrt(),
            ei,
            ef,
            e: lerp(first.e, last.e),
        })
    }

    /// Evenly spaced points along the nominal path.
    pub fn interpolated_path(&self, count: usize) -> Result<Vec<ScanPoint>, ScanError> {
        (0..count).map(|i| self.interp_point(i, count)).collect()
    }
}
