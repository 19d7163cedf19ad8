//! # Workflows Module
//!
//! End-to-end entry points that load a scan, an instrument and a model,
//! build the resolution sample sets and then either fit the model to the
//! scan ([`fit`]) or just evaluate it ([`simulate`]).
//!
//! Both workflows report their phases through a
//! [`ProgressReporter`](crate::engine::progress::ProgressReporter) and write
//! the requested output artifacts before returning.

pub mod fit;
pub mod simulate;

use crate::core::io::instrument::Instrument;
use crate::core::io::report::{self, CurveRow};
use crate::core::io::scan_file::TextScanReader;
use crate::core::io::traits::ScanReader;
use crate::core::models::params::{ParamValue, ParameterSet};
use crate::core::models::point::ScanPoint;
use crate::core::models::scan::Scan;
use crate::core::sqw::ScatteringFunction;
use crate::core::sqw::loader::PluginLoader;
use crate::engine::cache::ResolutionCache;
use crate::engine::config::ResolutionConfig;
use crate::engine::convolution;
use crate::engine::error::EngineError;
use crate::engine::fit::{OFFSET_PARAMETER, SCALE_PARAMETER};
use crate::core::resolution::ResolutionSampler;
use std::path::{Path, PathBuf};
use tracing::info;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Where the inputs of a job come from.
#[derive(Debug, Clone)]
pub struct JobInputs {
    pub scan: PathBuf,
    pub reader: TextScanReader,
    /// Overrides the instrument held by the resolution configuration.
    pub instrument: Option<PathBuf>,
    pub model: String,
    pub model_config: Option<PathBuf>,
}

/// Output files to write; `None` skips the artifact.
#[derive(Debug, Clone, Default)]
pub struct JobOutputs {
    pub curve: Option<PathBuf>,
    pub report: Option<PathBuf>,
    pub iteration_log: Option<PathBuf>,
    pub interpolated_curve: Option<PathBuf>,
    /// Number of points on the interpolated path.
    pub interpolated_points: Option<usize>,
}

/// Everything loaded before any computation starts.
pub(crate) struct Loaded {
    pub scan: Scan,
    pub model: Box<dyn ScatteringFunction>,
    pub sampler: ResolutionSampler,
}

pub(crate) fn load_inputs(
    inputs: &JobInputs,
    resolution: &ResolutionConfig,
    loader: &PluginLoader,
) -> Result<Loaded, EngineError> {
    let scan = inputs
        .reader
        .read_from_path(&inputs.scan)
        .map_err(|source| EngineError::ScanLoad {
            path: inputs.scan.clone(),
            source,
        })?;
    info!(path = %inputs.scan.display(), points = scan.len(), "Loaded scan");

    let instrument = match &inputs.instrument {
        Some(path) => Some(Instrument::load(path)?),
        None => resolution.instrument.clone(),
    };
    let model = loader.load(&inputs.model, inputs.model_config.as_deref())?;

    let sampler = ResolutionSampler::new(
        scan.sample().clone(),
        *scan.plane(),
        instrument,
        resolution.algorithm.clone(),
        resolution.focusing,
        resolution.strategy,
    )?;
    Ok(Loaded {
        scan,
        model,
        sampler,
    })
}

/// Resolution sets for `points`, mapping a failure to its point index.
pub(crate) fn build_cache(
    sampler: &ResolutionSampler,
    points: &[ScanPoint],
) -> Result<ResolutionCache, EngineError> {
    let mut cache = ResolutionCache::new();
    cache
        .populate(sampler, points)
        .map_err(|(index, source)| EngineError::Resolution { index, source })?;
    Ok(cache)
}

/// Model prediction at `points` with every parameter of `params` applied.
pub(crate) fn predict_curve(
    model: &dyn ScatteringFunction,
    params: &ParameterSet,
    sampler: &ResolutionSampler,
    points: &[ScanPoint],
) -> Result<Vec<f64>, EngineError> {
    let cache = build_cache(sampler, points)?;
    let mut prototype = model.copy();
    let values: Vec<(String, ParamValue)> = params
        .iter()
        .filter(|p| p.name != SCALE_PARAMETER && p.name != OFFSET_PARAMETER)
        .map(|p| (p.name.clone(), ParamValue::Real(p.value)))
        .collect();
    prototype.set_parameters(&values);
    let scale = params.get(SCALE_PARAMETER).map_or(1.0, |p| p.value);
    let offset = params.get(OFFSET_PARAMETER).map_or(0.0, |p| p.value);

    let point = |model: &mut dyn ScatteringFunction, i: usize| -> Result<f64, EngineError> {
        let set = cache.get(i).ok_or_else(|| {
            EngineError::Internal(format!("no resolution samples cached for point {i}"))
        })?;
        convolution::predict(model, set, scale, offset).map_err(|source| {
            EngineError::NonFiniteResult {
                index: i,
                parameters: params.iter().map(|p| (p.name.clone(), p.value)).collect(),
                source,
            }
        })
    };

    #[cfg(feature = "parallel")]
    let curve: Result<Vec<f64>, EngineError> = (0..points.len())
        .into_par_iter()
        .map_init(|| prototype.copy(), |model, i| point(model.as_mut(), i))
        .collect();

    #[cfg(not(feature = "parallel"))]
    let curve: Result<Vec<f64>, EngineError> = (0..points.len())
        .map(|i| point(prototype.as_mut(), i))
        .collect();

    curve
}

/// Curve rows for the measured points of `scan`.
pub(crate) fn measured_rows(scan: &Scan, normalize: bool, predicted: &[f64]) -> Vec<CurveRow> {
    let (measured, errors) = scan.measured(normalize);
    scan.points()
        .iter()
        .zip(measured.iter().zip(&errors))
        .zip(predicted)
        .enumerate()
        .map(|(index, ((point, (&y, &e)), &p))| CurveRow {
            index,
            point: *point,
            measured: y.is_finite().then_some(y),
            error: e.is_finite().then_some(e),
            predicted: p,
        })
        .collect()
}

/// Evaluates the model along the straight path through the scan and writes
/// the curve when both a count and a destination are configured.
pub(crate) fn write_interpolated(
    outputs: &JobOutputs,
    scan: &Scan,
    model: &dyn ScatteringFunction,
    params: &ParameterSet,
    sampler: &ResolutionSampler,
) -> Result<Option<Vec<CurveRow>>, EngineError> {
    let Some(count) = outputs.interpolated_points else {
        return Ok(None);
    };
    let points = scan.interpolated_path(count)?;
    let predicted = predict_curve(model, params, sampler, &points)?;
    let rows: Vec<CurveRow> = points
        .into_iter()
        .zip(predicted)
        .enumerate()
        .map(|(index, (point, predicted))| CurveRow {
            index,
            point,
            measured: None,
            error: None,
            predicted,
        })
        .collect();
    if let Some(path) = &outputs.interpolated_curve {
        write_rows(path, &rows)?;
    }
    Ok(Some(rows))
}

pub(crate) fn write_rows(path: &Path, rows: &[CurveRow]) -> Result<(), EngineError> {
    report::write_curve_to_path(path, rows)?;
    info!(path = %path.display(), rows = rows.len(), "Wrote model curve");
    Ok(())
}
