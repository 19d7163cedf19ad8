use super::cache::ResolutionCache;
use super::config::{ErrorStrategy, FitConfig};
use super::convolution;
use super::covariance;
use super::error::EngineError;
use super::minimizer::{self, Minimizer};
use super::progress::{IterationRecord, Progress, ProgressReporter};
use crate::core::io::report::ResultSummary;
use crate::core::models::params::{ModelParameter, ParamError, ParamValue, ParameterSet};
use crate::core::models::scan::{Scan, ScanError};
use crate::core::sqw::ScatteringFunction;
use nalgebra::DMatrix;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, instrument, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Parameter names handled by the engine instead of the model.
pub const SCALE_PARAMETER: &str = "scale";
pub const OFFSET_PARAMETER: &str = "offset";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitState {
    Idle,
    Evaluating,
    Converged,
    MaxIterationsReached,
    Failed,
    Aborted,
}

impl FitState {
    pub fn as_str(self) -> &'static str {
        match self {
            FitState::Idle => "idle",
            FitState::Evaluating => "evaluating",
            FitState::Converged => "converged",
            FitState::MaxIterationsReached => "max-iterations-reached",
            FitState::Failed => "failed",
            FitState::Aborted => "aborted",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, FitState::Idle | FitState::Evaluating)
    }
}

impl fmt::Display for FitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared flag for cooperative cancellation of a running fit.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct FitResult {
    /// Final values and errors of every parameter, fixed ones included.
    pub parameters: ParameterSet,
    pub status: FitState,
    /// χ² at the reported parameters.
    pub statistic: f64,
    /// χ² per degree of freedom; NaN when there are no degrees of freedom.
    pub reduced_statistic: f64,
    /// Scan points entering the statistic.
    pub points: usize,
    pub free_names: Vec<String>,
    pub calls: usize,
    pub iterations: usize,
    /// Predicted intensity per scan point, in measurement order.
    pub curve: Vec<f64>,
    /// Covariance of the free parameters when the Hessian could be inverted.
    pub covariance: Option<DMatrix<f64>>,
    pub history: Vec<IterationRecord>,
    /// Diagnostic for failed fits.
    pub message: Option<String>,
}

impl FitResult {
    pub fn summary(&self) -> ResultSummary {
        ResultSummary {
            status: self.status.to_string(),
            statistic: self.statistic,
            reduced_statistic: self.reduced_statistic,
            points: self.points,
            free_parameters: self.free_names.len(),
            calls: self.calls,
            iterations: self.iterations,
            message: self.message.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct Evaluation {
    free: Vec<f64>,
    values: Vec<f64>,
    statistic: f64,
    curve: Vec<f64>,
}

/// χ² of a prediction against measured values with per-point errors.
pub fn chi_square(measured: &[f64], sigma: &[f64], predicted: &[f64]) -> f64 {
    measured
        .iter()
        .zip(sigma)
        .zip(predicted)
        .map(|((y, s), p)| ((y - p) / s).powi(2))
        .sum()
}

/// Replaces zero or invalid errors by `floor`, defaulting to the smallest
/// positive error (or 1 if there is none). Returns the errors and the
/// number of replaced entries.
pub fn apply_error_floor(errors: &[f64], floor: Option<f64>) -> (Vec<f64>, usize) {
    let floor = floor.unwrap_or_else(|| {
        errors
            .iter()
            .copied()
            .filter(|e| e.is_finite() && *e > 0.0)
            .reduce(f64::min)
            .unwrap_or(1.0)
    });
    let mut replaced = 0;
    let sigma = errors
        .iter()
        .map(|&e| {
            if e.is_finite() && e > 0.0 {
                e
            } else {
                replaced += 1;
                floor
            }
        })
        .collect();
    (sigma, replaced)
}

/// The measured side of χ²: points without a usable measurement (a scan point
/// with no monitor counts under normalization) are left out, and zero errors
/// of the remaining ones are replaced by the error floor.
#[derive(Debug, Clone, PartialEq)]
pub struct Observations {
    /// Scan indices entering the statistic, ascending.
    pub included: Vec<usize>,
    pub measured: Vec<f64>,
    pub sigma: Vec<f64>,
    /// Errors replaced by the floor.
    pub replaced: usize,
}

impl Observations {
    pub fn from_scan(scan: &Scan, normalize_to_monitor: bool, error_floor: Option<f64>) -> Self {
        let (measured, errors) = scan.measured(normalize_to_monitor);
        let included: Vec<usize> = (0..measured.len())
            .filter(|&i| measured[i].is_finite())
            .collect();
        let measured: Vec<f64> = included.iter().map(|&i| measured[i]).collect();
        let errors: Vec<f64> = included.iter().map(|&i| errors[i]).collect();
        let (sigma, replaced) = apply_error_floor(&errors, error_floor);
        Self {
            included,
            measured,
            sigma,
            replaced,
        }
    }

    pub fn len(&self) -> usize {
        self.included.len()
    }

    pub fn is_empty(&self) -> bool {
        self.included.is_empty()
    }

    /// χ² of a prediction covering every scan point.
    pub fn statistic(&self, predicted: &[f64]) -> f64 {
        let predicted: Vec<f64> = self.included.iter().map(|&i| predicted[i]).collect();
        chi_square(&self.measured, &self.sigma, &predicted)
    }
}

/// Minimizes χ² between a scan and a resolution-convolved model.
pub struct FitEngine<'a> {
    config: &'a FitConfig,
    cache: &'a ResolutionCache,
    reporter: &'a ProgressReporter<'a>,
    cancel: CancelToken,
    model: Box<dyn ScatteringFunction>,
    model_name: String,
    params: Vec<ModelParameter>,
    free: Vec<usize>,
    scale: Option<usize>,
    offset: Option<usize>,
    points: usize,
    observations: Observations,
    state: FitState,
}

impl<'a> FitEngine<'a> {
    /// Prepares a fit. Fixed model parameters are applied to `model` here and
    /// never touched again.
    pub fn new(
        config: &'a FitConfig,
        scan: &Scan,
        cache: &'a ResolutionCache,
        mut model: Box<dyn ScatteringFunction>,
        model_name: impl Into<String>,
        cancel: CancelToken,
        reporter: &'a ProgressReporter<'a>,
    ) -> Result<Self, EngineError> {
        let model_name = model_name.into();
        if !model.is_valid() {
            return Err(EngineError::InvalidModel { model: model_name });
        }
        if let Some(missing) = (0..scan.len()).find(|&i| cache.get(i).is_none()) {
            return Err(EngineError::Internal(format!(
                "no resolution samples cached for scan point {missing}"
            )));
        }

        let params: Vec<ModelParameter> = config.parameters.iter().cloned().collect();
        let known = model.parameters();
        for p in &params {
            if p.name == SCALE_PARAMETER || p.name == OFFSET_PARAMETER {
                continue;
            }
            match known.iter().find(|(name, _)| *name == p.name) {
                Some((_, ParamValue::Text(_))) => {
                    return Err(ParamError::NotNumeric(p.name.clone()).into());
                }
                Some(_) => {}
                None => warn!(
                    model = %model_name,
                    parameter = %p.name,
                    "Model has no such parameter; it will not affect the fit"
                ),
            }
        }

        let fixed: Vec<(String, ParamValue)> = params
            .iter()
            .filter(|p| p.fixed && p.name != SCALE_PARAMETER && p.name != OFFSET_PARAMETER)
            .map(|p| (p.name.clone(), ParamValue::Real(p.value)))
            .collect();
        model.set_parameters(&fixed);

        let observations =
            Observations::from_scan(scan, config.normalize_to_monitor, config.error_floor);
        if observations.is_empty() {
            return Err(ScanError::NoMonitor.into());
        }
        let excluded = scan.len() - observations.len();
        if excluded > 0 {
            warn!(
                points = excluded,
                "No monitor counts at {} point(s); excluded from the fit", excluded
            );
        }
        if observations.replaced > 0 {
            warn!(
                points = observations.replaced,
                "Zero measurement error at {} point(s); error floor substituted",
                observations.replaced
            );
        }

        let position = |name: &str| params.iter().position(|p| p.name == name);
        let scale = position(SCALE_PARAMETER);
        let offset = position(OFFSET_PARAMETER);
        let free = (0..params.len()).filter(|&i| !params[i].fixed).collect();

        Ok(Self {
            config,
            cache,
            reporter,
            cancel,
            model,
            model_name,
            params,
            free,
            scale,
            offset,
            points: scan.len(),
            observations,
            state: FitState::Idle,
        })
    }

    pub fn state(&self) -> FitState {
        self.state
    }

    fn free_names(&self) -> Vec<String> {
        self.free.iter().map(|&i| self.params[i].name.clone()).collect()
    }

    fn clamp_free(&self, x: &[f64]) -> Vec<f64> {
        self.free
            .iter()
            .zip(x)
            .map(|(&i, &v)| self.params[i].clamp(v))
            .collect()
    }

    fn full_values(&self, free: &[f64]) -> Vec<f64> {
        let mut values: Vec<f64> = self.params.iter().map(|p| p.value).collect();
        for (&i, &v) in self.free.iter().zip(free) {
            values[i] = v;
        }
        values
    }

    fn named(&self, values: &[f64]) -> Vec<(String, f64)> {
        self.params
            .iter()
            .zip(values)
            .map(|(p, &v)| (p.name.clone(), v))
            .collect()
    }

    /// χ² and predicted curve at the (clamped) free-parameter vector `x`.
    fn evaluate(&mut self, x: &[f64]) -> Result<Evaluation, EngineError> {
        let free = self.clamp_free(x);
        let values = self.full_values(&free);

        let updates: Vec<(String, ParamValue)> = self
            .free
            .iter()
            .filter(|&&i| Some(i) != self.scale && Some(i) != self.offset)
            .map(|&i| (self.params[i].name.clone(), ParamValue::Real(values[i])))
            .collect();
        self.model.set_parameters(&updates);
        if !self.model.is_valid() {
            return Err(EngineError::InvalidModel {
                model: self.model_name.clone(),
            });
        }

        let scale = self.scale.map_or(1.0, |i| values[i]);
        let offset = self.offset.map_or(0.0, |i| values[i]);
        let curve = self.predict_all(&values, scale, offset)?;
        let statistic = self.observations.statistic(&curve);
        if !statistic.is_finite() {
            return Err(EngineError::NonFiniteStatistic {
                statistic,
                parameters: self.named(&values),
            });
        }
        Ok(Evaluation {
            free,
            values,
            statistic,
            curve,
        })
    }

    fn predict_all(&self, values: &[f64], scale: f64, offset: f64) -> Result<Vec<f64>, EngineError> {
        let n = self.points;
        let point = |model: &mut dyn ScatteringFunction, i: usize| -> Result<f64, EngineError> {
            if self.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let set = self.cache.get(i).ok_or_else(|| {
                EngineError::Internal(format!("no resolution samples cached for scan point {i}"))
            })?;
            convolution::predict(model, set, scale, offset).map_err(|source| {
                EngineError::NonFiniteResult {
                    index: i,
                    parameters: self.named(values),
                    source,
                }
            })
        };

        #[cfg(feature = "parallel")]
        let curve: Result<Vec<f64>, EngineError> = (0..n)
            .into_par_iter()
            .map_init(|| self.model.copy(), |model, i| point(model.as_mut(), i))
            .collect();

        #[cfg(not(feature = "parallel"))]
        let curve: Result<Vec<f64>, EngineError> = {
            let mut model = self.model.copy();
            (0..n).map(|i| point(model.as_mut(), i)).collect()
        };

        curve
    }

    /// Runs the minimization to a terminal state.
    ///
    /// Only setup problems and internal errors are returned as `Err`; a fit
    /// that stops on a non-finite prediction, an invalid model or a
    /// cancellation yields a result carrying the best parameters seen.
    #[instrument(skip_all, name = "fit_engine", fields(model = %self.model_name, free = self.free.len(), points = self.observations.len()))]
    pub fn run(mut self) -> Result<FitResult, EngineError> {
        self.state = FitState::Evaluating;
        let start: Vec<f64> = self.free.iter().map(|&i| self.params[i].value).collect();
        let steps: Vec<f64> = self.free.iter().map(|&i| self.params[i].error).collect();

        if start.is_empty() {
            info!("No free parameters; evaluating the model once.");
            return self.evaluate_only();
        }

        let mut minimizer = minimizer::build(self.config.minimizer, start.clone(), steps);
        let max_calls = self.config.max_calls;
        let tolerance = self.config.convergence.tolerance;
        let patience = self.config.convergence.patience;

        let mut calls = 0;
        let mut best: Option<Evaluation> = None;
        let mut history = Vec::new();
        let mut previous = f64::INFINITY;
        let mut stalled = 0;
        let mut message = None;

        self.reporter.report(Progress::TaskStart {
            total_steps: max_calls as u64,
        });

        let status = loop {
            if self.cancel.is_cancelled() {
                break FitState::Aborted;
            }
            if calls >= max_calls {
                warn!(calls, "Call budget exhausted before convergence");
                break FitState::MaxIterationsReached;
            }

            let x = minimizer.ask();
            let evaluation = match self.evaluate(&x) {
                Ok(evaluation) => evaluation,
                Err(EngineError::Cancelled) => break FitState::Aborted,
                Err(
                    e @ (EngineError::NonFiniteResult { .. }
                    | EngineError::NonFiniteStatistic { .. }
                    | EngineError::InvalidModel { .. }),
                ) => {
                    warn!(error = %e, "Fit stopped");
                    message = Some(e.to_string());
                    break FitState::Failed;
                }
                Err(e) => {
                    self.reporter.report(Progress::TaskFinish);
                    return Err(e);
                }
            };
            calls += 1;
            self.reporter.report(Progress::TaskIncrement);
            minimizer.tell(evaluation.statistic);
            if best
                .as_ref()
                .is_none_or(|b| evaluation.statistic < b.statistic)
            {
                best = Some(evaluation);
            }

            if minimizer.iterations() > history.len() {
                let (values, statistic) = minimizer.best();
                let record = IterationRecord {
                    iteration: minimizer.iterations(),
                    calls,
                    statistic,
                    values: self.clamp_free(values),
                };
                debug!(iteration = record.iteration, statistic, "Iteration finished");
                self.reporter.report(Progress::Iteration(record.clone()));
                history.push(record);

                if previous - statistic <= tolerance {
                    stalled += 1;
                } else {
                    stalled = 0;
                }
                previous = statistic;
                if stalled >= patience {
                    break FitState::Converged;
                }
            }
        };
        self.reporter.report(Progress::TaskFinish);
        self.state = status;

        let best = match best {
            Some(best) => best,
            None => Evaluation {
                values: self.full_values(&start),
                free: start,
                statistic: f64::INFINITY,
                curve: Vec::new(),
            },
        };

        let (errors, covariance) = match status {
            FitState::Converged | FitState::MaxIterationsReached => {
                self.estimate_errors(&best, minimizer.as_ref())
            }
            _ => (minimizer.spread(), None),
        };

        info!(
            status = %status,
            statistic = best.statistic,
            calls,
            iterations = minimizer.iterations(),
            "Fit finished"
        );
        self.finish(best, errors, covariance, status, calls, minimizer.iterations(), history, message)
    }

    fn estimate_errors(
        &mut self,
        best: &Evaluation,
        minimizer: &dyn Minimizer,
    ) -> (Vec<f64>, Option<DMatrix<f64>>) {
        let central = match self.config.error_strategy {
            ErrorStrategy::StepSpread => return (minimizer.spread(), None),
            ErrorStrategy::Hessian => false,
            ErrorStrategy::CentralHessian => true,
        };
        let mut objective = |x: &[f64]| self.evaluate(x).map(|e| e.statistic);
        match covariance::hessian(&mut objective, &best.free, best.statistic, central) {
            Ok(hessian) => {
                let uncertainties = covariance::from_chi2_hessian(&hessian);
                (uncertainties.errors, uncertainties.covariance)
            }
            Err(e) => {
                warn!(error = %e, "Hessian evaluation failed; reporting minimizer spread");
                (minimizer.spread(), None)
            }
        }
    }

    fn evaluate_only(mut self) -> Result<FitResult, EngineError> {
        let (status, best, message) = match self.evaluate(&[]) {
            Ok(evaluation) => (FitState::Converged, evaluation, None),
            Err(EngineError::Cancelled) => (FitState::Aborted, self.empty_evaluation(), None),
            Err(
                e @ (EngineError::NonFiniteResult { .. }
                | EngineError::NonFiniteStatistic { .. }
                | EngineError::InvalidModel { .. }),
            ) => {
                (FitState::Failed, self.empty_evaluation(), Some(e.to_string()))
            }
            Err(e) => return Err(e),
        };
        self.state = status;
        let calls = usize::from(status == FitState::Converged);
        self.finish(best, Vec::new(), None, status, calls, 0, Vec::new(), message)
    }

    fn empty_evaluation(&self) -> Evaluation {
        Evaluation {
            free: Vec::new(),
            values: self.full_values(&[]),
            statistic: f64::INFINITY,
            curve: Vec::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        self,
        best: Evaluation,
        errors: Vec<f64>,
        covariance: Option<DMatrix<f64>>,
        status: FitState,
        calls: usize,
        iterations: usize,
        history: Vec<IterationRecord>,
        message: Option<String>,
    ) -> Result<FitResult, EngineError> {
        let mut params = self.params.clone();
        for (p, &v) in params.iter_mut().zip(&best.values) {
            p.value = v;
            if p.fixed {
                p.error = 0.0;
            }
        }
        for (&i, &e) in self.free.iter().zip(&errors) {
            params[i].error = e;
        }

        let points = self.observations.len();
        let dof = points.saturating_sub(self.free.len());
        let reduced_statistic = if dof > 0 {
            best.statistic / dof as f64
        } else {
            f64::NAN
        };

        Ok(FitResult {
            parameters: ParameterSet::from_params(params)?,
            status,
            statistic: best.statistic,
            reduced_statistic,
            points,
            free_names: self.free_names(),
            calls,
            iterations,
            curve: best.curve,
            covariance,
            history,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::scan::ScanMetadata;
    use crate::core::models::scan::tests::h_scan;
    use crate::core::resolution::{
        FixedWidths, Focusing, ResolutionAlgorithm, ResolutionSampler, SamplingStrategy,
    };
    use crate::core::sqw::builtin::gauss::GaussPeak;
    use crate::engine::config::{FitConfigBuilder, MinimizerKind, ResolutionConfig};
    use std::sync::Mutex;

    fn cache_for(scan: &Scan, algorithm: ResolutionAlgorithm, strategy: SamplingStrategy) -> ResolutionCache {
        let sampler = ResolutionSampler::new(
            scan.sample().clone(),
            scan.plane().clone(),
            None,
            algorithm,
            Focusing::default(),
            strategy,
        )
        .unwrap();
        let mut cache = ResolutionCache::new();
        cache.populate(&sampler, scan.points()).unwrap();
        cache
    }

    fn nominal_cache(scan: &Scan) -> ResolutionCache {
        cache_for(scan, ResolutionAlgorithm::None, SamplingStrategy::default())
    }

    fn peak_model() -> Box<dyn ScatteringFunction> {
        let mut model = GaussPeak::default();
        model.set_parameters(&[
            ("h0".into(), ParamValue::Real(1.25)),
            ("sigma_q".into(), ParamValue::Real(0.1)),
        ]);
        Box::new(model)
    }

    /// Noise-free counts of `100 · peak + 5` on the five-point h-scan.
    fn peak_scan() -> Scan {
        let template = h_scan(vec![0.0; 5]);
        let mut model = peak_model();
        let counts = template
            .points()
            .iter()
            .map(|p| 100.0 * model.evaluate(p.h, p.k, p.l, p.e) + 5.0)
            .collect();
        h_scan(counts)
    }

    fn peak_parameters(h0: f64) -> ParameterSet {
        ParameterSet::from_params([
            ModelParameter::new("scale", 80.0, 10.0),
            ModelParameter::new("offset", 2.0, 1.0),
            ModelParameter::new("h0", h0, 0.05),
            ModelParameter::new("amp", 1.0, 0.0).fixed(true),
            ModelParameter::new("sigma_q", 0.1, 0.0).fixed(true),
        ])
        .unwrap()
    }

    fn config(params: ParameterSet, max_calls: usize) -> FitConfig {
        FitConfigBuilder::new()
            .parameters(params)
            .max_calls(max_calls)
            .tolerance(1e-9)
            .patience(30)
            .resolution(ResolutionConfig::disabled())
            .build()
            .unwrap()
    }

    fn run(
        config: &FitConfig,
        scan: &Scan,
        cache: &ResolutionCache,
        model: Box<dyn ScatteringFunction>,
        cancel: CancelToken,
    ) -> FitResult {
        let reporter = ProgressReporter::new();
        FitEngine::new(config, scan, cache, model, "test", cancel, &reporter)
            .unwrap()
            .run()
            .unwrap()
    }

    #[test]
    fn gaussian_h_scan_recovers_the_peak_centre() {
        let scan = peak_scan();
        let cache = nominal_cache(&scan);
        let config = config(peak_parameters(1.2), 3000);
        let result = run(&config, &scan, &cache, peak_model(), CancelToken::new());

        assert_eq!(result.status, FitState::Converged);
        let h0 = result.parameters.get("h0").unwrap();
        assert!((h0.value - 1.25).abs() < 1e-3, "h0 = {}", h0.value);
        assert!((result.parameters.get("scale").unwrap().value - 100.0).abs() < 0.5);
        assert!((result.parameters.get("offset").unwrap().value - 5.0).abs() < 0.5);
        assert!(result.statistic < 1e-4);
        assert_eq!(result.free_names, vec!["scale", "offset", "h0"]);
        assert_eq!(result.curve.len(), 5);
        assert!(result.calls <= 3000);
        assert!(!result.history.is_empty());
        assert_eq!(result.parameters.get("amp").unwrap().error, 0.0);
    }

    #[test]
    fn pattern_search_also_converges() {
        let scan = peak_scan();
        let cache = nominal_cache(&scan);
        let mut config = config(peak_parameters(1.2), 5000);
        config.minimizer = MinimizerKind::Pattern;
        let result = run(&config, &scan, &cache, peak_model(), CancelToken::new());
        let h0 = result.parameters.get("h0").unwrap().value;
        assert!((h0 - 1.25).abs() < 1e-3, "h0 = {h0}");
    }

    #[test]
    fn fits_are_reproducible_with_a_fixed_seed() {
        let scan = peak_scan();
        let widths = ResolutionAlgorithm::Fixed(FixedWidths {
            q_par: 0.02,
            q_perp: 0.02,
            q_z: 0.02,
            e: 0.1,
        });
        let strategy = SamplingStrategy::MonteCarlo {
            samples: 64,
            seed: 42,
        };
        let config = config(peak_parameters(1.2), 400);
        let first = run(
            &config,
            &scan,
            &cache_for(&scan, widths.clone(), strategy),
            peak_model(),
            CancelToken::new(),
        );
        let second = run(
            &config,
            &scan,
            &cache_for(&scan, widths, strategy),
            peak_model(),
            CancelToken::new(),
        );
        assert_eq!(first.parameters, second.parameters);
        assert_eq!(first.statistic, second.statistic);
        assert_eq!(first.curve, second.curve);
        assert_eq!(first.calls, second.calls);
    }

    /// Gaussian that records every width it is evaluated with.
    #[derive(Clone)]
    struct WidthSpy {
        centre: f64,
        width: f64,
        seen: Arc<Mutex<Vec<f64>>>,
    }

    impl ScatteringFunction for WidthSpy {
        fn evaluate(&mut self, h: f64, _: f64, _: f64, _: f64) -> f64 {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(self.width);
            }
            (-0.5 * ((h - self.centre) / self.width).powi(2)).exp()
        }
        fn parameters(&self) -> Vec<(String, ParamValue)> {
            vec![
                ("centre".into(), ParamValue::Real(self.centre)),
                ("width".into(), ParamValue::Real(self.width)),
            ]
        }
        fn set_parameter_if_present(&mut self, name: &str, value: &ParamValue) -> bool {
            match name {
                "centre" => crate::core::sqw::assign_real(&mut self.centre, value),
                "width" => crate::core::sqw::assign_real(&mut self.width, value),
                _ => false,
            }
        }
        fn copy(&self) -> Box<dyn ScatteringFunction> {
            Box::new(self.clone())
        }
    }

    #[test]
    fn fixed_parameters_never_change_in_the_model() {
        let scan = peak_scan();
        let cache = nominal_cache(&scan);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let spy = WidthSpy {
            centre: 1.0,
            width: 1.0,
            seen: Arc::clone(&seen),
        };
        let params = ParameterSet::from_params([
            ModelParameter::new("scale", 50.0, 5.0),
            ModelParameter::new("centre", 1.2, 0.05),
            ModelParameter::new("width", 0.3, 0.1).fixed(true),
        ])
        .unwrap();
        let config = config(params, 200);
        let result = run(&config, &scan, &cache, Box::new(spy), CancelToken::new());

        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|&w| w == 0.3));
        assert_eq!(result.parameters.get("width").unwrap().value, 0.3);
    }

    #[test]
    fn zero_count_point_gives_a_finite_statistic() {
        let scan = h_scan(vec![4.0, 9.0, 0.0, 16.0, 1.0]);
        let cache = nominal_cache(&scan);
        let params = ParameterSet::from_params([
            ModelParameter::new("offset", 5.0, 1.0).fixed(true),
            ModelParameter::new("scale", 0.0, 1.0).fixed(true),
        ])
        .unwrap();
        let config = config(params, 10);
        let result = run(&config, &scan, &cache, peak_model(), CancelToken::new());

        assert_eq!(result.status, FitState::Converged);
        assert_eq!(result.calls, 1);
        // Zero error replaced by the smallest positive one, sqrt(1).
        let expected = 1.0 / 4.0 + 16.0 / 9.0 + 25.0 + 121.0 / 16.0 + 16.0;
        assert!((result.statistic - expected).abs() < 1e-12);
        assert_eq!(result.reduced_statistic, result.statistic / 5.0);
    }

    #[test]
    fn call_budget_stops_the_fit() {
        let scan = peak_scan();
        let cache = nominal_cache(&scan);
        let config = config(peak_parameters(1.1), 12);
        let result = run(&config, &scan, &cache, peak_model(), CancelToken::new());
        assert_eq!(result.status, FitState::MaxIterationsReached);
        assert_eq!(result.calls, 12);
        assert!(result.statistic.is_finite());
    }

    #[test]
    fn cancelled_token_aborts_before_evaluating() {
        let scan = peak_scan();
        let cache = nominal_cache(&scan);
        let config = config(peak_parameters(1.2), 100);
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = run(&config, &scan, &cache, peak_model(), cancel);
        assert_eq!(result.status, FitState::Aborted);
        assert_eq!(result.calls, 0);
        assert_eq!(result.parameters.get("h0").unwrap().value, 1.2);
    }

    #[test]
    fn non_finite_prediction_fails_with_diagnostic() {
        let scan = peak_scan();
        let cache = nominal_cache(&scan);
        let params = ParameterSet::from_params([
            ModelParameter::new("centre", 1.2, 0.05),
            ModelParameter::new("width", f64::NAN, 0.0).fixed(true),
        ])
        .unwrap();
        let spy = WidthSpy {
            centre: 1.0,
            width: 1.0,
            seen: Arc::new(Mutex::new(Vec::new())),
        };
        let config = config(params, 100);
        let result = run(&config, &scan, &cache, Box::new(spy), CancelToken::new());
        assert_eq!(result.status, FitState::Failed);
        let message = result.message.unwrap();
        assert!(message.contains("scan point"), "{message}");
        assert!(message.contains("centre"), "{message}");
        assert_eq!(result.parameters.get("centre").unwrap().value, 1.2);
    }

    #[test]
    fn overflowing_statistic_fails_the_fit() {
        let scan = peak_scan();
        let cache = nominal_cache(&scan);
        let params = ParameterSet::from_params([
            ModelParameter::new("scale", 1e200, 1e199),
            ModelParameter::new("h0", 1.2, 0.05),
            ModelParameter::new("sigma_q", 10.0, 0.0).fixed(true),
        ])
        .unwrap();
        let config = config(params, 20);
        let result = run(&config, &scan, &cache, peak_model(), CancelToken::new());

        assert_eq!(result.status, FitState::Failed);
        assert_eq!(result.calls, 0);
        let message = result.message.unwrap();
        assert!(message.contains("statistic"), "{message}");
        assert!(message.contains("scale"), "{message}");
    }

    fn monitored_scan(monitor: Vec<f64>) -> Scan {
        let template = h_scan(vec![100.0; monitor.len()]);
        Scan::new(
            template.sample().clone(),
            template.plane().clone(),
            template.points().to_vec(),
            vec![100.0; monitor.len()],
            monitor,
            ScanMetadata::default(),
        )
        .unwrap()
    }

    fn flat_parameters(level: f64) -> ParameterSet {
        ParameterSet::from_params([
            ModelParameter::new("offset", level, 0.0).fixed(true),
            ModelParameter::new("scale", 0.0, 0.0).fixed(true),
        ])
        .unwrap()
    }

    #[test]
    fn points_without_monitor_are_left_out_of_the_statistic() {
        let scan = monitored_scan(vec![1000.0, 0.0, 1000.0]);
        let observations = Observations::from_scan(&scan, true, None);
        assert_eq!(observations.included, vec![0, 2]);
        assert_eq!(observations.replaced, 0);

        let cache = nominal_cache(&scan);
        let mut config = config(flat_parameters(0.1), 10);
        config.normalize_to_monitor = true;
        let result = run(&config, &scan, &cache, peak_model(), CancelToken::new());

        assert_eq!(result.status, FitState::Converged);
        assert_eq!(result.points, 2);
        assert_eq!(result.curve.len(), 3);
        assert_eq!(result.statistic, 0.0);
        assert_eq!(result.reduced_statistic, 0.0);
    }

    #[test]
    fn scan_without_any_monitor_is_rejected() {
        let scan = monitored_scan(vec![0.0, 0.0]);
        let cache = nominal_cache(&scan);
        let mut config = config(flat_parameters(0.1), 10);
        config.normalize_to_monitor = true;
        let reporter = ProgressReporter::new();
        let err = FitEngine::new(
            &config,
            &scan,
            &cache,
            peak_model(),
            "peak",
            CancelToken::new(),
            &reporter,
        )
        .err()
        .unwrap();
        assert!(matches!(err, EngineError::Scan(ScanError::NoMonitor)));
    }

    /// Gaussian that turns invalid once `centre` has been set `budget` times.
    #[derive(Clone)]
    struct Fragile {
        centre: f64,
        budget: usize,
    }

    impl ScatteringFunction for Fragile {
        fn evaluate(&mut self, h: f64, _: f64, _: f64, _: f64) -> f64 {
            (-0.5 * ((h - self.centre) / 0.2).powi(2)).exp()
        }
        fn parameters(&self) -> Vec<(String, ParamValue)> {
            vec![("centre".into(), ParamValue::Real(self.centre))]
        }
        fn set_parameter_if_present(&mut self, name: &str, value: &ParamValue) -> bool {
            if name != "centre" {
                return false;
            }
            self.budget = self.budget.saturating_sub(1);
            crate::core::sqw::assign_real(&mut self.centre, value)
        }
        fn copy(&self) -> Box<dyn ScatteringFunction> {
            Box::new(self.clone())
        }
        fn is_valid(&self) -> bool {
            self.budget > 0
        }
    }

    #[test]
    fn model_turning_invalid_fails_the_fit() {
        let scan = peak_scan();
        let cache = nominal_cache(&scan);
        let params = ParameterSet::from_params([
            ModelParameter::new("scale", 80.0, 10.0),
            ModelParameter::new("centre", 1.2, 0.05),
        ])
        .unwrap();
        let config = config(params, 100);
        let model = Fragile {
            centre: 1.0,
            budget: 5,
        };
        let result = run(&config, &scan, &cache, Box::new(model), CancelToken::new());

        assert_eq!(result.status, FitState::Failed);
        assert_eq!(result.calls, 4);
        let message = result.message.unwrap();
        assert!(message.contains("invalid state"), "{message}");
        assert!(result.statistic.is_finite());
    }

    #[test]
    fn invalid_model_is_refused_up_front() {
        let scan = peak_scan();
        let cache = nominal_cache(&scan);
        let config = config(peak_parameters(1.2), 10);
        let reporter = ProgressReporter::new();
        let model = Fragile {
            centre: 1.0,
            budget: 0,
        };
        let err = FitEngine::new(
            &config,
            &scan,
            &cache,
            Box::new(model),
            "fragile",
            CancelToken::new(),
            &reporter,
        )
        .err()
        .unwrap();
        assert!(matches!(err, EngineError::InvalidModel { model } if model == "fragile"));
    }

    #[test]
    fn engine_scale_never_reaches_a_model_parameter_of_the_same_name() {
        /// Flat model with its own `scale` parameter.
        #[derive(Clone)]
        struct Level {
            scale: f64,
        }
        impl ScatteringFunction for Level {
            fn evaluate(&mut self, _: f64, _: f64, _: f64, _: f64) -> f64 {
                self.scale
            }
            fn parameters(&self) -> Vec<(String, ParamValue)> {
                vec![("scale".into(), ParamValue::Real(self.scale))]
            }
            fn set_parameter_if_present(&mut self, name: &str, value: &ParamValue) -> bool {
                name == "scale" && crate::core::sqw::assign_real(&mut self.scale, value)
            }
            fn copy(&self) -> Box<dyn ScatteringFunction> {
                Box::new(self.clone())
            }
        }

        let scan = peak_scan();
        let cache = nominal_cache(&scan);
        let params = ParameterSet::from_params([
            ModelParameter::new("scale", 2.0, 0.0).fixed(true),
            ModelParameter::new("offset", 0.0, 0.0).fixed(true),
        ])
        .unwrap();
        let config = config(params, 10);
        let result = run(&config, &scan, &cache, Box::new(Level { scale: 1.5 }), CancelToken::new());
        assert_eq!(result.curve, vec![3.0; 5]);
    }

    #[test]
    fn text_parameters_cannot_be_fitted() {
        #[derive(Clone)]
        struct Labelled;
        impl ScatteringFunction for Labelled {
            fn evaluate(&mut self, _: f64, _: f64, _: f64, _: f64) -> f64 {
                1.0
            }
            fn parameters(&self) -> Vec<(String, ParamValue)> {
                vec![("label".into(), ParamValue::Text("a".into()))]
            }
            fn set_parameter_if_present(&mut self, _: &str, _: &ParamValue) -> bool {
                false
            }
            fn copy(&self) -> Box<dyn ScatteringFunction> {
                Box::new(self.clone())
            }
        }

        let scan = peak_scan();
        let cache = nominal_cache(&scan);
        let params = ParameterSet::from_params([ModelParameter::new("label", 1.0, 0.1)]).unwrap();
        let config = config(params, 10);
        let reporter = ProgressReporter::new();
        let err = FitEngine::new(
            &config,
            &scan,
            &cache,
            Box::new(Labelled),
            "labelled",
            CancelToken::new(),
            &reporter,
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            EngineError::Parameters(ParamError::NotNumeric(name)) if name == "label"
        ));
    }

    #[test]
    fn error_floor_substitution() {
        let (sigma, replaced) = apply_error_floor(&[2.0, 0.0, 0.5, f64::NAN], None);
        assert_eq!(sigma, vec![2.0, 0.5, 0.5, 0.5]);
        assert_eq!(replaced, 2);
        let (sigma, _) = apply_error_floor(&[0.0, 0.0], None);
        assert_eq!(sigma, vec![1.0, 1.0]);
        let (sigma, _) = apply_error_floor(&[0.0, 3.0], Some(0.1));
        assert_eq!(sigma, vec![0.1, 3.0]);
    }

    #[test]
    fn hessian_errors_match_the_curvature() {
        let scan = peak_scan();
        let cache = nominal_cache(&scan);
        let mut config = config(peak_parameters(1.2), 3000);
        config.error_strategy = ErrorStrategy::CentralHessian;
        let result = run(&config, &scan, &cache, peak_model(), CancelToken::new());
        let cov = result.covariance.expect("covariance");
        assert_eq!(cov.nrows(), 3);
        for (i, name) in ["scale", "offset", "h0"].iter().enumerate() {
            let err = result.parameters.get(name).unwrap().error;
            assert!(err > 0.0 && err.is_finite());
            assert!((err - cov[(i, i)].sqrt()).abs() < 1e-12 * err.max(1.0));
        }
    }
}
