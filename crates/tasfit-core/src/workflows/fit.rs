use super::{JobInputs, JobOutputs, build_cache, load_inputs, measured_rows, write_interpolated, write_rows};
use crate::core::io::report::{IterationLog, ParameterReport};
use crate::core::sqw::loader::PluginLoader;
use crate::engine::config::FitConfig;
use crate::engine::error::EngineError;
use crate::engine::fit::{CancelToken, FitEngine, FitResult, FitState};
use crate::engine::progress::{Progress, ProgressReporter};
use tracing::{info, instrument, warn};

/// Fits the configured model to one scan and writes the requested outputs.
///
/// Phases: loading, resolution, minimization, output. The final model curve
/// and the interpolated curve use the best parameters found, whatever the
/// terminal state of the fit.
#[instrument(skip_all, name = "fit_workflow", fields(model = %inputs.model))]
pub fn run(
    inputs: &JobInputs,
    config: &FitConfig,
    loader: &PluginLoader,
    outputs: &JobOutputs,
    cancel: CancelToken,
    reporter: &ProgressReporter,
) -> Result<FitResult, EngineError> {
    // === Phase 1: Load scan, instrument and model ===
    reporter.report(Progress::PhaseStart { name: "Loading" });
    let loaded = load_inputs(inputs, &config.resolution, loader)?;
    reporter.report(Progress::PhaseFinish);

    // === Phase 2: Resolution sample sets ===
    reporter.report(Progress::PhaseStart { name: "Resolution" });
    let cache = build_cache(&loaded.sampler, loaded.scan.points())?;
    info!(points = cache.len(), "Resolution sample sets ready");
    reporter.report(Progress::PhaseFinish);

    // === Phase 3: Minimization ===
    reporter.report(Progress::PhaseStart {
        name: "Minimization",
    });
    let prototype = loaded.model.copy();
    let engine = FitEngine::new(
        config,
        &loaded.scan,
        &cache,
        loaded.model,
        inputs.model.clone(),
        cancel,
        reporter,
    )?;
    let result = engine.run()?;
    reporter.report(Progress::PhaseFinish);

    match result.status {
        FitState::Converged => info!(statistic = result.statistic, "Fit converged"),
        FitState::MaxIterationsReached => warn!(
            calls = result.calls,
            "Fit reached the call budget; reporting the best parameters so far"
        ),
        FitState::Failed => warn!(
            message = result.message.as_deref().unwrap_or_default(),
            "Fit failed; reporting the last good parameters"
        ),
        FitState::Aborted => warn!("Fit was cancelled; reporting the best parameters so far"),
        FitState::Idle | FitState::Evaluating => {
            return Err(EngineError::Internal(format!(
                "fit ended in non-terminal state '{}'",
                result.status
            )));
        }
    }

    // === Phase 4: Outputs ===
    reporter.report(Progress::PhaseStart { name: "Output" });
    if let Some(path) = &outputs.curve {
        if result.curve.len() == loaded.scan.len() {
            let rows = measured_rows(&loaded.scan, config.normalize_to_monitor, &result.curve);
            write_rows(path, &rows)?;
        } else {
            warn!(path = %path.display(), "No successful evaluation; model curve not written");
        }
    }
    if let Some(path) = &outputs.iteration_log {
        let mut log = IterationLog::create(path, &result.free_names)?;
        for record in &result.history {
            log.record(record.iteration, record.calls, record.statistic, &record.values)?;
        }
        log.finish()?;
        info!(path = %path.display(), rows = result.history.len(), "Wrote iteration log");
    }
    if let Some(path) = &outputs.report {
        ParameterReport::new(&result.parameters, result.summary()).write_to_path(path)?;
        info!(path = %path.display(), "Wrote parameter report");
    }
    if result.status != FitState::Aborted {
        write_interpolated(
            outputs,
            &loaded.scan,
            prototype.as_ref(),
            &result.parameters,
            &loaded.sampler,
        )?;
    }
    reporter.report(Progress::PhaseFinish);

    Ok(result)
}
