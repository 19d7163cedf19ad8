use super::{JobInputs, JobOutputs, load_inputs, measured_rows, predict_curve, write_interpolated, write_rows};
use crate::core::io::report::CurveRow;
use crate::core::sqw::loader::PluginLoader;
use crate::engine::config::SimulateConfig;
use crate::engine::error::EngineError;
use crate::engine::fit::Observations;
use crate::engine::progress::{Progress, ProgressReporter};
use tracing::{info, instrument};

/// Model curves computed with the initial parameters.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    /// Prediction at each measured point, in measurement order.
    pub curve: Vec<CurveRow>,
    /// χ² of the prediction against the measurement.
    pub statistic: f64,
    /// Prediction along the interpolated path, if requested.
    pub interpolated: Option<Vec<CurveRow>>,
}

/// Evaluates the model on the measured points (and optionally on an
/// interpolated path) without fitting.
#[instrument(skip_all, name = "simulate_workflow", fields(model = %inputs.model))]
pub fn run(
    inputs: &JobInputs,
    config: &SimulateConfig,
    loader: &PluginLoader,
    outputs: &JobOutputs,
    reporter: &ProgressReporter,
) -> Result<SimulationResult, EngineError> {
    reporter.report(Progress::PhaseStart { name: "Loading" });
    let loaded = load_inputs(inputs, &config.resolution, loader)?;
    if !loaded.model.is_valid() {
        return Err(EngineError::InvalidModel {
            model: inputs.model.clone(),
        });
    }
    reporter.report(Progress::PhaseFinish);

    reporter.report(Progress::PhaseStart { name: "Simulation" });
    let predicted = predict_curve(
        loaded.model.as_ref(),
        &config.parameters,
        &loaded.sampler,
        loaded.scan.points(),
    )?;
    let curve = measured_rows(&loaded.scan, config.normalize_to_monitor, &predicted);

    let observations = Observations::from_scan(&loaded.scan, config.normalize_to_monitor, None);
    let statistic = observations.statistic(&predicted);
    info!(points = curve.len(), statistic, "Simulated model curve");

    let outputs = JobOutputs {
        interpolated_points: config.interpolated_points.or(outputs.interpolated_points),
        ..outputs.clone()
    };
    let interpolated = write_interpolated(
        &outputs,
        &loaded.scan,
        loaded.model.as_ref(),
        &config.parameters,
        &loaded.sampler,
    )?;
    reporter.report(Progress::PhaseFinish);

    if let Some(path) = &outputs.curve {
        write_rows(path, &curve)?;
    }

    Ok(SimulationResult {
        curve,
        statistic,
        interpolated,
    })
}

#[cfg(test)]
mod tests {
    use super::super::tests::peak_inputs;
    use super::*;
    use crate::core::models::params::{ModelParameter, ParameterSet};
    use crate::core::resolution::{FixedWidths, ResolutionAlgorithm, SamplingStrategy};
    use crate::engine::config::{ResolutionConfig, SimulateConfigBuilder};

    fn true_parameters() -> ParameterSet {
        ParameterSet::from_params([
            ModelParameter::new("scale", 100.0, 0.0),
            ModelParameter::new("offset", 5.0, 0.0),
            ModelParameter::new("h0", 1.25, 0.0),
        ])
        .unwrap()
    }

    #[test]
    fn true_parameters_reproduce_the_scan() {
        let dir = tempfile::tempdir().unwrap();
        let config = SimulateConfigBuilder::new()
            .parameters(true_parameters())
            .resolution(ResolutionConfig::disabled())
            .interpolated_points(Some(21))
            .build()
            .unwrap();
        let outputs = JobOutputs {
            curve: Some(dir.path().join("sim.csv")),
            ..JobOutputs::default()
        };

        let result = run(
            &peak_inputs(dir.path()),
            &config,
            &PluginLoader::with_builtins(),
            &outputs,
            &ProgressReporter::new(),
        )
        .unwrap();

        assert!(result.statistic < 1e-12, "chi2 = {}", result.statistic);
        for row in &result.curve {
            let measured = row.measured.unwrap();
            assert!((row.predicted - measured).abs() < 1e-9 * measured);
        }
        let path = result.interpolated.unwrap();
        assert_eq!(path.len(), 21);
        assert_eq!(path[10].point.h, 1.25);
        assert!((path[10].predicted - 105.0).abs() < 1e-9);
        assert!(dir.path().join("sim.csv").exists());
    }

    #[test]
    fn resolution_broadening_lowers_the_peak() {
        let dir = tempfile::tempdir().unwrap();
        let resolution = ResolutionConfig {
            algorithm: ResolutionAlgorithm::Fixed(FixedWidths {
                q_par: 0.2,
                q_perp: 0.2,
                q_z: 0.2,
                e: 0.1,
            }),
            strategy: SamplingStrategy::Quadrature { order: 3 },
            ..ResolutionConfig::disabled()
        };
        let config = SimulateConfigBuilder::new()
            .parameters(true_parameters())
            .resolution(resolution)
            .build()
            .unwrap();

        let result = run(
            &peak_inputs(dir.path()),
            &config,
            &PluginLoader::with_builtins(),
            &JobOutputs::default(),
            &ProgressReporter::new(),
        )
        .unwrap();

        let centre = &result.curve[2];
        assert!(centre.predicted < centre.measured.unwrap());
        assert!(centre.predicted > 5.0);
        assert!(result.interpolated.is_none());
    }
}
