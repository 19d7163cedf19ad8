use super::defaults::DefaultsConfig;
use super::file::{
    FileAlgorithm, FileConfig, FileFitParameters, FileFitterConfig, FileMinimizer, FileSampling,
};
use super::models::{FitJob, SimulateJob};
use crate::cli::{FitArgs, JobArgs, SimulateArgs};
use crate::error::{CliError, Result};
use std::path::{Path, PathBuf};
use tasfit::core::io::scan_file::TextScanReader;
use tasfit::core::models::params::{ModelParameter, ParameterSet};
use tasfit::core::resolution::{FixedWidths, Focusing, ResolutionAlgorithm, SamplingStrategy};
use tasfit::engine::config::{
    ErrorStrategy, FitConfigBuilder, MinimizerKind, ResolutionConfig, SimulateConfigBuilder,
};
use tasfit::workflows::{JobInputs, JobOutputs};
use tracing::info;

/// The parts of a job shared by `fit` and `simulate`.
struct CommonJob {
    inputs: JobInputs,
    outputs: JobOutputs,
    plugin_dirs: Vec<PathBuf>,
    parameters: ParameterSet,
    normalize_to_monitor: bool,
    resolution: ResolutionConfig,
    fitter: FileFitterConfig,
}

pub fn build_fit_job(args: &FitArgs, plugin_dirs: &[PathBuf]) -> Result<FitJob> {
    let defaults = DefaultsConfig::default();
    let common = build_common(&args.job, plugin_dirs, &defaults)?;
    let fitter = common.fitter;

    let minimizer = match fitter.minimizer {
        Some(FileMinimizer::Pattern) => MinimizerKind::Pattern,
        Some(FileMinimizer::Simplex) | None => MinimizerKind::Simplex,
    };
    let error_strategy =
        ErrorStrategy::from_level(fitter.strategy.unwrap_or(defaults.error_strategy))
            .map_err(|e| CliError::Config(format!("fitter.strategy: {e}")))?;
    let max_calls = args
        .max_calls
        .or(fitter.max_calls)
        .unwrap_or(defaults.max_calls);

    let core_config = FitConfigBuilder::new()
        .parameters(common.parameters)
        .minimizer(minimizer)
        .error_strategy(error_strategy)
        .max_calls(max_calls)
        .tolerance(fitter.tolerance.unwrap_or(defaults.tolerance))
        .patience(fitter.patience.unwrap_or(defaults.patience))
        .error_floor(fitter.error_floor)
        .normalize_to_monitor(common.normalize_to_monitor)
        .resolution(common.resolution)
        .build()
        .map_err(|e| CliError::Config(e.to_string()))?;

    Ok(FitJob {
        inputs: common.inputs,
        outputs: common.outputs,
        plugin_dirs: common.plugin_dirs,
        core_config,
    })
}

pub fn build_simulate_job(args: &SimulateArgs, plugin_dirs: &[PathBuf]) -> Result<SimulateJob> {
    let defaults = DefaultsConfig::default();
    let mut common = build_common(&args.job, plugin_dirs, &defaults)?;
    if args.interpolated_points.is_some() {
        common.outputs.interpolated_points = args.interpolated_points;
    }

    let core_config = SimulateConfigBuilder::new()
        .parameters(common.parameters)
        .normalize_to_monitor(common.normalize_to_monitor)
        .resolution(common.resolution)
        .interpolated_points(common.outputs.interpolated_points)
        .build()
        .map_err(|e| CliError::Config(e.to_string()))?;

    Ok(SimulateJob {
        inputs: common.inputs,
        outputs: common.outputs,
        plugin_dirs: common.plugin_dirs,
        core_config,
    })
}

fn build_common(
    args: &JobArgs,
    cli_plugin_dirs: &[PathBuf],
    defaults: &DefaultsConfig,
) -> Result<CommonJob> {
    let mut file_config = FileConfig::from_file(&args.config, &args.set_values)?;
    let base_dir = args
        .config
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let resolve = |value: &str| resolve_relative(&base_dir, value);

    let input = file_config.input.take().unwrap_or_default();
    let scan = input
        .scan
        .as_deref()
        .map(resolve)
        .ok_or_else(|| CliError::Config("`input.scan` is required.".to_string()))?;
    let model = input
        .model
        .clone()
        .ok_or_else(|| CliError::Config("`input.model` is required.".to_string()))?;
    let model = if model.contains(['/', '\\']) {
        resolve(&model).to_string_lossy().into_owned()
    } else {
        model
    };
    let instrument = input.instrument.as_deref().map(resolve);

    let inputs = JobInputs {
        scan,
        reader: TextScanReader::new(
            input
                .counts_column
                .as_deref()
                .unwrap_or(defaults.counts_column),
            input
                .monitor_column
                .as_deref()
                .unwrap_or(defaults.monitor_column),
        ),
        instrument,
        model,
        model_config: input.model_config.as_deref().map(resolve),
    };

    let output = file_config.output.take().unwrap_or_default();
    let outputs = JobOutputs {
        curve: output.curve.as_deref().map(resolve),
        report: output.report.as_deref().map(resolve),
        iteration_log: output.iteration_log.as_deref().map(resolve),
        interpolated_curve: output.interpolated_curve.as_deref().map(resolve),
        interpolated_points: output.interpolated_points,
    };

    let mut plugin_dirs = cli_plugin_dirs.to_vec();
    plugin_dirs.extend(input.plugin_dirs.iter().map(|dir| resolve(dir.as_str())));

    let resolution = merge_resolution(&mut file_config, args, inputs.instrument.is_some(), defaults)?;

    let parameters = build_parameters(file_config.fit_parameters.take().ok_or_else(|| {
        CliError::Config("`fit_parameters` section is required.".to_string())
    })?)?;

    Ok(CommonJob {
        inputs,
        outputs,
        plugin_dirs,
        parameters,
        normalize_to_monitor: input.normalize_to_monitor.unwrap_or(false),
        resolution,
        fitter: file_config.fitter.take().unwrap_or_default(),
    })
}

fn resolve_relative(base_dir: &Path, value: &str) -> PathBuf {
    let path = Path::new(value);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn merge_resolution(
    file_config: &mut FileConfig,
    args: &JobArgs,
    has_instrument: bool,
    defaults: &DefaultsConfig,
) -> Result<ResolutionConfig> {
    let resolution = file_config.resolution.take().unwrap_or_default();
    let montecarlo = file_config.montecarlo.take().unwrap_or_default();

    let algorithm = match resolution.algorithm {
        Some(FileAlgorithm::CooperNathans) if !has_instrument => {
            return Err(CliError::Config(
                "`resolution.algorithm = \"cooper-nathans\"` needs `input.instrument`.".to_string(),
            ));
        }
        Some(FileAlgorithm::CooperNathans) => ResolutionAlgorithm::CooperNathans,
        Some(FileAlgorithm::Fixed) => {
            let widths = resolution.fixed.ok_or_else(|| {
                CliError::Config(
                    "`resolution.algorithm = \"fixed\"` needs a `[resolution.fixed]` table."
                        .to_string(),
                )
            })?;
            ResolutionAlgorithm::Fixed(FixedWidths {
                q_par: widths.q_par,
                q_perp: widths.q_perp,
                q_z: widths.q_z,
                e: widths.e,
            })
        }
        Some(FileAlgorithm::None) => ResolutionAlgorithm::None,
        None if has_instrument => ResolutionAlgorithm::CooperNathans,
        None => {
            info!("No instrument configured; points are evaluated without resolution.");
            ResolutionAlgorithm::None
        }
    };

    let samples = args.samples.or(montecarlo.samples);
    let seed = args.seed.or(montecarlo.seed).unwrap_or(defaults.seed);
    let sampling = resolution.strategy.unwrap_or(if samples.is_some() {
        FileSampling::MonteCarlo
    } else {
        FileSampling::Quadrature
    });
    let strategy = match sampling {
        FileSampling::Quadrature => SamplingStrategy::Quadrature {
            order: resolution.order.unwrap_or(defaults.quadrature_order),
        },
        FileSampling::MonteCarlo => SamplingStrategy::MonteCarlo {
            samples: samples.unwrap_or(defaults.monte_carlo_samples),
            seed,
        },
    };

    let focusing = resolution.focusing.unwrap_or_default();
    Ok(ResolutionConfig {
        algorithm,
        strategy,
        focusing: Focusing {
            mono_h: focusing.mono_h,
            mono_v: focusing.mono_v,
            ana_h: focusing.ana_h,
            ana_v: focusing.ana_v,
        },
        instrument: None,
    })
}

fn build_parameters(table: FileFitParameters) -> Result<ParameterSet> {
    let n = table.names.len();
    let check_len = |name: &str, len: Option<usize>| -> Result<()> {
        match len {
            Some(len) if len != n => Err(CliError::Config(format!(
                "`fit_parameters.{name}` has {len} entries but `names` has {n}."
            ))),
            _ => Ok(()),
        }
    };
    check_len("values", Some(table.values.len()))?;
    check_len("errors", table.errors.as_ref().map(Vec::len))?;
    check_len("fixed", table.fixed.as_ref().map(Vec::len))?;
    check_len("lower", table.lower.as_ref().map(Vec::len))?;
    check_len("upper", table.upper.as_ref().map(Vec::len))?;

    let bound = |list: &Option<Vec<f64>>, i: usize| {
        list.as_ref()
            .map(|values| values[i])
            .filter(|value| value.is_finite())
    };

    let mut set = ParameterSet::new();
    for (i, name) in table.names.iter().enumerate() {
        let lower = bound(&table.lower, i);
        let upper = bound(&table.upper, i);
        if let (Some(lo), Some(hi)) = (lower, upper) {
            if lo > hi {
                return Err(CliError::Config(format!(
                    "Parameter '{name}' has lower bound {lo} above upper bound {hi}."
                )));
            }
        }
        let param = ModelParameter::new(
            name.clone(),
            table.values[i],
            table.errors.as_ref().map_or(0.0, |errors| errors[i]),
        )
        .fixed(table.fixed.as_ref().is_some_and(|fixed| fixed[i]))
        .bounded(lower, upper);
        set.insert(param)
            .map_err(|e| CliError::Config(format!("fit_parameters: {e}")))?;
    }
    Ok(set)
}
