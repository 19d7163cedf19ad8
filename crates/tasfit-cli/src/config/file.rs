use crate::error::{CliError, Result};
use crate::utils::parser;
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileInputConfig {
    pub scan: Option<String>,
    pub instrument: Option<String>,
    pub model: Option<String>,
    pub model_config: Option<String>,
    pub counts_column: Option<String>,
    pub monitor_column: Option<String>,
    pub normalize_to_monitor: Option<bool>,
    #[serde(default)]
    pub plugin_dirs: Vec<String>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileOutputConfig {
    pub curve: Option<String>,
    pub report: Option<String>,
    pub iteration_log: Option<String>,
    pub interpolated_curve: Option<String>,
    pub interpolated_points: Option<usize>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileMonteCarloConfig {
    pub samples: Option<usize>,
    pub seed: Option<u64>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FileMinimizer {
    Simplex,
    Pattern,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileFitterConfig {
    pub minimizer: Option<FileMinimizer>,
    /// Error estimation level: 0 step spread, 1 Hessian, 2 central Hessian.
    pub strategy: Option<u8>,
    pub max_calls: Option<usize>,
    pub tolerance: Option<f64>,
    pub patience: Option<usize>,
    pub error_floor: Option<f64>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FileAlgorithm {
    CooperNathans,
    Fixed,
    None,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FileSampling {
    Quadrature,
    MonteCarlo,
}

#[derive(Deserialize, Debug, Default, Clone, Copy)]
#[serde(deny_unknown_fields)]
pub struct FileFocusing {
    #[serde(default)]
    pub mono_h: bool,
    #[serde(default)]
    pub mono_v: bool,
    #[serde(default)]
    pub ana_h: bool,
    #[serde(default)]
    pub ana_v: bool,
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(deny_unknown_fields)]
pub struct FileFixedWidths {
    pub q_par: f64,
    pub q_perp: f64,
    pub q_z: f64,
    pub e: f64,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileResolutionConfig {
    pub algorithm: Option<FileAlgorithm>,
    pub strategy: Option<FileSampling>,
    pub order: Option<usize>,
    pub focusing: Option<FileFocusing>,
    pub fixed: Option<FileFixedWidths>,
}

/// Parallel lists describing the fit parameters, in the same layout as the
/// `[fit_parameters]` table of a parameter report.
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileFitParameters {
    pub names: Vec<String>,
    pub values: Vec<f64>,
    #[serde(default)]
    pub errors: Option<Vec<f64>>,
    #[serde(default)]
    pub fixed: Option<Vec<bool>>,
    #[serde(default)]
    pub lower: Option<Vec<f64>>,
    #[serde(default)]
    pub upper: Option<Vec<f64>>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub input: Option<FileInputConfig>,
    pub output: Option<FileOutputConfig>,
    pub montecarlo: Option<FileMonteCarloConfig>,
    pub fitter: Option<FileFitterConfig>,
    pub resolution: Option<FileResolutionConfig>,
    pub fit_parameters: Option<FileFitParameters>,
}

impl FileConfig {
    /// Reads a job file and applies `-S key=value` overrides before the
    /// typed sections are checked. A `[result]` table is dropped, so a
    /// parameter report can seed a new job.
    pub fn from_file(path: &Path, set_values: &[String]) -> Result<Self> {
        debug!("Loading job configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        let mut table: toml::Table =
            toml::from_str(&content).map_err(|e| CliError::FileParsing {
                path: path.to_path_buf(),
                source: e.into(),
            })?;
        table.remove("result");

        for raw in set_values {
            let set = parser::parse_set_value(raw).map_err(|e| CliError::Config(e.to_string()))?;
            debug!(key = %set.path.join("."), "Applying command-line override");
            parser::apply_set_value(&mut table, set)
                .map_err(|e| CliError::Config(e.to_string()))?;
        }

        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| CliError::FileParsing {
                path: path.to_path_buf(),
                source: e.into(),
            })
    }
}
