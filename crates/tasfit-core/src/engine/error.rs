use thiserror::Error;

use super::config::ConfigError;
use super::convolution::ConvolutionError;
use crate::core::io::instrument::InstrumentError;
use crate::core::io::report::ReportError;
use crate::core::io::scan_file::ScanFileError;
use crate::core::models::params::ParamError;
use crate::core::models::scan::ScanError;
use crate::core::resolution::ResolutionError;
use crate::core::sqw::loader::PluginError;
use std::path::PathBuf;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to load scan '{path}': {source}")]
    ScanLoad {
        path: PathBuf,
        #[source]
        source: ScanFileError,
    },

    #[error("Instrument error: {0}")]
    Instrument(#[from] InstrumentError),

    #[error("Model error: {0}")]
    Plugin(#[from] PluginError),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Parameter error: {0}")]
    Parameters(#[from] ParamError),

    #[error("Resolution setup failed: {0}")]
    ResolutionSetup(#[from] ResolutionError),

    #[error("Resolution failed at scan point {index}: {source}")]
    Resolution {
        index: usize,
        #[source]
        source: ResolutionError,
    },

    #[error("Non-finite prediction at scan point {index} with parameters {parameters:?}: {source}")]
    NonFiniteResult {
        index: usize,
        parameters: Vec<(String, f64)>,
        #[source]
        source: ConvolutionError,
    },

    #[error("Non-finite statistic {statistic} with parameters {parameters:?}")]
    NonFiniteStatistic {
        statistic: f64,
        parameters: Vec<(String, f64)>,
    },

    #[error("Model '{model}' reports an invalid state")]
    InvalidModel { model: String },

    #[error("Failed to write output: {0}")]
    Output(#[from] ReportError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal logic error: {0}")]
    Internal(String),
}
