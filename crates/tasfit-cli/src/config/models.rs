use std::path::PathBuf;
use tasfit::engine::config::{FitConfig, SimulateConfig};
use tasfit::workflows::{JobInputs, JobOutputs};

/// Everything the `fit` command needs, with paths already resolved.
pub struct FitJob {
    pub inputs: JobInputs,
    pub outputs: JobOutputs,
    pub plugin_dirs: Vec<PathBuf>,
    pub core_config: FitConfig,
}

/// Everything the `simulate` command needs, with paths already resolved.
pub struct SimulateJob {
    pub inputs: JobInputs,
    pub outputs: JobOutputs,
    pub plugin_dirs: Vec<PathBuf>,
    pub core_config: SimulateConfig,
}
