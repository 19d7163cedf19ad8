use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "The tasfit developers",
    version,
    about = "tasfit - resolution-convolution fitting of triple-axis neutron scattering scans.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Set the number of threads for parallel computation.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,

    /// Additional directory to search for model libraries. Can be repeated.
    #[arg(long = "plugin-dir", global = true, value_name = "DIR")]
    pub plugin_dirs: Vec<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fit a scattering-function model to a measured scan.
    Fit(FitArgs),
    /// Evaluate a model with its initial parameters, without fitting.
    Simulate(SimulateArgs),
    /// List the available scattering-function models.
    Plugins,
}

/// Options shared by every command that reads a job file.
#[derive(Args, Debug, Clone)]
pub struct JobArgs {
    /// Path to the job configuration file in TOML format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub config: PathBuf,

    /// Override the Monte-Carlo sample count per scan point.
    #[arg(long, value_name = "INT")]
    pub samples: Option<usize>,

    /// Override the Monte-Carlo seed.
    #[arg(long, value_name = "INT")]
    pub seed: Option<u64>,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S fitter.tolerance=1e-5
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

/// Arguments for the `fit` subcommand.
#[derive(Args, Debug)]
pub struct FitArgs {
    #[command(flatten)]
    pub job: JobArgs,

    /// Override the maximum number of model evaluations.
    #[arg(long, value_name = "INT")]
    pub max_calls: Option<usize>,
}

/// Arguments for the `simulate` subcommand.
#[derive(Args, Debug)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub job: JobArgs,

    /// Also evaluate the model on this many points along the scan path.
    #[arg(long, value_name = "INT")]
    pub interpolated_points: Option<usize>,
}
