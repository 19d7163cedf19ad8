use super::{format_parameter_table, plugin_loader};
use crate::cli::SimulateArgs;
use crate::config;
use crate::error::Result;
use crate::utils::progress::CliProgressHandler;
use std::path::PathBuf;
use tasfit::engine::progress::ProgressReporter;
use tasfit::workflows;
use tracing::info;

pub async fn run(args: SimulateArgs, plugin_dirs: &[PathBuf]) -> Result<()> {
    let job = config::build_simulate_job(&args, plugin_dirs)?;
    let loader = plugin_loader(&job.plugin_dirs);

    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    println!(
        "Simulating model '{}' on {}...",
        job.inputs.model,
        job.inputs.scan.display()
    );
    let simulation = tokio::task::block_in_place(|| {
        workflows::simulate::run(
            &job.inputs,
            &job.core_config,
            &loader,
            &job.outputs,
            &reporter,
        )
    })?;
    info!(
        points = simulation.curve.len(),
        statistic = simulation.statistic,
        "Simulation finished"
    );

    println!(
        "Evaluated {} scan points; χ² against the measurement = {:.6e}",
        simulation.curve.len(),
        simulation.statistic
    );
    print!("{}", format_parameter_table(&job.core_config.parameters));
    if let Some(path) = &job.outputs.curve {
        println!("  Model curve written to: {}", path.display());
    }
    if let (Some(rows), Some(path)) = (&simulation.interpolated, &job.outputs.interpolated_curve) {
        println!(
            "  Interpolated curve ({} points) written to: {}",
            rows.len(),
            path.display()
        );
    }
    Ok(())
}
