use super::{cancel_on_ctrl_c, format_parameter_table, plugin_loader};
use crate::cli::FitArgs;
use crate::config;
use crate::error::{CliError, Result};
use crate::utils::progress::CliProgressHandler;
use std::path::PathBuf;
use tasfit::engine::fit::{CancelToken, FitResult, FitState};
use tasfit::engine::progress::ProgressReporter;
use tasfit::workflows;
use tracing::{info, warn};

pub async fn run(args: FitArgs, plugin_dirs: &[PathBuf]) -> Result<()> {
    info!("Merging job configuration from file and CLI arguments...");
    let job = config::build_fit_job(&args, plugin_dirs)?;
    let loader = plugin_loader(&job.plugin_dirs);

    let cancel = CancelToken::new();
    let interrupt = cancel_on_ctrl_c(cancel.clone());

    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    println!(
        "Fitting model '{}' to {}...",
        job.inputs.model,
        job.inputs.scan.display()
    );
    info!("Invoking the core fit workflow...");

    let outcome = tokio::task::block_in_place(|| {
        workflows::fit::run(
            &job.inputs,
            &job.core_config,
            &loader,
            &job.outputs,
            cancel,
            &reporter,
        )
    });
    interrupt.abort();
    let result = outcome?;

    print_summary(&result);
    for (label, path) in [
        ("Model curve", &job.outputs.curve),
        ("Parameter report", &job.outputs.report),
        ("Iteration log", &job.outputs.iteration_log),
        ("Interpolated curve", &job.outputs.interpolated_curve),
    ] {
        if let Some(path) = path.as_ref().filter(|p| p.exists()) {
            println!("  {} written to: {}", label, path.display());
        }
    }

    match result.status {
        FitState::Converged => Ok(()),
        FitState::MaxIterationsReached => {
            warn!(calls = result.calls, "Call budget exhausted before convergence");
            println!("Warning: the call budget was exhausted before convergence.");
            Ok(())
        }
        FitState::Failed => Err(CliError::FitFailed(
            result.message.unwrap_or_else(|| "unknown failure".to_string()),
        )),
        FitState::Aborted => Err(CliError::Cancelled),
        FitState::Idle | FitState::Evaluating => Err(CliError::Other(anyhow::anyhow!(
            "fit returned in non-terminal state '{}'",
            result.status
        ))),
    }
}

fn print_summary(result: &FitResult) {
    println!(
        "Fit {} after {} calls ({} iterations).",
        result.status, result.calls, result.iterations
    );
    println!(
        "  χ² = {:.6e}   reduced χ² = {:.6e}   ({} points, {} free)",
        result.statistic,
        result.reduced_statistic,
        result.points,
        result.free_names.len()
    );
    print!("{}", format_parameter_table(&result.parameters));
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;
    use std::fs;
    use std::path::Path;

    pub(crate) fn write_peak_job(dir: &Path) -> PathBuf {
        let mut scan = String::from(
            "# lattice = 5 5 5\n# angles = 90 90 90\n# kf = 2.662\nh,k,l,ki,counts,monitor\n",
        );
        for i in 0..5 {
            let h = 1.0 + 0.125 * i as f64;
            let counts = 100.0 * (-0.5 * ((h - 1.25) / 0.1_f64).powi(2)).exp() + 5.0;
            scan.push_str(&format!("{h},0,0,2.662,{counts},1000\n"));
        }
        fs::write(dir.join("peak.scan"), scan).unwrap();
        fs::write(dir.join("gauss.toml"), "[parameters]\nsigma_q = 0.1\n").unwrap();

        let job = r#"
            [input]
            scan = "peak.scan"
            model = "gauss"
            model_config = "gauss.toml"

            [output]
            curve = "curve.csv"
            report = "result.toml"
            iteration_log = "iterations.csv"

            [fitter]
            max_calls = 3000
            tolerance = 1e-9
            patience = 30

            [fit_parameters]
            names = ["scale", "offset", "h0"]
            values = [80.0, 2.0, 1.2]
            errors = [10.0, 1.0, 0.05]
        "#;
        let path = dir.join("job.toml");
        fs::write(&path, job).unwrap();
        path
    }

    fn fit_args(job: &Path, extra: &[&str]) -> FitArgs {
        let mut argv = vec!["tasfit", "fit", "-c", job.to_str().unwrap()];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Commands::Fit(args) => args,
            _ => panic!("Expected 'fit' subcommand"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fits_the_peak_and_writes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let job = write_peak_job(dir.path());

        run(fit_args(&job, &[]), &[]).await.unwrap();

        let report: toml::Table =
            toml::from_str(&fs::read_to_string(dir.path().join("result.toml")).unwrap()).unwrap();
        assert_eq!(report["result"]["status"].as_str(), Some("converged"));
        let h0 = report["fit_parameters"]["values"][2].as_float().unwrap();
        assert!((h0 - 1.25).abs() < 1e-3, "h0 = {h0}");
        assert!(dir.path().join("curve.csv").exists());
        assert!(dir.path().join("iterations.csv").exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn exhausted_budget_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let job = write_peak_job(dir.path());

        run(fit_args(&job, &["--max-calls", "5"]), &[])
            .await
            .unwrap();

        let report: toml::Table =
            toml::from_str(&fs::read_to_string(dir.path().join("result.toml")).unwrap()).unwrap();
        assert_eq!(
            report["result"]["status"].as_str(),
            Some("max-iterations-reached")
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_model_surfaces_as_engine_error() {
        let dir = tempfile::tempdir().unwrap();
        let job = write_peak_job(dir.path());

        let result = run(fit_args(&job, &["-S", "input.model=magnon"]), &[]).await;
        assert!(matches!(result, Err(CliError::Engine(_))));
    }
}
