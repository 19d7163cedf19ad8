pub mod fit;
pub mod plugins;
pub mod simulate;

use std::fmt::Write as _;
use std::path::PathBuf;
use tasfit::core::models::params::ParameterSet;
use tasfit::core::sqw::loader::PluginLoader;
use tasfit::engine::fit::CancelToken;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A loader with the built-in models and `dirs` on its search path.
pub(crate) fn plugin_loader(dirs: &[PathBuf]) -> PluginLoader {
    let mut loader = PluginLoader::with_builtins();
    for dir in dirs {
        debug!(path = %dir.display(), "Adding plugin search path");
        loader.add_search_path(dir.clone());
    }
    loader
}

/// Cancels `token` on the first Ctrl-C. Abort the handle once the guarded
/// work is done.
pub(crate) fn cancel_on_ctrl_c(token: CancelToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received; stopping after the current evaluation.");
                token.cancel();
            }
            Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
        }
    })
}

/// Fixed-width table of parameter values and errors.
pub(crate) fn format_parameter_table(params: &ParameterSet) -> String {
    let width = params
        .iter()
        .map(|p| p.name.len())
        .max()
        .unwrap_or(0)
        .max("parameter".len());
    let mut table = format!("  {:<width$}  {:>14}  {:>12}\n", "parameter", "value", "error");
    for p in params.iter() {
        let error = if p.fixed {
            "(fixed)".to_string()
        } else {
            format!("{:.6e}", p.error)
        };
        let _ = writeln!(table, "  {:<width$}  {:>14.6}  {:>12}", p.name, p.value, error);
    }
    table
}
