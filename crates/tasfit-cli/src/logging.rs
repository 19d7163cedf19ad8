use crate::error::{CliError, Result};
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{
    filter::{LevelFilter, Targets},
    fmt,
    prelude::*,
};

/// Library and CLI records share this target prefix.
const FIT_TARGET: &str = "tasfit";

/// Terminal level for the `-v` count; `-q` keeps errors only.
pub fn level_filter(verbosity: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::ERROR;
    }
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Log-file filter. Fit records are kept down to `debug` whatever the
/// terminal shows, so a log file always carries the iteration history;
/// records from dependencies stop at `info` unless the terminal asks for more.
pub fn file_filter(terminal: LevelFilter) -> Targets {
    Targets::new()
        .with_default(terminal.max(LevelFilter::INFO))
        .with_target(FIT_TARGET, terminal.max(LevelFilter::DEBUG))
}

pub fn setup_logging(verbosity: u8, quiet: bool, log_file: Option<&Path>) -> Result<()> {
    let terminal = level_filter(verbosity, quiet);
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(false)
        .compact()
        .with_filter(terminal);

    let file_layer = match log_file {
        Some(path) => {
            let file = File::create(path).map_err(CliError::Io)?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_thread_ids(true)
                    .with_target(true)
                    .with_filter(file_filter(terminal)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}
