use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tasfit::engine::progress::{IterationRecord, Progress, ProgressCallback};
use tracing::warn;

const SPINNER_TICK_MS: u64 = 80;

/// What a running fit has reported so far.
#[derive(Debug, Default, Clone, PartialEq)]
struct FitStatus {
    budget: u64,
    calls: u64,
    iteration: usize,
    best: Option<f64>,
}

impl FitStatus {
    fn start(budget: u64) -> Self {
        Self {
            budget,
            ..Self::default()
        }
    }

    fn record(&mut self, record: &IterationRecord) {
        self.iteration = record.iteration;
        self.calls = self.calls.max(record.calls as u64);
        if self.best.is_none_or(|best| record.statistic < best) {
            self.best = Some(record.statistic);
        }
    }

    fn running(&self) -> String {
        match self.best {
            Some(best) => format!("iter {:>4}  χ² {best:.6e}", self.iteration),
            None => "first simplex".to_string(),
        }
    }

    /// The bar is left where the fit stopped; an early stop shows as a
    /// partly filled call budget.
    fn finished(&self) -> String {
        let best = self
            .best
            .map_or_else(|| "no iteration completed".to_string(), |b| format!("best χ² {b:.6e}"));
        format!("{} of {} calls, {best}", self.calls, self.budget)
    }
}

struct Display {
    bar: ProgressBar,
    status: FitStatus,
}

/// Renders engine progress on stderr: a spinner per phase and a call-budget
/// bar while the minimizer runs.
#[derive(Clone)]
pub struct CliProgressHandler {
    display: Arc<Mutex<Display>>,
}

impl CliProgressHandler {
    pub fn new() -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr())
            .with_style(Self::spinner_style());
        bar.finish_and_clear();
        Self {
            display: Arc::new(Mutex::new(Display {
                bar,
                status: FitStatus::default(),
            })),
        }
    }

    pub fn get_callback(&self) -> ProgressCallback<'static> {
        let display = Arc::clone(&self.display);

        Box::new(move |progress: Progress| {
            let Ok(mut display) = display.lock() else {
                warn!("Progress display mutex was poisoned; dropping update.");
                return;
            };
            let Display { bar, status } = &mut *display;

            match progress {
                Progress::PhaseStart { name } => {
                    bar.reset();
                    bar.set_length(0);
                    bar.set_style(Self::spinner_style());
                    bar.enable_steady_tick(Duration::from_millis(SPINNER_TICK_MS));
                    bar.set_message(name.to_string());
                }
                Progress::PhaseFinish => {
                    bar.disable_steady_tick();
                    if !bar.is_finished() {
                        bar.finish_with_message(format!("{} done", bar.message()));
                    }
                }
                Progress::TaskStart { total_steps } => {
                    *status = FitStatus::start(total_steps);
                    bar.disable_steady_tick();
                    bar.reset();
                    bar.set_length(total_steps);
                    bar.set_style(Self::budget_style());
                    bar.set_message(status.running());
                }
                Progress::TaskIncrement => {
                    bar.inc(1);
                    status.calls = bar.position();
                }
                Progress::TaskFinish => {
                    status.calls = bar.position();
                    bar.abandon_with_message(status.finished());
                }
                Progress::Iteration(record) => {
                    status.record(&record);
                    bar.set_message(status.running());
                }
                Progress::Message(msg) => {
                    bar.println(format!("  {msg}"));
                }
            }
        })
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }

    fn budget_style() -> ProgressStyle {
        ProgressStyle::with_template("{msg:<28} [{bar:32.cyan/blue}] {pos}/{len} calls {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ")
    }
}

impl Default for CliProgressHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn record(iteration: usize, calls: usize, statistic: f64) -> IterationRecord {
        IterationRecord {
            iteration,
            calls,
            statistic,
            values: vec![1.0, 2.0],
        }
    }

    #[test]
    fn status_keeps_the_best_statistic() {
        let mut status = FitStatus::start(200);
        assert_eq!(status.running(), "first simplex");
        for (iteration, calls, chi2) in [(1, 4, 30.0), (2, 6, 12.5), (3, 7, 12.5)] {
            status.record(&record(iteration, calls, chi2));
        }
        assert_eq!(status.best, Some(12.5));
        assert_eq!(status.iteration, 3);
        assert_eq!(status.calls, 7);
        assert_eq!(status.finished(), "7 of 200 calls, best χ² 1.250000e1");
    }

    #[test]
    fn converged_fit_leaves_the_budget_partly_used() {
        let handler = CliProgressHandler::new();
        let callback = handler.get_callback();

        callback(Progress::PhaseStart { name: "Fitting" });
        callback(Progress::TaskStart { total_steps: 100 });
        for _ in 0..7 {
            callback(Progress::TaskIncrement);
        }
        callback(Progress::Iteration(record(3, 7, 12.5)));
        {
            let display = handler.display.lock().unwrap();
            assert_eq!(display.bar.length(), Some(100));
            assert_eq!(display.bar.position(), 7);
            assert!(display.bar.message().starts_with("iter    3"));
        }

        callback(Progress::TaskFinish);
        callback(Progress::PhaseFinish);
        let display = handler.display.lock().unwrap();
        assert!(display.bar.is_finished());
        assert_eq!(display.bar.position(), 7);
        assert_eq!(display.bar.message(), "7 of 100 calls, best χ² 1.250000e1");
    }

    #[test]
    fn exhausted_budget_fills_the_bar() {
        let handler = CliProgressHandler::new();
        let callback = handler.get_callback();

        callback(Progress::TaskStart { total_steps: 3 });
        for _ in 0..3 {
            callback(Progress::TaskIncrement);
        }
        callback(Progress::TaskFinish);
        let display = handler.display.lock().unwrap();
        assert_eq!(display.bar.position(), 3);
        assert_eq!(display.status.calls, 3);
        assert!(display.bar.message().starts_with("3 of 3 calls"));
    }

    #[test]
    fn phases_without_a_fit_end_as_done() {
        let handler = CliProgressHandler::new();
        let callback = handler.get_callback();

        thread::spawn(move || {
            callback(Progress::PhaseStart { name: "Resolution" });
            callback(Progress::PhaseFinish);
        })
        .join()
        .unwrap();

        let display = handler.display.lock().unwrap();
        assert!(display.bar.is_finished());
        assert_eq!(display.bar.message(), "Resolution done");
        assert_eq!(display.status, FitStatus::default());
    }
}
