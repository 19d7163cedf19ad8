//! Derivative-free minimizers behind an ask/tell interface.
//!
//! The fit loop owns evaluation: it asks the minimizer for a trial point,
//! computes the statistic there and tells the value back. The minimizer never
//! calls the objective itself, which keeps cancellation, budgeting and error
//! handling in one place.

pub mod nelder_mead;
pub mod pattern_search;

use super::config::MinimizerKind;

pub use nelder_mead::NelderMead;
pub use pattern_search::PatternSearch;

pub trait Minimizer: Send {
    /// The next point to evaluate. Repeated calls without an intervening
    /// [`tell`](Minimizer::tell) return the same point.
    fn ask(&mut self) -> Vec<f64>;

    /// Reports the statistic at the last asked point.
    fn tell(&mut self, value: f64);

    /// Best point evaluated so far and its statistic (`+∞` before any tell).
    fn best(&self) -> (&[f64], f64);

    /// Number of completed iterations.
    fn iterations(&self) -> usize;

    /// Per-coordinate spread of the current search pattern.
    fn spread(&self) -> Vec<f64>;
}

/// A boxed minimizer of the requested kind starting at `start` with initial
/// step sizes `steps`. Zero steps are replaced by a small fraction of the
/// start value.
pub fn build(kind: MinimizerKind, start: Vec<f64>, steps: Vec<f64>) -> Box<dyn Minimizer> {
    let steps = sanitize_steps(&start, &steps);
    match kind {
        MinimizerKind::Simplex => Box::new(NelderMead::new(start, steps)),
        MinimizerKind::Pattern => Box::new(PatternSearch::new(start, steps)),
    }
}

const RELATIVE_STEP: f64 = 0.1;
const MIN_STEP: f64 = 1e-3;

fn sanitize_steps(start: &[f64], steps: &[f64]) -> Vec<f64> {
    start
        .iter()
        .zip(steps)
        .map(|(&x, &s)| {
            if s.is_finite() && s != 0.0 {
                s.abs()
            } else {
                (RELATIVE_STEP * x.abs()).max(MIN_STEP)
            }
        })
        .collect()
}
