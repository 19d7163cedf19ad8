//! Compass (coordinate pattern) search.
//!
//! # Algorithm
//!
//! Polls `center ± step_i` along each coordinate in turn. The first probe
//! that improves on the centre becomes the new centre and polling resumes in
//! the same direction. When a full poll of all `2n` directions fails, every
//! step is halved. Each accepted move and each contraction counts as one
//! iteration.
//!
//! # When to Use
//!
//! Robust on noisy statistics (Monte Carlo resolution sampling) and for
//! parameters that are only weakly coupled.

use super::Minimizer;

const CONTRACTION: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct PatternSearch {
    center: Vec<f64>,
    center_value: f64,
    steps: Vec<f64>,
    pending: Vec<f64>,
    direction: usize,
    failures: usize,
    started: bool,
    iterations: usize,
}

impl PatternSearch {
    pub fn new(start: Vec<f64>, steps: Vec<f64>) -> Self {
        Self {
            pending: start.clone(),
            center: start,
            center_value: f64::INFINITY,
            steps,
            direction: 0,
            failures: 0,
            started: false,
            iterations: 0,
        }
    }

    fn probe(&self, direction: usize) -> Vec<f64> {
        let mut x = self.center.clone();
        if !x.is_empty() {
            let axis = direction / 2;
            let sign = if direction % 2 == 0 { 1.0 } else { -1.0 };
            x[axis] += sign * self.steps[axis];
        }
        x
    }
}

impl Minimizer for PatternSearch {
    fn ask(&mut self) -> Vec<f64> {
        self.pending.clone()
    }

    fn tell(&mut self, value: f64) {
        let value = if value.is_nan() { f64::INFINITY } else { value };
        let directions = 2 * self.center.len();

        if !self.started {
            self.started = true;
            self.center_value = value;
        } else if value < self.center_value {
            self.center = std::mem::take(&mut self.pending);
            self.center_value = value;
            self.failures = 0;
            self.iterations += 1;
        } else {
            self.failures += 1;
            self.direction = (self.direction + 1) % directions.max(1);
            if self.failures >= directions {
                self.steps.iter_mut().for_each(|s| *s *= CONTRACTION);
                self.failures = 0;
                self.iterations += 1;
            }
        }
        self.pending = self.probe(self.direction);
    }

    fn best(&self) -> (&[f64], f64) {
        (&self.center, self.center_value)
    }

    fn iterations(&self) -> usize {
        self.iterations
    }

    fn spread(&self) -> Vec<f64> {
        self.steps.clone()
    }
}
