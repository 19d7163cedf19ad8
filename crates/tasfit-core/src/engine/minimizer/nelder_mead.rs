//! Downhill simplex (Nelder–Mead) minimizer driven one evaluation at a time.
//!
//! # Algorithm
//!
//! The simplex of `n + 1` vertices is kept sorted best-first. Each iteration
//! reflects the worst vertex through the centroid of the others and then,
//! depending on how the reflected point ranks, expands, accepts it,
//! contracts outside or inside, or shrinks the whole simplex toward the best
//! vertex. An iteration ends when the worst vertex was replaced (or the shrink
//! finished), at which point the simplex is re-sorted.
//!
//! # When to Use
//!
//! The default for fits of a handful of correlated parameters where the
//! statistic is smooth but gradients are unavailable.

use super::Minimizer;

const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;

#[derive(Debug, Clone)]
enum Phase {
    Init { next: usize },
    Reflect,
    Expand { xr: Vec<f64>, fr: f64 },
    ContractOutside { xr: Vec<f64>, fr: f64 },
    ContractInside,
    Shrink { next: usize },
}

#[derive(Debug, Clone)]
pub struct NelderMead {
    simplex: Vec<(Vec<f64>, f64)>,
    centroid: Vec<f64>,
    phase: Phase,
    pending: Vec<f64>,
    best: (Vec<f64>, f64),
    iterations: usize,
}

impl NelderMead {
    /// Initial simplex: `start` plus one vertex displaced by `steps[i]` along
    /// each coordinate.
    pub fn new(start: Vec<f64>, steps: Vec<f64>) -> Self {
        let mut simplex = Vec::with_capacity(start.len() + 1);
        simplex.push((start.clone(), f64::INFINITY));
        for (i, step) in steps.iter().enumerate().take(start.len()) {
            let mut vertex = start.clone();
            vertex[i] += step;
            simplex.push((vertex, f64::INFINITY));
        }
        Self {
            centroid: vec![0.0; start.len()],
            phase: Phase::Init { next: 0 },
            pending: start.clone(),
            best: (start, f64::INFINITY),
            simplex,
            iterations: 0,
        }
    }

    fn dimension(&self) -> usize {
        self.simplex.len() - 1
    }

    fn toward(&self, from: &[f64], coefficient: f64) -> Vec<f64> {
        self.centroid
            .iter()
            .zip(from)
            .map(|(c, x)| c + coefficient * (x - c))
            .collect()
    }

    fn replace_worst(&mut self, x: Vec<f64>, value: f64) {
        let n = self.dimension();
        self.simplex[n] = (x, value);
    }

    fn start_iteration(&mut self) {
        self.simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
        let n = self.dimension();
        if n == 0 {
            self.pending = self.simplex[0].0.clone();
            self.phase = Phase::Init { next: 0 };
            return;
        }

        self.centroid.iter_mut().for_each(|c| *c = 0.0);
        for (vertex, _) in &self.simplex[..n] {
            for (c, x) in self.centroid.iter_mut().zip(vertex) {
                *c += x / n as f64;
            }
        }
        self.pending = self.toward(&self.simplex[n].0, -REFLECTION);
        self.phase = Phase::Reflect;
    }

    fn finish_iteration(&mut self) {
        self.iterations += 1;
        self.start_iteration();
    }

    fn start_shrink(&mut self) {
        let best = self.simplex[0].0.clone();
        for (vertex, value) in self.simplex.iter_mut().skip(1) {
            for (x, b) in vertex.iter_mut().zip(&best) {
                *x = b + SHRINK * (*x - b);
            }
            *value = f64::INFINITY;
        }
        self.pending = self.simplex[1].0.clone();
        self.phase = Phase::Shrink { next: 1 };
    }
}

impl Minimizer for NelderMead {
    fn ask(&mut self) -> Vec<f64> {
        self.pending.clone()
    }

    fn tell(&mut self, value: f64) {
        let value = if value.is_nan() { f64::INFINITY } else { value };
        if value < self.best.1 {
            self.best = (self.pending.clone(), value);
        }

        let n = self.dimension();
        let point = std::mem::take(&mut self.pending);
        match std::mem::replace(&mut self.phase, Phase::Reflect) {
            Phase::Init { next } => {
                self.simplex[next].1 = value;
                if next < n {
                    self.pending = self.simplex[next + 1].0.clone();
                    self.phase = Phase::Init { next: next + 1 };
                } else {
                    self.start_iteration();
                }
            }
            Phase::Reflect => {
                let best = self.simplex[0].1;
                let second_worst = self.simplex[n - 1].1;
                let worst = self.simplex[n].1;
                if value < best {
                    self.pending = self.toward(&point, EXPANSION);
                    self.phase = Phase::Expand { xr: point, fr: value };
                } else if value < second_worst {
                    self.replace_worst(point, value);
                    self.finish_iteration();
                } else if value < worst {
                    self.pending = self.toward(&point, CONTRACTION);
                    self.phase = Phase::ContractOutside { xr: point, fr: value };
                } else {
                    self.pending = self.toward(&self.simplex[n].0, CONTRACTION);
                    self.phase = Phase::ContractInside;
                }
            }
            Phase::Expand { xr, fr } => {
                if value < fr {
                    self.replace_worst(point, value);
                } else {
                    self.replace_worst(xr, fr);
                }
                self.finish_iteration();
            }
            Phase::ContractOutside { fr, .. } => {
                if value <= fr {
                    self.replace_worst(point, value);
                    self.finish_iteration();
                } else {
                    self.start_shrink();
                }
            }
            Phase::ContractInside => {
                if value < self.simplex[n].1 {
                    self.replace_worst(point, value);
                    self.finish_iteration();
                } else {
                    self.start_shrink();
                }
            }
            Phase::Shrink { next } => {
                self.simplex[next].1 = value;
                if next < n {
                    self.pending = self.simplex[next + 1].0.clone();
                    self.phase = Phase::Shrink { next: next + 1 };
                } else {
                    self.finish_iteration();
                }
            }
        }
    }

    fn best(&self) -> (&[f64], f64) {
        (&self.best.0, self.best.1)
    }

    fn iterations(&self) -> usize {
        self.iterations
    }

    /// Half the extent of the simplex along each coordinate.
    fn spread(&self) -> Vec<f64> {
        (0..self.dimension())
            .map(|i| {
                let (lo, hi) = self
                    .simplex
                    .iter()
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (x, _)| {
                        (lo.min(x[i]), hi.max(x[i]))
                    });
                0.5 * (hi - lo)
            })
            .collect()
    }
}
