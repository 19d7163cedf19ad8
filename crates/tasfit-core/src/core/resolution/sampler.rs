use super::{
    FixedWidths, Focusing, ResolutionAlgorithm, ResolutionError, SamplingStrategy, cooper_nathans,
};
use crate::core::io::instrument::Instrument;
use crate::core::models::point::ScanPoint;
use crate::core::models::sample::{Sample, ScatteringPlane};
use nalgebra::{Matrix4, Vector3, Vector4};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use tracing::warn;

/// Smallest standard deviation kept on any axis of the ellipsoid.
pub const MIN_WIDTH: f64 = 1e-6;

const MIN_Q: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolutionSample {
    pub point: ScanPoint,
    pub weight: f64,
}

/// Weighted points drawn from the resolution volume of one nominal point.
/// Weights are non-negative and sum to one.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionSampleSet {
    samples: Vec<ResolutionSample>,
}

impl ResolutionSampleSet {
    /// Builds a set, normalizing the weights. A set whose weights do not sum
    /// to a positive finite value falls back to equal weights.
    pub fn new(mut samples: Vec<ResolutionSample>) -> Self {
        for s in &mut samples {
            s.weight = s.weight.max(0.0);
        }
        let total: f64 = samples.iter().map(|s| s.weight).sum();
        if total.is_finite() && total > 0.0 {
            for s in &mut samples {
                s.weight /= total;
            }
        } else if !samples.is_empty() {
            let equal = 1.0 / samples.len() as f64;
            for s in &mut samples {
                s.weight = equal;
            }
        }
        Self { samples }
    }

    /// The nominal point alone, with weight one.
    pub fn nominal(point: ScanPoint) -> Self {
        Self {
            samples: vec![ResolutionSample { point, weight: 1.0 }],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolutionSample> {
        self.samples.iter()
    }

    pub fn as_slice(&self) -> &[ResolutionSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn total_weight(&self) -> f64 {
        self.samples.iter().map(|s| s.weight).sum()
    }
}

/// Nodes and weights of the probabilists' Gauss–Hermite rule, exact for
/// polynomial moments of a standard normal up to degree `2·order − 1`.
pub fn gauss_hermite(order: usize) -> Result<(Vec<f64>, Vec<f64>), ResolutionError> {
    let rule = match order {
        1 => (vec![0.0], vec![1.0]),
        2 => (vec![-1.0, 1.0], vec![0.5, 0.5]),
        3 => {
            let x = 3.0_f64.sqrt();
            (vec![-x, 0.0, x], vec![1.0 / 6.0, 2.0 / 3.0, 1.0 / 6.0])
        }
        4 => {
            let s6 = 6.0_f64.sqrt();
            let (inner, outer) = (3.0 - s6, 3.0 + s6);
            let (wi, wo) = (1.0 / (4.0 * inner), 1.0 / (4.0 * outer));
            (
                vec![-outer.sqrt(), -inner.sqrt(), inner.sqrt(), outer.sqrt()],
                vec![wo, wi, wi, wo],
            )
        }
        5 => {
            let s10 = 10.0_f64.sqrt();
            let (inner, outer) = ((5.0 - s10).sqrt(), (5.0 + s10).sqrt());
            let (wi, wo) = ((7.0 + 2.0 * s10) / 60.0, (7.0 - 2.0 * s10) / 60.0);
            (
                vec![-outer, -inner, 0.0, inner, outer],
                vec![wo, wi, 8.0 / 15.0, wi, wo],
            )
        }
        other => return Err(ResolutionError::UnsupportedOrder(other)),
    };
    Ok(rule)
}

/// Produces resolution sample sets for the points of one scan.
#[derive(Debug, Clone)]
pub struct ResolutionSampler {
    sample: Sample,
    plane: ScatteringPlane,
    normal: Vector3<f64>,
    instrument: Option<Instrument>,
    algorithm: ResolutionAlgorithm,
    focusing: Focusing,
    strategy: SamplingStrategy,
}

impl ResolutionSampler {
    pub fn new(
        sample: Sample,
        plane: ScatteringPlane,
        instrument: Option<Instrument>,
        algorithm: ResolutionAlgorithm,
        focusing: Focusing,
        strategy: SamplingStrategy,
    ) -> Result<Self, ResolutionError> {
        match strategy {
            SamplingStrategy::Quadrature { order } => {
                gauss_hermite(order)?;
            }
            SamplingStrategy::MonteCarlo { samples: 0, .. } => {
                return Err(ResolutionError::NoSamples);
            }
            SamplingStrategy::MonteCarlo { .. } => {}
        }
        if algorithm == ResolutionAlgorithm::CooperNathans && instrument.is_none() {
            return Err(ResolutionError::MissingInstrument);
        }
        let normal = plane.normal(&sample)?;
        Ok(Self {
            sample,
            plane,
            normal,
            instrument,
            algorithm,
            focusing,
            strategy,
        })
    }

    pub fn strategy(&self) -> SamplingStrategy {
        self.strategy
    }

    pub fn algorithm(&self) -> &ResolutionAlgorithm {
        &self.algorithm
    }

    /// Resolution covariance in `(Q∥, Q⊥, Qz, E)`, or `None` when resolution
    /// is switched off.
    pub fn covariance(&self, point: &ScanPoint) -> Result<Option<Matrix4<f64>>, ResolutionError> {
        match &self.algorithm {
            ResolutionAlgorithm::None => Ok(None),
            ResolutionAlgorithm::Fixed(FixedWidths { q_par, q_perp, q_z, e }) => {
                Ok(Some(Matrix4::from_diagonal(&Vector4::new(
                    q_par * q_par,
                    q_perp * q_perp,
                    q_z * q_z,
                    e * e,
                ))))
            }
            ResolutionAlgorithm::CooperNathans => {
                let instrument = self
                    .instrument
                    .as_ref()
                    .ok_or(ResolutionError::MissingInstrument)?;
                let q = self.sample.q_length(point.hkl());
                cooper_nathans::covariance(instrument, &self.focusing, point, q).map(Some)
            }
        }
    }

    /// The weighted sample set around the `index`-th nominal point.
    pub fn sample(
        &self,
        point: &ScanPoint,
        index: usize,
    ) -> Result<ResolutionSampleSet, ResolutionError> {
        let Some(covariance) = self.covariance(point)? else {
            return Ok(ResolutionSampleSet::nominal(*point));
        };
        let Some(factor) = cholesky_factor(covariance) else {
            warn!(
                point = index,
                "Resolution covariance is degenerate; using the nominal point"
            );
            return Ok(ResolutionSampleSet::nominal(*point));
        };

        let offsets: Vec<(Vector4<f64>, f64)> = match self.strategy {
            SamplingStrategy::Quadrature { order } => {
                let (nodes, weights) = gauss_hermite(order)?;
                let mut grid = Vec::with_capacity(order.pow(4));
                for (&z0, &w0) in nodes.iter().zip(&weights) {
                    for (&z1, &w1) in nodes.iter().zip(&weights) {
                        for (&z2, &w2) in nodes.iter().zip(&weights) {
                            for (&z3, &w3) in nodes.iter().zip(&weights) {
                                let z = Vector4::new(z0, z1, z2, z3);
                                grid.push((factor * z, w0 * w1 * w2 * w3));
                            }
                        }
                    }
                }
                grid
            }
            SamplingStrategy::MonteCarlo { samples, seed } => {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(index as u64));
                (0..samples)
                    .map(|_| {
                        let z: Vector4<f64> =
                            Vector4::from_fn(|_, _| StandardNormal.sample(&mut rng));
                        (factor * z, 1.0)
                    })
                    .collect()
            }
        };

        let frame = self.frame(point);
        let drawn = offsets.len();
        let samples: Vec<ResolutionSample> = offsets
            .into_iter()
            .filter_map(|(x, weight)| {
                self.displace(point, &frame, &x)
                    .map(|point| ResolutionSample { point, weight })
            })
            .collect();
        if samples.is_empty() {
            warn!(
                point = index,
                "Every resolution sample lies beyond zero final energy; using the nominal point"
            );
            return Ok(ResolutionSampleSet::nominal(*point));
        }
        if samples.len() < drawn {
            warn!(
                point = index,
                dropped = drawn - samples.len(),
                drawn,
                "Resolution samples beyond zero final energy dropped"
            );
        }
        Ok(ResolutionSampleSet::new(samples))
    }

    /// Orthonormal-ish Cartesian axes `(Q̂, Q̂⊥, n̂)` at `point`.
    fn frame(&self, point: &ScanPoint) -> [Vector3<f64>; 3] {
        let q = self.sample.to_cartesian(point.hkl());
        let along = if q.norm() > MIN_Q {
            q.normalize()
        } else {
            self.plane.first_axis(&self.sample)
        };
        let perp = self.normal.cross(&along);
        let perp = if perp.norm() > MIN_Q {
            perp.normalize()
        } else {
            perp
        };
        [along, perp, self.normal]
    }

    fn displace(
        &self,
        point: &ScanPoint,
        frame: &[Vector3<f64>; 3],
        x: &Vector4<f64>,
    ) -> Option<ScanPoint> {
        let dq = frame[0] * x[0] + frame[1] * x[1] + frame[2] * x[2];
        let [dh, dk, dl] = self.sample.to_rlu(&dq);
        point.displaced(dh, dk, dl, x[3])
    }
}

/// Lower-triangular factor of the covariance after clamping each variance
/// to the minimal width. Falls back to the diagonal when the full matrix is
/// not positive definite, and gives up on non-finite input.
fn cholesky_factor(mut covariance: Matrix4<f64>) -> Option<Matrix4<f64>> {
    if covariance.iter().any(|v| !v.is_finite()) {
        return None;
    }
    for i in 0..4 {
        covariance[(i, i)] = covariance[(i, i)].max(MIN_WIDTH * MIN_WIDTH);
    }
    if let Some(cholesky) = covariance.cholesky() {
        return Some(cholesky.l());
    }
    warn!("Resolution covariance is not positive definite; dropping correlations");
    Some(Matrix4::from_diagonal(&covariance.diagonal().map(f64::sqrt)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::instrument::tests::thermal;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn cubic() -> Sample {
        Sample::new([5.0; 3], [90.0; 3]).unwrap()
    }

    fn fixed(widths: FixedWidths, strategy: SamplingStrategy) -> ResolutionSampler {
        ResolutionSampler::new(
            cubic(),
            ScatteringPlane::default(),
            None,
            ResolutionAlgorithm::Fixed(widths),
            Focusing::default(),
            strategy,
        )
        .unwrap()
    }

    const WIDTHS: FixedWidths = FixedWidths {
        q_par: 0.02,
        q_perp: 0.01,
        q_z: 0.05,
        e: 0.4,
    };

    fn nominal() -> ScanPoint {
        ScanPoint::from_wavevectors(1.0, 0.0, 0.0, 2.8, 2.662)
    }

    #[test]
    fn hermite_rules_reproduce_normal_moments() {
        for order in 1..=5 {
            let (x, w) = gauss_hermite(order).unwrap();
            assert_relative_eq!(w.iter().sum::<f64>(), 1.0, epsilon = 1e-14);
            let mean: f64 = x.iter().zip(&w).map(|(x, w)| x * w).sum();
            assert_relative_eq!(mean, 0.0, epsilon = 1e-14);
            if order >= 2 {
                let var: f64 = x.iter().zip(&w).map(|(x, w)| x * x * w).sum();
                assert_relative_eq!(var, 1.0, epsilon = 1e-12);
            }
            if order >= 3 {
                let kurt: f64 = x.iter().zip(&w).map(|(x, w)| x.powi(4) * w).sum();
                assert_relative_eq!(kurt, 3.0, epsilon = 1e-12);
            }
        }
        assert_eq!(gauss_hermite(6), Err(ResolutionError::UnsupportedOrder(6)));
    }

    #[test]
    fn quadrature_weights_sum_to_one() {
        for order in 1..=5 {
            let sampler = fixed(WIDTHS, SamplingStrategy::Quadrature { order });
            let set = sampler.sample(&nominal(), 0).unwrap();
            assert_eq!(set.len(), order.pow(4));
            assert_relative_eq!(set.total_weight(), 1.0, epsilon = 1e-12);
            assert!(set.iter().all(|s| s.weight >= 0.0));
        }
    }

    #[test]
    fn quadrature_reproduces_fixed_widths() {
        let sampler = fixed(WIDTHS, SamplingStrategy::Quadrature { order: 3 });
        let p = nominal();
        let set = sampler.sample(&p, 0).unwrap();
        let a_star = 2.0 * PI / 5.0;
        let moment = |f: &dyn Fn(&ScanPoint) -> f64| -> f64 {
            set.iter().map(|s| s.weight * f(&s.point)).sum()
        };
        assert_relative_eq!(moment(&|s: &ScanPoint| s.h - p.h), 0.0, epsilon = 1e-12);
        assert_relative_eq!(
            moment(&|s: &ScanPoint| (s.h - p.h).powi(2)),
            (WIDTHS.q_par / a_star).powi(2),
            max_relative = 1e-9
        );
        assert_relative_eq!(
            moment(&|s: &ScanPoint| (s.k - p.k).powi(2)),
            (WIDTHS.q_perp / a_star).powi(2),
            max_relative = 1e-9
        );
        assert_relative_eq!(
            moment(&|s: &ScanPoint| (s.l - p.l).powi(2)),
            (WIDTHS.q_z / a_star).powi(2),
            max_relative = 1e-9
        );
        assert_relative_eq!(
            moment(&|s: &ScanPoint| (s.e - p.e).powi(2)),
            WIDTHS.e.powi(2),
            max_relative = 1e-9
        );
    }

    #[test]
    fn monte_carlo_mean_converges_to_nominal() {
        let p = nominal();
        let sampler = fixed(
            WIDTHS,
            SamplingStrategy::MonteCarlo {
                samples: 20_000,
                seed: 7,
            },
        );
        let set = sampler.sample(&p, 3).unwrap();
        assert_relative_eq!(set.total_weight(), 1.0, epsilon = 1e-9);
        let mean_h: f64 = set.iter().map(|s| s.weight * s.point.h).sum();
        let mean_e: f64 = set.iter().map(|s| s.weight * s.point.e).sum();
        let sigma_h = WIDTHS.q_par / (2.0 * PI / 5.0);
        let stderr = |sigma: f64| 4.0 * sigma / (20_000.0_f64).sqrt();
        assert!((mean_h - p.h).abs() < stderr(sigma_h));
        assert!((mean_e - p.e).abs() < stderr(WIDTHS.e));
    }

    #[test]
    fn monte_carlo_is_reproducible_per_point() {
        let strategy = SamplingStrategy::MonteCarlo {
            samples: 16,
            seed: 42,
        };
        let a = fixed(WIDTHS, strategy).sample(&nominal(), 5).unwrap();
        let b = fixed(WIDTHS, strategy).sample(&nominal(), 5).unwrap();
        let c = fixed(WIDTHS, strategy).sample(&nominal(), 6).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn disabled_resolution_yields_nominal_point() {
        let sampler = ResolutionSampler::new(
            cubic(),
            ScatteringPlane::default(),
            None,
            ResolutionAlgorithm::None,
            Focusing::default(),
            SamplingStrategy::default(),
        )
        .unwrap();
        let set = sampler.sample(&nominal(), 0).unwrap();
        assert_eq!(set, ResolutionSampleSet::nominal(nominal()));
    }

    #[test]
    fn zero_widths_are_clamped() {
        let zero = FixedWidths {
            q_par: 0.0,
            q_perp: 0.0,
            q_z: 0.0,
            e: 0.0,
        };
        let set = fixed(zero, SamplingStrategy::Quadrature { order: 2 })
            .sample(&nominal(), 0)
            .unwrap();
        assert_relative_eq!(set.total_weight(), 1.0, epsilon = 1e-12);
        for s in set.iter() {
            assert!((s.point.h - 1.0).abs() < 1e-5);
            assert!((s.point.e - nominal().e).abs() < 1e-5);
        }
    }

    #[test]
    fn inaccessible_energies_are_dropped_and_reweighted() {
        let widths = FixedWidths { e: 1.0, ..WIDTHS };
        let low_ef = ScanPoint::from_energies(1.0, 0.0, 0.0, 5.0, 0.5).unwrap();
        let set = fixed(widths, SamplingStrategy::Quadrature { order: 3 })
            .sample(&low_ef, 0)
            .unwrap();
        // The +sqrt(3) energy node would need a negative final energy.
        assert_eq!(set.len(), 54);
        assert_relative_eq!(set.total_weight(), 1.0, epsilon = 1e-12);
        for s in set.iter() {
            assert!(s.point.ef > 0.0);
            assert_relative_eq!(s.point.e, s.point.ei - s.point.ef, epsilon = 1e-12);
        }

        let edge = ScanPoint { ef: 0.0, kf: 0.0, e: 5.0, ..low_ef };
        let set = fixed(widths, SamplingStrategy::Quadrature { order: 1 })
            .sample(&edge, 0)
            .unwrap();
        assert_eq!(set, ResolutionSampleSet::nominal(edge));
    }

    #[test]
    fn cooper_nathans_requires_an_instrument() {
        let result = ResolutionSampler::new(
            cubic(),
            ScatteringPlane::default(),
            None,
            ResolutionAlgorithm::CooperNathans,
            Focusing::default(),
            SamplingStrategy::default(),
        );
        assert_eq!(result.unwrap_err(), ResolutionError::MissingInstrument);
    }

    #[test]
    fn cooper_nathans_samples_stay_near_nominal() {
        let sampler = ResolutionSampler::new(
            cubic(),
            ScatteringPlane::default(),
            Some(thermal()),
            ResolutionAlgorithm::CooperNathans,
            Focusing::default(),
            SamplingStrategy::Quadrature { order: 2 },
        )
        .unwrap();
        let p = ScanPoint::from_wavevectors(1.5, 0.0, 0.0, 2.662, 2.662);
        let set = sampler.sample(&p, 0).unwrap();
        assert_eq!(set.len(), 16);
        let mean_h: f64 = set.iter().map(|s| s.weight * s.point.h).sum();
        assert_relative_eq!(mean_h, p.h, epsilon = 1e-9);
        assert!(set.iter().all(|s| (s.point.h - p.h).abs() < 0.2));
    }

    #[test]
    fn invalid_strategies_are_rejected() {
        let build = |strategy| {
            ResolutionSampler::new(
                cubic(),
                ScatteringPlane::default(),
                None,
                ResolutionAlgorithm::None,
                Focusing::default(),
                strategy,
            )
        };
        assert_eq!(
            build(SamplingStrategy::Quadrature { order: 0 }).unwrap_err(),
            ResolutionError::UnsupportedOrder(0)
        );
        assert_eq!(
            build(SamplingStrategy::MonteCarlo { samples: 0, seed: 1 }).unwrap_err(),
            ResolutionError::NoSamples
        );
    }
}
