use nalgebra::DMatrix;
use tracing::warn;

/// Relative finite-difference step for the Hessian, `ε^{1/4}`.
const RELATIVE_STEP: f64 = 1.2e-4;
const MAX_DAMPING_ATTEMPTS: usize = 10;

/// Parameter uncertainties derived from the curvature of χ² at the minimum.
#[derive(Debug, Clone, PartialEq)]
pub struct Uncertainties {
    pub errors: Vec<f64>,
    /// Full covariance when the Hessian could be inverted.
    pub covariance: Option<DMatrix<f64>>,
}

/// Finite-difference step for one coordinate.
pub fn step_for(x: f64) -> f64 {
    RELATIVE_STEP * x.abs().max(1.0)
}

/// Numerical Hessian of `f` at `x`, where `f0 = f(x)`.
///
/// With `central` the second derivatives use symmetric differences
/// (`2n² + 1` evaluations); otherwise forward differences
/// (`(n² + 3n) / 2 + 1` evaluations).
pub fn hessian<E>(
    f: &mut impl FnMut(&[f64]) -> Result<f64, E>,
    x: &[f64],
    f0: f64,
    central: bool,
) -> Result<DMatrix<f64>, E> {
    let n = x.len();
    let h: Vec<f64> = x.iter().map(|&v| step_for(v)).collect();
    let mut eval = |offsets: &[(usize, f64)]| {
        let mut p = x.to_vec();
        for &(i, d) in offsets {
            p[i] += d;
        }
        f(&p)
    };

    let mut hess = DMatrix::zeros(n, n);
    if central {
        for i in 0..n {
            let plus = eval(&[(i, h[i])])?;
            let minus = eval(&[(i, -h[i])])?;
            hess[(i, i)] = (plus - 2.0 * f0 + minus) / (h[i] * h[i]);
            for j in 0..i {
                let pp = eval(&[(i, h[i]), (j, h[j])])?;
                let pm = eval(&[(i, h[i]), (j, -h[j])])?;
                let mp = eval(&[(i, -h[i]), (j, h[j])])?;
                let mm = eval(&[(i, -h[i]), (j, -h[j])])?;
                hess[(i, j)] = (pp - pm - mp + mm) / (4.0 * h[i] * h[j]);
                hess[(j, i)] = hess[(i, j)];
            }
        }
    } else {
        let single: Vec<f64> = (0..n)
            .map(|i| eval(&[(i, h[i])]))
            .collect::<Result<_, _>>()?;
        for i in 0..n {
            let double = eval(&[(i, 2.0 * h[i])])?;
            hess[(i, i)] = (double - 2.0 * single[i] + f0) / (h[i] * h[i]);
            for j in 0..i {
                let both = eval(&[(i, h[i]), (j, h[j])])?;
                hess[(i, j)] = (both - single[i] - single[j] + f0) / (h[i] * h[j]);
                hess[(j, i)] = hess[(i, j)];
            }
        }
    }

    Ok(hess)
}

/// Inverts a Hessian with progressively damped Cholesky factorizations,
/// falling back to LU. Rejects inverses with non-positive variances.
pub fn invert(hessian: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let n = hessian.nrows();
    let identity = DMatrix::identity(n, n);
    let diag_scale = (0..n)
        .map(|i| hessian[(i, i)].abs())
        .fold(0.0_f64, f64::max)
        .max(1.0);

    let mut damped = hessian.clone();
    let mut damping = 0.0_f64;
    for attempt in 0..MAX_DAMPING_ATTEMPTS {
        if let Some(chol) = nalgebra::linalg::Cholesky::new(damped.clone()) {
            return Some(chol.solve(&identity));
        }
        if attempt + 1 == MAX_DAMPING_ATTEMPTS {
            break;
        }
        let next = if damping == 0.0 {
            diag_scale * 1e-9
        } else {
            damping * 10.0
        };
        for i in 0..n {
            damped[(i, i)] += next - damping;
        }
        damping = next;
    }

    let cov = damped.lu().try_inverse()?;
    (0..n)
        .all(|i| cov[(i, i)].is_finite() && cov[(i, i)] > 0.0)
        .then_some(cov)
}

/// Uncertainties from the Hessian of χ²: `cov = 2 H⁻¹`. Falls back to the
/// diagonal `sqrt(2 / |H_ii|)` when inversion fails.
pub fn from_chi2_hessian(hessian: &DMatrix<f64>) -> Uncertainties {
    let n = hessian.nrows();
    let diagonal: Vec<f64> = (0..n)
        .map(|i| (2.0 / hessian[(i, i)].abs().max(1e-12)).sqrt())
        .collect();

    match invert(hessian) {
        Some(inverse) => {
            let cov = inverse * 2.0;
            let mut all_ok = true;
            let errors = (0..n)
                .map(|i| {
                    let var = cov[(i, i)];
                    if var.is_finite() && var > 0.0 {
                        var.sqrt()
                    } else {
                        all_ok = false;
                        diagonal[i]
                    }
                })
                .collect();
            if !all_ok {
                warn!("Invalid covariance diagonal; omitting covariance matrix");
            }
            Uncertainties {
                errors,
                covariance: all_ok.then_some(cov),
            }
        }
        None => {
            warn!("Hessian inversion failed, using diagonal approximation");
            Uncertainties {
                errors: diagonal,
                covariance: None,
            }
        }
    }
}
