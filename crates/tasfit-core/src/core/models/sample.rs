use nalgebra::{Matrix3, Vector3};
use std::f64::consts::PI;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LatticeError {
    #[error("Lattice constants must be positive, got {0:?}")]
    NonPositiveConstant([f64; 3]),
    #[error("Lattice angles {0:?} do not describe a valid unit cell")]
    InvalidAngles([f64; 3]),
    #[error("Scattering plane vectors {a:?} and {b:?} are collinear")]
    DegeneratePlane { a: [f64; 3], b: [f64; 3] },
}

/// Crystal geometry of the measured sample.
///
/// Lattice constants are in Å, angles in degrees. The reciprocal-lattice
/// B matrix (with the 2π convention) maps r.l.u. onto Å⁻¹ in an orthonormal
/// frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub lattice: [f64; 3],
    pub angles: [f64; 3],
    b_matrix: Matrix3<f64>,
    b_inverse: Matrix3<f64>,
}

impl Sample {
    pub fn new(lattice: [f64; 3], angles: [f64; 3]) -> Result<Self, LatticeError> {
        if lattice.iter().any(|&x| !(x > 0.0) || !x.is_finite()) {
            return Err(LatticeError::NonPositiveConstant(lattice));
        }
        let [a, b, c] = lattice;
        let [alpha, beta, gamma] = angles.map(f64::to_radians);
        let (ca, cb, cg) = (alpha.cos(), beta.cos(), gamma.cos());
        let (sa, sb, sg) = (alpha.sin(), beta.sin(), gamma.sin());

        let metric = 1.0 - ca * ca - cb * cb - cg * cg + 2.0 * ca * cb * cg;
        if !(metric > 0.0) || angles.iter().any(|&x| !(x > 0.0 && x < 180.0)) {
            return Err(LatticeError::InvalidAngles(angles));
        }
        let volume = a * b * c * metric.sqrt();

        let a_star = 2.0 * PI * b * c * sa / volume;
        let b_star = 2.0 * PI * a * c * sb / volume;
        let c_star = 2.0 * PI * a * b * sg / volume;
        let cos_beta_star = (ca * cg - cb) / (sa * sg);
        let cos_gamma_star = (ca * cb - cg) / (sa * sb);
        let sin_beta_star = (1.0 - cos_beta_star * cos_beta_star).sqrt();
        let sin_gamma_star = (1.0 - cos_gamma_star * cos_gamma_star).sqrt();

        let b_matrix = Matrix3::new(
            a_star,
            b_star * cos_gamma_star,
            c_star * cos_beta_star,
            0.0,
            b_star * sin_gamma_star,
            -c_star * sin_beta_star * ca,
            0.0,
            0.0,
            2.0 * PI / c,
        );
        let b_inverse = b_matrix
            .try_inverse()
            .ok_or(LatticeError::InvalidAngles(angles))?;

        Ok(Self {
            lattice,
            angles,
            b_matrix,
            b_inverse,
        })
    }

    pub fn b_matrix(&self) -> &Matrix3<f64> {
        &self.b_matrix
    }

    /// Cartesian momentum transfer in Å⁻¹ for a reciprocal-lattice position.
    pub fn to_cartesian(&self, hkl: [f64; 3]) -> Vector3<f64> {
        self.b_matrix * Vector3::from(hkl)
    }

    /// Reciprocal-lattice position of a Cartesian momentum transfer.
    pub fn to_rlu(&self, q: &Vector3<f64>) -> [f64; 3] {
        let hkl = self.b_inverse * q;
        [hkl.x, hkl.y, hkl.z]
    }

    pub fn q_length(&self, hkl: [f64; 3]) -> f64 {
        self.to_cartesian(hkl).norm()
    }
}

/// The horizontal scattering plane, spanned by two r.l.u. orientation vectors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScatteringPlane {
    pub a: [f64; 3],
    pub b: [f64; 3],
}

impl Default for ScatteringPlane {
    fn default() -> Self {
        Self {
            a: [1.0, 0.0, 0.0],
            b: [0.0, 1.0, 0.0],
        }
    }
}

impl ScatteringPlane {
    /// Unit vector perpendicular to the plane, in the sample's Cartesian frame.
    pub fn normal(&self, sample: &Sample) -> Result<Vector3<f64>, LatticeError> {
        let n = sample
            .to_cartesian(self.a)
            .cross(&sample.to_cartesian(self.b));
        let norm = n.norm();
        if !(norm > 1e-12) {
            return Err(LatticeError::DegeneratePlane {
                a: self.a,
                b: self.b,
            });
        }
        Ok(n / norm)
    }

    /// Unit vector along the first orientation vector.
    pub fn first_axis(&self, sample: &Sample) -> Vector3<f64> {
        sample.to_cartesian(self.a).normalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn cubic_b_matrix_is_diagonal() {
        let sample = Sample::new([5.0; 3], [90.0; 3]).unwrap();
        let b = sample.b_matrix();
        for i in 0..3 {
            assert_relative_eq!(b[(i, i)], 2.0 * PI / 5.0, epsilon = 1e-12);
            for j in 0..3 {
                if i != j {
                    assert_relative_eq!(b[(i, j)], 0.0, epsilon = 1e-12);
                }
            }
        }
        assert_relative_eq!(sample.q_length([1.0, 1.0, 0.0]), 2.0_f64.sqrt() * 2.0 * PI / 5.0);
    }

    #[test]
    fn hexagonal_round_trip() {
        let sample = Sample::new([3.0, 3.0, 5.0], [90.0, 90.0, 120.0]).unwrap();
        let hkl = [1.0, 0.5, 2.0];
        let back = sample.to_rlu(&sample.to_cartesian(hkl));
        for i in 0..3 {
            assert_relative_eq!(back[i], hkl[i], epsilon = 1e-12);
        }
        // |a*| = 4π / (√3 a) for a hexagonal lattice.
        assert_relative_eq!(
            sample.q_length([1.0, 0.0, 0.0]),
            4.0 * PI / (3.0_f64.sqrt() * 3.0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn invalid_cells_are_rejected() {
        assert!(matches!(
            Sample::new([0.0, 1.0, 1.0], [90.0; 3]),
            Err(LatticeError::NonPositiveConstant(_))
        ));
        assert!(matches!(
            Sample::new([1.0; 3], [90.0, 90.0, 180.0]),
            Err(LatticeError::InvalidAngles(_))
        ));
    }

    #[test]
    fn plane_normal_and_degenerate_plane() {
        let sample = Sample::new([4.0; 3], [90.0; 3]).unwrap();
        let n = ScatteringPlane::default().normal(&sample).unwrap();
        assert_relative_eq!(n.z.abs(), 1.0, epsilon = 1e-12);

        let collinear = ScatteringPlane {
            a: [1.0, 0.0, 0.0],
            b: [2.0, 0.0, 0.0],
        };
        assert!(collinear.normal(&sample).is_err());
    }
}
