use crate::core::units::{self, UnitError};

/// One nominal point of a triple-axis scan.
///
/// Coordinates are in r.l.u., wavevectors in Å⁻¹ and energies in meV. The
/// energy transfer always equals `ei - ef`, and the wavevectors are derived
/// from (or checked against) the energies through the free-neutron dispersion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanPoint {
    pub h: f64,
    pub k: f64,
    pub l: f64,
    pub ki: f64,
    pub kf: f64,
    pub ei: f64,
    pub ef: f64,
    pub e: f64,
}

impl ScanPoint {
    /// Builds a point from measured wavevectors, deriving all energies.
    pub fn from_wavevectors(h: f64, k: f64, l: f64, ki: f64, kf: f64) -> Self {
        let ei = units::k2e(ki);
        let ef = units::k2e(kf);
        Self {
            h,
            k,
            l,
            ki,
            kf,
            ei,
            ef,
            e: ei - ef,
        }
    }

    /// Builds a point from incident and final energies, deriving the wavevectors.
    pub fn from_energies(h: f64, k: f64, l: f64, ei: f64, ef: f64) -> Result<Self, UnitError> {
        Ok(Self {
            h,
            k,
            l,
            ki: units::e2k(ei)?,
            kf: units::e2k(ef)?,
            ei,
            ef,
            e: ei - ef,
        })
    }

    #[inline]
    pub fn hkl(&self) -> [f64; 3] {
        [self.h, self.k, self.l]
    }

    /// Returns a point displaced by `(dh, dk, dl)` and by `de` in energy transfer.
    ///
    /// The incident side is held fixed and the energy change is absorbed by the
    /// final energy. Returns `None` when no final energy above zero is left.
    pub fn displaced(&self, dh: f64, dk: f64, dl: f64, de: f64) -> Option<Self> {
        let ef = self.ef - de;
        if !ef.is_finite() || ef <= 0.0 {
            return None;
        }
        Some(Self {
            h: self.h + dh,
            k: self.k + dk,
            l: self.l + dl,
            ki: self.ki,
            kf: (ef / units::KSQ2E).sqrt(),
            ei: self.ei,
            ef,
            e: self.ei - ef,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn wavevector_and_energy_constructors_agree() {
        let a = ScanPoint::from_wavevectors(1.0, 0.0, 0.0, 2.662, 2.2);
        let b = ScanPoint::from_energies(1.0, 0.0, 0.0, a.ei, a.ef).unwrap();
        assert_relative_eq!(a.ki, b.ki, max_relative = 1e-12);
        assert_relative_eq!(a.kf, b.kf, max_relative = 1e-12);
        assert_relative_eq!(a.e, a.ei - a.ef);
        assert!(a.e > 0.0);
    }

    #[test]
    fn negative_energy_cannot_build_a_point() {
        assert!(ScanPoint::from_energies(0.0, 0.0, 0.0, -1.0, 5.0).is_err());
    }

    #[test]
    fn displacement_shifts_final_side_only() {
        let p = ScanPoint::from_wavevectors(1.0, 0.0, 0.0, 2.662, 2.662);
        let d = p.displaced(0.01, -0.02, 0.0, 0.5).unwrap();
        assert_relative_eq!(d.h, 1.01);
        assert_relative_eq!(d.k, -0.02);
        assert_relative_eq!(d.ki, p.ki);
        assert_relative_eq!(d.e, 0.5, epsilon = 1e-12);
        assert_relative_eq!(units::k2e(d.kf), d.ef, max_relative = 1e-12);
    }

    #[test]
    fn displacement_past_zero_final_energy_is_inaccessible() {
        let p = ScanPoint::from_energies(1.0, 0.0, 0.0, 5.0, 0.5).unwrap();
        assert!(p.displaced(0.0, 0.0, 0.0, 0.5).is_none());
        assert!(p.displaced(0.0, 0.0, 0.0, 2.0).is_none());
        let near = p.displaced(0.0, 0.0, 0.0, 0.4).unwrap();
        assert_relative_eq!(near.ef, 0.1, epsilon = 1e-12);
        assert_relative_eq!(near.e, 4.9, epsilon = 1e-12);
    }
}
