use crate::core::models::params::ParamValue;
use crate::core::sqw::loader::PluginModule;
use crate::core::sqw::{
    PluginInfo, ScatteringFunction, assign_real, configure, gauss, reduced_q,
};
use crate::core::units;
use std::f64::consts::FRAC_PI_2;
use std::path::Path;

pub const NAME: &str = "phonon";

const MIN_MODE_ENERGY: f64 = 1e-3;

/// Acoustic phonon branch with a sinusoidal dispersion and an incoherent
/// elastic line.
///
/// The mode energy is `e_zb · sin(π q / 2)` with `q` the distance in r.l.u.
/// to the nearest Bragg point, so it reaches `e_zb` at the zone boundary.
/// Creation and annihilation lines are Gaussians of width `sigma`, weighted by
/// the Bose factor at temperature `T` and by the usual `1/E_q` prefactor.
#[derive(Debug, Clone)]
pub struct AcousticPhonon {
    amp: f64,
    e_zb: f64,
    sigma: f64,
    temperature: f64,
    inc_amp: f64,
    inc_sigma: f64,
    valid: bool,
}

impl Default for AcousticPhonon {
    fn default() -> Self {
        Self {
            amp: 1.0,
            e_zb: 10.0,
            sigma: 0.5,
            temperature: 100.0,
            inc_amp: 0.0,
            inc_sigma: 0.1,
            valid: true,
        }
    }
}

impl AcousticPhonon {
    pub fn new(config: Option<&Path>) -> Self {
        let mut model = Self::default();
        model.valid = configure(&mut model, config);
        model
    }

    pub fn mode_energy(&self, h: f64, k: f64, l: f64) -> f64 {
        let q = reduced_q(h, k, l);
        (self.e_zb * (FRAC_PI_2 * q).sin()).abs()
    }
}

impl ScatteringFunction for AcousticPhonon {
    fn evaluate(&mut self, h: f64, k: f64, l: f64, e: f64) -> f64 {
        let eq = self.mode_energy(h, k, l).max(MIN_MODE_ENERGY);
        let lines = gauss(e - eq, self.sigma) + gauss(e + eq, self.sigma);
        let inelastic = self.amp * units::bose_factor(e, self.temperature) * lines / eq;
        let incoherent = self.inc_amp * gauss(e, self.inc_sigma);
        inelastic + incoherent
    }

    fn parameters(&self) -> Vec<(String, ParamValue)> {
        [
            ("amp", self.amp),
            ("e_zb", self.e_zb),
            ("sigma", self.sigma),
            ("T", self.temperature),
            ("inc_amp", self.inc_amp),
            ("inc_sigma", self.inc_sigma),
        ]
        .into_iter()
        .map(|(name, v)| (name.to_string(), ParamValue::Real(v)))
        .collect()
    }

    fn set_parameter_if_present(&mut self, name: &str, value: &ParamValue) -> bool {
        let slot = match name {
            "amp" => &mut self.amp,
            "e_zb" => &mut self.e_zb,
            "sigma" => &mut self.sigma,
            "T" => &mut self.temperature,
            "inc_amp" => &mut self.inc_amp,
            "inc_sigma" => &mut self.inc_sigma,
            _ => return false,
        };
        assign_real(slot, value)
    }

    fn copy(&self) -> Box<dyn ScatteringFunction> {
        Box::new(self.clone())
    }

    fn is_valid(&self) -> bool {
        self.valid
    }
}

fn info() -> PluginInfo {
    PluginInfo::new(NAME, "Acoustic phonon with Bose factor and incoherent line")
}

fn construct(config: Option<&Path>) -> Box<dyn ScatteringFunction> {
    Box::new(AcousticPhonon::new(config))
}

pub fn module() -> PluginModule {
    PluginModule { info, construct }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn temperature_and_width_are_separate_slots() {
        let mut model = AcousticPhonon::default();
        model.set_parameters(&[
            ("T".into(), ParamValue::Real(4.0)),
            ("sigma".into(), ParamValue::Real(0.8)),
        ]);
        assert_eq!(model.temperature, 4.0);
        assert_eq!(model.sigma, 0.8);
    }

    #[test]
    fn dispersion_peaks_at_zone_boundary() {
        let model = AcousticPhonon::default();
        assert_relative_eq!(model.mode_energy(1.5, 0.0, 0.0), 10.0, epsilon = 1e-12);
        assert_relative_eq!(model.mode_energy(2.0, 0.0, 0.0), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn intensity_maximal_on_the_branch() {
        let mut model = AcousticPhonon::default();
        let eq = model.mode_energy(1.25, 0.0, 0.0);
        let on = model.evaluate(1.25, 0.0, 0.0, eq);
        let off = model.evaluate(1.25, 0.0, 0.0, eq + 2.0);
        assert!(on > 10.0 * off);
        assert!(on.is_finite());
    }

    #[test]
    fn detailed_balance_between_loss_and_gain() {
        let mut model = AcousticPhonon::default();
        let eq = model.mode_energy(1.3, 0.0, 0.0);
        let loss = model.evaluate(1.3, 0.0, 0.0, eq);
        let gain = model.evaluate(1.3, 0.0, 0.0, -eq);
        let expected = (eq / (units::KB_MEV_PER_K * 100.0)).exp();
        assert_relative_eq!(loss / gain, expected, max_relative = 1e-9);
    }

    #[test]
    fn elastic_zone_centre_is_finite() {
        let mut model = AcousticPhonon::default();
        assert!(model.evaluate(1.0, 0.0, 0.0, 0.0).is_finite());
    }
}
