//! Damped harmonic oscillator model for tasfit.
//!
//! Built as a shared library (`libtasfit_dho.so` on Linux) and picked up by
//! the loader as model `dho` when its directory is on the plugin search path.
//!
//! The mode disperses as `E_q = sqrt(e0² + (c·q)²)` with `q` the distance in
//! r.l.u. to the nearest Bragg point, and
//!
//! ```text
//! S(Q, E) = amp · [n(E) + 1] · 4|E| γ E_q / π / ((E² − E_q²)² + 4 E² γ²)
//! ```
//!
//! Parameters: `amp`, `e0` (gap, meV), `c` (velocity, meV·r.l.u.), `gamma`
//! (damping, meV), `T` (K).

use std::f64::consts::PI;
use std::path::Path;
use tasfit::core::models::params::ParamValue;
use tasfit::core::sqw::loader::PluginModule;
use tasfit::core::sqw::{PluginInfo, ScatteringFunction, assign_real, configure, reduced_q};
use tasfit::core::units::bose_factor;
use tracing::debug;

pub const NAME: &str = "dho";
const DESCRIPTION: &str = "Damped harmonic oscillator with a gapped dispersion";

#[derive(Debug, Clone)]
pub struct DampedOscillator {
    amp: f64,
    e0: f64,
    c: f64,
    gamma: f64,
    temperature: f64,
    valid: bool,
}

impl Default for DampedOscillator {
    fn default() -> Self {
        Self {
            amp: 1.0,
            e0: 2.0,
            c: 20.0,
            gamma: 0.5,
            temperature: 10.0,
            valid: true,
        }
    }
}

impl DampedOscillator {
    pub fn new(config: Option<&Path>) -> Self {
        let mut model = Self::default();
        model.valid = configure(&mut model, config);
        debug!(valid = model.valid, "Constructed damped oscillator");
        model
    }

    pub fn boxed(config: Option<&Path>) -> Box<dyn ScatteringFunction> {
        Box::new(Self::new(config))
    }

    pub fn mode_energy(&self, h: f64, k: f64, l: f64) -> f64 {
        let q = reduced_q(h, k, l);
        (self.e0 * self.e0 + (self.c * q).powi(2)).sqrt()
    }
}

impl ScatteringFunction for DampedOscillator {
    fn evaluate(&mut self, h: f64, k: f64, l: f64, e: f64) -> f64 {
        let eq = self.mode_energy(h, k, l);
        let gamma = self.gamma.abs();
        let denominator = (e * e - eq * eq).powi(2) + 4.0 * e * e * gamma * gamma;
        if denominator <= 0.0 {
            return 0.0;
        }
        let chi = 4.0 * e.abs() * gamma * eq / PI / denominator;
        self.amp * bose_factor(e, self.temperature) * chi
    }

    fn parameters(&self) -> Vec<(String, ParamValue)> {
        [
            ("amp", self.amp),
            ("e0", self.e0),
            ("c", self.c),
            ("gamma", self.gamma),
            ("T", self.temperature),
        ]
        .into_iter()
        .map(|(name, v)| (name.to_string(), ParamValue::Real(v)))
        .collect()
    }

    fn set_parameter_if_present(&mut self, name: &str, value: &ParamValue) -> bool {
        let slot = match name {
            "amp" => &mut self.amp,
            "e0" => &mut self.e0,
            "c" => &mut self.c,
            "gamma" => &mut self.gamma,
            "T" => &mut self.temperature,
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
    PluginInfo::new(NAME, DESCRIPTION)
}

/// The model as a statically linked module, for registering with a loader
/// without going through the shared library.
pub fn module() -> PluginModule {
    PluginModule {
        info,
        construct: DampedOscillator::boxed,
    }
}

tasfit::declare_plugin!(NAME, DESCRIPTION, DampedOscillator::boxed);
