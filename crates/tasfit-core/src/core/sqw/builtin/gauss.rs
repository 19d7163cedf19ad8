use crate::core::models::params::ParamValue;
use crate::core::sqw::loader::PluginModule;
use crate::core::sqw::{PluginInfo, ScatteringFunction, assign_real, configure};
use std::path::Path;

pub const NAME: &str = "gauss";

/// A single Gaussian peak in reciprocal space and energy.
///
/// `S = amp · exp(−|Δq|²/2σq² − (E − e0)²/2σe²)` with `Δq` measured in r.l.u.
/// from `(h0, k0, l0)`. The peak height, not its area, is `amp`.
#[derive(Debug, Clone)]
pub struct GaussPeak {
    amp: f64,
    h0: f64,
    k0: f64,
    l0: f64,
    e0: f64,
    sigma_q: f64,
    sigma_e: f64,
    valid: bool,
}

impl Default for GaussPeak {
    fn default() -> Self {
        Self {
            amp: 1.0,
            h0: 1.0,
            k0: 0.0,
            l0: 0.0,
            e0: 0.0,
            sigma_q: 0.05,
            sigma_e: 0.5,
            valid: true,
        }
    }
}

impl GaussPeak {
    pub fn new(config: Option<&Path>) -> Self {
        let mut model = Self::default();
        model.valid = configure(&mut model, config);
        model
    }
}

impl ScatteringFunction for GaussPeak {
    fn evaluate(&mut self, h: f64, k: f64, l: f64, e: f64) -> f64 {
        let dq2 = (h - self.h0).powi(2) + (k - self.k0).powi(2) + (l - self.l0).powi(2);
        let de = e - self.e0;
        let sq = self.sigma_q.abs().max(f64::MIN_POSITIVE);
        let se = self.sigma_e.abs().max(f64::MIN_POSITIVE);
        self.amp * (-0.5 * dq2 / (sq * sq) - 0.5 * de * de / (se * se)).exp()
    }

    fn parameters(&self) -> Vec<(String, ParamValue)> {
        [
            ("amp", self.amp),
            ("h0", self.h0),
            ("k0", self.k0),
            ("l0", self.l0),
            ("e0", self.e0),
            ("sigma_q", self.sigma_q),
            ("sigma_e", self.sigma_e),
        ]
        .into_iter()
        .map(|(name, v)| (name.to_string(), ParamValue::Real(v)))
        .collect()
    }

    fn set_parameter_if_present(&mut self, name: &str, value: &ParamValue) -> bool {
        let slot = match name {
            "amp" => &mut self.amp,
            "h0" => &mut self.h0,
            "k0" => &mut self.k0,
            "l0" => &mut self.l0,
            "e0" => &mut self.e0,
            "sigma_q" => &mut self.sigma_q,
            "sigma_e" => &mut self.sigma_e,
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
    PluginInfo::new(NAME, "Gaussian peak in (Q, E)")
}

fn construct(config: Option<&Path>) -> Box<dyn ScatteringFunction> {
    Box::new(GaussPeak::new(config))
}

pub fn module() -> PluginModule {
    PluginModule { info, construct }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn peak_height_and_width() {
        let mut model = GaussPeak::default();
        model.set_parameters(&[
            ("amp".into(), ParamValue::Real(10.0)),
            ("h0".into(), ParamValue::Real(1.25)),
            ("sigma_q".into(), ParamValue::Real(0.1)),
        ]);
        assert_relative_eq!(model.evaluate(1.25, 0.0, 0.0, 0.0), 10.0);
        assert_relative_eq!(
            model.evaluate(1.35, 0.0, 0.0, 0.0),
            10.0 * (-0.5_f64).exp(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn unknown_and_mistyped_parameters_are_ignored() {
        let mut model = GaussPeak::default();
        assert!(!model.set_parameter_if_present("bogus", &ParamValue::Real(1.0)));
        assert!(!model.set_parameter_if_present("amp", &ParamValue::Text("x".into())));
        assert!(model.set_parameter_if_present("amp", &ParamValue::Real(3.0)));
        assert_eq!(model.parameters()[0], ("amp".into(), ParamValue::Real(3.0)));
    }

    #[test]
    fn copies_are_independent() {
        let model = GaussPeak::default();
        let mut copy = model.copy();
        copy.set_parameter_if_present("h0", &ParamValue::Real(2.0));
        assert_eq!(model.h0, 1.0);
        assert_eq!(copy.parameters()[1].1, ParamValue::Real(2.0));
    }

    #[test]
    fn text_parameters_round_trip() {
        let mut model = GaussPeak::default();
        let applied = model
            .set_parameters_text(&[
                ("e0".into(), "real".into(), "1.5".into()),
                ("nope".into(), "real".into(), "2".into()),
            ])
            .unwrap();
        assert_eq!(applied, 1);
        let text = model.parameters_text();
        assert_eq!(text[4], ("e0".to_string(), "real", "1.5e0".to_string()));
    }

    #[test]
    fn config_file_sets_parameters_and_bad_file_invalidates() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[parameters]\nh0 = 1.5\nsigma_e = 0.2").unwrap();
        let model = GaussPeak::new(Some(file.path()));
        assert!(model.is_valid());
        assert_eq!(model.h0, 1.5);
        assert_eq!(model.sigma_e, 0.2);

        let broken = GaussPeak::new(Some(Path::new("/nonexistent/gauss.toml")));
        assert!(!broken.is_valid());
    }
}
