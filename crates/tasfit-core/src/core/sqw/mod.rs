//! # Scattering-Function Models
//!
//! The capability contract every physics model implements, the loader that
//! resolves models by name, and the models compiled into the library.
//!
//! A model predicts the scattering intensity S(Q, E) at a reciprocal-lattice
//! position and energy transfer. The fit engine only talks to models through
//! [`ScatteringFunction`]; parameters cross that boundary as named, tagged
//! values so that they can be read from and written to text configuration.

pub mod abi;
pub mod builtin;
pub mod loader;

use crate::core::models::params::{ParamError, ParamValue};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

/// Version string a module must report to be loadable by this build.
pub const INTERFACE_VERSION: &str = "tasfit-sqw/2";

/// Release of this crate; model libraries report the one they were built against.
pub const CRATE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Identification a module reports through its `info` entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    pub interface_version: String,
    pub crate_version: String,
    pub name: String,
    pub description: String,
}

impl PluginInfo {
    /// Info stamped with the interface version of the crate it is compiled against.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            interface_version: INTERFACE_VERSION.to_string(),
            crate_version: CRATE_VERSION.to_string(),
            name: name.into(),
            description: description.into(),
        }
    }
}

/// A parameterized scattering-function model.
///
/// `evaluate` takes `&mut self` so that a model may memoize on its own
/// instance; concurrent evaluation always happens on separate [`copy`]s.
///
/// [`copy`]: ScatteringFunction::copy
pub trait ScatteringFunction: Send + Sync {
    /// Intensity at `(h, k, l)` in r.l.u. and energy transfer `e` in meV.
    fn evaluate(&mut self, h: f64, k: f64, l: f64, e: f64) -> f64;

    /// Current parameters, in the model's own reporting order.
    fn parameters(&self) -> Vec<(String, ParamValue)>;

    /// Applies `value` to the parameter `name`. Returns whether the name was
    /// recognized and the value had the right type.
    fn set_parameter_if_present(&mut self, name: &str, value: &ParamValue) -> bool;

    /// Applies every recognized parameter; unknown names are ignored.
    fn set_parameters(&mut self, values: &[(String, ParamValue)]) {
        for (name, value) in values {
            self.set_parameter_if_present(name, value);
        }
    }

    /// An independent instance with the same parameter state.
    fn copy(&self) -> Box<dyn ScatteringFunction>;

    /// `false` if the model failed to initialize and must not be evaluated.
    fn is_valid(&self) -> bool {
        true
    }

    /// Parameters as `(name, type tag, text)` triples.
    fn parameters_text(&self) -> Vec<(String, &'static str, String)> {
        self.parameters()
            .into_iter()
            .map(|(name, value)| (name, value.type_tag(), value.to_text()))
            .collect()
    }

    /// Parses and applies `(name, type tag, text)` triples. Returns how many
    /// were recognized by the model.
    fn set_parameters_text(
        &mut self,
        values: &[(String, String, String)],
    ) -> Result<usize, ParamError> {
        let mut applied = 0;
        for (name, tag, text) in values {
            let value = ParamValue::parse(tag, text)?;
            if self.set_parameter_if_present(name, &value) {
                applied += 1;
            }
        }
        Ok(applied)
    }
}

impl Clone for Box<dyn ScatteringFunction> {
    fn clone(&self) -> Self {
        self.copy()
    }
}

#[derive(Debug, Error)]
pub enum ModelConfigError {
    #[error("Failed to read model configuration '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid model configuration '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
}

/// Contents of a model configuration file.
///
/// ```toml
/// [parameters]
/// amp = 2.5
/// T = 10.0
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub parameters: toml::Table,
}

impl ModelConfig {
    pub fn load(path: &Path) -> Result<Self, ModelConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ModelConfigError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ModelConfigError::Toml {
            path: path.to_string_lossy().to_string(),
            source: e,
        })
    }

    /// Numeric and string entries of `[parameters]` as model values.
    pub fn parameter_values(&self) -> Vec<(String, ParamValue)> {
        self.parameters
            .iter()
            .filter_map(|(name, value)| {
                let value = match value {
                    toml::Value::Float(v) => ParamValue::Real(*v),
                    toml::Value::Integer(v) => ParamValue::Real(*v as f64),
                    toml::Value::String(s) => ParamValue::Text(s.clone()),
                    other => {
                        warn!(
                            parameter = %name,
                            "Ignoring model parameter of unsupported type: {}",
                            other.type_str()
                        );
                        return None;
                    }
                };
                Some((name.clone(), value))
            })
            .collect()
    }
}

/// Applies an optional configuration file to a freshly constructed model.
///
/// Returns `false` when the file cannot be read or parsed; callers mark the
/// model invalid so the loader reports an initialization error.
pub fn configure<M: ScatteringFunction>(model: &mut M, config: Option<&Path>) -> bool {
    let Some(path) = config else {
        return true;
    };
    match ModelConfig::load(path) {
        Ok(cfg) => {
            model.set_parameters(&cfg.parameter_values());
            true
        }
        Err(e) => {
            warn!("{}", e);
            false
        }
    }
}

/// Writes a real-valued update into `slot`; text values are rejected.
#[inline]
pub fn assign_real(slot: &mut f64, value: &ParamValue) -> bool {
    match value.as_real() {
        Some(v) => {
            *slot = v;
            true
        }
        None => false,
    }
}

/// Normalized Gaussian line shape.
#[inline]
pub fn gauss(x: f64, sigma: f64) -> f64 {
    let sigma = sigma.abs().max(f64::MIN_POSITIVE);
    (-0.5 * (x / sigma).powi(2)).exp() / (sigma * (2.0 * std::f64::consts::PI).sqrt())
}

/// Distance in r.l.u. from `(h, k, l)` to the nearest reciprocal-lattice point.
#[inline]
pub fn reduced_q(h: f64, k: f64, l: f64) -> f64 {
    let dh = h - h.round();
    let dk = k - k.round();
    let dl = l - l.round();
    (dh * dh + dk * dk + dl * dl).sqrt()
}
