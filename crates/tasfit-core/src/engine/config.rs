use crate::core::io::instrument::Instrument;
use crate::core::models::params::ParameterSet;
use crate::core::resolution::{Focusing, ResolutionAlgorithm, SamplingStrategy};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid value for '{name}': {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MinimizerKind {
    /// Nelder–Mead downhill simplex.
    #[default]
    Simplex,
    /// Compass (pattern) search with step halving.
    Pattern,
}

/// How parameter errors are estimated once the minimizer stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorStrategy {
    /// Spread of the minimizer's final simplex or step sizes.
    StepSpread,
    /// Forward-difference Hessian of χ².
    #[default]
    Hessian,
    /// Central-difference Hessian of χ².
    CentralHessian,
}

impl ErrorStrategy {
    pub fn from_level(level: u8) -> Result<Self, ConfigError> {
        match level {
            0 => Ok(ErrorStrategy::StepSpread),
            1 => Ok(ErrorStrategy::Hessian),
            2 => Ok(ErrorStrategy::CentralHessian),
            other => Err(ConfigError::InvalidValue {
                name: "strategy",
                reason: format!("expected 0, 1 or 2, got {other}"),
            }),
        }
    }

    pub fn level(self) -> u8 {
        match self {
            ErrorStrategy::StepSpread => 0,
            ErrorStrategy::Hessian => 1,
            ErrorStrategy::CentralHessian => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceConfig {
    /// Minimal decrease of the best statistic that counts as an improvement.
    pub tolerance: f64,
    /// Consecutive iterations without improvement before stopping.
    pub patience: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionConfig {
    pub algorithm: ResolutionAlgorithm,
    pub strategy: SamplingStrategy,
    pub focusing: Focusing,
    pub instrument: Option<Instrument>,
}

impl ResolutionConfig {
    /// No resolution convolution: every point is evaluated at its nominal position.
    pub fn disabled() -> Self {
        Self {
            algorithm: ResolutionAlgorithm::None,
            strategy: SamplingStrategy::default(),
            focusing: Focusing::default(),
            instrument: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FitConfig {
    pub parameters: ParameterSet,
    pub minimizer: MinimizerKind,
    pub error_strategy: ErrorStrategy,
    pub max_calls: usize,
    pub convergence: ConvergenceConfig,
    /// Replacement for zero measurement errors; `None` uses the smallest
    /// positive error in the scan.
    pub error_floor: Option<f64>,
    pub normalize_to_monitor: bool,
    pub resolution: ResolutionConfig,
}

#[derive(Default)]
pub struct FitConfigBuilder {
    parameters: Option<ParameterSet>,
    minimizer: Option<MinimizerKind>,
    error_strategy: Option<ErrorStrategy>,
    max_calls: Option<usize>,
    tolerance: Option<f64>,
    patience: Option<usize>,
    error_floor: Option<f64>,
    normalize_to_monitor: bool,
    resolution: Option<ResolutionConfig>,
}

impl FitConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parameters(mut self, parameters: ParameterSet) -> Self {
        self.parameters = Some(parameters);
        self
    }
    pub fn minimizer(mut self, kind: MinimizerKind) -> Self {
        self.minimizer = Some(kind);
        self
    }
    pub fn error_strategy(mut self, strategy: ErrorStrategy) -> Self {
        self.error_strategy = Some(strategy);
        self
    }
    pub fn max_calls(mut self, calls: usize) -> Self {
        self.max_calls = Some(calls);
        self
    }
    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }
    pub fn patience(mut self, iterations: usize) -> Self {
        self.patience = Some(iterations);
        self
    }
    pub fn error_floor(mut self, floor: Option<f64>) -> Self {
        self.error_floor = floor;
        self
    }
    pub fn normalize_to_monitor(mut self, normalize: bool) -> Self {
        self.normalize_to_monitor = normalize;
        self
    }
    pub fn resolution(mut self, resolution: ResolutionConfig) -> Self {
        self.resolution = Some(resolution);
        self
    }

    pub fn build(self) -> Result<FitConfig, ConfigError> {
        let max_calls = self
            .max_calls
            .ok_or(ConfigError::MissingParameter("max_calls"))?;
        if max_calls == 0 {
            return Err(ConfigError::InvalidValue {
                name: "max_calls",
                reason: "must be at least 1".to_string(),
            });
        }
        let tolerance = self
            .tolerance
            .ok_or(ConfigError::MissingParameter("tolerance"))?;
        if !(tolerance >= 0.0) {
            return Err(ConfigError::InvalidValue {
                name: "tolerance",
                reason: format!("must be non-negative, got {tolerance}"),
            });
        }
        if let Some(floor) = self.error_floor {
            if !(floor > 0.0) {
                return Err(ConfigError::InvalidValue {
                    name: "error_floor",
                    reason: format!("must be positive, got {floor}"),
                });
            }
        }
        Ok(FitConfig {
            parameters: self
                .parameters
                .ok_or(ConfigError::MissingParameter("parameters"))?,
            minimizer: self.minimizer.unwrap_or_default(),
            error_strategy: self.error_strategy.unwrap_or_default(),
            max_calls,
            convergence: ConvergenceConfig {
                tolerance,
                patience: self.patience.unwrap_or(DEFAULT_PATIENCE).max(1),
            },
            error_floor: self.error_floor,
            normalize_to_monitor: self.normalize_to_monitor,
            resolution: self
                .resolution
                .ok_or(ConfigError::MissingParameter("resolution"))?,
        })
    }
}

pub const DEFAULT_PATIENCE: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct SimulateConfig {
    pub parameters: ParameterSet,
    pub normalize_to_monitor: bool,
    pub resolution: ResolutionConfig,
    /// Number of evenly spaced points for an additional curve along the path.
    pub interpolated_points: Option<usize>,
}

#[derive(Default)]
pub struct SimulateConfigBuilder {
    parameters: Option<ParameterSet>,
    normalize_to_monitor: bool,
    resolution: Option<ResolutionConfig>,
    interpolated_points: Option<usize>,
}

impl SimulateConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parameters(mut self, parameters: ParameterSet) -> Self {
        self.parameters = Some(parameters);
        self
    }
    pub fn normalize_to_monitor(mut self, normalize: bool) -> Self {
        self.normalize_to_monitor = normalize;
        self
    }
    pub fn resolution(mut self, resolution: ResolutionConfig) -> Self {
        self.resolution = Some(resolution);
        self
    }
    pub fn interpolated_points(mut self, points: Option<usize>) -> Self {
        self.interpolated_points = points;
        self
    }

    pub fn build(self) -> Result<SimulateConfig, ConfigError> {
        Ok(SimulateConfig {
            parameters: self
                .parameters
                .ok_or(ConfigError::MissingParameter("parameters"))?,
            normalize_to_monitor: self.normalize_to_monitor,
            resolution: self
                .resolution
                .ok_or(ConfigError::MissingParameter("resolution"))?,
            interpolated_points: self.interpolated_points,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::params::ModelParameter;

    fn params() -> ParameterSet {
        ParameterSet::from_params([ModelParameter::new("scale", 1.0, 0.1)]).unwrap()
    }

    #[test]
    fn fit_builder_fills_defaults() {
        let config = FitConfigBuilder::new()
            .parameters(params())
            .max_calls(500)
            .tolerance(1e-6)
            .resolution(ResolutionConfig::disabled())
            .build()
            .unwrap();
        assert_eq!(config.minimizer, MinimizerKind::Simplex);
        assert_eq!(config.error_strategy, ErrorStrategy::Hessian);
        assert_eq!(config.convergence.patience, DEFAULT_PATIENCE);
        assert_eq!(config.error_floor, None);
        assert!(!config.normalize_to_monitor);
    }

    #[test]
    fn fit_builder_reports_missing_parameters() {
        let result = FitConfigBuilder::new()
            .max_calls(10)
            .tolerance(1e-3)
            .resolution(ResolutionConfig::disabled())
            .build();
        assert_eq!(result, Err(ConfigError::MissingParameter("parameters")));

        let result = FitConfigBuilder::new().parameters(params()).build();
        assert_eq!(result, Err(ConfigError::MissingParameter("max_calls")));
    }

    #[test]
    fn fit_builder_rejects_invalid_values() {
        let base = || {
            FitConfigBuilder::new()
                .parameters(params())
                .tolerance(1e-3)
                .resolution(ResolutionConfig::disabled())
        };
        assert!(matches!(
            base().max_calls(0).build(),
            Err(ConfigError::InvalidValue { name: "max_calls", .. })
        ));
        assert!(matches!(
            base().max_calls(10).error_floor(Some(0.0)).build(),
            Err(ConfigError::InvalidValue { name: "error_floor", .. })
        ));
    }

    #[test]
    fn error_strategy_levels() {
        for level in 0..=2 {
            assert_eq!(ErrorStrategy::from_level(level).unwrap().level(), level);
        }
        assert!(ErrorStrategy::from_level(3).is_err());
    }

    #[test]
    fn simulate_builder_requires_resolution() {
        let result = SimulateConfigBuilder::new().parameters(params()).build();
        assert_eq!(result, Err(ConfigError::MissingParameter("resolution")));
    }
}
