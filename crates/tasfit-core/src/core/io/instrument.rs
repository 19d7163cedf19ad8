use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// A monochromator or analyser crystal. Mosaics are FWHM in arcminutes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Crystal {
    pub d_spacing: f64,
    pub mosaic: f64,
    #[serde(default)]
    pub vertical_mosaic: Option<f64>,
    #[serde(default = "default_sense")]
    pub sense: i8,
}

impl Crystal {
    pub fn vertical_mosaic(&self) -> f64 {
        self.vertical_mosaic.unwrap_or(self.mosaic)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SampleMount {
    #[serde(default)]
    pub mosaic: f64,
    #[serde(default)]
    pub vertical_mosaic: Option<f64>,
    #[serde(default = "default_sample_sense")]
    pub sense: i8,
}

impl Default for SampleMount {
    fn default() -> Self {
        Self {
            mosaic: 0.0,
            vertical_mosaic: None,
            sense: default_sample_sense(),
        }
    }
}

impl SampleMount {
    pub fn vertical_mosaic(&self) -> f64 {
        self.vertical_mosaic.unwrap_or(self.mosaic)
    }
}

/// Collimations before the monochromator, before the sample, before the
/// analyser and before the detector, FWHM in arcminutes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Collimation {
    pub horizontal: [f64; 4],
    pub vertical: [f64; 4],
}

/// Static description of a triple-axis spectrometer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Instrument {
    #[serde(default)]
    pub name: Option<String>,
    pub monochromator: Crystal,
    pub analyser: Crystal,
    #[serde(default)]
    pub sample: SampleMount,
    pub collimation: Collimation,
}

fn default_sense() -> i8 {
    1
}

fn default_sample_sense() -> i8 {
    -1
}

#[derive(Debug, Error)]
pub enum InstrumentError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
    #[error("Invalid instrument description: {0}")]
    Invalid(String),
}

impl Instrument {
    pub fn load(path: &Path) -> Result<Self, InstrumentError> {
        let content = std::fs::read_to_string(path).map_err(|e| InstrumentError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        let instrument: Self = toml::from_str(&content).map_err(|e| InstrumentError::Toml {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        instrument.validate()?;
        Ok(instrument)
    }

    /// Checks physical plausibility: positive d-spacings and collimations,
    /// non-negative mosaics, unit scattering senses.
    pub fn validate(&self) -> Result<(), InstrumentError> {
        for (label, crystal) in [("monochromator", &self.monochromator), ("analyser", &self.analyser)] {
            if !(crystal.d_spacing > 0.0) {
                return Err(InstrumentError::Invalid(format!(
                    "{label} d-spacing must be positive, got {}",
                    crystal.d_spacing
                )));
            }
            if crystal.mosaic < 0.0 || crystal.vertical_mosaic() < 0.0 {
                return Err(InstrumentError::Invalid(format!(
                    "{label} mosaic must not be negative"
                )));
            }
            check_sense(label, crystal.sense)?;
        }
        if self.sample.mosaic < 0.0 || self.sample.vertical_mosaic() < 0.0 {
            return Err(InstrumentError::Invalid(
                "sample mosaic must not be negative".to_string(),
            ));
        }
        check_sense("sample", self.sample.sense)?;

        let all = self
            .collimation
            .horizontal
            .iter()
            .chain(&self.collimation.vertical);
        if let Some(bad) = all.copied().find(|&c| !(c > 0.0)) {
            return Err(InstrumentError::Invalid(format!(
                "collimations must be positive, got {bad}"
            )));
        }
        Ok(())
    }
}

fn check_sense(label: &str, sense: i8) -> Result<(), InstrumentError> {
    if sense != 1 && sense != -1 {
        return Err(InstrumentError::Invalid(format!(
            "{label} scattering sense must be +1 or -1, got {sense}"
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// A thermal spectrometer with PG(002) crystals and open-ish collimation.
    pub(crate) fn thermal() -> Instrument {
        toml::from_str(THERMAL).unwrap()
    }

    const THERMAL: &str = r#"
        name = "thermal"

        [monochromator]
        d_spacing = 3.355
        mosaic = 30.0

        [analyser]
        d_spacing = 3.355
        mosaic = 30.0
        vertical_mosaic = 40.0

        [sample]
        mosaic = 20.0

        [collimation]
        horizontal = [60.0, 40.0, 40.0, 60.0]
        vertical = [120.0, 120.0, 120.0, 120.0]
    "#;

    fn write_temp(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn load_succeeds_with_valid_toml() {
        let file = write_temp(THERMAL);
        let instrument = Instrument::load(file.path()).unwrap();
        assert_eq!(instrument.name.as_deref(), Some("thermal"));
        assert_eq!(instrument.monochromator.sense, 1);
        assert_eq!(instrument.sample.sense, -1);
        assert_eq!(instrument.monochromator.vertical_mosaic(), 30.0);
        assert_eq!(instrument.analyser.vertical_mosaic(), 40.0);
        assert_eq!(instrument.collimation.horizontal[1], 40.0);
    }

    #[test]
    fn load_fails_for_missing_file() {
        let result = Instrument::load(Path::new("/nonexistent/instrument.toml"));
        assert!(matches!(result, Err(InstrumentError::Io { .. })));
    }

    #[test]
    fn load_fails_for_unknown_keys() {
        let file = write_temp(&THERMAL.replace("mosaic = 20.0", "mosaic = 20.0\nspin = 1"));
        assert!(matches!(
            Instrument::load(file.path()),
            Err(InstrumentError::Toml { .. })
        ));
    }

    #[test]
    fn validate_rejects_unphysical_values() {
        let mut instrument = thermal();
        instrument.analyser.d_spacing = 0.0;
        assert!(matches!(instrument.validate(), Err(InstrumentError::Invalid(_))));

        let mut instrument = thermal();
        instrument.collimation.vertical[2] = -1.0;
        assert!(instrument.validate().is_err());

        let mut instrument = thermal();
        instrument.sample.sense = 2;
        assert!(instrument.validate().is_err());

        assert!(thermal().validate().is_ok());
    }
}
