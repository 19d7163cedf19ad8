use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParamError {
    #[error("Unknown parameter type tag '{0}'")]
    UnknownTag(String),
    #[error("Cannot parse '{text}' as a {tag} value")]
    Unparseable { tag: &'static str, text: String },
    #[error("Duplicate parameter name '{0}'")]
    Duplicate(String),
    #[error("Parameter '{0}' is not numeric")]
    NotNumeric(String),
}

/// A model parameter value, tagged by type.
///
/// Models work with the typed value; the `(tag, text)` form exists only for
/// serialization across the plugin boundary and into configuration files.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Real(f64),
    Text(String),
}

impl ParamValue {
    pub const REAL_TAG: &'static str = "real";
    pub const TEXT_TAG: &'static str = "text";

    pub fn type_tag(&self) -> &'static str {
        match self {
            ParamValue::Real(_) => Self::REAL_TAG,
            ParamValue::Text(_) => Self::TEXT_TAG,
        }
    }

    pub fn to_text(&self) -> String {
        match self {
            ParamValue::Real(v) => format!("{v:e}"),
            ParamValue::Text(s) => s.clone(),
        }
    }

    pub fn parse(tag: &str, text: &str) -> Result<Self, ParamError> {
        match tag {
            Self::REAL_TAG | "double" | "float" => text
                .trim()
                .parse()
                .map(ParamValue::Real)
                .map_err(|_| ParamError::Unparseable {
                    tag: Self::REAL_TAG,
                    text: text.to_string(),
                }),
            Self::TEXT_TAG | "string" => Ok(ParamValue::Text(text.to_string())),
            other => Err(ParamError::UnknownTag(other.to_string())),
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            ParamValue::Real(v) => Some(*v),
            ParamValue::Text(_) => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Real(v) => write!(f, "{v}"),
            ParamValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Real(v)
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Text(s.to_string())
    }
}

/// A fit parameter: value, error estimate, free/fixed flag and optional bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParameter {
    pub name: String,
    pub value: f64,
    pub error: f64,
    pub fixed: bool,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl ModelParameter {
    pub fn new(name: impl Into<String>, value: f64, error: f64) -> Self {
        Self {
            name: name.into(),
            value,
            error,
            fixed: false,
            lower: None,
            upper: None,
        }
    }

    pub fn fixed(mut self, fixed: bool) -> Self {
        self.fixed = fixed;
        self
    }

    pub fn bounded(mut self, lower: Option<f64>, upper: Option<f64>) -> Self {
        self.lower = lower;
        self.upper = upper;
        self
    }

    /// Clamps a trial value into this parameter's bounds.
    pub fn clamp(&self, value: f64) -> f64 {
        let value = self.lower.map_or(value, |lo| value.max(lo));
        self.upper.map_or(value, |hi| value.min(hi))
    }
}

/// Name-unique parameters kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    params: Vec<ModelParameter>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_params(
        params: impl IntoIterator<Item = ModelParameter>,
    ) -> Result<Self, ParamError> {
        let mut set = Self::new();
        for p in params {
            set.insert(p)?;
        }
        Ok(set)
    }

    pub fn insert(&mut self, param: ModelParameter) -> Result<(), ParamError> {
        if self.get(&param.name).is_some() {
            return Err(ParamError::Duplicate(param.name));
        }
        self.params.push(param);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ModelParameter> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ModelParameter> {
        self.params.iter_mut().find(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelParameter> {
        self.params.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ModelParameter> {
        self.params.iter_mut()
    }

    pub fn free(&self) -> impl Iterator<Item = &ModelParameter> {
        self.params.iter().filter(|p| !p.fixed)
    }

    pub fn free_count(&self) -> usize {
        self.free().count()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Parameters in the `(name, value)` form handed to a model.
    pub fn as_model_values(&self) -> Vec<(String, ParamValue)> {
        self.params
            .iter()
            .map(|p| (p.name.clone(), ParamValue::Real(p.value)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_boundary_round_trip() {
        let v = ParamValue::Real(1.25e-3);
        let back = ParamValue::parse(v.type_tag(), &v.to_text()).unwrap();
        assert_eq!(back, v);

        let t = ParamValue::from("dispersion.dat");
        assert_eq!(ParamValue::parse("text", &t.to_text()).unwrap(), t);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert_eq!(
            ParamValue::parse("complex", "1"),
            Err(ParamError::UnknownTag("complex".into()))
        );
        assert!(matches!(
            ParamValue::parse("real", "abc"),
            Err(ParamError::Unparseable { .. })
        ));
        assert_eq!(ParamValue::parse("double", " 2.5 "), Ok(ParamValue::Real(2.5)));
    }

    #[test]
    fn set_preserves_order_and_rejects_duplicates() {
        let mut set = ParameterSet::new();
        set.insert(ModelParameter::new("scale", 1.0, 0.1)).unwrap();
        set.insert(ModelParameter::new("offset", 0.0, 0.1).fixed(true))
            .unwrap();
        set.insert(ModelParameter::new("h0", 1.2, 0.01)).unwrap();
        assert_eq!(
            set.insert(ModelParameter::new("h0", 0.0, 0.0)),
            Err(ParamError::Duplicate("h0".into()))
        );

        let names: Vec<_> = set.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["scale", "offset", "h0"]);
        let free: Vec<_> = set.free().map(|p| p.name.as_str()).collect();
        assert_eq!(free, ["scale", "h0"]);
    }

    #[test]
    fn clamp_honors_bounds() {
        let p = ModelParameter::new("sigma", 0.1, 0.01).bounded(Some(0.0), Some(1.0));
        assert_eq!(p.clamp(-1.0), 0.0);
        assert_eq!(p.clamp(2.0), 1.0);
        assert_eq!(p.clamp(0.3), 0.3);
        assert_eq!(ModelParameter::new("x", 0.0, 1.0).clamp(-5.0), -5.0);
    }
}
