use crate::core::models::params::ParameterSet;
use crate::core::models::point::ScanPoint;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),
    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),
}

/// One row of a model curve. Interpolated points carry no measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct CurveRow {
    pub index: usize,
    pub point: ScanPoint,
    pub measured: Option<f64>,
    pub error: Option<f64>,
    pub predicted: f64,
}

const CURVE_HEADER: [&str; 8] = ["index", "h", "k", "l", "E", "measured", "error", "predicted"];

pub fn write_curve(writer: impl Write, rows: &[CurveRow]) -> Result<(), ReportError> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(CURVE_HEADER)?;
    let optional = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
    for row in rows {
        out.write_record([
            row.index.to_string(),
            row.point.h.to_string(),
            row.point.k.to_string(),
            row.point.l.to_string(),
            row.point.e.to_string(),
            optional(row.measured),
            optional(row.error),
            row.predicted.to_string(),
        ])?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_curve_to_path<P: AsRef<Path>>(path: P, rows: &[CurveRow]) -> Result<(), ReportError> {
    let file = File::create(path)?;
    write_curve(BufWriter::new(file), rows)
}

/// Appends one CSV row per minimizer iteration:
/// `iteration,calls,statistic,<free parameter names…>`.
pub struct IterationLog<W: Write> {
    out: csv::Writer<W>,
    width: usize,
}

impl IterationLog<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P, free_names: &[String]) -> Result<Self, ReportError> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file), free_names)
    }
}

impl<W: Write> IterationLog<W> {
    pub fn new(writer: W, free_names: &[String]) -> Result<Self, ReportError> {
        let mut out = csv::Writer::from_writer(writer);
        let header = ["iteration", "calls", "statistic"]
            .into_iter()
            .chain(free_names.iter().map(String::as_str));
        out.write_record(header)?;
        Ok(Self {
            out,
            width: free_names.len(),
        })
    }

    pub fn record(
        &mut self,
        iteration: usize,
        calls: usize,
        statistic: f64,
        values: &[f64],
    ) -> Result<(), ReportError> {
        debug_assert_eq!(values.len(), self.width);
        let fields = [iteration.to_string(), calls.to_string(), statistic.to_string()]
            .into_iter()
            .chain(values.iter().map(f64::to_string));
        self.out.write_record(fields)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<W, ReportError> {
        self.out.flush()?;
        self.out
            .into_inner()
            .map_err(|e| ReportError::Io(e.into_error()))
    }
}

/// The `[fit_parameters]` table, in the same shape a job file uses.
/// Missing bounds are written as infinities.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterTable {
    pub names: Vec<String>,
    pub values: Vec<f64>,
    pub errors: Vec<f64>,
    pub fixed: Vec<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lower: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upper: Option<Vec<f64>>,
}

impl From<&ParameterSet> for ParameterTable {
    fn from(set: &ParameterSet) -> Self {
        let bounded = set.iter().any(|p| p.lower.is_some() || p.upper.is_some());
        Self {
            names: set.iter().map(|p| p.name.clone()).collect(),
            values: set.iter().map(|p| p.value).collect(),
            errors: set.iter().map(|p| p.error).collect(),
            fixed: set.iter().map(|p| p.fixed).collect(),
            lower: bounded.then(|| {
                set.iter()
                    .map(|p| p.lower.unwrap_or(f64::NEG_INFINITY))
                    .collect()
            }),
            upper: bounded.then(|| set.iter().map(|p| p.upper.unwrap_or(f64::INFINITY)).collect()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSummary {
    pub status: String,
    pub statistic: f64,
    pub reduced_statistic: f64,
    pub points: usize,
    pub free_parameters: usize,
    pub calls: usize,
    pub iterations: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterReport {
    pub fit_parameters: ParameterTable,
    pub result: ResultSummary,
}

impl ParameterReport {
    pub fn new(params: &ParameterSet, result: ResultSummary) -> Self {
        Self {
            fit_parameters: ParameterTable::from(params),
            result,
        }
    }

    pub fn to_toml_string(&self) -> Result<String, ReportError> {
        Ok(toml::to_string(self)?)
    }

    pub fn write_to_path<P: AsRef<Path>>(&self, path: P) -> Result<(), ReportError> {
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(self.to_toml_string()?.as_bytes())?;
        writer.flush()?;
        Ok(())
    }
}
