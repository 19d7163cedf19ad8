use crate::core::io::traits::ScanReader;
use crate::core::models::point::ScanPoint;
use crate::core::models::sample::{LatticeError, Sample, ScatteringPlane};
use crate::core::models::scan::{Scan, ScanError, ScanMetadata};
use csv::{ReaderBuilder, StringRecord, Trim};
use std::io::{self, BufRead};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ScanFileError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Parse error on line {line}: {kind}")]
    Parse { line: usize, kind: ScanParseErrorKind },
    #[error("Malformed scan table (line {line:?}): {source}")]
    Csv {
        line: Option<u64>,
        source: csv::Error,
    },
    #[error("Missing required header '{0}'")]
    MissingHeader(&'static str),
    #[error("Missing required column '{0}'")]
    MissingColumn(String),
    #[error("Scan file declares no data points")]
    NoPoints,
    #[error("Invalid sample geometry: {0}")]
    Lattice(#[from] LatticeError),
    #[error("Inconsistent scan: {0}")]
    Inconsistency(#[from] ScanError),
}

#[derive(Debug, Error)]
pub enum ScanParseErrorKind {
    #[error("Header '{key}' has an invalid value '{value}'")]
    InvalidHeader { key: String, value: String },
    #[error("Invalid number in column '{column}' (value: '{value}')")]
    InvalidFloat { column: String, value: String },
}

impl From<csv::Error> for ScanFileError {
    fn from(source: csv::Error) -> Self {
        ScanFileError::Csv {
            line: source.position().map(|p| p.line()),
            source,
        }
    }
}

#[derive(Clone, Copy)]
enum Wavevector {
    Fixed(f64),
    Column(usize),
}

#[derive(Debug, Default)]
struct Header {
    title: Option<String>,
    lattice: Option<[f64; 3]>,
    angles: Option<[f64; 3]>,
    plane_a: Option<[f64; 3]>,
    plane_b: Option<[f64; 3]>,
    ki: Option<f64>,
    kf: Option<f64>,
}

/// Reader for the plain-text scan format.
///
/// ```text
/// # title   = TA phonon along (h00)
/// # lattice = 5.43, 5.43, 5.43
/// # angles  = 90, 90, 90
/// # plane_a = 1, 0, 0
/// # plane_b = 0, 1, 0
/// # kf      = 2.662
/// h, k, l, ki, counts, monitor
/// 1.00, 0, 0, 2.70, 12, 10000
/// ```
///
/// `lattice` is required. `angles` default to 90°, the plane to (100)/(010).
/// A `ki` or `kf` header fixes that wavevector for every row; otherwise the
/// table must carry the column. Comment lines without `=` are ignored.
#[derive(Debug, Clone)]
pub struct TextScanReader {
    pub counts_column: String,
    pub monitor_column: String,
}

impl Default for TextScanReader {
    fn default() -> Self {
        Self {
            counts_column: "counts".to_string(),
            monitor_column: "monitor".to_string(),
        }
    }
}

impl TextScanReader {
    pub fn new(counts_column: impl Into<String>, monitor_column: impl Into<String>) -> Self {
        Self {
            counts_column: counts_column.into(),
            monitor_column: monitor_column.into(),
        }
    }
}

fn parse_vector(value: &str) -> Option<[f64; 3]> {
    let parts: Vec<f64> = value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect::<Result<_, _>>()
        .ok()?;
    parts.try_into().ok()
}

fn parse_header(text: &str) -> Result<Header, ScanFileError> {
    let mut header = Header::default();
    for (index, raw) in text.lines().enumerate() {
        let Some(comment) = raw.trim_start().strip_prefix('#') else {
            continue;
        };
        let Some((key, value)) = comment.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        let invalid = || ScanFileError::Parse {
            line: index + 1,
            kind: ScanParseErrorKind::InvalidHeader {
                key: key.clone(),
                value: value.to_string(),
            },
        };
        match key.as_str() {
            "title" => header.title = Some(value.to_string()),
            "lattice" => header.lattice = Some(parse_vector(value).ok_or_else(invalid)?),
            "angles" => header.angles = Some(parse_vector(value).ok_or_else(invalid)?),
            "plane_a" => header.plane_a = Some(parse_vector(value).ok_or_else(invalid)?),
            "plane_b" => header.plane_b = Some(parse_vector(value).ok_or_else(invalid)?),
            "ki" => header.ki = Some(value.parse().map_err(|_| invalid())?),
            "kf" => header.kf = Some(value.parse().map_err(|_| invalid())?),
            _ => debug!(key = %key, "Ignoring unknown scan header"),
        }
    }
    Ok(header)
}

fn parse_field(
    record: &StringRecord,
    index: usize,
    column: &str,
    line: usize,
) -> Result<f64, ScanFileError> {
    let value = record.get(index).unwrap_or("");
    value.parse().map_err(|_| ScanFileError::Parse {
        line,
        kind: ScanParseErrorKind::InvalidFloat {
            column: column.to_string(),
            value: value.to_string(),
        },
    })
}

impl ScanReader for TextScanReader {
    type Error = ScanFileError;

    fn read_from(&self, reader: &mut impl BufRead) -> Result<Scan, Self::Error> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        let header = parse_header(&text)?;

        let mut table = ReaderBuilder::new()
            .trim(Trim::All)
            .comment(Some(b'#'))
            .from_reader(text.as_bytes());
        let columns = table.headers()?.clone();
        let find = |name: &str| {
            columns
                .iter()
                .position(|c| c.eq_ignore_ascii_case(name))
                .ok_or_else(|| ScanFileError::MissingColumn(name.to_string()))
        };

        let h_col = find("h")?;
        let k_col = find("k")?;
        let l_col = find("l")?;
        let ki_source = match header.ki {
            Some(ki) => Wavevector::Fixed(ki),
            None => Wavevector::Column(find("ki")?),
        };
        let kf_source = match header.kf {
            Some(kf) => Wavevector::Fixed(kf),
            None => Wavevector::Column(find("kf")?),
        };
        let counts_col = find(self.counts_column.as_str())?;
        let monitor_col = find(self.monitor_column.as_str())?;

        let mut points = Vec::new();
        let mut counts = Vec::new();
        let mut monitor = Vec::new();
        for (row, record) in table.records().enumerate() {
            let record = record?;
            let line = record
                .position()
                .map_or(row + 2, |p| p.line() as usize);
            let field = |index, column: &str| parse_field(&record, index, column, line);

            let ki = match ki_source {
                Wavevector::Fixed(ki) => ki,
                Wavevector::Column(col) => field(col, "ki")?,
            };
            let kf = match kf_source {
                Wavevector::Fixed(kf) => kf,
                Wavevector::Column(col) => field(col, "kf")?,
            };
            points.push(ScanPoint::from_wavevectors(
                field(h_col, "h")?,
                field(k_col, "k")?,
                field(l_col, "l")?,
                ki,
                kf,
            ));
            counts.push(field(counts_col, self.counts_column.as_str())?);
            monitor.push(field(monitor_col, self.monitor_column.as_str())?);
        }

        if points.is_empty() {
            return Err(ScanFileError::NoPoints);
        }

        let lattice = header.lattice.ok_or(ScanFileError::MissingHeader("lattice"))?;
        let sample = Sample::new(lattice, header.angles.unwrap_or([90.0; 3]))?;
        let defaults = ScatteringPlane::default();
        let plane = ScatteringPlane {
            a: header.plane_a.unwrap_or(defaults.a),
            b: header.plane_b.unwrap_or(defaults.b),
        };
        plane.normal(&sample)?;

        debug!(points = points.len(), "Parsed scan table");
        let metadata = ScanMetadata {
            source: None,
            title: header.title,
            counts_column: self.counts_column.clone(),
            monitor_column: self.monitor_column.clone(),
        };
        Ok(Scan::new(sample, plane, points, counts, monitor, metadata)?)
    }
}
