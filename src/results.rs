use std::{collections::HashMap, fmt::Write as _};

use crate::{parser::BANDWIDTH_FAILED, plan::REPORT_SEPARATOR};

/// Marks the start of the report table inside mixed console/log output.
pub const REPORT_BEGIN_MARKER: &str = "GENERATING CSV OUTPUT";
/// Marks the end of the report table.
pub const REPORT_END_MARKER: &str = "END CSV DATA";

const LABEL_WIDTH: usize = 45;
const HEADER_LABEL: &str = "MSS";

/// One captured result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measurement {
    /// Segment size the run used, 0 for unswept kinds.
    pub segment_size: u32,
    /// Bandwidth in Mbits/sec as reported by the tool, or the failure sentinel.
    pub bandwidth: String,
    /// Plan index the result was attributed to.
    pub job: usize,
}

impl Measurement {
    fn bandwidth_value(&self) -> Option<f64> {
        self.bandwidth.parse::<f64>().ok().filter(|v| v.is_finite())
    }
}

/// Measurements grouped by test case label, in first-seen label order.
#[derive(Debug, Default)]
pub struct ResultStore {
    points: HashMap<String, Vec<Measurement>>,
    order: Vec<String>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, label: &str, measurement: Measurement) {
        match self.points.get_mut(label) {
            Some(points) => points.push(measurement),
            None => {
                self.order.push(label.to_string());
                self.points.insert(label.to_string(), vec![measurement]);
            }
        }
    }

    pub fn measurements(&self, label: &str) -> &[Measurement] {
        self.points.get(label).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Highest numeric bandwidth recorded for `label`. Failed and
    /// unparsable entries are skipped; the result never drops below zero.
    pub fn maximum(&self, label: &str) -> f64 {
        self.measurements(label)
            .iter()
            .filter_map(Measurement::bandwidth_value)
            .fold(0.0, f64::max)
    }

    /// Renders the whole store as the delimited report, markers included.
    /// The maximum column is written with six decimals, so it reads back
    /// rounded; per-run bandwidths are kept exactly as the tool printed them.
    pub fn render_report(&self) -> String {
        let sep = REPORT_SEPARATOR;
        let mut out = String::new();
        out.push_str(REPORT_BEGIN_MARKER);
        out.push('\n');

        // Every throughput label shares the sweep, so the first swept one
        // provides the column headings.
        let _ = write!(out, "{HEADER_LABEL:<LABEL_WIDTH$}{sep} Maximum{sep}");
        let swept = self
            .labels()
            .map(|label| self.measurements(label))
            .find(|points| points.len() > 1);
        if let Some(points) = swept {
            for point in points {
                let _ = write!(out, " {}{sep}", point.segment_size);
            }
        }
        out.push('\n');

        for label in self.labels() {
            let _ = write!(out, "{label:<LABEL_WIDTH$}{sep}");
            let _ = write!(out, "{:.6}{sep}", self.maximum(label));
            for point in self.measurements(label) {
                let _ = write!(out, "{}{sep}", point.bandwidth);
            }
            out.push('\n');
        }

        out.push_str(REPORT_END_MARKER);
        out.push('\n');
        out
    }
}

/// A row recovered from a rendered report.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub label: String,
    pub maximum: f64,
    pub bandwidths: Vec<String>,
}

/// A rendered report read back into memory.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReport {
    pub segment_sizes: Vec<u32>,
    pub rows: Vec<ReportRow>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReportParseError {
    #[error("begin marker not found")]
    MissingBegin,
    #[error("end marker not found")]
    MissingEnd,
    #[error("header row missing")]
    MissingHeader,
    #[error("invalid segment size '{0}' in header")]
    BadSegmentSize(String),
    #[error("row '{0}' has no maximum column")]
    MissingMaximum(String),
    #[error("invalid maximum '{value}' for '{label}'")]
    BadMaximum { label: String, value: String },
}

/// Locates the report between its markers in `text` and reads it back.
/// Maxima come back at the six-decimal precision they were rendered with.
pub fn parse_report(text: &str) -> Result<ParsedReport, ReportParseError> {
    let mut lines = text
        .lines()
        .skip_while(|line| line.trim() != REPORT_BEGIN_MARKER);
    if lines.next().is_none() {
        return Err(ReportParseError::MissingBegin);
    }

    let header = lines.next().ok_or(ReportParseError::MissingHeader)?;
    if header.trim() == REPORT_END_MARKER {
        return Err(ReportParseError::MissingHeader);
    }
    let segment_sizes = split_fields(header)
        .skip(2)
        .map(|field| {
            field
                .parse::<u32>()
                .map_err(|_| ReportParseError::BadSegmentSize(field.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut rows = Vec::new();
    for line in lines {
        if line.trim() == REPORT_END_MARKER {
            return Ok(ParsedReport {
                segment_sizes,
                rows,
            });
        }
        let mut fields = split_fields(line);
        let Some(label) = fields.next() else {
            continue;
        };
        let label = label.to_string();
        let raw_max = fields
            .next()
            .ok_or_else(|| ReportParseError::MissingMaximum(label.clone()))?;
        let maximum = raw_max
            .parse::<f64>()
            .map_err(|_| ReportParseError::BadMaximum {
                label: label.clone(),
                value: raw_max.to_string(),
            })?;
        rows.push(ReportRow {
            label,
            maximum,
            bandwidths: fields.map(str::to_string).collect(),
        });
    }

    Err(ReportParseError::MissingEnd)
}

fn split_fields(line: &str) -> impl Iterator<Item = &str> {
    line.split(REPORT_SEPARATOR)
        .map(str::trim)
        .filter(|field| !field.is_empty())
}
