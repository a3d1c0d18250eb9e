use std::{collections::HashSet, fmt};

use serde::{Deserialize, Serialize};

/// Field delimiter of the persisted report. Labels may not contain it.
pub const REPORT_SEPARATOR: char = ';';

/// Benchmark flavour a test case runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestKind {
    /// iperf3 TCP throughput, swept over the MSS.
    Tcp,
    /// iperf3 UDP throughput.
    Udp,
    /// netperf bulk TCP stream, single shot.
    Bulk,
}

impl TestKind {
    pub fn is_throughput(self) -> bool {
        matches!(self, Self::Tcp | Self::Udp)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Bulk => "bulk",
        }
    }
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Segment-size sweep shared by every throughput case of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentSweep {
    pub min: u32,
    pub max: u32,
    pub step: u32,
}

impl Default for SegmentSweep {
    fn default() -> Self {
        Self {
            min: 96,
            max: 1460,
            step: 64,
        }
    }
}

impl SegmentSweep {
    /// Initial swept size for a freshly created case of `kind`.
    pub fn start_for(&self, kind: TestKind) -> u32 {
        match kind {
            TestKind::Tcp => self.min,
            TestKind::Udp => self.max,
            TestKind::Bulk => 0,
        }
    }
}

/// One entry of the plan.
///
/// Identity and order are fixed at construction; only `segment_size` and
/// `finished` move, and only through the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub source: String,
    pub destination: String,
    pub label: String,
    pub kind: TestKind,
    /// Address the destination by its cluster hostname instead of its registered IP.
    pub virtual_address: bool,
    pub segment_size: u32,
    pub finished: bool,
}

impl TestCase {
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<String>,
        label: impl Into<String>,
        kind: TestKind,
        virtual_address: bool,
        sweep: &SegmentSweep,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            label: label.into(),
            kind,
            virtual_address,
            segment_size: sweep.start_for(kind),
            finished: false,
        }
    }

    /// Moves the sweep one step forward after a dispatch, finishing the case
    /// once the next size would exceed the ceiling.
    pub(crate) fn advance(&mut self, sweep: &SegmentSweep) {
        if !self.kind.is_throughput() {
            return;
        }
        self.segment_size = self.segment_size.saturating_add(sweep.step);
        if self.segment_size > sweep.max {
            self.finished = true;
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("plan has no test cases")]
    Empty,
    #[error("test case {0} has an empty label")]
    EmptyLabel(usize),
    #[error("label '{0}' is used by more than one test case")]
    DuplicateLabel(String),
    #[error("label '{0}' has leading or trailing whitespace")]
    PaddedLabel(String),
    #[error("label '{0}' contains the report separator '{REPORT_SEPARATOR}'")]
    SeparatorInLabel(String),
    #[error("test case '{0}' has an empty source or destination")]
    MissingWorker(String),
    #[error("sweep step must be positive")]
    ZeroStep,
    #[error("sweep minimum {min} exceeds maximum {max}")]
    InvertedSweep { min: u32, max: u32 },
}

pub fn validate(plan: &[TestCase], sweep: &SegmentSweep) -> Result<(), PlanError> {
    if sweep.step == 0 {
        return Err(PlanError::ZeroStep);
    }
    if sweep.min > sweep.max {
        return Err(PlanError::InvertedSweep {
            min: sweep.min,
            max: sweep.max,
        });
    }
    if plan.is_empty() {
        return Err(PlanError::Empty);
    }

    let mut seen = HashSet::with_capacity(plan.len());
    for (idx, case) in plan.iter().enumerate() {
        if case.label.trim().is_empty() {
            return Err(PlanError::EmptyLabel(idx));
        }
        // The report trims fields, so padding would not survive a read back
        if case.label.trim() != case.label {
            return Err(PlanError::PaddedLabel(case.label.clone()));
        }
        if case.label.contains(REPORT_SEPARATOR) {
            return Err(PlanError::SeparatorInLabel(case.label.clone()));
        }
        if case.source.is_empty() || case.destination.is_empty() {
            return Err(PlanError::MissingWorker(case.label.clone()));
        }
        if !seen.insert(case.label.as_str()) {
            return Err(PlanError::DuplicateLabel(case.label.clone()));
        }
    }
    Ok(())
}

/// The stock three-worker plan: TCP, UDP and netperf over same-node,
/// remote-node and hairpin paths, each by pod IP and by virtual IP.
pub fn default_plan(sweep: &SegmentSweep) -> Vec<TestCase> {
    use TestKind::*;

    const W1: &str = "netperf-w1";
    const W2: &str = "netperf-w2";
    const W3: &str = "netperf-w3";

    let cases: [(&str, &str, &str, TestKind, bool); 13] = [
        (W1, W2, "1 iperf TCP. Same VM using Pod IP", Tcp, false),
        (W1, W2, "2 iperf TCP. Same VM using Virtual IP", Tcp, true),
        (W1, W3, "3 iperf TCP. Remote VM using Pod IP", Tcp, false),
        (W3, W2, "4 iperf TCP. Remote VM using Virtual IP", Tcp, true),
        (W2, W2, "5 iperf TCP. Hairpin Pod to own Virtual IP", Tcp, true),
        (W1, W2, "6 iperf UDP. Same VM using Pod IP", Udp, false),
        (W1, W2, "7 iperf UDP. Same VM using Virtual IP", Udp, true),
        (W1, W3, "8 iperf UDP. Remote VM using Pod IP", Udp, false),
        (W3, W2, "9 iperf UDP. Remote VM using Virtual IP", Udp, true),
        (W1, W2, "10 netperf. Same VM using Pod IP", Bulk, false),
        (W1, W2, "11 netperf. Same VM using Virtual IP", Bulk, true),
        (W1, W3, "12 netperf. Remote VM using Pod IP", Bulk, false),
        (W3, W2, "13 netperf. Remote VM using Virtual IP", Bulk, true),
    ];

    cases
        .into_iter()
        .map(|(src, dst, label, kind, virt)| TestCase::new(src, dst, label, kind, virt, sweep))
        .collect()
}
