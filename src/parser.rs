//! Bandwidth extraction from raw benchmark tool output.
//!
//! Each function returns the first captured Mbits/sec figure as text, or
//! [`BANDWIDTH_FAILED`] when the output has no recognisable result line.

use std::sync::OnceLock;

use regex::Regex;

use crate::plan::TestKind;

/// Recorded in place of a bandwidth when a run failed or could not be parsed.
pub const BANDWIDTH_FAILED: &str = "-1";

fn capture_first(re: &Regex, output: &str) -> String {
    re.captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| BANDWIDTH_FAILED.to_string())
}

/// iperf3 TCP: the summed receiver line of a parallel-stream run.
pub fn parse_tcp_bandwidth(output: &str) -> String {
    static TCP_RE: OnceLock<Regex> = OnceLock::new();
    let re = TCP_RE.get_or_init(|| {
        Regex::new(r"SUM.*\s+(\d+)\sMbits/sec\s+receiver").expect("constant pattern")
    });
    capture_first(re, output)
}

/// iperf3 UDP: the first report line that carries a jitter column.
pub fn parse_udp_bandwidth(output: &str) -> String {
    static UDP_RE: OnceLock<Regex> = OnceLock::new();
    let re = UDP_RE.get_or_init(|| {
        Regex::new(r"\s+(\S+)\sMbits/sec\s+\S+\s+ms\s+").expect("constant pattern")
    });
    capture_first(re, output)
}

/// netperf TCP_STREAM: throughput column of the result row.
pub fn parse_bulk_bandwidth(output: &str) -> String {
    static BULK_RE: OnceLock<Regex> = OnceLock::new();
    let re = BULK_RE.get_or_init(|| {
        Regex::new(r"\s+\d+\s+\d+\s+\d+\s+\S+\s+(\S+)\s*").expect("constant pattern")
    });
    capture_first(re, output)
}

pub fn parse_bandwidth(kind: TestKind, output: &str) -> String {
    match kind {
        TestKind::Tcp => parse_tcp_bandwidth(output),
        TestKind::Udp => parse_udp_bandwidth(output),
        TestKind::Bulk => parse_bulk_bandwidth(output),
    }
}

pub fn is_failed(bandwidth: &str) -> bool {
    bandwidth == BANDWIDTH_FAILED
}
