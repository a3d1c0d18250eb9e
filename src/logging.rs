use std::{fmt::Display, net::SocketAddr, time::Duration};

use log::{debug, error, info, warn};

use crate::plan::TestKind;

pub struct NptestLogger;

impl NptestLogger {
    pub fn banner(mode: &str) {
        info!("{:=^100}", format!(" Running as {mode} "));
    }

    pub fn preparing_socket(address: &str) {
        info!("Preparing socket {}", address);
    }

    pub fn connection_closed(addr: &SocketAddr, err: &dyn Display) {
        debug!("Connection {addr} closed: {err}");
    }

    // ============================================================================
    // Orchestrator
    // ============================================================================

    pub fn worker_registered(worker: &str, address: &str) {
        info!("Registering new client: worker={worker} address={address}");
    }

    pub fn worker_polled(worker: &str) {
        debug!("Client {worker} already registered");
    }

    pub fn allocation_blocked(busy: &str) {
        debug!("Client {busy} is not in idle state");
    }

    pub fn not_source(worker: &str, label: &str, source: &str) {
        debug!("Worker {worker} waits: next job '{label}' belongs to {source}");
    }

    pub fn waiting_for_destination(label: &str, destination: &str) {
        debug!("Job '{label}' waits for destination {destination} to register");
    }

    pub fn job_dispatched(label: &str, source: &str, destination: &str, segment_size: u32) {
        info!("Requesting job '{label}' from {source} to {destination} for MSS {segment_size}");
    }

    pub fn job_received(worker: &str, label: &str, bandwidth: &str) {
        info!("Job done from worker {worker} ('{label}') Bandwidth was {bandwidth} Mbits/sec");
    }

    pub fn job_failed(worker: &str, label: &str) {
        error!("Job from worker {worker} ('{label}') produced no bandwidth figure");
    }

    pub fn unsolicited_output(worker: &str) {
        warn!("Ignoring output from {worker}: no job is outstanding");
    }

    pub fn foreign_output(worker: &str, owner: &str) {
        warn!("Ignoring output from {worker}: outstanding job was dispatched to {owner}");
    }

    pub fn stale_output(worker: &str, job: usize, outstanding: usize) {
        warn!("Ignoring output from {worker} for job {job}: job {outstanding} is outstanding");
    }

    pub fn kind_mismatch(worker: &str, submitted: TestKind, expected: TestKind) {
        warn!("Worker {worker} submitted {submitted} output for a {expected} job");
    }

    pub fn plan_complete(marker: &str) {
        info!("ALL TESTCASES AND MSS RANGES COMPLETE - {marker}");
    }

    pub fn report_line(line: &str) {
        info!("{line}");
    }

    pub fn artifact_append_failed(path: &str, err: &dyn Display) {
        warn!("Failed to append to existing file {path}: {err}");
    }

    pub fn request_rejected(addr: &SocketAddr, reason: &str) {
        warn!("Rejected request from {addr}: {reason}");
    }

    // ============================================================================
    // Worker
    // ============================================================================

    pub fn connecting(address: &str) {
        info!("Attempting to connect to orchestrator at {address}");
    }

    pub fn connected() {
        info!("Connected successfully to orchestrator");
    }

    pub fn orchestrator_unreachable(address: &str, err: &dyn Display, backoff: Duration) {
        warn!("Connection to orchestrator {address} failed: {err} (retry in {backoff:?})");
    }

    pub fn call_failed(err: &dyn Display) {
        error!("Error attempting orchestrator call: {err}");
    }

    pub fn idle_requested() {
        debug!("Orchestrator requests worker run idle");
    }

    pub fn servers_requested(worker: &str, timeout_secs: u64) {
        info!("Orchestrator requests {worker} run iperf and netperf server (server timeout {timeout_secs}s)");
    }

    pub fn client_requested(kind: TestKind, host: &str, port: u16, segment_size: u32) {
        info!("Orchestrator requests worker run as {kind} client to {host}:{port} (MSS {segment_size})");
    }

    pub fn command(program: &str, args: &[String]) {
        debug!("Calling command: {program} {}", args.join(" "));
    }

    pub fn benchmark_failed(program: &str, detail: &dyn Display) {
        error!("Failed to run '{program}': {detail}");
    }

    pub fn listener_output(name: &str, line: &str, stderr: bool) {
        if stderr {
            warn!("{name} err: {line}");
        } else {
            info!("{name}: {line}");
        }
    }

    pub fn listener_exited(name: &str, detail: &dyn Display) {
        warn!("Listener {name} exited: {detail}");
    }
}
