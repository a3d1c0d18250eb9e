use std::process::Stdio;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
};

use crate::logging::NptestLogger;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkCommand {
    /// Short name used in log lines, e.g. `iperf3-server`.
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
}

impl BenchmarkCommand {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    pub fn arg_if(self, cond: bool, value: impl Into<String>) -> Self {
        if cond {
            self.arg(value)
        } else {
            self
        }
    }
}

/// Captured result of a benchmark client run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunOutput {
    /// Standard output of the tool. Empty when the run failed.
    pub output: String,
    pub success: bool,
}

impl RunOutput {
    pub fn failed() -> Self {
        Self::default()
    }
}

#[async_trait]
pub trait BenchmarkRunner: Send + Sync {
    /// Runs a client to completion. Never errors: failures come back as an
    /// empty, unsuccessful [`RunOutput`].
    async fn run(&self, cmd: &BenchmarkCommand) -> RunOutput;

    /// Starts a listener in the background. It is never awaited and runs
    /// until it exits on its own or the process ends.
    fn spawn_listener(&self, cmd: BenchmarkCommand) -> anyhow::Result<()>;
}

/// Runs benchmark tools as child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl BenchmarkRunner for ProcessRunner {
    async fn run(&self, cmd: &BenchmarkCommand) -> RunOutput {
        NptestLogger::command(&cmd.program, &cmd.args);

        let result = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .output()
            .await;

        match result {
            Ok(out) if out.status.success() => RunOutput {
                output: String::from_utf8_lossy(&out.stdout).into_owned(),
                success: true,
            },
            Ok(out) => {
                let detail = format!(
                    "{}: {} {}",
                    out.status,
                    String::from_utf8_lossy(&out.stdout).trim(),
                    String::from_utf8_lossy(&out.stderr).trim()
                );
                NptestLogger::benchmark_failed(&cmd.program, &detail);
                RunOutput::failed()
            }
            Err(err) => {
                NptestLogger::benchmark_failed(&cmd.program, &err);
                RunOutput::failed()
            }
        }
    }

    fn spawn_listener(&self, cmd: BenchmarkCommand) -> anyhow::Result<()> {
        NptestLogger::command(&cmd.program, &cmd.args);

        let mut child = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // dies with the runtime
            .kill_on_drop(true)
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr unavailable"))?;

        tokio::spawn(stream_logs(cmd.name.clone(), stdout, false));
        tokio::spawn(stream_logs(cmd.name.clone(), stderr, true));

        let name = cmd.name;
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => NptestLogger::listener_exited(&name, &status),
                Err(err) => NptestLogger::listener_exited(&name, &err),
            }
        });
        Ok(())
    }
}

async fn stream_logs(name: String, stream: impl AsyncRead + Unpin, stderr: bool) {
    let mut reader = BufReader::new(stream).lines();
    while let Ok(Some(line)) = reader.next_line().await {
        NptestLogger::listener_output(&name, &line, stderr);
    }
}

// ============================================================================
// Command lines
// ============================================================================

pub fn throughput_listener(iperf3: &str, port: u16, debug: bool) -> BenchmarkCommand {
    BenchmarkCommand::new("iperf3-server", iperf3)
        .args(["-s", "-p"])
        .arg(port.to_string())
        .arg_if(debug, "-V")
        .arg_if(debug, "-d")
}

pub fn bulk_listener(netserver: &str, port: u16, debug: bool) -> BenchmarkCommand {
    BenchmarkCommand::new("netserver", netserver)
        .args(["-D", "-p"])
        .arg(port.to_string())
        .arg_if(debug, "-d")
}

pub fn tcp_client(
    iperf3: &str,
    host: &str,
    port: u16,
    streams: u32,
    segment_size: u32,
) -> BenchmarkCommand {
    BenchmarkCommand::new("iperf3-tcp", iperf3)
        .args(["-c", host, "-p"])
        .arg(port.to_string())
        .args(["-N", "-i", "30", "-t", "10", "-f", "m", "-w", "512M", "-Z", "-P"])
        .arg(streams.to_string())
        .arg("-M")
        .arg(segment_size.to_string())
}

pub fn udp_client(iperf3: &str, host: &str, port: u16) -> BenchmarkCommand {
    BenchmarkCommand::new("iperf3-udp", iperf3)
        .args(["-c", host, "-p"])
        .arg(port.to_string())
        .args(["-i", "30", "-t", "10", "-f", "m", "-b", "0", "-u"])
}

pub fn bulk_client(netperf: &str, host: &str, port: u16) -> BenchmarkCommand {
    BenchmarkCommand::new("netperf", netperf)
        .args(["-H", host, "-p"])
        .arg(port.to_string())
}
