use std::{
    collections::HashMap,
    fs::{self, File},
    io::prelude::*,
    path::Path,
    time::Duration,
};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::{
    plan::{self, PlanError, SegmentSweep, TestCase, TestKind},
    scheduler::{ListenerPorts, SchedulerSettings},
    worker::WorkerSettings,
};

pub const ENV_ORCHESTRATOR_PORT: &str = "orchestratorPort";
pub const ENV_ORCHESTRATOR_ADDRESS: &str = "orchestratorPodIP";
pub const ENV_WORKER_ADDRESS: &str = "workerPodIP";
pub const ENV_WORKER_NAME: &str = "workerName";

/// Top-level configuration, loaded from a TOML file.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct NptestConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    /// Unknown keys, reported on load.
    #[serde(flatten)]
    pub other_fields: HashMap<String, toml::Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Socket address the orchestrator listens on.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Raw benchmark output, one header line per received result.
    #[serde(default = "default_log_file")]
    pub log_file: String,

    /// Final report.
    #[serde(default = "default_result_file")]
    pub result_file: String,

    #[serde(default)]
    pub sweep: SegmentSweep,

    /// Listener ports announced to workers.
    #[serde(default)]
    pub ports: ListenerPorts,

    /// Lifetime of the listeners a worker starts.
    #[serde(default = "default_server_timeout")]
    pub server_timeout_secs: u64,

    /// Replaces the built-in plan when non-empty.
    #[serde(default)]
    pub case: Vec<CaseConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CaseConfig {
    pub source: String,
    pub destination: String,
    pub label: String,
    pub kind: TestKind,
    #[serde(default)]
    pub virtual_address: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerConfig {
    pub iperf3: String,
    pub netperf: String,
    pub netserver: String,
    /// `-P` for TCP throughput runs.
    pub parallel_streams: u32,
    pub reconnect_backoff_ms: u64,
    pub idle_poll_ms: u64,
    pub server_settle_ms: u64,
    pub cooldown_ms: u64,
}

fn default_bind() -> String {
    "0.0.0.0:5202".to_string()
}

fn default_log_file() -> String {
    "/tmp/output.txt".to_string()
}

fn default_result_file() -> String {
    "/tmp/result.csv".to_string()
}

fn default_server_timeout() -> u64 {
    3600
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            log_file: default_log_file(),
            result_file: default_result_file(),
            sweep: SegmentSweep::default(),
            ports: ListenerPorts::default(),
            server_timeout_secs: default_server_timeout(),
            case: Vec::new(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            iperf3: "/usr/bin/iperf3".to_string(),
            netperf: "/usr/local/bin/netperf".to_string(),
            netserver: "/usr/local/bin/netserver".to_string(),
            parallel_streams: 8,
            reconnect_backoff_ms: 5000,
            idle_poll_ms: 5000,
            server_settle_ms: 1000,
            cooldown_ms: 10000,
        }
    }
}

impl NptestConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(ConfigError::Io)?;
        let config: Self = toml::from_str(&raw).map_err(ConfigError::Parse)?;

        for (key, value) in &config.other_fields {
            warn!("Unknown configuration '{key}' with value {value:?}");
        }

        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let config_str = toml::to_string(&self)?;
        let mut file = File::create(path)?;
        file.write_all(config_str.as_bytes())?;
        Ok(())
    }

    /// Loads `path`, writing the defaults there when it does not exist yet.
    /// A present file is saved back so missing keys get filled in.
    pub fn load_or_init(path: &Path) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Ok(config) => {
                if let Err(err) = config.save(path) {
                    warn!("Failed to save config {}: {err}", path.display());
                }
                Ok(config)
            }
            Err(ConfigError::Io(_)) => {
                let config = Self::default();
                if let Err(err) = config.save(path) {
                    warn!("Failed to write default config {}: {err}", path.display());
                }
                Ok(config)
            }
            Err(err) => Err(err),
        }
    }
}

impl OrchestratorConfig {
    /// The configured cases, or the built-in plan when none are given.
    pub fn plan(&self) -> Result<Vec<TestCase>, PlanError> {
        let plan = if self.case.is_empty() {
            plan::default_plan(&self.sweep)
        } else {
            self.case
                .iter()
                .map(|c| {
                    TestCase::new(
                        c.source.as_str(),
                        c.destination.as_str(),
                        c.label.as_str(),
                        c.kind,
                        c.virtual_address,
                        &self.sweep,
                    )
                })
                .collect()
        };
        plan::validate(&plan, &self.sweep)?;
        Ok(plan)
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            sweep: self.sweep,
            ports: self.ports,
            server_timeout_secs: self.server_timeout_secs,
        }
    }
}

impl WorkerConfig {
    pub fn settings(&self, identity: WorkerIdentity, debug: bool) -> WorkerSettings {
        WorkerSettings {
            orchestrator: identity.orchestrator,
            worker: identity.worker,
            address: identity.address,
            iperf3: self.iperf3.clone(),
            netperf: self.netperf.clone(),
            netserver: self.netserver.clone(),
            parallel_streams: self.parallel_streams,
            reconnect_backoff: Duration::from_millis(self.reconnect_backoff_ms),
            idle_poll: Duration::from_millis(self.idle_poll_ms),
            server_settle: Duration::from_millis(self.server_settle_ms),
            cooldown: Duration::from_millis(self.cooldown_ms),
            debug,
        }
    }
}

/// Who this worker is and where its orchestrator lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity {
    /// `host:port`
    pub orchestrator: String,
    pub worker: String,
    pub address: String,
}

impl WorkerIdentity {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| dotenvy::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &'static str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::MissingVar(key))
        };

        let port = required(ENV_ORCHESTRATOR_PORT)?;
        let port: u16 = port.parse().map_err(|_| ConfigError::InvalidVar {
            var: ENV_ORCHESTRATOR_PORT,
            value: port.clone(),
        })?;
        let host = required(ENV_ORCHESTRATOR_ADDRESS)?;

        let worker = lookup(ENV_WORKER_NAME)
            .or_else(|| lookup("HOSTNAME"))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingVar(ENV_WORKER_NAME))?;
        let address = lookup(ENV_WORKER_ADDRESS)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "0.0.0.0".to_string());

        Ok(Self {
            orchestrator: format!("{host}:{port}"),
            worker,
            address,
        })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Could not open config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Missing environment variable {0}")]
    MissingVar(&'static str),
    #[error("Invalid value '{value}' for {var}")]
    InvalidVar { var: &'static str, value: String },
    #[error("Invalid test plan: {0}")]
    Plan(#[from] PlanError),
}
