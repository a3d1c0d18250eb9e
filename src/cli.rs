use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Orchestrator,
    Worker,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Orchestrator => "orchestrator",
            Mode::Worker => "worker",
        }
    }
}

/// Distributed network throughput benchmark.
#[derive(Debug, Parser)]
#[command(name = "nptest", version)]
pub struct Cli {
    /// Role of this process.
    #[arg(long, value_enum, default_value_t = Mode::Worker)]
    pub mode: Mode,

    /// Verbose logging and debug flags for the benchmark listeners.
    #[arg(long)]
    pub debug: bool,

    /// TOML configuration file, created with defaults if missing.
    #[arg(long, default_value = "nptest.toml")]
    pub config: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_worker() {
        let cli = Cli::try_parse_from(["nptest"]).unwrap();
        assert_eq!(cli.mode, Mode::Worker);
        assert!(!cli.debug);
        assert_eq!(cli.config, PathBuf::from("nptest.toml"));
    }

    #[test]
    fn parses_orchestrator_mode() {
        let cli = Cli::try_parse_from(["nptest", "--mode", "orchestrator", "--debug"]).unwrap();
        assert_eq!(cli.mode, Mode::Orchestrator);
        assert!(cli.debug);
    }

    #[test]
    fn rejects_unknown_mode() {
        assert!(Cli::try_parse_from(["nptest", "--mode", "client"]).is_err());
    }
}
