use crate::config::ConfigError;

pub const EXIT_CONFIG: u8 = 1;
pub const EXIT_ARTIFACT: u8 = 2;
pub const EXIT_RUNTIME: u8 = 3;

/// Fatal failures before or while serving, each with its own exit status.
#[derive(thiserror::Error, Debug)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0:#}")]
    Artifact(anyhow::Error),
    #[error("{0:#}")]
    Runtime(anyhow::Error),
}

impl StartupError {
    pub fn exit_code(&self) -> u8 {
        match self {
            StartupError::Config(_) => EXIT_CONFIG,
            StartupError::Artifact(_) => EXIT_ARTIFACT,
            StartupError::Runtime(_) => EXIT_RUNTIME,
        }
    }
}
