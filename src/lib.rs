pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod parser;
pub mod plan;
pub mod proto;
pub mod registry;
pub mod results;
pub mod runner;
pub mod scheduler;
pub mod sink;
pub mod telemetry;
pub mod utils;
pub mod worker;
