use std::process::ExitCode;

use clap::Parser;
use log::{error, info, warn, LevelFilter};
use nptest::{
    cli::{Cli, Mode},
    config::{ConfigError, NptestConfig, WorkerIdentity},
    error::{StartupError, EXIT_CONFIG},
    logging::NptestLogger,
    orchestrator::OrchestratorService,
    runner::ProcessRunner,
    scheduler::Scheduler,
    sink::ArtifactFile,
    telemetry::{self, oltp::init_meter},
    utils::leak,
    worker::WorkerAgent,
};
use tokio::sync::broadcast;

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if !err.use_stderr() => err.exit(),
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cfg!(debug_assertions) || cli.debug {
        logger.filter_level(LevelFilter::Debug);
    }
    logger.init();

    let provider = if telemetry::export_enabled() {
        match init_meter() {
            Ok(provider) => Some(provider),
            Err(err) => {
                warn!("Metrics export disabled: {err:#}");
                None
            }
        }
    } else {
        None
    };

    NptestLogger::banner(cli.mode.as_str());

    let stop = leak(broadcast::channel(1).0);
    tokio::spawn(async move {
        if let Err(err) = wait_for_signal().await {
            error!("Failed to install signal handlers: {err}");
            return;
        }
        info!("Received signal, stopping...");
        let _ = stop.send(());
    });

    let result = match cli.mode {
        Mode::Orchestrator => run_orchestrator(&cli, stop).await,
        Mode::Worker => run_worker(&cli, stop).await,
    };

    if let Some(provider) = provider {
        if let Err(err) = provider.shutdown() {
            warn!("Failed to flush metrics: {err}");
        }
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::from(err.exit_code())
        }
    }
}

async fn run_orchestrator(
    cli: &Cli,
    stop: &'static broadcast::Sender<()>,
) -> Result<(), StartupError> {
    let config = NptestConfig::load_or_init(&cli.config)?;
    let orchestrator = config.orchestrator;
    let plan = orchestrator.plan().map_err(ConfigError::from)?;
    info!("Loaded plan with {} test cases", plan.len());

    let log_file = ArtifactFile::open(&orchestrator.log_file)
        .await
        .map_err(StartupError::Artifact)?;
    let result_file = ArtifactFile::open(&orchestrator.result_file)
        .await
        .map_err(StartupError::Artifact)?;

    let listener = OrchestratorService::bind(&orchestrator.bind)
        .await
        .map_err(StartupError::Runtime)?;
    let scheduler = Scheduler::new(plan, orchestrator.scheduler_settings());
    let service = leak(OrchestratorService::new(scheduler, log_file, result_file));
    service
        .start(listener, stop.subscribe())
        .await
        .map_err(StartupError::Runtime)
}

async fn run_worker(cli: &Cli, stop: &'static broadcast::Sender<()>) -> Result<(), StartupError> {
    let config = NptestConfig::load_or_init(&cli.config)?;
    let identity = WorkerIdentity::from_env()?;
    info!(
        "Worker {} ({}) reporting to {}",
        identity.worker, identity.address, identity.orchestrator
    );

    let agent = WorkerAgent::new(config.worker.settings(identity, cli.debug), ProcessRunner);
    agent.run(stop.subscribe()).await;
    Ok(())
}

async fn wait_for_signal() -> std::io::Result<()> {
    use futures::future::{select_all, FutureExt};
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let _ = select_all([sigint.recv().boxed(), sigterm.recv().boxed()]).await;
    Ok(())
}
