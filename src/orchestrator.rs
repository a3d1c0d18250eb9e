use std::net::SocketAddr;

use anyhow::Context;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{broadcast, Mutex},
};

use crate::{
    logging::NptestLogger,
    metrics::OrchestratorMetrics,
    proto::{
        FrameReader, FrameWriter, Registration, Request, Response, Submission, TransportError,
        WorkItem,
    },
    scheduler::{RecordedOutput, Scheduler},
    sink::ArtifactFile,
    telemetry,
};

/// Serves registrations and result submissions for one benchmark run.
///
/// All scheduler state sits behind a single lock. Artifact writes happen
/// after the lock is released.
pub struct OrchestratorService {
    scheduler: Mutex<Scheduler>,
    log_file: ArtifactFile,
    result_file: ArtifactFile,
    metrics: OrchestratorMetrics,
}

impl OrchestratorService {
    pub fn new(
        scheduler: Scheduler,
        log_file: ArtifactFile,
        result_file: ArtifactFile,
    ) -> Self {
        Self {
            scheduler: Mutex::new(scheduler),
            log_file,
            result_file,
            metrics: OrchestratorMetrics::new(&telemetry::get_meter()),
        }
    }

    pub async fn bind(address: &str) -> anyhow::Result<TcpListener> {
        NptestLogger::preparing_socket(address);
        let address: SocketAddr = address
            .parse()
            .with_context(|| format!("Invalid bind address {address}"))?;
        TcpListener::bind(address)
            .await
            .with_context(|| format!("Failed to listen on {address}"))
    }

    /// Accept loop. Returns once the stop channel fires.
    pub async fn start(
        &'static self,
        listener: TcpListener,
        mut stop: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        loop {
            let (stream, addr) = tokio::select! {
                _ = stop.recv() => return Ok(()),
                accepted = listener.accept() => accepted?,
            };
            if let Err(err) = stream.set_nodelay(true) {
                log::error!("Failed to set TCP_NODELAY: {err}");
            }

            let service = self;
            tokio::spawn(async move {
                if let Err(err) = service.handle_connection(stream, addr).await {
                    NptestLogger::connection_closed(&addr, &err);
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<(), TransportError> {
        let (read, write) = stream.into_split();
        let mut reader = FrameReader::new(read);
        let mut writer = FrameWriter::new(write);

        loop {
            let request = match reader.next::<Request>().await {
                Ok(Some(request)) => request,
                Ok(None) => return Ok(()),
                Err(TransportError::Codec(err)) => {
                    let reason = err.to_string();
                    NptestLogger::request_rejected(&addr, &reason);
                    writer.send(&Response::Rejected { reason }).await?;
                    continue;
                }
                Err(err) => return Err(err),
            };
            let response = self.handle(request).await;
            if let Response::Rejected { reason } = &response {
                NptestLogger::request_rejected(&addr, reason);
            }
            writer.send(&response).await?;
        }
    }

    pub async fn handle(&self, request: Request) -> Response {
        match request {
            Request::Register(Registration { worker, .. }) if worker.is_empty() => {
                Response::Rejected {
                    reason: "worker name is empty".into(),
                }
            }
            Request::Register(reg) => Response::Work {
                item: self.register(&reg.worker, &reg.address).await,
            },
            Request::Submit(sub) => {
                self.receive_output(sub).await;
                Response::Ack
            }
        }
    }

    /// Registration and poll. Writes the report the one time the scheduler
    /// hands it out.
    pub async fn register(&self, worker: &str, address: &str) -> WorkItem {
        let decision = self.scheduler.lock().await.register(worker, address);

        match &decision.item {
            WorkItem::ServerStart { .. } => self.metrics.record_registration(),
            WorkItem::ClientRun { kind, .. } => self.metrics.record_dispatch(*kind),
            WorkItem::Idle => {}
        }

        if let Some(report) = decision.report {
            for line in report.lines() {
                NptestLogger::report_line(line);
            }
            self.result_file.append_or_warn(&report).await;
        }
        decision.item
    }

    pub async fn receive_output(&self, submission: Submission) -> Option<RecordedOutput> {
        let recorded = self.scheduler.lock().await.receive_output(
            &submission.worker,
            submission.kind,
            submission.job,
            &submission.output,
        )?;

        self.metrics
            .record_measurement(recorded.kind, recorded.failed());
        self.log_file
            .append_or_warn(&recorded.log_entry(&submission.worker, &submission.output))
            .await;
        Some(recorded)
    }

    /// Runs `f` against the scheduler under the lock.
    pub async fn inspect<T>(&self, f: impl FnOnce(&Scheduler) -> T) -> T {
        f(&*self.scheduler.lock().await)
    }

    pub fn log_file(&self) -> &ArtifactFile {
        &self.log_file
    }

    pub fn result_file(&self) -> &ArtifactFile {
        &self.result_file
    }
}
