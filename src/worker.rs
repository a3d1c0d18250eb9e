use std::time::Duration;

use tokio::{
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::broadcast,
    time::sleep,
};

use crate::{
    logging::NptestLogger,
    plan::TestKind,
    proto::{
        FrameReader, FrameWriter, Registration, Request, Response, Submission, TransportError,
        WorkItem,
    },
    runner::{self, BenchmarkCommand, BenchmarkRunner},
};

/// One persistent connection to the orchestrator. Calls are strictly
/// request then response.
pub struct OrchestratorClient {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
}

impl OrchestratorClient {
    pub async fn connect(address: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        let (read, write) = stream.into_split();
        Ok(Self {
            reader: FrameReader::new(read),
            writer: FrameWriter::new(write),
        })
    }

    async fn call(&mut self, request: &Request) -> Result<Response, TransportError> {
        self.writer.send(request).await?;
        self.reader
            .next::<Response>()
            .await?
            .ok_or(TransportError::Closed)
    }

    /// Registers (or polls) and returns the orchestrator's instruction.
    pub async fn register(&mut self, registration: &Registration) -> Result<WorkItem, TransportError> {
        match self.call(&Request::Register(registration.clone())).await? {
            Response::Work { item } => Ok(item),
            Response::Rejected { reason } => Err(TransportError::Unexpected(reason)),
            other => Err(TransportError::Unexpected(format!("{other:?}"))),
        }
    }

    pub async fn submit(&mut self, submission: Submission) -> Result<(), TransportError> {
        match self.call(&Request::Submit(submission)).await? {
            Response::Ack => Ok(()),
            Response::Rejected { reason } => Err(TransportError::Unexpected(reason)),
            other => Err(TransportError::Unexpected(format!("{other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// `host:port` of the orchestrator.
    pub orchestrator: String,
    pub worker: String,
    pub address: String,
    pub iperf3: String,
    pub netperf: String,
    pub netserver: String,
    pub parallel_streams: u32,
    pub reconnect_backoff: Duration,
    pub idle_poll: Duration,
    pub server_settle: Duration,
    pub cooldown: Duration,
    pub debug: bool,
}

pub struct WorkerAgent<R> {
    settings: WorkerSettings,
    runner: R,
}

impl<R: BenchmarkRunner> WorkerAgent<R> {
    pub fn new(settings: WorkerSettings, runner: R) -> Self {
        Self { settings, runner }
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Connects, polls and runs work until `stop` fires. A broken connection
    /// sends the agent back to connecting.
    pub async fn run(&self, mut stop: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = stop.recv() => return,
                _ = self.session() => {}
            }
        }
    }

    async fn session(&self) {
        let mut client = self.connect().await;
        if let Err(err) = self.poll_loop(&mut client).await {
            NptestLogger::call_failed(&err);
        }
    }

    async fn connect(&self) -> OrchestratorClient {
        let address = &self.settings.orchestrator;
        loop {
            NptestLogger::connecting(address);
            match OrchestratorClient::connect(address).await {
                Ok(client) => {
                    NptestLogger::connected();
                    return client;
                }
                Err(err) => {
                    let backoff = self.settings.reconnect_backoff;
                    NptestLogger::orchestrator_unreachable(address, &err, backoff);
                    sleep(backoff).await;
                }
            }
        }
    }

    async fn poll_loop(&self, client: &mut OrchestratorClient) -> Result<(), TransportError> {
        let registration = Registration {
            worker: self.settings.worker.clone(),
            address: self.settings.address.clone(),
        };

        loop {
            match client.register(&registration).await? {
                WorkItem::Idle => {
                    NptestLogger::idle_requested();
                    sleep(self.settings.idle_poll).await;
                }
                WorkItem::ServerStart {
                    listen_port,
                    bulk_listen_port,
                    timeout_secs,
                } => {
                    NptestLogger::servers_requested(&self.settings.worker, timeout_secs);
                    self.start_listeners(listen_port, bulk_listen_port);
                    sleep(self.settings.server_settle).await;
                }
                WorkItem::ClientRun {
                    job,
                    host,
                    port,
                    kind,
                    segment_size,
                } => {
                    NptestLogger::client_requested(kind, &host, port, segment_size);
                    let cmd = self.client_command(kind, &host, port, segment_size);
                    let run = self.runner.run(&cmd).await;
                    client
                        .submit(Submission {
                            worker: self.settings.worker.clone(),
                            kind,
                            output: run.output,
                            job: Some(job),
                        })
                        .await?;
                    // Cooldown before the next poll
                    sleep(self.settings.cooldown).await;
                }
            }
        }
    }

    fn start_listeners(&self, port: u16, bulk_port: u16) {
        let s = &self.settings;
        let listeners = [
            runner::throughput_listener(&s.iperf3, port, s.debug),
            runner::bulk_listener(&s.netserver, bulk_port, s.debug),
        ];
        for cmd in listeners {
            let program = cmd.program.clone();
            if let Err(err) = self.runner.spawn_listener(cmd) {
                NptestLogger::benchmark_failed(&program, &err);
            }
        }
    }

    fn client_command(&self, kind: TestKind, host: &str, port: u16, segment_size: u32) -> BenchmarkCommand {
        let s = &self.settings;
        match kind {
            TestKind::Tcp => {
                runner::tcp_client(&s.iperf3, host, port, s.parallel_streams, segment_size)
            }
            TestKind::Udp => runner::udp_client(&s.iperf3, host, port),
            TestKind::Bulk => runner::bulk_client(&s.netperf, host, port),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::net::TcpListener;

    use super::*;
    use crate::runner::RunOutput;

    struct NoopRunner;

    #[async_trait]
    impl BenchmarkRunner for NoopRunner {
        async fn run(&self, _cmd: &BenchmarkCommand) -> RunOutput {
            RunOutput::failed()
        }

        fn spawn_listener(&self, _cmd: BenchmarkCommand) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn settings() -> WorkerSettings {
        WorkerSettings {
            orchestrator: "127.0.0.1:5202".into(),
            worker: "netperf-w1".into(),
            address: "10.0.0.1".into(),
            iperf3: "/usr/bin/iperf3".into(),
            netperf: "/usr/local/bin/netperf".into(),
            netserver: "/usr/local/bin/netserver".into(),
            parallel_streams: 8,
            reconnect_backoff: Duration::from_millis(10),
            idle_poll: Duration::from_millis(10),
            server_settle: Duration::from_millis(10),
            cooldown: Duration::from_millis(10),
            debug: false,
        }
    }

    #[test]
    fn client_command_matches_kind() {
        let agent = WorkerAgent::new(settings(), NoopRunner);

        let tcp = agent.client_command(TestKind::Tcp, "10.0.0.2", 5201, 224);
        assert_eq!(tcp.program, "/usr/bin/iperf3");
        assert_eq!(tcp.args[tcp.args.len() - 4..].join(" "), "-P 8 -M 224");

        let udp = agent.client_command(TestKind::Udp, "10.0.0.2", 5201, 1460);
        assert!(udp.args.contains(&"-u".to_string()));

        let bulk = agent.client_command(TestKind::Bulk, "netperf-w2", 12865, 0);
        assert_eq!(bulk.program, "/usr/local/bin/netperf");
    }

    #[tokio::test]
    async fn client_round_trips_against_a_stub() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let stub = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, write) = stream.into_split();
            let mut reader = FrameReader::new(read);
            let mut writer = FrameWriter::new(write);

            let req: Request = reader.next().await.unwrap().unwrap();
            assert!(matches!(req, Request::Register(ref r) if r.worker == "netperf-w1"));
            writer
                .send(&Response::Work {
                    item: WorkItem::Idle,
                })
                .await
                .unwrap();

            let req: Request = reader.next().await.unwrap().unwrap();
            assert!(matches!(req, Request::Submit(ref s) if s.job == Some(4)));
            writer.send(&Response::Ack).await.unwrap();

            let _: Request = reader.next().await.unwrap().unwrap();
            writer
                .send(&Response::Rejected {
                    reason: "nope".into(),
                })
                .await
                .unwrap();
        });

        let mut client = OrchestratorClient::connect(&addr).await.unwrap();
        let registration = Registration {
            worker: "netperf-w1".into(),
            address: "10.0.0.1".into(),
        };
        assert_eq!(client.register(&registration).await.unwrap(), WorkItem::Idle);
        client
            .submit(Submission {
                worker: "netperf-w1".into(),
                kind: TestKind::Tcp,
                output: String::new(),
                job: Some(4),
            })
            .await
            .unwrap();
        assert!(matches!(
            client.register(&registration).await,
            Err(TransportError::Unexpected(reason)) if reason == "nope"
        ));
        stub.await.unwrap();

        // Peer is gone now
        assert!(client.register(&registration).await.is_err());
    }

    #[tokio::test]
    async fn run_returns_on_stop_while_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let agent = WorkerAgent::new(
            WorkerSettings {
                orchestrator: addr,
                ..settings()
            },
            NoopRunner,
        );
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(async move { agent.run(rx).await });
        sleep(Duration::from_millis(50)).await;
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
