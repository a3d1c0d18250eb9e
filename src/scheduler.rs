//! Work allocation for the orchestrator.
//!
//! The scheduler owns the plan, the worker registry, the allocation cursor
//! and the result store. Callers serialize access to it behind one lock, so
//! each registration and each result submission is atomic with respect to
//! every other worker.
//!
//! Only one client job is ever in flight across the fleet. That is what lets
//! a result submission be attributed to the job the cursor points at: no
//! other job can be dispatched between a `ClientRun` and its submission,
//! because every other worker is told to idle while one worker is busy.
//!
//! A worker that registers and then disappears mid-job stays busy forever
//! and stalls the plan. There is no liveness detection.

use serde::{Deserialize, Serialize};

use crate::{
    logging::NptestLogger,
    parser::{self, BANDWIDTH_FAILED},
    plan::{SegmentSweep, TestCase, TestKind},
    proto::WorkItem,
    registry::WorkerRegistry,
    results::{Measurement, ResultStore, REPORT_BEGIN_MARKER},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerPorts {
    /// iperf3 server port.
    pub throughput: u16,
    /// netserver port.
    pub bulk: u16,
}

impl Default for ListenerPorts {
    fn default() -> Self {
        Self {
            throughput: 5201,
            bulk: 12865,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub sweep: SegmentSweep,
    pub ports: ListenerPorts,
    pub server_timeout_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            sweep: SegmentSweep::default(),
            ports: ListenerPorts::default(),
            server_timeout_secs: 3600,
        }
    }
}

/// The job the cursor points at.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Dispatch {
    job: usize,
    worker: String,
    segment_size: u32,
}

/// Answer to a registration or poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub item: WorkItem,
    /// Rendered report, present exactly once: on the first poll after the
    /// last test case finished.
    pub report: Option<String>,
}

impl Decision {
    fn idle() -> Self {
        Self::item(WorkItem::Idle)
    }

    fn item(item: WorkItem) -> Self {
        Self { item, report: None }
    }
}

/// A submission that was attributed to a test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedOutput {
    pub job: usize,
    pub label: String,
    pub source: String,
    pub destination: String,
    pub kind: TestKind,
    pub segment_size: u32,
    pub bandwidth: String,
    /// The test case is finished after this result.
    pub finished: bool,
}

impl RecordedOutput {
    pub fn failed(&self) -> bool {
        parser::is_failed(&self.bandwidth)
    }

    /// Header plus raw tool output, as appended to the output log.
    pub fn log_entry(&self, worker: &str, output: &str) -> String {
        let kind = match self.kind {
            TestKind::Tcp => "TCP",
            TestKind::Udp => "UDP",
            TestKind::Bulk => "netperf",
        };
        let mut entry = format!(
            "Received {kind} output from worker {worker} for test {} from {} to {}",
            self.label, self.source, self.destination
        );
        if self.kind.is_throughput() {
            entry.push_str(&format!(" MSS: {}", self.segment_size));
        }
        entry.push('\n');
        entry.push_str(output);
        if !output.ends_with('\n') {
            entry.push('\n');
        }
        entry
    }
}

#[derive(Debug)]
pub struct Scheduler {
    plan: Vec<TestCase>,
    settings: SchedulerSettings,
    registry: WorkerRegistry,
    results: ResultStore,
    current: Option<Dispatch>,
    flushed: bool,
}

impl Scheduler {
    pub fn new(plan: Vec<TestCase>, settings: SchedulerSettings) -> Self {
        Self {
            plan,
            settings,
            registry: WorkerRegistry::new(),
            results: ResultStore::new(),
            current: None,
            flushed: false,
        }
    }

    /// Registration and poll entry point.
    ///
    /// A worker's first registration always answers with the listener start
    /// instruction. Later calls mark the worker idle and run allocation.
    pub fn register(&mut self, worker: &str, address: &str) -> Decision {
        if self.registry.admit(worker, address) {
            NptestLogger::worker_registered(worker, address);
            return Decision::item(WorkItem::ServerStart {
                listen_port: self.settings.ports.throughput,
                bulk_listen_port: self.settings.ports.bulk,
                timeout_secs: self.settings.server_timeout_secs,
            });
        }

        NptestLogger::worker_polled(worker);
        // Idle unless allocation hands out a job below.
        self.registry.set_idle(worker, true);
        self.allocate(worker)
    }

    /// Picks the next job for `worker`, which must already be registered.
    /// Only reachable through [`Scheduler::register`].
    fn allocate(&mut self, worker: &str) -> Decision {
        if let Some(busy) = self.registry.busy_worker() {
            NptestLogger::allocation_blocked(&busy.worker);
            return Decision::idle();
        }

        let next = self.plan.iter().position(|case| !case.finished);
        let Some(job) = next else {
            return self.complete();
        };

        let case = &self.plan[job];
        if case.source != worker {
            NptestLogger::not_source(worker, &case.label, &case.source);
            return Decision::idle();
        }
        let Some(destination) = self.registry.get(&case.destination) else {
            NptestLogger::waiting_for_destination(&case.label, &case.destination);
            return Decision::idle();
        };

        let host = if case.virtual_address {
            destination.worker.clone()
        } else {
            destination.address.clone()
        };
        let port = match case.kind {
            TestKind::Tcp | TestKind::Udp => self.settings.ports.throughput,
            TestKind::Bulk => self.settings.ports.bulk,
        };
        let segment_size = case.segment_size;
        let kind = case.kind;
        NptestLogger::job_dispatched(&case.label, &case.source, &case.destination, segment_size);

        self.registry.set_idle(worker, false);
        self.current = Some(Dispatch {
            job,
            worker: worker.to_string(),
            segment_size,
        });
        self.plan[job].advance(&self.settings.sweep);

        Decision::item(WorkItem::ClientRun {
            job,
            host,
            port,
            kind,
            segment_size,
        })
    }

    /// Every case is finished: hand out the report once, idle forever after.
    fn complete(&mut self) -> Decision {
        if self.flushed {
            return Decision::idle();
        }
        self.flushed = true;
        NptestLogger::plan_complete(REPORT_BEGIN_MARKER);
        Decision {
            item: WorkItem::Idle,
            report: Some(self.results.render_report()),
        }
    }

    /// Attributes a submitted benchmark output to the outstanding job.
    ///
    /// Returns `None` when nothing is outstanding for this worker; the
    /// submission is then logged and dropped. Parse failures are recorded as
    /// the failure sentinel, never reported as errors.
    pub fn receive_output(
        &mut self,
        worker: &str,
        kind: TestKind,
        job: Option<usize>,
        output: &str,
    ) -> Option<RecordedOutput> {
        let Some(dispatch) = self.current.as_ref() else {
            NptestLogger::unsolicited_output(worker);
            return None;
        };
        if dispatch.worker != worker {
            NptestLogger::foreign_output(worker, &dispatch.worker);
            return None;
        }
        if let Some(echoed) = job {
            if echoed != dispatch.job {
                NptestLogger::stale_output(worker, echoed, dispatch.job);
                return None;
            }
        }
        let dispatch = self.current.take()?;

        let case = &mut self.plan[dispatch.job];
        if kind != case.kind {
            NptestLogger::kind_mismatch(worker, kind, case.kind);
        }

        let bandwidth = parser::parse_bandwidth(case.kind, output);
        if case.kind == TestKind::Bulk {
            case.finished = true;
        }

        let recorded = RecordedOutput {
            job: dispatch.job,
            label: case.label.clone(),
            source: case.source.clone(),
            destination: case.destination.clone(),
            kind: case.kind,
            segment_size: dispatch.segment_size,
            bandwidth,
            finished: case.finished,
        };
        self.results.record(
            &recorded.label,
            Measurement {
                segment_size: recorded.segment_size,
                bandwidth: recorded.bandwidth.clone(),
                job: recorded.job,
            },
        );

        if recorded.bandwidth == BANDWIDTH_FAILED {
            NptestLogger::job_failed(worker, &recorded.label);
        }
        NptestLogger::job_received(worker, &recorded.label, &recorded.bandwidth);
        Some(recorded)
    }

    pub fn plan(&self) -> &[TestCase] {
        &self.plan
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn results(&self) -> &ResultStore {
        &self.results
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Plan index of the job currently in flight.
    pub fn current_job(&self) -> Option<usize> {
        self.current.as_ref().map(|dispatch| dispatch.job)
    }

    pub fn is_complete(&self) -> bool {
        self.plan.iter().all(|case| case.finished)
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{plan::default_plan, results::parse_report};

    const NETPERF_OUT: &str = "\
Recv   Send    Send
Socket Socket  Message  Elapsed
Size   Size    Size     Time     Throughput
bytes  bytes   bytes    secs.    10^6bits/sec

 87380  16384  16384    10.00    941.52
";

    fn tcp_output(mbits: u32) -> String {
        format!(
            "[SUM]   0.00-10.00  sec  1.0 GBytes  {mbits} Mbits/sec  0   sender\n\
             [SUM]   0.00-10.04  sec  1.0 GBytes  {mbits} Mbits/sec       receiver\n"
        )
    }

    fn small_sweep() -> SchedulerSettings {
        SchedulerSettings {
            sweep: SegmentSweep {
                min: 100,
                max: 300,
                step: 100,
            },
            ..SchedulerSettings::default()
        }
    }

    fn scheduler(cases: Vec<TestCase>, settings: SchedulerSettings) -> Scheduler {
        Scheduler::new(cases, settings)
    }

    fn bulk_case(src: &str, dst: &str, label: &str) -> TestCase {
        TestCase::new(src, dst, label, TestKind::Bulk, false, &SegmentSweep::default())
    }

    fn client_run(decision: &Decision) -> (usize, String, u16, TestKind, u32) {
        match &decision.item {
            WorkItem::ClientRun {
                job,
                host,
                port,
                kind,
                segment_size,
            } => (*job, host.clone(), *port, *kind, *segment_size),
            other => panic!("expected ClientRun, got {other:?}"),
        }
    }

    #[test]
    fn first_registration_starts_servers() {
        let mut s = scheduler(vec![bulk_case("a", "b", "n")], SchedulerSettings::default());
        let d = s.register("a", "10.0.0.1");
        assert_eq!(
            d.item,
            WorkItem::ServerStart {
                listen_port: 5201,
                bulk_listen_port: 12865,
                timeout_secs: 3600
            }
        );
        assert!(d.report.is_none());
        assert!(s.registry().get("a").unwrap().server_started);
    }

    #[test]
    fn bulk_scenario_end_to_end() {
        let mut s = scheduler(vec![bulk_case("a", "b", "n")], SchedulerSettings::default());
        s.register("a", "10.0.0.1");
        s.register("b", "10.0.0.2");

        let d = s.register("a", "10.0.0.1");
        let (job, host, port, kind, mss) = client_run(&d);
        assert_eq!((job, host.as_str(), port, kind, mss), (0, "10.0.0.2", 12865, TestKind::Bulk, 0));
        assert!(!s.plan()[0].finished);

        let recorded = s.receive_output("a", TestKind::Bulk, Some(0), NETPERF_OUT).unwrap();
        assert_eq!(recorded.bandwidth, "941.52");
        assert!(recorded.finished);
        assert!(s.plan()[0].finished);
        assert_eq!(s.results().measurements("n").len(), 1);

        let d = s.register("b", "10.0.0.2");
        assert_eq!(d.item, WorkItem::Idle);
        let report = d.report.expect("first poll after completion flushes");
        let parsed = parse_report(&report).unwrap();
        assert_eq!(parsed.rows[0].bandwidths, ["941.52"]);

        for worker in ["a", "b", "a"] {
            let d = s.register(worker, "x");
            assert_eq!(d, Decision::idle());
        }
        assert!(s.is_flushed());
    }

    #[test]
    fn waits_for_destination() {
        let mut s = scheduler(vec![bulk_case("a", "b", "n")], SchedulerSettings::default());
        s.register("a", "10.0.0.1");
        assert_eq!(s.register("a", "10.0.0.1").item, WorkItem::Idle);
        assert_eq!(s.current_job(), None);

        s.register("b", "10.0.0.2");
        let d = s.register("a", "10.0.0.1");
        assert_eq!(client_run(&d).0, 0);
    }

    #[test]
    fn non_source_worker_idles() {
        let mut s = scheduler(vec![bulk_case("a", "b", "n")], SchedulerSettings::default());
        s.register("a", "1");
        s.register("b", "2");
        assert_eq!(s.register("b", "2").item, WorkItem::Idle);
        assert!(s.registry().all_idle());
    }

    #[test]
    fn unknown_worker_is_started_before_it_gets_work() {
        let mut s = scheduler(
            vec![bulk_case("a", "b", "n1"), bulk_case("c", "a", "n2")],
            SchedulerSettings::default(),
        );
        s.register("b", "2");

        // a owns the next case and b is ready, yet a first poll only starts servers
        assert!(matches!(s.register("a", "1").item, WorkItem::ServerStart { .. }));
        assert_eq!(s.current_job(), None);
        assert_eq!(client_run(&s.register("a", "1")).0, 0);

        // A newcomer while a job is out gets servers, not a second job
        assert!(matches!(s.register("c", "3").item, WorkItem::ServerStart { .. }));
        assert_eq!(s.register("c", "3").item, WorkItem::Idle);
        assert_eq!(s.current_job(), Some(0));
    }

    #[test]
    fn single_job_in_flight() {
        let mut s = scheduler(
            vec![bulk_case("a", "b", "n1"), bulk_case("b", "a", "n2")],
            SchedulerSettings::default(),
        );
        s.register("a", "1");
        s.register("b", "2");
        client_run(&s.register("a", "1"));

        // b owns the next case but a is busy
        assert_eq!(s.register("b", "2").item, WorkItem::Idle);
        let busy: Vec<_> = s.registry().iter().filter(|w| !w.idle).collect();
        assert_eq!(busy.len(), 1);
        assert_eq!(busy[0].worker, "a");

        s.receive_output("a", TestKind::Bulk, Some(0), NETPERF_OUT);
        // a still counts as busy until it polls again
        assert_eq!(s.register("b", "2").item, WorkItem::Idle);
        assert_eq!(s.register("a", "1").item, WorkItem::Idle);
        assert_eq!(client_run(&s.register("b", "2")).0, 1);
    }

    #[test]
    fn throughput_sweep_steps_until_ceiling() {
        let settings = small_sweep();
        let case = TestCase::new("a", "b", "t", TestKind::Tcp, true, &settings.sweep);
        let mut s = scheduler(vec![case], settings);
        s.register("a", "1");
        s.register("b", "2");

        let mut dispatched = Vec::new();
        loop {
            let d = s.register("a", "1");
            if d.item == WorkItem::Idle {
                assert!(d.report.is_some());
                break;
            }
            let (job, host, port, kind, mss) = client_run(&d);
            assert_eq!((job, host.as_str(), port, kind), (0, "b", 5201, TestKind::Tcp));
            dispatched.push(mss);
            assert_eq!(s.plan()[0].finished, mss + 100 > 300);
            s.receive_output("a", TestKind::Tcp, Some(0), &tcp_output(mss * 10));
        }

        assert_eq!(dispatched, [100, 200, 300]);
        let sizes: Vec<_> = s
            .results()
            .measurements("t")
            .iter()
            .map(|m| (m.segment_size, m.bandwidth.clone()))
            .collect();
        assert_eq!(
            sizes,
            [
                (100, "1000".to_string()),
                (200, "2000".to_string()),
                (300, "3000".to_string())
            ]
        );
        assert_eq!(s.results().maximum("t"), 3000.0);
    }

    #[test]
    fn failed_output_still_advances() {
        let settings = small_sweep();
        let case = TestCase::new("a", "b", "t", TestKind::Udp, false, &settings.sweep);
        let mut s = scheduler(vec![case, bulk_case("a", "b", "n")], settings);
        s.register("a", "1");
        s.register("b", "2");

        let (_, _, _, kind, mss) = client_run(&s.register("a", "1"));
        assert_eq!((kind, mss), (TestKind::Udp, 300));
        let rec = s.receive_output("a", TestKind::Udp, Some(0), "").unwrap();
        assert!(rec.failed());
        assert!(s.plan()[0].finished);

        let (job, _, _, kind, _) = client_run(&s.register("a", "1"));
        assert_eq!((job, kind), (1, TestKind::Bulk));
        let rec = s.receive_output("a", TestKind::Bulk, Some(1), "error").unwrap();
        assert_eq!(rec.bandwidth, BANDWIDTH_FAILED);
        assert!(s.is_complete());
    }

    #[test]
    fn unsolicited_and_stale_output_is_ignored() {
        let mut s = scheduler(vec![bulk_case("a", "b", "n")], SchedulerSettings::default());
        assert!(s.receive_output("a", TestKind::Bulk, None, NETPERF_OUT).is_none());

        s.register("a", "1");
        s.register("b", "2");
        client_run(&s.register("a", "1"));

        assert!(s.receive_output("b", TestKind::Bulk, None, NETPERF_OUT).is_none());
        assert!(s.receive_output("a", TestKind::Bulk, Some(7), NETPERF_OUT).is_none());
        assert!(!s.plan()[0].finished);

        assert!(s.receive_output("a", TestKind::Bulk, None, NETPERF_OUT).is_some());
        // cursor is consumed, a duplicate is dropped
        assert!(s.receive_output("a", TestKind::Bulk, Some(0), NETPERF_OUT).is_none());
        assert_eq!(s.results().measurements("n").len(), 1);
    }

    #[test]
    fn kind_of_case_wins_over_submission() {
        let mut s = scheduler(vec![bulk_case("a", "b", "n")], SchedulerSettings::default());
        s.register("a", "1");
        s.register("b", "2");
        client_run(&s.register("a", "1"));
        let rec = s.receive_output("a", TestKind::Tcp, None, NETPERF_OUT).unwrap();
        assert_eq!(rec.kind, TestKind::Bulk);
        assert_eq!(rec.bandwidth, "941.52");
        assert!(rec.finished);
    }

    #[test]
    fn virtual_address_uses_worker_name() {
        let sweep = SegmentSweep::default();
        let cases = vec![TestCase::new("a", "b", "v", TestKind::Bulk, true, &sweep)];
        let mut s = scheduler(cases, SchedulerSettings::default());
        s.register("a", "1");
        s.register("b", "10.1.1.1");
        assert_eq!(client_run(&s.register("a", "1")).1, "b");
    }

    #[test]
    fn default_plan_runs_to_completion() {
        let settings = SchedulerSettings::default();
        let mut s = scheduler(default_plan(&settings.sweep), settings);
        for (w, ip) in [("netperf-w1", "1"), ("netperf-w2", "2"), ("netperf-w3", "3")] {
            s.register(w, ip);
        }

        let mut flushes = 0;
        let mut rounds = 0;
        while !s.is_flushed() {
            rounds += 1;
            assert!(rounds < 10_000, "plan did not converge");
            for (w, ip) in [("netperf-w1", "1"), ("netperf-w2", "2"), ("netperf-w3", "3")] {
                let d = s.register(w, ip);
                flushes += usize::from(d.report.is_some());
                if let WorkItem::ClientRun { job, kind, .. } = d.item {
                    let busy: Vec<_> = s.registry().iter().filter(|st| !st.idle).collect();
                    assert_eq!(busy.len(), 1);
                    assert_eq!(busy[0].worker, s.plan()[job].source);
                    s.receive_output(w, kind, Some(job), "garbage");
                }
            }
        }
        assert_eq!(flushes, 1);

        // 5 TCP cases x 22 sizes, 4 UDP and 4 bulk cases once each
        let total: usize = s.plan().iter().map(|c| s.results().measurements(&c.label).len()).sum();
        assert_eq!(total, 5 * 22 + 4 + 4);
    }

    #[test]
    fn log_entry_mentions_mss_for_throughput() {
        let rec = RecordedOutput {
            job: 0,
            label: "t".into(),
            source: "a".into(),
            destination: "b".into(),
            kind: TestKind::Tcp,
            segment_size: 96,
            bandwidth: "1".into(),
            finished: false,
        };
        let entry = rec.log_entry("a", "raw");
        assert_eq!(
            entry,
            "Received TCP output from worker a for test t from a to b MSS: 96\nraw\n"
        );
    }
}
