//! Messages exchanged between workers and the orchestrator.
//!
//! Every message is a single JSON document terminated by a newline. A worker
//! keeps one connection open and issues strictly alternating request and
//! response pairs over it.

pub mod framing;

use serde::{Deserialize, Serialize};

use crate::plan::TestKind;

pub use framing::{FrameReader, FrameWriter, TransportError, MAX_FRAME_LEN};

/// What a worker should do next.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkItem {
    /// Nothing to do; poll again later.
    Idle,
    /// Start the long-lived benchmark listeners. Sent once per worker.
    ServerStart {
        listen_port: u16,
        bulk_listen_port: u16,
        timeout_secs: u64,
    },
    /// Run one benchmark client against `host:port` and submit its output.
    ClientRun {
        /// Plan index of the dispatched test case, echoed back on submission.
        job: usize,
        host: String,
        port: u16,
        kind: TestKind,
        /// Maximum segment size for TCP; informational for UDP, 0 for bulk.
        segment_size: u32,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub worker: String,
    pub address: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub worker: String,
    pub kind: TestKind,
    pub output: String,
    #[serde(default)]
    pub job: Option<usize>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "_c")]
pub enum Request {
    Register(Registration),
    Submit(Submission),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "_c")]
pub enum Response {
    Work { item: WorkItem },
    Ack,
    Rejected { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_item_wire_shape() {
        let resp = Response::Work {
            item: WorkItem::ClientRun {
                job: 3,
                host: "netperf-w2".into(),
                port: 5201,
                kind: TestKind::Tcp,
                segment_size: 96,
            },
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["_c"], "Work");
        assert_eq!(json["item"]["type"], "client_run");
        assert_eq!(json["item"]["kind"], "tcp");
        assert_eq!(json["item"]["segment_size"], 96);

        let idle = serde_json::to_string(&WorkItem::Idle).unwrap();
        assert_eq!(idle, r#"{"type":"idle"}"#);
    }

    #[test]
    fn submission_job_is_optional() {
        let raw = r#"{"_c":"Submit","worker":"w1","kind":"bulk","output":"x"}"#;
        let req: Request = serde_json::from_str(raw).unwrap();
        assert_eq!(
            req,
            Request::Submit(Submission {
                worker: "w1".into(),
                kind: TestKind::Bulk,
                output: "x".into(),
                job: None,
            })
        );
    }

    #[test]
    fn unknown_request_is_rejected() {
        let raw = r#"{"_c":"Shutdown"}"#;
        assert!(serde_json::from_str::<Request>(raw).is_err());
    }
}
