use opentelemetry::{
    metrics::{Counter, Meter},
    KeyValue,
};

use crate::plan::TestKind;

pub struct OrchestratorMetrics {
    registrations: Counter<u64>,
    dispatched: Counter<u64>,
    measurements: Counter<u64>,
    failed: Counter<u64>,
}

impl OrchestratorMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            registrations: meter.u64_counter("nptest_registrations_total").build(),
            dispatched: meter.u64_counter("nptest_jobs_dispatched_total").build(),
            measurements: meter.u64_counter("nptest_measurements_total").build(),
            failed: meter.u64_counter("nptest_measurements_failed_total").build(),
        }
    }

    pub fn record_registration(&self) {
        self.registrations.add(1, &[]);
    }

    pub fn record_dispatch(&self, kind: TestKind) {
        self.dispatched.add(1, &[kind_attr(kind)]);
    }

    pub fn record_measurement(&self, kind: TestKind, failed: bool) {
        let attrs = [kind_attr(kind)];
        self.measurements.add(1, &attrs);
        if failed {
            self.failed.add(1, &attrs);
        }
    }
}

fn kind_attr(kind: TestKind) -> KeyValue {
    KeyValue::new("kind", kind.as_str())
}
