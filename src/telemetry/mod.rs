pub mod oltp;

use opentelemetry::{global, metrics::Meter};

/// Meter from the global provider. A no-op meter unless [`oltp::init_meter`] ran.
pub fn get_meter() -> Meter {
    global::meter_provider().meter("nptest")
}

/// Telemetry export is opt-in through the standard OTLP endpoint variable.
pub fn export_enabled() -> bool {
    dotenvy::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok()
}
