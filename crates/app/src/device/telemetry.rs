//! Tracing subscriber and Prometheus recorder setup.

use std::{sync::OnceLock, thread, time::Duration};

use glasses_core::tasks::spawn_task;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::warn;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Install the global tracing subscriber. `RUST_LOG` overrides the `info`
/// default. Calling this twice is harmless.
pub(crate) fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_timer(fmt::time::uptime())
                .with_filter(env_filter),
        )
        .with(tracing_error::ErrorLayer::default())
        .try_init();
}

/// Install the global metrics recorder once and return its Prometheus handle.
/// Returns `None` when another recorder already owns the global slot.
pub(crate) fn init_metrics_recorder() -> Option<&'static PrometheusHandle> {
    if let Some(handle) = PROM_HANDLE.get() {
        return Some(handle);
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    if let Err(err) = metrics::set_global_recorder(recorder) {
        warn!("Metrics recorder not installed: {err}");
        return None;
    }

    let upkeep_handle = handle.clone();
    if let Err(err) = spawn_task("prometheus-upkeep", move || {
        loop {
            thread::sleep(UPKEEP_INTERVAL);
            upkeep_handle.run_upkeep();
        }
    }) {
        warn!("Failed to spawn prometheus upkeep thread: {err}");
    }

    Some(PROM_HANDLE.get_or_init(|| handle))
}

pub(crate) fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROM_HANDLE.get()
}
