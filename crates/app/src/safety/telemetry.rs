//! Tracing subscriber and Prometheus wiring for a safety session.

use std::{io, path::Path, sync::OnceLock, thread, time::Duration};

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::warn;
use tracing_chrome::{ChromeLayer, ChromeLayerBuilder, FlushGuard, TraceStyle};
use tracing_subscriber::{
    Registry,
    filter::{EnvFilter, filter_fn},
    fmt,
    prelude::*,
};

use crate::safety::config::TelemetryOptions;

pub(crate) const HAND_DISTANCE: &str = "safety_hand_distance_meters";
pub(crate) const FRAME_ERRORS: &str = "safety_frame_errors_total";
pub(crate) const PERCEPTION_FRAMES: &str = "safety_perception_frames_total";
pub(crate) const PERCEPTION_FRAME_SECONDS: &str = "safety_perception_frame_seconds";
pub(crate) const MOTION_PAUSES: &str = "safety_motion_pauses_total";
pub(crate) const SAFETY_STATE: &str = "safety_state";
pub(crate) const MOTION_PROGRESS: &str = "safety_motion_progress_percent";

const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);
const QUIET_DIRECTIVES: &str = "info";
const VERBOSE_DIRECTIVES: &str = "info,handguard=debug,safety_core=debug,sensor_ingest=debug";

static PROM_HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Keeps the session subscriber installed and the Chrome trace flushing.
pub(crate) struct TelemetryGuard {
    _default_guard: tracing::subscriber::DefaultGuard,
    _chrome_guard: Option<FlushGuard>,
}

/// Install the Prometheus recorder once per process and describe the
/// safety metrics. `None` when another recorder owns the global slot.
pub(crate) fn init_metrics_recorder() -> Option<&'static PrometheusHandle> {
    PROM_HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if let Err(err) = metrics::set_global_recorder(recorder) {
                warn!("metrics recorder not installed: {err}");
                return None;
            }
            describe_metrics();

            let upkeep = handle.clone();
            if let Err(err) = spawn_thread("prometheus-upkeep", move || {
                loop {
                    thread::sleep(UPKEEP_INTERVAL);
                    upkeep.run_upkeep();
                }
            }) {
                warn!("failed to spawn prometheus upkeep thread: {err}");
            }
            Some(handle)
        })
        .as_ref()
}

pub(crate) fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROM_HANDLE.get().and_then(Option::as_ref)
}

fn describe_metrics() {
    describe_gauge!(
        HAND_DISTANCE,
        "Distance in metres from the tool tip to the nearest hand keypoint"
    );
    describe_gauge!(SAFETY_STATE, "Safety state: 0 safe, 1 caution, 2 danger");
    describe_gauge!(
        MOTION_PROGRESS,
        Unit::Percent,
        "Share of the drawing job completed"
    );
    describe_counter!(
        PERCEPTION_FRAMES,
        Unit::Count,
        "Frames run through the perception pipeline"
    );
    describe_counter!(FRAME_ERRORS, Unit::Count, "Camera reads that failed");
    describe_counter!(
        MOTION_PAUSES,
        Unit::Count,
        "Motion primitives that waited for a hand to clear"
    );
    describe_histogram!(
        PERCEPTION_FRAME_SECONDS,
        Unit::Seconds,
        "Perception time per frame"
    );
}

/// `RUST_LOG` wins; otherwise `verbose` turns on debug for the workspace crates.
fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            VERBOSE_DIRECTIVES
        } else {
            QUIET_DIRECTIVES
        })
    })
}

/// Install the session subscriber on the calling thread. Workers pick it up
/// through [`spawn_thread`].
pub(crate) fn enter_runtime(opts: &TelemetryOptions, verbose: bool) -> TelemetryGuard {
    let (chrome, chrome_guard) = match opts.chrome_trace_path.as_deref().map(build_chrome_layer) {
        Some(Ok((layer, guard))) => (Some(layer), Some(guard)),
        Some(Err(err)) => {
            eprintln!("chrome trace disabled: {err}");
            (None, None)
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(chrome.map(|layer| layer.with_filter(filter_fn(|meta| meta.is_span()))))
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_names(true)
                .with_timer(fmt::time::uptime())
                .with_filter(env_filter(verbose)),
        )
        .with(tracing_error::ErrorLayer::default());

    TelemetryGuard {
        _default_guard: tracing::subscriber::set_default(subscriber),
        _chrome_guard: chrome_guard,
    }
}

/// Spawn a named worker thread that logs through the caller's subscriber.
pub(crate) fn spawn_thread<F, T>(name: impl Into<String>, f: F) -> io::Result<thread::JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let dispatch = tracing::dispatcher::get_default(|current| current.clone());
    thread::Builder::new()
        .name(name.into())
        .spawn(move || tracing::dispatcher::with_default(&dispatch, f))
}

fn build_chrome_layer(path: &Path) -> io::Result<(ChromeLayer<Registry>, FlushGuard)> {
    let file = std::fs::File::create(path).map_err(|err| {
        io::Error::new(err.kind(), format!("{}: {err}", path.display()))
    })?;
    Ok(ChromeLayerBuilder::new()
        .writer(file)
        .include_args(true)
        .trace_style(TraceStyle::Threaded)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_directives_parse() {
        for directives in [QUIET_DIRECTIVES, VERBOSE_DIRECTIVES] {
            assert!(EnvFilter::try_new(directives).is_ok(), "{directives}");
        }
    }

    #[test]
    fn spawned_thread_is_named() {
        let name = spawn_thread("status", || thread::current().name().map(str::to_owned))
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(name.as_deref(), Some("status"));
    }

    #[test]
    fn chrome_layer_reports_bad_path() {
        let Err(err) = build_chrome_layer(Path::new("/nonexistent-dir/trace.json")) else {
            panic!("trace file created in a missing directory");
        };
        assert!(err.to_string().contains("/nonexistent-dir/trace.json"));
    }
}
