//! Status worker: samples the bus at a fixed cadence and feeds the hub.

use std::{io, sync::Arc, thread, time::Duration};

use safety_core::{CoordinationBus, EventKind, SafetyThresholds, StatusSnapshot};
use tracing::{info, warn};

use crate::safety::{hub::StatusHub, telemetry};

pub(crate) struct StatusWorker {
    pub(crate) bus: CoordinationBus,
    pub(crate) hub: Arc<StatusHub>,
    pub(crate) thresholds: SafetyThresholds,
    pub(crate) marker_id: i32,
    pub(crate) resolution: (u32, u32),
    pub(crate) interval: Duration,
}

pub(crate) fn spawn_status_worker(worker: StatusWorker) -> io::Result<thread::JoinHandle<()>> {
    telemetry::spawn_thread("status", move || worker.run())
}

impl StatusWorker {
    fn run(self) {
        let mut last_line: Option<String> = None;
        while !self.bus.stop().is_requested() {
            let span = tracing::info_span!("status.broadcast").entered();
            let snapshot = self.sample();

            let line = snapshot.console_line();
            if last_line.as_deref() != Some(line.as_str()) {
                info!("{line}");
                last_line = Some(line);
            }

            metrics::gauge!(telemetry::SAFETY_STATE).set(snapshot.status.level());
            metrics::gauge!(telemetry::MOTION_PROGRESS).set(snapshot.progress);
            if let Err(err) = self.hub.publish(snapshot) {
                warn!("status publish failed: {err:#}");
                self.bus
                    .events()
                    .record(EventKind::Error, format!("Status publish failed: {err}"));
            }
            drop(span);
            thread::sleep(self.interval);
        }
        info!("status worker stopped");
    }

    fn sample(&self) -> StatusSnapshot {
        StatusSnapshot::from_region(
            self.bus.region(),
            &self.thresholds,
            self.marker_id,
            self.resolution,
        )
    }
}
