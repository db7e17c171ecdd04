//! Latest status snapshot plus a fan-out channel for push transports.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use safety_core::StatusSnapshot;
use tokio::sync::broadcast;

/// Pending updates a slow subscriber may fall behind by before it lags.
const UPDATE_BACKLOG: usize = 16;

/// Shared between the status worker (single publisher) and the HTTP / TCP
/// transports (subscribers).
pub(crate) struct StatusHub {
    latest: Mutex<Option<Published>>,
    updates: broadcast::Sender<Arc<str>>,
}

#[derive(Clone)]
struct Published {
    snapshot: StatusSnapshot,
    json: Arc<str>,
}

impl StatusHub {
    pub(crate) fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_BACKLOG);
        Self {
            latest: Mutex::new(None),
            updates,
        }
    }

    /// Store `snapshot` as the latest and push it to every subscriber.
    pub(crate) fn publish(&self, snapshot: StatusSnapshot) -> Result<()> {
        let json: Arc<str> = serde_json::to_string(&snapshot)
            .context("Failed to serialise status snapshot")?
            .into();
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(Published {
            snapshot,
            json: json.clone(),
        });
        // No subscribers is not an error.
        let _ = self.updates.send(json);
        Ok(())
    }

    pub(crate) fn latest(&self) -> Option<StatusSnapshot> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|p| p.snapshot.clone())
    }

    pub(crate) fn latest_json(&self) -> Option<Arc<str>> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|p| p.json.clone())
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Arc<str>> {
        self.updates.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use safety_core::{CoordinationBus, SafetyThresholds};

    use super::*;

    #[test]
    fn subscribers_receive_published_json() {
        let hub = StatusHub::new();
        assert!(hub.latest().is_none());
        let mut rx = hub.subscribe();

        let bus = CoordinationBus::new();
        let snapshot =
            StatusSnapshot::from_region(bus.region(), &SafetyThresholds::default(), 0, (1280, 720));
        hub.publish(snapshot.clone()).unwrap();

        let pushed = rx.try_recv().unwrap();
        assert_eq!(Some(pushed.clone()), hub.latest_json());
        assert!(pushed.contains("\"status\":\"SAFE\""));
        assert_eq!(hub.latest(), Some(snapshot));
    }
}
