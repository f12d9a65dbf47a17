//! Dispense-event signaling to physical devices.
//!
//! Verification success is broadcast on a device-scoped channel with no
//! acknowledgement: the gatekeeper fires the event and moves on, and devices
//! long-listen independently. A device that misses an event misses it; the
//! delivery guarantee is deliberately best-effort (stronger delivery would be
//! an outbox with device-side deduplication, which this crate does not do).

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::types::{DeviceId, DispenseEvent};

/// Channel capacity per device. Dispense events are rare and tiny; a lagging
/// device drops the oldest events rather than blocking the gatekeeper.
const CHANNEL_CAPACITY: usize = 16;

/// Backend failure of a notification send.
#[derive(Debug, thiserror::Error)]
#[error("Dispense notification failed: {0}")]
pub struct NotifyError(pub String);

/// Fire-and-forget publisher of dispense events.
#[async_trait]
pub trait DispenseNotifier: Send + Sync {
    async fn notify(&self, event: DispenseEvent) -> Result<(), NotifyError>;
}

/// In-process pub/sub hub of per-device broadcast channels.
///
/// HTTP long-poll handlers subscribe on behalf of devices; the verifier
/// publishes. The hub keeps a sender per device for the process lifetime.
#[derive(Debug, Default)]
pub struct DispenseHub {
    channels: DashMap<DeviceId, broadcast::Sender<DispenseEvent>>,
}

impl DispenseHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a receiver of dispense events for one device, creating the
    /// channel if this device has never been seen.
    pub fn subscribe(&self, device_id: &DeviceId) -> broadcast::Receiver<DispenseEvent> {
        self.channels
            .entry(device_id.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

#[async_trait]
impl DispenseNotifier for DispenseHub {
    async fn notify(&self, event: DispenseEvent) -> Result<(), NotifyError> {
        let sender = self
            .channels
            .entry(event.device_id.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone();
        // send errs only when nobody is subscribed, which for fire-and-forget
        // signaling is a missed event, not a failure.
        match sender.send(event) {
            Ok(receivers) => {
                tracing::debug!(receivers, "Dispense event delivered");
            }
            Err(_) => {
                tracing::debug!("No device listening, dispense event dropped");
            }
        }
        Ok(())
    }
}
