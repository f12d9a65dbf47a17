//! Device configuration lookup.
//!
//! Machine registration lives in the merchant dashboard, outside this crate.
//! The gatekeeper only needs each machine's price and payout account, so that
//! collaborator is modeled as the [`DeviceDirectory`] seam and injected into
//! the gatekeeper at construction. [`StaticDeviceDirectory`] is the reference
//! implementation, populated from the `devices` map of the config file.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{DeviceId, MoneyAmount, StellarAccount};

/// Per-machine payment configuration: what an item costs and which merchant
/// account receives the funds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    /// Item price in XLM.
    pub price: MoneyAmount,
    /// Merchant account credited by a valid payment.
    pub destination: StellarAccount,
}

/// Read-only lookup of device configuration by device id.
pub trait DeviceDirectory: Send + Sync {
    fn device(&self, device_id: &DeviceId) -> Option<DeviceConfig>;
}

/// Directory backed by a fixed in-memory map, loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticDeviceDirectory {
    devices: HashMap<DeviceId, DeviceConfig>,
}

impl StaticDeviceDirectory {
    pub fn new(devices: HashMap<DeviceId, DeviceConfig>) -> Self {
        Self { devices }
    }
}

impl DeviceDirectory for StaticDeviceDirectory {
    fn device(&self, device_id: &DeviceId) -> Option<DeviceConfig> {
        self.devices.get(device_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn lookup_by_device_id() {
        let config = DeviceConfig {
            price: MoneyAmount(Decimal::new(5, 1)),
            destination: "GA7QYNF7SOWQ3GLR2BGMZEHXAVIRZA4KVWLTJJFC7MGXUA74P7UJVSGZ"
                .parse()
                .unwrap(),
        };
        let directory =
            StaticDeviceDirectory::new(HashMap::from([("machine-1".into(), config.clone())]));

        let found = directory.device(&"machine-1".into()).unwrap();
        assert_eq!(found.destination, config.destination);
        assert!(directory.device(&"machine-2".into()).is_none());
    }
}
