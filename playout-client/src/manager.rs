//! Registry of named playout devices.

use crate::client::Client;
use crate::connection::{ConnectionConfig, Endpoint};
use crate::error::ClientError;
use dashmap::DashMap;

/// A named playout server.
#[derive(Clone)]
pub struct Device {
    pub name: String,
    pub endpoint: Endpoint,
    /// Shadow devices mirror the commands sent to primary devices.
    pub shadow: bool,
    pub client: Client,
}

impl Device {
    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }
}

/// Maps device names to their connections. Each device has its own
/// connection; nothing is shared between them.
pub struct DeviceManager {
    config: ConnectionConfig,
    devices: DashMap<String, Device>,
}

impl DeviceManager {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            devices: DashMap::new(),
        }
    }

    /// Registers a device. A device already registered under `name` is
    /// replaced; its connection is closed.
    pub async fn add(&self, name: &str, endpoint: Endpoint, shadow: bool) -> Device {
        let device = Device {
            name: name.to_string(),
            endpoint,
            shadow,
            client: Client::new(self.config.clone()),
        };
        if let Some(previous) = self.devices.insert(name.to_string(), device.clone()) {
            previous.client.disconnect().await;
        }
        tracing::debug!(device = name, endpoint = %device.endpoint, shadow, "device registered");
        device
    }

    pub fn get(&self, name: &str) -> Result<Device, ClientError> {
        self.devices
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ClientError::UnknownDevice(name.to_string()))
    }

    /// Unregisters a device and closes its connection.
    pub async fn remove(&self, name: &str) -> Result<(), ClientError> {
        let (_, device) = self
            .devices
            .remove(name)
            .ok_or_else(|| ClientError::UnknownDevice(name.to_string()))?;
        device.client.disconnect().await;
        Ok(())
    }

    /// Device names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.devices.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// All shadow devices, sorted by name.
    pub fn shadows(&self) -> Vec<Device> {
        let mut shadows: Vec<Device> = self
            .devices
            .iter()
            .filter(|e| e.value().shadow)
            .map(|e| e.value().clone())
            .collect();
        shadows.sort_by(|a, b| a.name.cmp(&b.name));
        shadows
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Connects every device. Devices that fail keep retrying in the
    /// background; their errors are returned by name.
    pub async fn connect_all(&self) -> Vec<(String, ClientError)> {
        let devices: Vec<Device> = self.devices.iter().map(|e| e.value().clone()).collect();
        let mut failures = Vec::new();
        for device in devices {
            let Endpoint { host, port } = device.endpoint.clone();
            match device.client.connect(host, port).await {
                Ok(()) => tracing::info!(device = %device.name, "device connected"),
                Err(e) => {
                    tracing::warn!(device = %device.name, error = %e, "device not reachable yet");
                    failures.push((device.name, e));
                }
            }
        }
        failures
    }

    pub async fn disconnect_all(&self) {
        let devices: Vec<Device> = self.devices.iter().map(|e| e.value().clone()).collect();
        for device in devices {
            device.client.disconnect().await;
        }
    }
}
