//! Connection registry
//!
//! Maps a charge point id to its live link. A reconnect under the same id
//! replaces the previous record; each link carries a process-unique
//! connection id so a late close of a replaced link cannot evict its
//! replacement.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::channel::DeviceChannel;

/// Process-unique identifier of one physical link
pub type ConnectionId = u64;

/// Reported in place of metadata a charge point never sent
pub const UNKNOWN: &str = "unknown";

const EVENT_CAPACITY: usize = 64;

/// Charge point details learned from BootNotification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceMetadata {
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub firmware_version: Option<String>,
}

impl DeviceMetadata {
    /// Overwrite fields that `update` carries; keep the rest
    pub fn merge(&mut self, update: DeviceMetadata) {
        if update.vendor.is_some() {
            self.vendor = update.vendor;
        }
        if update.model.is_some() {
            self.model = update.model;
        }
        if update.serial_number.is_some() {
            self.serial_number = update.serial_number;
        }
        if update.firmware_version.is_some() {
            self.firmware_version = update.firmware_version;
        }
    }
}

/// One live device link
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub device_id: String,
    pub connection_id: ConnectionId,
    pub channel: DeviceChannel,
    pub remote_addr: String,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub metadata: DeviceMetadata,
}

impl ConnectionRecord {
    /// Administrative view with "unknown" for missing metadata
    pub fn info(&self) -> DeviceInfo {
        let or_unknown = |field: &Option<String>| field.clone().unwrap_or_else(|| UNKNOWN.to_string());

        DeviceInfo {
            cp_id: self.device_id.clone(),
            remote: self.remote_addr.clone(),
            connected_at: self.connected_at,
            last_seen: self.last_seen,
            vendor: or_unknown(&self.metadata.vendor),
            model: or_unknown(&self.metadata.model),
            serial: or_unknown(&self.metadata.serial_number),
            firmware: or_unknown(&self.metadata.firmware_version),
            connected: true,
        }
    }
}

/// Snapshot of a connected charge point
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub cp_id: String,
    pub remote: String,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub vendor: String,
    pub model: String,
    pub serial: String,
    pub firmware: String,
    pub connected: bool,
}

/// Connect/disconnect notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Connected {
        device_id: String,
        remote_addr: String,
    },
    Disconnected {
        device_id: String,
    },
}

/// Result of registering a link
#[derive(Debug)]
pub struct Registration {
    pub connection_id: ConnectionId,
    /// Record previously held under the same device id
    pub replaced: Option<ConnectionRecord>,
}

/// Registry of connected charge points
#[derive(Debug)]
pub struct Registry {
    connections: RwLock<HashMap<String, ConnectionRecord>>,
    next_connection_id: AtomicU64,
    events: broadcast::Sender<RegistryEvent>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            connections: RwLock::new(HashMap::new()),
            next_connection_id: AtomicU64::new(1),
            events,
        }
    }

    /// Insert or replace the record for `device_id`
    pub fn register(
        &self,
        device_id: &str,
        channel: DeviceChannel,
        remote_addr: impl Into<String>,
    ) -> Registration {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let remote_addr = remote_addr.into();
        let now = Utc::now();

        let record = ConnectionRecord {
            device_id: device_id.to_string(),
            connection_id,
            channel,
            remote_addr: remote_addr.clone(),
            connected_at: now,
            last_seen: now,
            metadata: DeviceMetadata::default(),
        };

        let replaced = self.connections.write().insert(device_id.to_string(), record);

        if replaced.is_some() {
            info!("Charge point {} reconnected from {}, replacing previous link", device_id, remote_addr);
        } else {
            info!("Charge point connected: {} from {}", device_id, remote_addr);
        }
        let _ = self.events.send(RegistryEvent::Connected {
            device_id: device_id.to_string(),
            remote_addr,
        });

        Registration {
            connection_id,
            replaced,
        }
    }

    /// Remove the record for `device_id`; no-op if absent
    pub fn unregister(&self, device_id: &str) -> Option<ConnectionRecord> {
        let removed = self.connections.write().remove(device_id);
        if removed.is_some() {
            self.announce_disconnect(device_id);
        }
        removed
    }

    /// Remove the record only while it still belongs to `connection_id`
    pub fn unregister_connection(&self, device_id: &str, connection_id: ConnectionId) -> bool {
        let removed = {
            let mut connections = self.connections.write();
            match connections.get(device_id) {
                Some(record) if record.connection_id == connection_id => {
                    connections.remove(device_id);
                    true
                }
                _ => false,
            }
        };

        if removed {
            self.announce_disconnect(device_id);
        } else {
            debug!("Link {} of {} already replaced, keeping current record", connection_id, device_id);
        }
        removed
    }

    fn announce_disconnect(&self, device_id: &str) {
        info!("Charge point disconnected: {}", device_id);
        let _ = self.events.send(RegistryEvent::Disconnected {
            device_id: device_id.to_string(),
        });
    }

    /// Refresh liveness. Ignored once the link is closed or replaced.
    pub fn touch(&self, device_id: &str, connection_id: ConnectionId) {
        if let Some(record) = self.connections.write().get_mut(device_id) {
            if record.connection_id == connection_id {
                record.last_seen = Utc::now();
            }
        }
    }

    /// Merge boot-time metadata into the record owned by `connection_id`
    pub fn update_metadata(
        &self,
        device_id: &str,
        connection_id: ConnectionId,
        metadata: DeviceMetadata,
    ) {
        match self.connections.write().get_mut(device_id) {
            Some(record) if record.connection_id == connection_id => {
                record.metadata.merge(metadata);
            }
            _ => debug!("Ignoring metadata from stale link {} of {}", connection_id, device_id),
        }
    }

    pub fn get(&self, device_id: &str) -> Option<ConnectionRecord> {
        self.connections.read().get(device_id).cloned()
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.connections.read().contains_key(device_id)
    }

    pub fn count(&self) -> usize {
        self.connections.read().len()
    }

    /// Snapshot of every connected charge point, ordered by id
    pub fn list(&self) -> Vec<DeviceInfo> {
        let mut infos: Vec<DeviceInfo> = self
            .connections
            .read()
            .values()
            .map(ConnectionRecord::info)
            .collect();
        infos.sort_by(|a, b| a.cp_id.cmp(&b.cp_id));
        infos
    }

    /// Snapshot of connected ids, ordered
    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.connections.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> DeviceChannel {
        DeviceChannel::new(4).0
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = Registry::new();
        registry.register("CP1", channel(), "10.0.0.1:5000");

        let record = registry.get("CP1").unwrap();
        assert_eq!(record.remote_addr, "10.0.0.1:5000");
        assert_eq!(registry.count(), 1);
        assert!(registry.get("CP2").is_none());
    }

    #[test]
    fn test_reconnect_replaces_record() {
        let registry = Registry::new();
        let first = registry.register("CP1", channel(), "a");
        let second = registry.register("CP1", channel(), "b");

        assert_eq!(registry.count(), 1);
        assert_ne!(first.connection_id, second.connection_id);
        assert_eq!(second.replaced.unwrap().connection_id, first.connection_id);
        assert_eq!(registry.get("CP1").unwrap().remote_addr, "b");

        // the replaced link closing late must not evict the new one
        assert!(!registry.unregister_connection("CP1", first.connection_id));
        assert!(registry.contains("CP1"));
        assert!(registry.unregister_connection("CP1", second.connection_id));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_unregister_twice_is_harmless() {
        let registry = Registry::new();
        registry.register("CP1", channel(), "a");
        assert!(registry.unregister("CP1").is_some());
        assert!(registry.unregister("CP1").is_none());
    }

    #[test]
    fn test_touch_unknown_device_is_noop() {
        let registry = Registry::new();
        registry.touch("ghost", 1);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_replaced_link_cannot_update_record() {
        let registry = Registry::new();
        let old = registry.register("CP1", channel(), "old");
        let new = registry.register("CP1", channel(), "new");
        let seen = registry.get("CP1").unwrap().last_seen;

        std::thread::sleep(std::time::Duration::from_millis(5));
        registry.touch("CP1", old.connection_id);
        registry.update_metadata(
            "CP1",
            old.connection_id,
            DeviceMetadata {
                vendor: Some("STALE".into()),
                ..Default::default()
            },
        );

        let record = registry.get("CP1").unwrap();
        assert_eq!(record.remote_addr, "new");
        assert_eq!(record.last_seen, seen);
        assert_eq!(record.metadata.vendor, None);

        registry.touch("CP1", new.connection_id);
        assert!(registry.get("CP1").unwrap().last_seen > seen);
    }

    #[test]
    fn test_metadata_defaults_to_unknown() {
        let registry = Registry::new();
        let link = registry.register("CP1", channel(), "a").connection_id;
        registry.update_metadata(
            "CP1",
            link,
            DeviceMetadata {
                vendor: Some("EK".into()),
                ..Default::default()
            },
        );
        registry.update_metadata(
            "CP1",
            link,
            DeviceMetadata {
                model: Some("EK3".into()),
                ..Default::default()
            },
        );

        let info = registry.get("CP1").unwrap().info();
        assert_eq!(info.vendor, "EK");
        assert_eq!(info.model, "EK3");
        assert_eq!(info.serial, UNKNOWN);
        assert!(info.connected);
    }

    #[test]
    fn test_list_is_sorted_snapshot() {
        let registry = Registry::new();
        registry.register("CP2", channel(), "b");
        registry.register("CP1", channel(), "a");

        let list = registry.list();
        registry.unregister("CP1");

        let ids: Vec<_> = list.iter().map(|d| d.cp_id.as_str()).collect();
        assert_eq!(ids, ["CP1", "CP2"]);
        assert_eq!(registry.device_ids(), ["CP2"]);
    }

    #[test]
    fn test_events() {
        let registry = Registry::new();
        let mut events = registry.subscribe();

        registry.register("CP1", channel(), "a");
        registry.unregister("CP1");

        assert_eq!(
            events.try_recv().unwrap(),
            RegistryEvent::Connected {
                device_id: "CP1".into(),
                remote_addr: "a".into()
            }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            RegistryEvent::Disconnected { device_id: "CP1".into() }
        );
    }
}
