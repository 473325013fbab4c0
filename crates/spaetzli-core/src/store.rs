//! Lock-guarded registry of devices, watchers and backups.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::backup::BackupMetadata;
use crate::device::Device;
use crate::error::{Result, StoreError};
use crate::ids::{DeviceId, UserId, WatcherId};
use crate::limits::PremiumLimits;
use crate::persist::PersistenceSink;
use crate::watcher::{Watcher, WatcherArgs};

#[derive(Default)]
struct Tables {
    devices: BTreeMap<DeviceId, Device>,
    watchers: BTreeMap<WatcherId, Watcher>,
    backups: BTreeMap<UserId, StoredBackup>,
}

struct StoredBackup {
    metadata: BackupMetadata,
    data: Bytes,
}

/// All persisted records. Every operation runs inside one critical section
/// on a single mutex, except the durable mirror in [`StateStore::store_backup`].
pub struct StateStore {
    limits: PremiumLimits,
    tables: Mutex<Tables>,
    sink: Arc<dyn PersistenceSink>,
}

pub(crate) fn lock_unpoisoned<'a, T>(
    lock: &'a Mutex<T>,
    lock_name: &'static str,
) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(lock = lock_name, "mutex poisoned; continuing with inner state");
            poisoned.into_inner()
        }
    }
}

impl StateStore {
    pub fn new(limits: PremiumLimits, sink: Arc<dyn PersistenceSink>) -> Self {
        Self {
            limits,
            tables: Mutex::new(Tables::default()),
            sink,
        }
    }

    pub fn limits(&self) -> &PremiumLimits {
        &self.limits
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        lock_unpoisoned(&self.tables, "state_store")
    }

    // ---------------------------------------------------------------------
    // Devices
    // ---------------------------------------------------------------------

    pub fn list_devices(&self, user: &UserId) -> Vec<Device> {
        self.tables()
            .devices
            .values()
            .filter(|d| &d.user == user)
            .cloned()
            .collect()
    }

    pub fn get_device(&self, id: &DeviceId) -> Option<Device> {
        self.tables().devices.get(id).cloned()
    }

    pub fn device_exists(&self, id: &DeviceId) -> bool {
        self.tables().devices.contains_key(id)
    }

    pub fn device_count(&self, user: &UserId) -> usize {
        self.tables().devices.values().filter(|d| &d.user == user).count()
    }

    /// Insert `device` unless its owner already holds `limit_of_devices`.
    ///
    /// An existing device with the same identifier is overwritten; callers
    /// that need a conflict check use [`StateStore::device_exists`] first.
    pub fn add_device(&self, device: Device) -> Result<()> {
        let limit = self.limits.limit_of_devices;
        let mut tables = self.tables();
        let owned = tables.devices.values().filter(|d| d.user == device.user).count();
        if owned >= limit {
            return Err(StoreError::CapacityExceeded {
                user: device.user,
                limit,
            });
        }
        debug!(device = %device.device_identifier, user = %device.user, "device registered");
        tables.devices.insert(device.device_identifier.clone(), device);
        Ok(())
    }

    pub fn rename_device(&self, id: &DeviceId, new_name: &str) -> Result<()> {
        let mut tables = self.tables();
        let device = tables
            .devices
            .get_mut(id)
            .ok_or_else(|| StoreError::DeviceNotFound(id.clone()))?;
        device.device_name = new_name.to_string();
        debug!(device = %id, "device renamed");
        Ok(())
    }

    /// Record that a device checked in.
    pub fn touch_device(&self, id: &DeviceId) -> Result<()> {
        let mut tables = self.tables();
        let device = tables
            .devices
            .get_mut(id)
            .ok_or_else(|| StoreError::DeviceNotFound(id.clone()))?;
        device.last_seen_at = Utc::now();
        Ok(())
    }

    pub fn remove_device(&self, id: &DeviceId) -> Result<()> {
        let mut tables = self.tables();
        if tables.devices.remove(id).is_none() {
            return Err(StoreError::DeviceNotFound(id.clone()));
        }
        debug!(device = %id, "device removed");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Watchers
    // ---------------------------------------------------------------------

    pub fn list_watchers(&self, user: &UserId) -> Vec<Watcher> {
        self.tables()
            .watchers
            .values()
            .filter(|w| &w.user == user)
            .cloned()
            .collect()
    }

    pub fn watcher_count(&self, user: &UserId) -> usize {
        self.tables().watchers.values().filter(|w| &w.user == user).count()
    }

    /// Always succeeds; the identifier is generated here.
    pub fn add_watcher(&self, user: &UserId, watcher_type: &str, args: WatcherArgs) -> Watcher {
        let watcher = Watcher::new(user.clone(), watcher_type, args);
        debug!(watcher = %watcher.identifier, kind = watcher_type, "watcher added");
        self.tables()
            .watchers
            .insert(watcher.identifier.clone(), watcher.clone());
        watcher
    }

    /// Replace the arguments of a watcher wholesale.
    pub fn update_watcher_args(&self, id: &WatcherId, args: WatcherArgs) -> Result<Watcher> {
        let mut tables = self.tables();
        let watcher = tables
            .watchers
            .get_mut(id)
            .ok_or_else(|| StoreError::WatcherNotFound(id.clone()))?;
        watcher.args = args;
        debug!(watcher = %id, "watcher args replaced");
        Ok(watcher.clone())
    }

    pub fn remove_watcher(&self, id: &WatcherId) -> Result<()> {
        let mut tables = self.tables();
        if tables.watchers.remove(id).is_none() {
            return Err(StoreError::WatcherNotFound(id.clone()));
        }
        debug!(watcher = %id, "watcher removed");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Backups
    // ---------------------------------------------------------------------

    /// `None` means the user has never backed up.
    pub fn get_backup_metadata(&self, user: &UserId) -> Option<BackupMetadata> {
        self.tables().backups.get(user).map(|b| b.metadata.clone())
    }

    pub fn get_backup_data(&self, user: &UserId) -> Option<Bytes> {
        self.tables().backups.get(user).map(|b| b.data.clone())
    }

    /// Replace the user's backup with `data` and mirror it to the sink.
    ///
    /// The mirror runs after the lock is released; a mirror failure is
    /// logged and the in-memory commit stands.
    pub fn store_backup(
        &self,
        user: &UserId,
        data: impl Into<Bytes>,
        last_modify_ts: i64,
        compression: &str,
    ) -> BackupMetadata {
        let data = data.into();
        let metadata =
            BackupMetadata::for_payload(user.clone(), &data, last_modify_ts, compression);

        self.tables().backups.insert(
            user.clone(),
            StoredBackup {
                metadata: metadata.clone(),
                data: data.clone(),
            },
        );
        info!(
            user = %user,
            size = metadata.data_size,
            hash = %metadata.data_hash,
            "backup stored"
        );

        if let Err(e) = self.sink.persist_backup(&metadata, &data) {
            warn!(user = %user, error = %e, "failed to mirror backup to disk");
        }

        metadata
    }
}
