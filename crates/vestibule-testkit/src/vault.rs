//! In-memory device vault
//!
//! Implements the device storage boundary without touching the disk. Saved
//! devices are kept in a plain list for assertions; a failure flag lets
//! tests exercise the retry path of the claimer's final save.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use vestibule_core::{
    AvailableDevice, DeviceSaveStrategy, DeviceStorageEffects, LocalDevice, SaveDeviceError,
};

/// Test double for [`DeviceStorageEffects`].
#[derive(Default)]
pub struct MemoryDeviceVault {
    saved: Mutex<Vec<AvailableDevice>>,
    fail_next: AtomicBool,
}

impl MemoryDeviceVault {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes the next save fail with `StorageUnavailable`, then recover.
    pub fn fail_next_save(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Devices persisted so far, in save order.
    pub fn saved_devices(&self) -> Vec<AvailableDevice> {
        self.lock_saved().clone()
    }

    fn lock_saved(&self) -> MutexGuard<'_, Vec<AvailableDevice>> {
        match self.saved.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl DeviceStorageEffects for MemoryDeviceVault {
    async fn save_device(
        &self,
        device: LocalDevice,
        strategy: &DeviceSaveStrategy,
    ) -> Result<AvailableDevice, SaveDeviceError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(SaveDeviceError::StorageUnavailable {
                message: "vault is sealed".into(),
            });
        }
        let available = AvailableDevice {
            key_file_path: PathBuf::from(format!(
                "/devices/{}/{}.keys",
                device.organization_id, device.device_id
            )),
            organization_id: device.organization_id,
            user_id: device.user_id,
            device_id: device.device_id,
            device_label: device.device_label,
            human_handle: device.human_handle,
            ty: strategy.file_type(),
        };
        self.lock_saved().push(available.clone());
        Ok(available)
    }
}
