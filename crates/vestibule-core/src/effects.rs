//! Collaborator traits implemented outside this workspace
//!
//! The core never touches the disk itself: finalizing a claim hands the new
//! `LocalDevice` to whatever implements [`DeviceStorageEffects`]. Failures
//! cross the boundary verbatim as [`SaveDeviceError`] so the claimer's
//! finalize stage can surface them without reinterpretation.

use crate::device::{AvailableDevice, DeviceSaveStrategy, LocalDevice};
use async_trait::async_trait;

/// Failure reported by the device storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SaveDeviceError {
    /// The storage backend cannot be reached (disk full, vault locked, ...)
    #[error("Device storage unavailable: {message}")]
    StorageUnavailable {
        /// Diagnostic detail from the backend
        message: String,
    },
    /// The configured key-file location is unusable
    #[error("Invalid device file path: {message}")]
    InvalidPath {
        /// Diagnostic detail from the backend
        message: String,
    },
    /// Anything else; never retried by the core
    #[error("Internal storage error: {message}")]
    Internal {
        /// Diagnostic detail from the backend
        message: String,
    },
}

/// Persistence boundary for freshly claimed devices.
#[async_trait]
pub trait DeviceStorageEffects: Send + Sync {
    /// Encrypt and persist `device` according to `strategy`, returning the
    /// on-disk summary record.
    async fn save_device(
        &self,
        device: LocalDevice,
        strategy: &DeviceSaveStrategy,
    ) -> Result<AvailableDevice, SaveDeviceError>;
}
