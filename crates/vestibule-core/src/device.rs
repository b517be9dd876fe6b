//! Local device records and save strategies
//!
//! `LocalDevice` is the material the claimer walks away with: everything a
//! client needs to authenticate as the newly created user/device. How it is
//! encrypted at rest is the storage collaborator's concern; the core only
//! names the strategy.

use crate::human_handle::HumanHandle;
use crate::identifiers::{DeviceId, DeviceLabel, OrganizationId, UserId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Role a user holds inside the organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserProfile {
    /// Can manage users and invitations
    Admin,
    /// Regular member
    Standard,
    /// External collaborator with restricted visibility
    Outsider,
}

/// How a device file is protected on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceFileType {
    /// Encrypted with a key derived from a password
    Password,
    /// Recovery export
    Recovery,
    /// Key held by a hardware token
    Smartcard,
}

/// Strategy chosen by the user when persisting a freshly claimed device.
#[derive(Debug, Clone)]
pub enum DeviceSaveStrategy {
    /// Derive the file key from this password
    Password {
        /// The password, moved to the storage collaborator as-is
        password: String,
    },
    /// Delegate the key to a hardware token
    Smartcard,
}

impl DeviceSaveStrategy {
    /// The file type this strategy produces.
    pub fn file_type(&self) -> DeviceFileType {
        match self {
            Self::Password { .. } => DeviceFileType::Password,
            Self::Smartcard => DeviceFileType::Smartcard,
        }
    }
}

/// Credentials of one enrolled device, as handed over at the end of a claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalDevice {
    /// Organization the device belongs to
    pub organization_id: OrganizationId,
    /// User the device authenticates as
    pub user_id: UserId,
    /// This device's identity
    pub device_id: DeviceId,
    /// Display label chosen at claim time
    pub device_label: Option<DeviceLabel>,
    /// Human behind the user, if known
    pub human_handle: Option<HumanHandle>,
    /// Profile granted by the greeter
    pub profile: UserProfile,
}

/// Summary of a device file present on this machine.
///
/// What device listings show before the user authenticates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableDevice {
    /// Path of the encrypted device file
    pub key_file_path: PathBuf,
    /// Organization the device belongs to
    pub organization_id: OrganizationId,
    /// User the device authenticates as
    pub user_id: UserId,
    /// This device's identity
    pub device_id: DeviceId,
    /// Display label, if one was set
    pub device_label: Option<DeviceLabel>,
    /// Human behind the user, if known
    pub human_handle: Option<HumanHandle>,
    /// How the file is protected
    pub ty: DeviceFileType,
}
