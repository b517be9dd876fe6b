//! Vestibule core types
//!
//! This crate provides the shared vocabulary of the Vestibule onboarding
//! platform: the identifier newtypes, invitation records, SAS codes, and the
//! device-file model exchanged between the claimer and greeter state machines
//! in `vestibule-invite`.
//!
//! # Architecture
//!
//! - `identifiers` - Opaque identifier newtypes used across all crates
//! - `human_handle` - Email + display label pair identifying a person
//! - `sas` - Short authentication string codes and their derivation
//! - `crypto` - Boundary wrappers over the handshake crypto primitives
//! - `invitation` - Invitation records, statuses, and addresses
//! - `device` - Local/available device records and save strategies
//! - `time` - Ballpark (clock skew) checking shared with the server
//! - `effects` - Collaborator traits implemented outside this workspace
//!
//! The cryptographic mathematics, the wire transport, and persistent device
//! storage are external collaborators: this crate only defines the types and
//! traits at their boundary.

#![forbid(unsafe_code)]

pub mod crypto;
pub mod device;
pub mod effects;
pub mod human_handle;
pub mod identifiers;
pub mod invitation;
pub mod sas;
pub mod time;

pub use crypto::{CryptoError, PrivateKey, PublicKey, SharedSecretKey};
pub use device::{
    AvailableDevice, DeviceFileType, DeviceSaveStrategy, LocalDevice, UserProfile,
};
pub use effects::{DeviceStorageEffects, SaveDeviceError};
pub use human_handle::HumanHandle;
pub use identifiers::{DeviceId, DeviceLabel, InvitationToken, OrganizationId, UserId};
pub use invitation::{
    InvitationAddr, InvitationEmailSentStatus, InvitationInfo, InvitationStatus, InvitationType,
    InviteListItem,
};
pub use sas::SasCode;
pub use time::{
    is_in_ballpark, TimestampOutOfBallpark, BALLPARK_CLIENT_EARLY_OFFSET_SECS,
    BALLPARK_CLIENT_LATE_OFFSET_SECS,
};
