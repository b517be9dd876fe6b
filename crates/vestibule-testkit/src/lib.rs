//! Test harness for the invitation handshake
//!
//! Everything a handshake test needs without a network or a disk: an
//! in-memory server implementing both transport traits, a device vault
//! implementing the storage boundary, and fixture builders for the standard
//! cast of characters.

#![forbid(unsafe_code)]

pub mod fixtures;
pub mod server;
pub mod vault;

pub use fixtures::{claimer_handle, device_label, TestOrganization, CLAIMER_EMAIL, CLAIMER_LABEL};
pub use server::MemoryServer;
pub use vault::MemoryDeviceVault;
