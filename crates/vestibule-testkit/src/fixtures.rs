//! Canned organization fixtures
//!
//! Most handshake tests want the same cast: an organization with an admin
//! ready to greet and a well-known outsider waiting to be invited. This
//! builder assembles that world on a fresh [`MemoryServer`].

use std::str::FromStr;
use std::sync::Arc;

use vestibule_core::{
    DeviceLabel, HumanHandle, LocalDevice, OrganizationId, UserProfile,
};

use crate::server::MemoryServer;

/// Email of the standing claimer used across the test suite.
pub const CLAIMER_EMAIL: &str = "gordon.freeman@blackmesa.nm";

/// Display label of the standing claimer.
pub const CLAIMER_LABEL: &str = "Gordon Freeman";

/// A small organization with one admin member, ready to greet.
pub struct TestOrganization {
    pub server: Arc<MemoryServer>,
    /// The admin's device, used for greeting and management
    pub admin: LocalDevice,
}

impl TestOrganization {
    /// Builds `MyOrg` with an admin called Eli Vance.
    pub fn new() -> Self {
        Self::with_name("MyOrg")
    }

    pub fn with_name(name: &str) -> Self {
        let organization_id = OrganizationId::from_str(name)
            .unwrap_or_else(|_| panic!("invalid fixture organization name: {name}"));
        let server = MemoryServer::new(organization_id);
        let admin = server.add_user(
            Some(
                HumanHandle::new("eli.vance@blackmesa.nm", "Eli Vance")
                    .unwrap_or_else(|_| panic!("invalid fixture admin handle")),
            ),
            UserProfile::Admin,
            Some(device_label("lambda-core")),
        );
        Self { server, admin }
    }

    /// Adds a standard (non-admin) member, for permission tests.
    pub fn add_standard_member(&self, email: &str, label: &str) -> LocalDevice {
        self.server.add_user(
            Some(
                HumanHandle::new(email, label)
                    .unwrap_or_else(|_| panic!("invalid fixture member handle: {email}")),
            ),
            UserProfile::Standard,
            Some(device_label("workstation")),
        )
    }

    /// Adds a member without an email, for the no-email edge cases.
    pub fn add_member_without_email(&self) -> LocalDevice {
        self.server
            .add_user(None, UserProfile::Standard, Some(device_label("terminal")))
    }
}

impl Default for TestOrganization {
    fn default() -> Self {
        Self::new()
    }
}

/// The human handle the standing claimer requests during a user claim.
pub fn claimer_handle() -> HumanHandle {
    HumanHandle::new(CLAIMER_EMAIL, CLAIMER_LABEL)
        .unwrap_or_else(|_| panic!("invalid fixture claimer handle"))
}

/// Shorthand for building device labels in tests.
pub fn device_label(label: &str) -> DeviceLabel {
    DeviceLabel::from_str(label).unwrap_or_else(|_| panic!("invalid fixture device label: {label}"))
}
