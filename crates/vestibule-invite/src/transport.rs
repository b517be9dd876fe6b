//! Transport boundary between the state machines and the server
//!
//! The handshake never talks to the peer directly: every exchange goes
//! through the server's invitation conduit, reached here via two traits.
//! [`InvitedTransport`] is the claimer's view, scoped to one invitation.
//! [`AuthenticatedTransport`] is the greeter's view, bound to a logged-in
//! member and addressing conduits by token.
//!
//! Wire encoding, reconnection, and retry policy all live behind these traits;
//! the core sees typed payloads and the closed [`TransportError`] vocabulary,
//! which the per-operation error enums in [`crate::errors`] translate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vestibule_core::{
    DeviceId, DeviceLabel, HumanHandle, InvitationEmailSentStatus, InvitationInfo,
    InvitationToken, InviteListItem, PublicKey, TimestampOutOfBallpark, UserId, UserProfile,
};

/// Failure vocabulary of the transport collaborator.
///
/// Closed on purpose: the error taxonomy mapper in `errors` branches on every
/// variant, so a transport implementation has nowhere to smuggle a new kind
/// of failure past the callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Server unreachable; the caller decides whether to retry
    #[error("Cannot reach the server")]
    Offline,
    /// The invitation token is unknown to the server
    #[error("Invitation not found")]
    InvitationNotFound,
    /// The invitation was already claimed
    #[error("Invitation already used")]
    InvitationAlreadyUsed,
    /// The invitation was deleted before being claimed
    #[error("Invitation already deleted")]
    InvitationAlreadyDeleted,
    /// The peer restarted its half of the conduit
    #[error("Peer has reset the invitation exchange")]
    PeerReset,
    /// The authenticated member lacks the right to perform this operation
    #[error("Not allowed: {message}")]
    NotAllowed {
        /// Diagnostic detail from the server
        message: String,
    },
    /// A member with this email already exists
    #[error("Claimer email already belongs to a member")]
    AlreadyMember,
    /// The organization is at its active-users cap
    #[error("Active users limit reached")]
    ActiveUsersLimitReached,
    /// A user with this identity already exists
    #[error("User already exists")]
    UserAlreadyExists,
    /// A device with this identity already exists
    #[error("Device already exists")]
    DeviceAlreadyExists,
    /// The invited person has no email to send to
    #[error("Cannot send email: user has no email address")]
    SendEmailToUserWithoutEmail,
    /// The supplied timestamp strayed outside the server's tolerance
    #[error("Timestamp out of ballpark")]
    BadTimestamp(TimestampOutOfBallpark),
    /// Anything the closed vocabulary cannot express
    #[error("Internal transport error: {message}")]
    Internal {
        /// Diagnostic detail
        message: String,
    },
}

/// Content of the sealed claim request the claimer submits at stage 3.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimRequest {
    /// A new user states who they are and how to label the first device
    User {
        /// Label for the claimer's device
        requested_device_label: Option<DeviceLabel>,
        /// Identity the claimer wants recorded
        requested_human_handle: Option<HumanHandle>,
    },
    /// A new device only needs a label
    Device {
        /// Label for the new device
        requested_device_label: Option<DeviceLabel>,
    },
}

/// Content of the sealed confirmation the greeter returns after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    /// User the new device authenticates as
    pub user_id: UserId,
    /// Identity of the new device
    pub device_id: DeviceId,
    /// Label the greeter actually recorded
    pub device_label: Option<DeviceLabel>,
    /// Human handle the greeter actually recorded
    pub human_handle: Option<HumanHandle>,
    /// Profile granted by the greeter
    pub profile: UserProfile,
}

/// Record the greeter submits when creating a user at the final stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    /// Identity of the new user
    pub user_id: UserId,
    /// Identity of the user's first device
    pub device_id: DeviceId,
    /// Human handle to record
    pub human_handle: Option<HumanHandle>,
    /// Device label to record
    pub device_label: Option<DeviceLabel>,
    /// Profile granted
    pub profile: UserProfile,
    /// Greeter-side clock, checked against the server's ballpark
    pub timestamp: DateTime<Utc>,
}

/// Record the greeter submits when creating a device at the final stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDevice {
    /// Identity of the new device
    pub device_id: DeviceId,
    /// Device label to record
    pub device_label: Option<DeviceLabel>,
    /// Greeter-side clock, checked against the server's ballpark
    pub timestamp: DateTime<Utc>,
}

/// Claimer-side server access, scoped to a single invitation.
///
/// Every method may suspend until the greeter's matching call arrives; these
/// are exactly the suspension points where cancellation is observed.
#[async_trait]
pub trait InvitedTransport: Send + Sync {
    /// Learn what the invitation targets and who greets it.
    async fn invitation_info(&self) -> Result<InvitationInfo, TransportError>;

    /// Publish our ephemeral public key, wait for the greeter's.
    async fn wait_peer(&self, claimer_public_key: PublicKey) -> Result<PublicKey, TransportError>;

    /// Commit to our handshake nonce, wait for the greeter's nonce.
    async fn send_hashed_nonce(&self, hashed_nonce: [u8; 32]) -> Result<Vec<u8>, TransportError>;

    /// Reveal the nonce committed to in the previous step.
    async fn send_nonce(&self, claimer_nonce: Vec<u8>) -> Result<(), TransportError>;

    /// Signal that our human confirmed the greeter's SAS.
    async fn signify_trust(&self) -> Result<(), TransportError>;

    /// Wait for the greeter's human to confirm our SAS.
    async fn wait_peer_trust(&self) -> Result<(), TransportError>;

    /// Submit the sealed claim request, wait for the sealed confirmation.
    async fn communicate(&self, sealed_payload: Vec<u8>) -> Result<Vec<u8>, TransportError>;
}

/// Greeter-side server access, bound to an authenticated member.
#[async_trait]
pub trait AuthenticatedTransport: Send + Sync {
    /// List invitations created by this member's organization.
    async fn list_invitations(&self) -> Result<Vec<InviteListItem>, TransportError>;

    /// Create a user invitation for `claimer_email`.
    async fn new_user_invitation(
        &self,
        claimer_email: String,
        send_email: bool,
    ) -> Result<(InvitationToken, InvitationEmailSentStatus), TransportError>;

    /// Create a device invitation for this member's own account.
    async fn new_device_invitation(
        &self,
        send_email: bool,
    ) -> Result<(InvitationToken, InvitationEmailSentStatus), TransportError>;

    /// Delete an outstanding invitation.
    async fn delete_invitation(&self, token: InvitationToken) -> Result<(), TransportError>;

    /// Publish our ephemeral public key, wait for the claimer's.
    async fn wait_peer(
        &self,
        token: InvitationToken,
        greeter_public_key: PublicKey,
    ) -> Result<PublicKey, TransportError>;

    /// Wait for the claimer's nonce commitment.
    async fn get_hashed_nonce(&self, token: InvitationToken) -> Result<[u8; 32], TransportError>;

    /// Send our nonce, wait for the claimer to reveal theirs.
    async fn send_nonce(
        &self,
        token: InvitationToken,
        greeter_nonce: Vec<u8>,
    ) -> Result<Vec<u8>, TransportError>;

    /// Wait for the claimer's human to confirm our SAS.
    async fn wait_peer_trust(&self, token: InvitationToken) -> Result<(), TransportError>;

    /// Signal that our human confirmed the claimer's SAS.
    async fn signify_trust(&self, token: InvitationToken) -> Result<(), TransportError>;

    /// Wait for the claimer's sealed claim request.
    async fn get_claim_request(&self, token: InvitationToken) -> Result<Vec<u8>, TransportError>;

    /// Deliver the sealed confirmation to the waiting claimer.
    async fn send_confirmation(
        &self,
        token: InvitationToken,
        sealed_payload: Vec<u8>,
    ) -> Result<(), TransportError>;

    /// Create the new user record; atomically claims the invitation.
    async fn create_user(
        &self,
        token: InvitationToken,
        new_user: NewUser,
    ) -> Result<(), TransportError>;

    /// Create the new device record; atomically claims the invitation.
    async fn create_device(
        &self,
        token: InvitationToken,
        new_device: NewDevice,
    ) -> Result<(), TransportError>;
}
