//! Invitation records, statuses, and addresses
//!
//! The server keeps the invitation bookkeeping; these are the shared shapes
//! both sides exchange about it.

use crate::human_handle::HumanHandle;
use crate::identifiers::{InvitationToken, OrganizationId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an outstanding invitation, as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvitationStatus {
    /// Created, claimer has not connected yet
    Idle,
    /// Claimer is currently connected to the invitation endpoint
    Ready,
    /// Deleted: claimed, cancelled, or rotten
    Deleted,
}

/// Whether an invitation enrolls a new user or a new device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvitationType {
    /// A new member joins the organization
    User,
    /// An existing member enrolls an additional device
    Device,
}

/// Whether the server managed to email the invitation link to the claimer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvitationEmailSentStatus {
    /// Email handed to the mail relay
    Success,
    /// Server has no mail relay configured
    NotAvailable,
    /// Recipient address was refused
    BadRecipient,
}

/// Summary of one outstanding invitation, as returned by `list_invitations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InviteListItem {
    /// User invitation: carries the email the link was addressed to
    User {
        /// Token identifying the invitation
        token: InvitationToken,
        /// When the invitation was created
        created_on: DateTime<Utc>,
        /// Email address of the invited person
        claimer_email: String,
        /// Current lifecycle status
        status: InvitationStatus,
    },
    /// Device invitation for the greeter's own account
    Device {
        /// Token identifying the invitation
        token: InvitationToken,
        /// When the invitation was created
        created_on: DateTime<Utc>,
        /// Current lifecycle status
        status: InvitationStatus,
    },
}

impl InviteListItem {
    /// Token identifying this invitation
    pub fn token(&self) -> InvitationToken {
        match self {
            Self::User { token, .. } | Self::Device { token, .. } => *token,
        }
    }

    /// Current lifecycle status
    pub fn status(&self) -> InvitationStatus {
        match self {
            Self::User { status, .. } | Self::Device { status, .. } => *status,
        }
    }

    /// Kind of invitation this record describes
    pub fn invitation_type(&self) -> InvitationType {
        match self {
            Self::User { .. } => InvitationType::User,
            Self::Device { .. } => InvitationType::Device,
        }
    }
}

/// Parsed form of an invitation link.
///
/// URL parsing itself happens in the address collaborator; by the time the
/// core sees an invitation this is already structured data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationAddr {
    organization_id: OrganizationId,
    token: InvitationToken,
    invitation_type: InvitationType,
}

impl InvitationAddr {
    /// Assemble an address from its parts.
    pub fn new(
        organization_id: OrganizationId,
        token: InvitationToken,
        invitation_type: InvitationType,
    ) -> Self {
        Self {
            organization_id,
            token,
            invitation_type,
        }
    }

    /// Organization the invitation belongs to
    pub fn organization_id(&self) -> &OrganizationId {
        &self.organization_id
    }

    /// Token identifying the invitation server-side
    pub fn token(&self) -> InvitationToken {
        self.token
    }

    /// Kind of enrollment the link is for
    pub fn invitation_type(&self) -> InvitationType {
        self.invitation_type
    }
}

/// Initial information a claimer learns when retrieving an invitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvitationInfo {
    /// The invitation enrolls a new user
    User {
        /// Email the invitation was addressed to
        claimer_email: String,
        /// Member who will greet the handshake
        greeter_user_id: UserId,
        /// Greeter's human handle, if they have one
        greeter_human_handle: Option<HumanHandle>,
    },
    /// The invitation enrolls a new device
    Device {
        /// Member who will greet the handshake (the account owner)
        greeter_user_id: UserId,
        /// Greeter's human handle, if they have one
        greeter_human_handle: Option<HumanHandle>,
    },
}

impl InvitationInfo {
    /// Kind of enrollment this invitation performs
    pub fn invitation_type(&self) -> InvitationType {
        match self {
            Self::User { .. } => InvitationType::User,
            Self::Device { .. } => InvitationType::Device,
        }
    }
}
