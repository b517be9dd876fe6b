//! Per-operation error taxonomy
//!
//! Every operation of the invitation surface exposes its own closed enum so
//! callers can branch exhaustively; no operation ever returns a tag outside
//! its declared set. The `From<TransportError>` impls are the taxonomy
//! mapper: translation only, no policy. Tags are stable for programmatic
//! branching; the display strings exist purely for diagnostics.

use crate::transport::TransportError;
use vestibule_core::{SaveDeviceError, TimestampOutOfBallpark};

/// Failures of `claimer_retrieve_info`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClaimerRetrieveInfoError {
    /// The invitation was already claimed or deleted
    #[error("Invitation already used")]
    AlreadyUsed,
    /// Unexpected failure; fatal to the operation, never retried by the core
    #[error("Internal error: {message}")]
    Internal {
        /// Diagnostic detail
        message: String,
    },
    /// The invitation token is unknown
    #[error("Invitation not found")]
    NotFound,
    /// Server unreachable
    #[error("Cannot reach the server")]
    Offline,
}

impl From<TransportError> for ClaimerRetrieveInfoError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::InvitationNotFound => Self::NotFound,
            TransportError::InvitationAlreadyUsed | TransportError::InvitationAlreadyDeleted => {
                Self::AlreadyUsed
            }
            TransportError::Offline => Self::Offline,
            other => Self::Internal {
                message: other.to_string(),
            },
        }
    }
}

/// Failures of the claimer's in-progress and finalize stages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClaimInProgressError {
    /// The organization is at its active-users cap
    #[error("Active users limit reached")]
    ActiveUsersLimitReached,
    /// The invitation was claimed or deleted under us
    #[error("Invitation already used")]
    AlreadyUsed,
    /// The bound canceller fired while we were suspended
    #[error("Operation cancelled")]
    Cancelled,
    /// The greeter's confirmation failed authentication
    #[error("Confirmation from the greeter is corrupted")]
    CorruptedConfirmation,
    /// Unexpected failure; fatal to the operation, never retried by the core
    #[error("Internal error: {message}")]
    Internal {
        /// Diagnostic detail
        message: String,
    },
    /// The invitation token is unknown
    #[error("Invitation not found")]
    NotFound,
    /// Server unreachable
    #[error("Cannot reach the server")]
    Offline,
    /// The greeter restarted their half; restart from the initial stage
    #[error("Peer has reset the invitation exchange")]
    PeerReset,
    /// The greeter is not allowed to create users
    #[error("Greeter is not allowed to create a user")]
    UserCreateNotAllowed,
    /// The storage collaborator refused to persist the device
    #[error("Cannot save the new device: {0}")]
    SaveDevice(#[from] SaveDeviceError),
}

impl ClaimInProgressError {
    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<TransportError> for ClaimInProgressError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::InvitationNotFound => Self::NotFound,
            TransportError::InvitationAlreadyUsed | TransportError::InvitationAlreadyDeleted => {
                Self::AlreadyUsed
            }
            TransportError::Offline => Self::Offline,
            TransportError::PeerReset => Self::PeerReset,
            TransportError::ActiveUsersLimitReached => Self::ActiveUsersLimitReached,
            TransportError::NotAllowed { .. } => Self::UserCreateNotAllowed,
            other => Self::Internal {
                message: other.to_string(),
            },
        }
    }
}

/// Failures of the greeter's stages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GreetInProgressError {
    /// The organization is at its active-users cap
    #[error("Active users limit reached")]
    ActiveUsersLimitReached,
    /// The invitation was claimed or deleted under us
    #[error("Invitation already used")]
    AlreadyUsed,
    /// Our clock and the server's disagree beyond tolerance
    #[error("Timestamp out of ballpark: client {} vs server {}", .0.client_timestamp, .0.server_timestamp)]
    BadTimestamp(TimestampOutOfBallpark),
    /// The bound canceller fired while we were suspended
    #[error("Operation cancelled")]
    Cancelled,
    /// The claimer's claim request failed authentication
    #[error("Claim request from the claimer is corrupted")]
    CorruptedClaimRequest,
    /// A device with this identity already exists
    #[error("Device already exists")]
    DeviceAlreadyExists,
    /// Unexpected failure; fatal to the operation, never retried by the core
    #[error("Internal error: {message}")]
    Internal {
        /// Diagnostic detail
        message: String,
    },
    /// The claimer's revealed nonce does not match its commitment
    #[error("Nonce commitment mismatch")]
    NonceMismatch,
    /// The invitation token is unknown
    #[error("Invitation not found")]
    NotFound,
    /// Server unreachable
    #[error("Cannot reach the server")]
    Offline,
    /// The claimer restarted their half; restart from the initial stage
    #[error("Peer has reset the invitation exchange")]
    PeerReset,
    /// A user with this identity already exists
    #[error("User already exists")]
    UserAlreadyExists,
    /// This member is not allowed to create users
    #[error("User creation not allowed")]
    UserCreateNotAllowed,
}

impl GreetInProgressError {
    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<TransportError> for GreetInProgressError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::InvitationNotFound => Self::NotFound,
            TransportError::InvitationAlreadyUsed | TransportError::InvitationAlreadyDeleted => {
                Self::AlreadyUsed
            }
            TransportError::Offline => Self::Offline,
            TransportError::PeerReset => Self::PeerReset,
            TransportError::ActiveUsersLimitReached => Self::ActiveUsersLimitReached,
            TransportError::UserAlreadyExists => Self::UserAlreadyExists,
            TransportError::DeviceAlreadyExists => Self::DeviceAlreadyExists,
            TransportError::NotAllowed { .. } => Self::UserCreateNotAllowed,
            TransportError::BadTimestamp(ballpark) => Self::BadTimestamp(ballpark),
            other => Self::Internal {
                message: other.to_string(),
            },
        }
    }
}

/// Failures of `start_user_invitation_greet` / `start_device_invitation_greet`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StartInvitationGreetError {
    /// Unexpected failure
    #[error("Internal error: {message}")]
    Internal {
        /// Diagnostic detail
        message: String,
    },
}

/// Failures of `cancel`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CancelError {
    /// Unexpected failure
    #[error("Internal error: {message}")]
    Internal {
        /// Diagnostic detail
        message: String,
    },
    /// The token is not currently bound to any in-flight operation
    #[error("Canceller is not bound to any operation")]
    NotBound,
}

/// Failures of `abort_operation`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AbortOperationError {
    /// Unexpected failure
    #[error("Internal error: {message}")]
    Internal {
        /// Diagnostic detail
        message: String,
    },
}

/// Failures of `list_invitations`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListInvitationsError {
    /// Unexpected failure
    #[error("Internal error: {message}")]
    Internal {
        /// Diagnostic detail
        message: String,
    },
    /// Server unreachable
    #[error("Cannot reach the server")]
    Offline,
}

impl From<TransportError> for ListInvitationsError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Offline => Self::Offline,
            other => Self::Internal {
                message: other.to_string(),
            },
        }
    }
}

/// Failures of `new_user_invitation`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NewUserInvitationError {
    /// A member with this email already exists
    #[error("Claimer email already belongs to a member")]
    AlreadyMember,
    /// Unexpected failure
    #[error("Internal error: {message}")]
    Internal {
        /// Diagnostic detail
        message: String,
    },
    /// This member is not allowed to invite users
    #[error("Not allowed to invite users")]
    NotAllowed,
    /// Server unreachable
    #[error("Cannot reach the server")]
    Offline,
}

impl From<TransportError> for NewUserInvitationError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::AlreadyMember => Self::AlreadyMember,
            TransportError::NotAllowed { .. } => Self::NotAllowed,
            TransportError::Offline => Self::Offline,
            other => Self::Internal {
                message: other.to_string(),
            },
        }
    }
}

/// Failures of `new_device_invitation`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NewDeviceInvitationError {
    /// Unexpected failure
    #[error("Internal error: {message}")]
    Internal {
        /// Diagnostic detail
        message: String,
    },
    /// Server unreachable
    #[error("Cannot reach the server")]
    Offline,
    /// The account has no email address to send the link to
    #[error("Cannot send email: user has no email address")]
    SendEmailToUserWithoutEmail,
}

impl From<TransportError> for NewDeviceInvitationError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::SendEmailToUserWithoutEmail => Self::SendEmailToUserWithoutEmail,
            TransportError::Offline => Self::Offline,
            other => Self::Internal {
                message: other.to_string(),
            },
        }
    }
}

/// Failures of `delete_invitation`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeleteInvitationError {
    /// The invitation was already deleted; not an unknown token
    #[error("Invitation already deleted")]
    AlreadyDeleted,
    /// Unexpected failure
    #[error("Internal error: {message}")]
    Internal {
        /// Diagnostic detail
        message: String,
    },
    /// The invitation token is unknown
    #[error("Invitation not found")]
    NotFound,
    /// Server unreachable
    #[error("Cannot reach the server")]
    Offline,
}

impl From<TransportError> for DeleteInvitationError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::InvitationAlreadyDeleted | TransportError::InvitationAlreadyUsed => {
                Self::AlreadyDeleted
            }
            TransportError::InvitationNotFound => Self::NotFound,
            TransportError::Offline => Self::Offline,
            other => Self::Internal {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retrieve_info_mapping() {
        assert_eq!(
            ClaimerRetrieveInfoError::from(TransportError::InvitationNotFound),
            ClaimerRetrieveInfoError::NotFound
        );
        assert_eq!(
            ClaimerRetrieveInfoError::from(TransportError::InvitationAlreadyDeleted),
            ClaimerRetrieveInfoError::AlreadyUsed
        );
        assert_eq!(
            ClaimerRetrieveInfoError::from(TransportError::Offline),
            ClaimerRetrieveInfoError::Offline
        );
        assert!(matches!(
            ClaimerRetrieveInfoError::from(TransportError::PeerReset),
            ClaimerRetrieveInfoError::Internal { .. }
        ));
    }

    #[test]
    fn test_greet_mapping_keeps_ballpark_payload() {
        let ballpark = TimestampOutOfBallpark {
            server_timestamp: chrono::Utc::now(),
            client_timestamp: chrono::Utc::now(),
            ballpark_client_early_offset: 300,
            ballpark_client_late_offset: 320,
        };
        match GreetInProgressError::from(TransportError::BadTimestamp(ballpark)) {
            GreetInProgressError::BadTimestamp(p) => {
                assert_eq!(p.ballpark_client_early_offset, 300);
                assert_eq!(p.ballpark_client_late_offset, 320);
            }
            other => panic!("expected BadTimestamp, got {other:?}"),
        }
    }

    #[test]
    fn test_delete_mapping_separates_deleted_from_unknown() {
        assert_eq!(
            DeleteInvitationError::from(TransportError::InvitationAlreadyDeleted),
            DeleteInvitationError::AlreadyDeleted
        );
        assert_eq!(
            DeleteInvitationError::from(TransportError::InvitationNotFound),
            DeleteInvitationError::NotFound
        );
    }

    #[test]
    fn test_not_allowed_maps_per_operation() {
        let not_allowed = || TransportError::NotAllowed {
            message: "standard profile".into(),
        };
        assert_eq!(
            NewUserInvitationError::from(not_allowed()),
            NewUserInvitationError::NotAllowed
        );
        assert_eq!(
            GreetInProgressError::from(not_allowed()),
            GreetInProgressError::UserCreateNotAllowed
        );
        assert_eq!(
            ClaimInProgressError::from(not_allowed()),
            ClaimInProgressError::UserCreateNotAllowed
        );
    }
}
