//! Invitation management
//!
//! Create, list, and delete operations for an authenticated member, kept
//! apart from the handshake ladder: none of these touch handles or
//! cancellers, they are single round trips.

use tracing::{debug, instrument};

use vestibule_core::{
    InvitationEmailSentStatus, InvitationStatus, InvitationToken, InviteListItem,
};

use crate::errors::{
    DeleteInvitationError, ListInvitationsError, NewDeviceInvitationError, NewUserInvitationError,
};
use crate::events::InviteEvent;
use crate::service::InviteService;
use crate::transport::AuthenticatedTransport;

impl InviteService {
    /// Lists the organization's outstanding invitations.
    #[instrument(skip(self))]
    pub async fn list_invitations(&self) -> Result<Vec<InviteListItem>, ListInvitationsError> {
        let transport = self.management_transport::<ListInvitationsError>()?;
        Ok(transport.list_invitations().await?)
    }

    /// Creates a user invitation for `claimer_email`.
    ///
    /// Idempotent server-side: a second call with the same email returns the
    /// existing invitation's token instead of minting a new one.
    #[instrument(skip(self))]
    pub async fn new_user_invitation(
        &self,
        claimer_email: String,
        send_email: bool,
    ) -> Result<(InvitationToken, InvitationEmailSentStatus), NewUserInvitationError> {
        let transport = self.management_transport::<NewUserInvitationError>()?;
        let (token, email_status) = transport
            .new_user_invitation(claimer_email, send_email)
            .await?;
        debug!(%token, "user invitation created");
        self.events.publish(InviteEvent::InvitationChanged {
            token,
            status: InvitationStatus::Idle,
        });
        Ok((token, email_status))
    }

    /// Creates a device invitation for our own account.
    #[instrument(skip(self))]
    pub async fn new_device_invitation(
        &self,
        send_email: bool,
    ) -> Result<(InvitationToken, InvitationEmailSentStatus), NewDeviceInvitationError> {
        let transport = self.management_transport::<NewDeviceInvitationError>()?;
        let (token, email_status) = transport.new_device_invitation(send_email).await?;
        debug!(%token, "device invitation created");
        self.events.publish(InviteEvent::InvitationChanged {
            token,
            status: InvitationStatus::Idle,
        });
        Ok((token, email_status))
    }

    /// Deletes an outstanding invitation.
    ///
    /// Deleting twice is `AlreadyDeleted`, distinct from an unknown token:
    /// the caller held a real invitation, it is just gone.
    #[instrument(skip(self))]
    pub async fn delete_invitation(
        &self,
        token: InvitationToken,
    ) -> Result<(), DeleteInvitationError> {
        let transport = self.management_transport::<DeleteInvitationError>()?;
        transport.delete_invitation(token).await?;
        debug!(%token, "invitation deleted");
        self.events.publish(InviteEvent::InvitationChanged {
            token,
            status: InvitationStatus::Deleted,
        });
        Ok(())
    }

    fn management_transport<E>(&self) -> Result<&dyn AuthenticatedTransport, E>
    where
        E: MissingTransport,
    {
        self.authenticated
            .as_deref()
            .ok_or_else(E::no_authenticated_transport)
    }
}

/// Lets the shared accessor produce each operation's own `Internal` tag.
trait MissingTransport {
    fn no_authenticated_transport() -> Self;
}

macro_rules! impl_missing_transport {
    ($($err:ty),+ $(,)?) => {
        $(impl MissingTransport for $err {
            fn no_authenticated_transport() -> Self {
                Self::Internal {
                    message: "no authenticated transport configured".into(),
                }
            }
        })+
    };
}

impl_missing_transport!(
    ListInvitationsError,
    NewUserInvitationError,
    NewDeviceInvitationError,
    DeleteInvitationError,
);
