//! Greeter state machine
//!
//! Mirror image of the claimer ladder, driven by an authenticated member.
//! The greeter addresses the conduit by invitation token and, at the end,
//! creates the user or device record the claimer asked for.
//!
//! Stage order:
//!
//!   wait peer -> wait peer trust -> signify trust
//!             -> get claim request -> create

use std::sync::Arc;

use chrono::Utc;

use vestibule_core::crypto::{generate_handshake_nonce, hash_nonce};
use vestibule_core::{
    DeviceId, DeviceLabel, HumanHandle, InvitationToken, LocalDevice, PrivateKey, SasCode,
    SharedSecretKey, UserId, UserProfile,
};

use crate::errors::GreetInProgressError;
use crate::transport::{
    AuthenticatedTransport, ClaimRequest, Confirmation, NewDevice, NewUser,
};

/// State shared by every greeter stage.
#[derive(Clone)]
pub(crate) struct GreeterBase {
    pub(crate) transport: Arc<dyn AuthenticatedTransport>,
    pub(crate) token: InvitationToken,
    // The member doing the greeting; device invitations enroll into this
    // account, and confirmations are stamped with its identity.
    pub(crate) device: LocalDevice,
}

// ============================================================================
// Initial stage: key agreement and nonce exchange
// ============================================================================

/// Greeter context before any peer contact.
#[derive(Clone)]
pub struct GreeterInitialCtx {
    pub(crate) base: GreeterBase,
}

impl GreeterInitialCtx {
    pub(crate) fn new(base: GreeterBase) -> Self {
        Self { base }
    }

    /// Token of the invitation being greeted.
    pub fn token(&self) -> InvitationToken {
        self.base.token
    }

    /// Performs the key agreement with the claimer through the conduit.
    ///
    /// The claimer's nonce arrives as a commitment first; the reveal is
    /// checked against it here, so a claimer that saw our nonce before
    /// picking theirs is caught with `NonceMismatch`.
    pub(crate) async fn do_wait_peer(&self) -> Result<GreeterInProgress1Ctx, GreetInProgressError> {
        let private_key = PrivateKey::generate();
        let claimer_public_key = self
            .base
            .transport
            .wait_peer(self.base.token, private_key.public_key())
            .await?;
        let shared_secret = private_key.agree(&claimer_public_key);

        let hashed_nonce = self.base.transport.get_hashed_nonce(self.base.token).await?;
        let greeter_nonce = generate_handshake_nonce();
        let claimer_nonce = self
            .base
            .transport
            .send_nonce(self.base.token, greeter_nonce.clone())
            .await?;
        if hash_nonce(&claimer_nonce) != hashed_nonce {
            return Err(GreetInProgressError::NonceMismatch);
        }

        let (claimer_sas, greeter_sas) =
            SasCode::generate_pair(&claimer_nonce, &greeter_nonce, &shared_secret);

        Ok(GreeterInProgress1Ctx {
            base: self.base.clone(),
            shared_secret,
            claimer_sas,
            greeter_sas,
        })
    }
}

// ============================================================================
// Stage 1: wait for the claimer to verify our code
// ============================================================================

/// Our code is on the claimer's screen as a choice set; we wait for them to
/// pick it and signify trust.
#[derive(Clone)]
pub struct GreeterInProgress1Ctx {
    pub(crate) base: GreeterBase,
    shared_secret: SharedSecretKey,
    claimer_sas: SasCode,
    greeter_sas: SasCode,
}

impl GreeterInProgress1Ctx {
    /// Code to show the human driving this side.
    pub fn greeter_sas(&self) -> &SasCode {
        &self.greeter_sas
    }

    /// Suspends until the claimer signifies trust in our code.
    pub(crate) async fn do_wait_peer_trust(
        &self,
    ) -> Result<GreeterInProgress2Ctx, GreetInProgressError> {
        self.base.transport.wait_peer_trust(self.base.token).await?;
        Ok(GreeterInProgress2Ctx {
            base: self.base.clone(),
            shared_secret: self.shared_secret.clone(),
            claimer_sas: self.claimer_sas.clone(),
        })
    }
}

// ============================================================================
// Stage 2: verify the claimer's code
// ============================================================================

/// The claimer vouched for us; now their code must be checked on our side.
#[derive(Clone)]
pub struct GreeterInProgress2Ctx {
    pub(crate) base: GreeterBase,
    shared_secret: SharedSecretKey,
    claimer_sas: SasCode,
}

impl GreeterInProgress2Ctx {
    /// Code the claimer's screen should be showing.
    pub fn claimer_sas(&self) -> &SasCode {
        &self.claimer_sas
    }

    /// Choice set to display: the true claimer code hidden among decoys.
    pub fn generate_claimer_sas_choices(&self, size: usize) -> Vec<SasCode> {
        SasCode::generate_choices(&self.claimer_sas, size)
    }

    /// Tells the claimer their code checked out on our side.
    pub(crate) async fn do_signify_trust(
        &self,
    ) -> Result<GreeterInProgress3Ctx, GreetInProgressError> {
        self.base.transport.signify_trust(self.base.token).await?;
        Ok(GreeterInProgress3Ctx {
            base: self.base.clone(),
            shared_secret: self.shared_secret.clone(),
        })
    }
}

// ============================================================================
// Stage 3: receive the claim request
// ============================================================================

/// Both humans have vouched for the channel; the claimer's request is next.
#[derive(Clone)]
pub struct GreeterInProgress3Ctx {
    pub(crate) base: GreeterBase,
    shared_secret: SharedSecretKey,
}

impl GreeterInProgress3Ctx {
    /// Suspends until the claimer's sealed claim request arrives, then
    /// decodes it.
    pub(crate) async fn do_get_claim_requests(
        &self,
    ) -> Result<GreeterInProgress4Ctx, GreetInProgressError> {
        let sealed = self
            .base
            .transport
            .get_claim_request(self.base.token)
            .await?;
        let plaintext = self
            .shared_secret
            .unseal(&sealed)
            .map_err(|_| GreetInProgressError::CorruptedClaimRequest)?;
        let request: ClaimRequest = serde_json::from_slice(&plaintext)
            .map_err(|_| GreetInProgressError::CorruptedClaimRequest)?;

        Ok(GreeterInProgress4Ctx {
            base: self.base.clone(),
            shared_secret: self.shared_secret.clone(),
            request,
        })
    }
}

// ============================================================================
// Stage 4: create the record and confirm
// ============================================================================

/// Terminal greeter stage: the claim request is in hand, the greeter decides
/// what to actually grant and submits the creation.
#[derive(Clone)]
pub struct GreeterInProgress4Ctx {
    pub(crate) base: GreeterBase,
    shared_secret: SharedSecretKey,
    request: ClaimRequest,
}

impl GreeterInProgress4Ctx {
    /// Device label the claimer asked for.
    pub fn requested_device_label(&self) -> Option<&DeviceLabel> {
        match &self.request {
            ClaimRequest::User {
                requested_device_label,
                ..
            }
            | ClaimRequest::Device {
                requested_device_label,
            } => requested_device_label.as_ref(),
        }
    }

    /// Human handle the claimer asked for; always absent for device claims.
    pub fn requested_human_handle(&self) -> Option<&HumanHandle> {
        match &self.request {
            ClaimRequest::User {
                requested_human_handle,
                ..
            } => requested_human_handle.as_ref(),
            ClaimRequest::Device { .. } => None,
        }
    }

    /// Creates the new user and their first device, then sends the sealed
    /// confirmation. The server claims the invitation atomically with the
    /// creation, so a concurrent second creation surfaces as `AlreadyUsed`.
    ///
    /// The greeter decides the granted attributes: the claimer's requested
    /// handle and label are what the caller typically passes back in, but
    /// the profile is the greeter's call alone.
    pub(crate) async fn do_create_new_user(
        &self,
        human_handle: Option<HumanHandle>,
        device_label: Option<DeviceLabel>,
        profile: UserProfile,
    ) -> Result<(), GreetInProgressError> {
        let user_id = UserId::new();
        let device_id = DeviceId::new();
        let timestamp = Utc::now();

        self.base
            .transport
            .create_user(
                self.base.token,
                NewUser {
                    user_id,
                    device_id,
                    human_handle: human_handle.clone(),
                    device_label: device_label.clone(),
                    profile,
                    timestamp,
                },
            )
            .await?;

        self.send_confirmation(Confirmation {
            user_id,
            device_id,
            device_label,
            human_handle,
            profile,
        })
        .await
    }

    /// Creates a new device on the greeter's own account, then sends the
    /// sealed confirmation carrying the account's identity.
    pub(crate) async fn do_create_new_device(
        &self,
        device_label: Option<DeviceLabel>,
    ) -> Result<(), GreetInProgressError> {
        let device_id = DeviceId::new();
        let timestamp = Utc::now();

        self.base
            .transport
            .create_device(
                self.base.token,
                NewDevice {
                    device_id,
                    device_label: device_label.clone(),
                    timestamp,
                },
            )
            .await?;

        self.send_confirmation(Confirmation {
            user_id: self.base.device.user_id,
            device_id,
            device_label,
            human_handle: self.base.device.human_handle.clone(),
            profile: self.base.device.profile,
        })
        .await
    }

    async fn send_confirmation(
        &self,
        confirmation: Confirmation,
    ) -> Result<(), GreetInProgressError> {
        let plaintext = serde_json::to_vec(&confirmation)
            .map_err(|e| GreetInProgressError::internal(format!("encode confirmation: {e}")))?;
        let sealed = self
            .shared_secret
            .seal(&plaintext)
            .map_err(|e| GreetInProgressError::internal(format!("seal confirmation: {e}")))?;
        self.base
            .transport
            .send_confirmation(self.base.token, sealed)
            .await?;
        Ok(())
    }
}
