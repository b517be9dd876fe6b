//! Claimer state machine
//!
//! The claimer walks a fixed ladder of stages, one context type per stage.
//! Each stage consumes the previous context and yields the next, so the
//! compiler rules out replaying or skipping a step. The service layer owns
//! checkpointing: on retryable failures it re-registers the context it took,
//! on `PeerReset` it rebuilds the initial context from the base.
//!
//! Stage order:
//!
//!   retrieve info -> wait peer -> signify trust -> wait peer trust
//!                 -> claim -> finalize (save device)

use std::sync::Arc;

use vestibule_core::crypto::{generate_handshake_nonce, hash_nonce};
use vestibule_core::{
    DeviceLabel, HumanHandle, InvitationInfo, InvitationToken, LocalDevice, OrganizationId,
    PrivateKey, SasCode, SharedSecretKey,
};

use crate::errors::ClaimInProgressError;
use crate::transport::{ClaimRequest, Confirmation, InvitedTransport};

/// State shared by every claimer stage.
///
/// Kept separate from the per-stage secrets so the service can rebuild a
/// fresh initial context after a peer reset without re-fetching anything.
#[derive(Clone)]
pub(crate) struct ClaimerBase {
    pub(crate) transport: Arc<dyn InvitedTransport>,
    pub(crate) organization_id: OrganizationId,
    pub(crate) token: InvitationToken,
    pub(crate) info: InvitationInfo,
}

// ============================================================================
// Initial stage: key agreement and nonce exchange
// ============================================================================

/// Claimer context before any peer contact.
#[derive(Clone)]
pub struct ClaimerInitialCtx {
    pub(crate) base: ClaimerBase,
}

impl ClaimerInitialCtx {
    pub(crate) fn new(base: ClaimerBase) -> Self {
        Self { base }
    }

    /// What the claimer learned when retrieving the invitation.
    pub fn invitation_info(&self) -> &InvitationInfo {
        &self.base.info
    }

    /// Performs the key agreement with the greeter through the conduit.
    ///
    /// The claimer commits to its nonce (hash first, reveal second) so the
    /// greeter can verify the reveal was not picked after seeing the
    /// greeter's nonce. Both SAS codes are fixed once this returns.
    pub(crate) async fn do_wait_peer(&self) -> Result<ClaimerInProgress1Ctx, ClaimInProgressError> {
        let private_key = PrivateKey::generate();
        let greeter_public_key = self
            .base
            .transport
            .wait_peer(private_key.public_key())
            .await?;
        let shared_secret = private_key.agree(&greeter_public_key);

        let claimer_nonce = generate_handshake_nonce();
        let greeter_nonce = self
            .base
            .transport
            .send_hashed_nonce(hash_nonce(&claimer_nonce))
            .await?;
        self.base.transport.send_nonce(claimer_nonce.clone()).await?;

        let (claimer_sas, greeter_sas) =
            SasCode::generate_pair(&claimer_nonce, &greeter_nonce, &shared_secret);

        Ok(ClaimerInProgress1Ctx {
            base: self.base.clone(),
            shared_secret,
            claimer_sas,
            greeter_sas,
        })
    }
}

// ============================================================================
// Stage 1: verify the greeter's code
// ============================================================================

/// The claimer now holds both codes and must check the greeter's one
/// out-of-band before vouching for the channel.
#[derive(Clone)]
pub struct ClaimerInProgress1Ctx {
    pub(crate) base: ClaimerBase,
    shared_secret: SharedSecretKey,
    claimer_sas: SasCode,
    greeter_sas: SasCode,
}

impl ClaimerInProgress1Ctx {
    /// Code the greeter's screen should be showing.
    pub fn greeter_sas(&self) -> &SasCode {
        &self.greeter_sas
    }

    /// Choice set to display: the true greeter code hidden among decoys.
    pub fn generate_greeter_sas_choices(&self, size: usize) -> Vec<SasCode> {
        SasCode::generate_choices(&self.greeter_sas, size)
    }

    /// Tells the greeter their code checked out on our side.
    pub(crate) async fn do_signify_trust(
        &self,
    ) -> Result<ClaimerInProgress2Ctx, ClaimInProgressError> {
        self.base.transport.signify_trust().await?;
        Ok(ClaimerInProgress2Ctx {
            base: self.base.clone(),
            shared_secret: self.shared_secret.clone(),
            claimer_sas: self.claimer_sas.clone(),
        })
    }
}

// ============================================================================
// Stage 2: wait for the greeter to verify our code
// ============================================================================

/// The claimer's code is on display; we wait for the greeter to confirm it.
#[derive(Clone)]
pub struct ClaimerInProgress2Ctx {
    pub(crate) base: ClaimerBase,
    shared_secret: SharedSecretKey,
    claimer_sas: SasCode,
}

impl ClaimerInProgress2Ctx {
    /// Code to show the human driving this side.
    pub fn claimer_sas(&self) -> &SasCode {
        &self.claimer_sas
    }

    /// Suspends until the greeter signifies trust in our code.
    pub(crate) async fn do_wait_peer_trust(
        &self,
    ) -> Result<ClaimerInProgress3Ctx, ClaimInProgressError> {
        self.base.transport.wait_peer_trust().await?;
        Ok(ClaimerInProgress3Ctx {
            base: self.base.clone(),
            shared_secret: self.shared_secret.clone(),
        })
    }
}

// ============================================================================
// Stage 3: submit the claim and receive the confirmation
// ============================================================================

/// Both humans have vouched for the channel; the claimer can now state who
/// it wants to become.
#[derive(Clone)]
pub struct ClaimerInProgress3Ctx {
    pub(crate) base: ClaimerBase,
    shared_secret: SharedSecretKey,
}

impl ClaimerInProgress3Ctx {
    /// Sends the sealed claim request and decodes the greeter's sealed
    /// confirmation into the new local device.
    ///
    /// `requested_human_handle` is ignored for device invitations, where the
    /// identity is already fixed by the account being extended.
    pub(crate) async fn do_claim(
        &self,
        requested_device_label: Option<DeviceLabel>,
        requested_human_handle: Option<HumanHandle>,
    ) -> Result<ClaimerFinalizeCtx, ClaimInProgressError> {
        let request = match &self.base.info {
            InvitationInfo::User { .. } => ClaimRequest::User {
                requested_device_label,
                requested_human_handle,
            },
            InvitationInfo::Device { .. } => ClaimRequest::Device {
                requested_device_label,
            },
        };
        let plaintext = serde_json::to_vec(&request)
            .map_err(|e| ClaimInProgressError::internal(format!("encode claim request: {e}")))?;
        let sealed = self
            .shared_secret
            .seal(&plaintext)
            .map_err(|e| ClaimInProgressError::internal(format!("seal claim request: {e}")))?;

        let sealed_reply = self.base.transport.communicate(sealed).await?;

        let reply = self
            .shared_secret
            .unseal(&sealed_reply)
            .map_err(|_| ClaimInProgressError::CorruptedConfirmation)?;
        let confirmation: Confirmation =
            serde_json::from_slice(&reply).map_err(|_| ClaimInProgressError::CorruptedConfirmation)?;

        Ok(ClaimerFinalizeCtx {
            device: LocalDevice {
                organization_id: self.base.organization_id.clone(),
                user_id: confirmation.user_id,
                device_id: confirmation.device_id,
                device_label: confirmation.device_label,
                human_handle: confirmation.human_handle,
                profile: confirmation.profile,
            },
        })
    }
}

// ============================================================================
// Finalize: the device exists, persist it
// ============================================================================

/// The enrollment succeeded server-side; all that remains is saving the
/// device locally.
#[derive(Clone)]
pub struct ClaimerFinalizeCtx {
    pub(crate) device: LocalDevice,
}

impl ClaimerFinalizeCtx {
    /// The device the greeter created for us.
    pub fn new_local_device(&self) -> &LocalDevice {
        &self.device
    }
}
