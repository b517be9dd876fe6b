//! Invitation service
//!
//! Facade over the two state machines. Callers address exchanges through
//! opaque handles; every stage operation follows the same shape:
//!
//!   1. take the context out of the handle registry (enforcing stage order
//!      and one-in-flight),
//!   2. bind the caller's canceller and race the stage work against it,
//!   3. settle: on success restore the follow-up context, on a retryable
//!      failure restore the same stage, on `PeerReset` restore a fresh
//!      initial context, on anything else release the handle.
//!
//! Cancellation never rolls anything back; it only stops waiting. Whatever
//! the peer and server already observed stays observed.

use std::sync::Arc;

use tracing::{debug, instrument};

use vestibule_core::sas::SAS_CODE_CANDIDATES;
use vestibule_core::{
    AvailableDevice, DeviceLabel, DeviceSaveStrategy, DeviceStorageEffects, HumanHandle,
    InvitationAddr, InvitationInfo, InvitationStatus, InvitationToken, InvitationType,
    LocalDevice, SasCode, UserProfile,
};

use crate::canceller::{CancellerGuard, CancellerRegistry};
use crate::claimer::{ClaimerBase, ClaimerInitialCtx};
use crate::errors::{
    AbortOperationError, CancelError, ClaimInProgressError, ClaimerRetrieveInfoError,
    GreetInProgressError, StartInvitationGreetError,
};
use crate::events::{EventBus, InviteEvent};
use crate::greeter::{GreeterBase, GreeterInitialCtx};
use crate::handle::{ExchangeContext, Handle, HandleRegistry, TakeError};
use crate::transport::{AuthenticatedTransport, InvitedTransport};

// ============================================================================
// Stage results
// ============================================================================

/// What the claimer learns after the key agreement.
#[derive(Debug, Clone)]
pub struct ClaimInProgress1Info {
    pub handle: Handle,
    /// Code to verify against the greeter's screen
    pub greeter_sas: SasCode,
    /// The true code hidden among decoys, for pick-one user interfaces
    pub greeter_sas_choices: Vec<SasCode>,
}

/// What the claimer holds while waiting for the greeter's verdict.
#[derive(Debug, Clone)]
pub struct ClaimInProgress2Info {
    pub handle: Handle,
    /// Code to show on our screen
    pub claimer_sas: SasCode,
}

/// Both codes verified; the claim itself is next.
#[derive(Clone, Copy)]
pub struct ClaimInProgress3Info {
    pub handle: Handle,
}

/// The enrollment succeeded; the device awaits local persistence.
#[derive(Clone)]
pub struct ClaimFinalizeInfo {
    pub handle: Handle,
    pub new_local_device: LocalDevice,
}

/// What the greeter learns after the key agreement.
#[derive(Debug, Clone)]
pub struct GreetInProgress1Info {
    pub handle: Handle,
    /// Code to show on our screen
    pub greeter_sas: SasCode,
}

/// The claimer vouched for us; their code must be verified next.
#[derive(Clone)]
pub struct GreetInProgress2Info {
    pub handle: Handle,
    /// Code to verify against the claimer's screen
    pub claimer_sas: SasCode,
    /// The true code hidden among decoys, for pick-one user interfaces
    pub claimer_sas_choices: Vec<SasCode>,
}

/// Both codes verified; waiting on the claim request.
#[derive(Clone, Copy)]
pub struct GreetInProgress3Info {
    pub handle: Handle,
}

/// The claim request is in hand; the greeter decides what to grant.
#[derive(Clone)]
pub struct GreetInProgress4Info {
    pub handle: Handle,
    pub requested_device_label: Option<DeviceLabel>,
    /// Absent for device invitations
    pub requested_human_handle: Option<HumanHandle>,
}

// ============================================================================
// Service
// ============================================================================

/// Entry point for everything invitation-related.
///
/// Built empty and extended with collaborators for the roles it will play:
/// an invited transport for claiming, an authenticated transport plus the
/// member's device for greeting and management, device storage for the
/// final save. Operations needing an absent collaborator fail with their
/// `Internal` tag.
pub struct InviteService {
    pub(crate) handles: HandleRegistry,
    pub(crate) cancellers: Arc<CancellerRegistry>,
    pub(crate) events: EventBus,
    pub(crate) invited: Option<(InvitationAddr, Arc<dyn InvitedTransport>)>,
    pub(crate) authenticated: Option<Arc<dyn AuthenticatedTransport>>,
    pub(crate) greeter_device: Option<LocalDevice>,
    pub(crate) storage: Option<Arc<dyn DeviceStorageEffects>>,
}

impl InviteService {
    pub fn new() -> Self {
        Self {
            handles: HandleRegistry::new(),
            cancellers: Arc::new(CancellerRegistry::new()),
            events: EventBus::new(),
            invited: None,
            authenticated: None,
            greeter_device: None,
            storage: None,
        }
    }

    /// Enables the claimer operations against the invitation `addr` points at.
    pub fn with_invited_transport(
        mut self,
        addr: InvitationAddr,
        transport: Arc<dyn InvitedTransport>,
    ) -> Self {
        self.invited = Some((addr, transport));
        self
    }

    /// Enables the greeter and management operations, acting as `device`.
    pub fn with_authenticated_transport(
        mut self,
        device: LocalDevice,
        transport: Arc<dyn AuthenticatedTransport>,
    ) -> Self {
        self.greeter_device = Some(device);
        self.authenticated = Some(transport);
        self
    }

    /// Enables the claimer's final save.
    pub fn with_device_storage(mut self, storage: Arc<dyn DeviceStorageEffects>) -> Self {
        self.storage = Some(storage);
        self
    }

    // ------------------------------------------------------------------------
    // Cancellers and events
    // ------------------------------------------------------------------------

    /// Allocates a canceller to pass into any long-running operation.
    pub fn new_canceller(&self) -> Handle {
        self.cancellers.new_canceller()
    }

    /// Fires a canceller; the bound operation returns its `Cancelled` tag at
    /// its next suspension point.
    pub fn cancel(&self, canceller: Handle) -> Result<(), CancelError> {
        self.cancellers.cancel(canceller)
    }

    /// Subscribes to invitation lifecycle events.
    pub fn subscribe_events(&self) -> tokio::sync::mpsc::Receiver<InviteEvent> {
        self.events.subscribe()
    }

    /// Discards an exchange regardless of its stage.
    ///
    /// Idempotent. If an operation is in flight on the handle, its eventual
    /// checkpoint is dropped; nothing already sent to the peer is undone.
    pub fn abort_operation(&self, handle: Handle) -> Result<(), AbortOperationError> {
        debug!(handle, "aborting invitation exchange");
        self.handles.release(handle);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Claimer operations
    // ------------------------------------------------------------------------

    /// Fetches the invitation's initial information and opens a claimer
    /// exchange, returning its handle.
    #[instrument(skip(self))]
    pub async fn claimer_retrieve_info(
        &self,
    ) -> Result<(Handle, InvitationInfo), ClaimerRetrieveInfoError> {
        let (addr, transport) =
            self.invited
                .as_ref()
                .ok_or_else(|| ClaimerRetrieveInfoError::Internal {
                    message: "no invited transport configured".into(),
                })?;
        let info = transport.invitation_info().await?;
        let handle = self
            .handles
            .register(ExchangeContext::ClaimerInitial(ClaimerInitialCtx::new(
                ClaimerBase {
                    transport: transport.clone(),
                    organization_id: addr.organization_id().clone(),
                    token: addr.token(),
                    info: info.clone(),
                },
            )));
        debug!(handle, "claimer exchange opened");
        Ok((handle, info))
    }

    /// Runs the claimer's key agreement stage.
    #[instrument(skip(self))]
    pub async fn claimer_initial_do_wait_peer(
        &self,
        canceller: Handle,
        handle: Handle,
    ) -> Result<ClaimInProgress1Info, ClaimInProgressError> {
        let ctx = match self.take_context(handle)? {
            ExchangeContext::ClaimerInitial(ctx) => ctx,
            other => return Err(self.wrong_stage(handle, "claimer_initial", other)),
        };
        let guard = self.bind_claimer(
            canceller,
            handle,
            ExchangeContext::ClaimerInitial(ctx.clone()),
        )?;
        let result = tokio::select! {
            _ = guard.cancelled() => Err(ClaimInProgressError::Cancelled),
            res = ctx.do_wait_peer() => res,
        };
        match result {
            Ok(next) => {
                let info = ClaimInProgress1Info {
                    handle,
                    greeter_sas: next.greeter_sas().clone(),
                    greeter_sas_choices: next.generate_greeter_sas_choices(SAS_CODE_CANDIDATES),
                };
                self.advance(ctx.base.token, handle, ExchangeContext::ClaimerInProgress1(next));
                Ok(info)
            }
            Err(err) => {
                self.settle_claimer_failure(
                    handle,
                    ctx.base.clone(),
                    ExchangeContext::ClaimerInitial(ctx),
                    &err,
                );
                Err(err)
            }
        }
    }

    /// Confirms the greeter's code checked out on our side.
    #[instrument(skip(self))]
    pub async fn claimer_in_progress_1_do_signify_trust(
        &self,
        canceller: Handle,
        handle: Handle,
    ) -> Result<ClaimInProgress2Info, ClaimInProgressError> {
        let ctx = match self.take_context(handle)? {
            ExchangeContext::ClaimerInProgress1(ctx) => ctx,
            other => return Err(self.wrong_stage(handle, "claimer_in_progress_1", other)),
        };
        let guard = self.bind_claimer(
            canceller,
            handle,
            ExchangeContext::ClaimerInProgress1(ctx.clone()),
        )?;
        let result = tokio::select! {
            _ = guard.cancelled() => Err(ClaimInProgressError::Cancelled),
            res = ctx.do_signify_trust() => res,
        };
        match result {
            Ok(next) => {
                let info = ClaimInProgress2Info {
                    handle,
                    claimer_sas: next.claimer_sas().clone(),
                };
                self.advance(ctx.base.token, handle, ExchangeContext::ClaimerInProgress2(next));
                Ok(info)
            }
            Err(err) => {
                self.settle_claimer_failure(
                    handle,
                    ctx.base.clone(),
                    ExchangeContext::ClaimerInProgress1(ctx),
                    &err,
                );
                Err(err)
            }
        }
    }

    /// Waits for the greeter to confirm our code.
    #[instrument(skip(self))]
    pub async fn claimer_in_progress_2_do_wait_peer_trust(
        &self,
        canceller: Handle,
        handle: Handle,
    ) -> Result<ClaimInProgress3Info, ClaimInProgressError> {
        let ctx = match self.take_context(handle)? {
            ExchangeContext::ClaimerInProgress2(ctx) => ctx,
            other => return Err(self.wrong_stage(handle, "claimer_in_progress_2", other)),
        };
        let guard = self.bind_claimer(
            canceller,
            handle,
            ExchangeContext::ClaimerInProgress2(ctx.clone()),
        )?;
        let result = tokio::select! {
            _ = guard.cancelled() => Err(ClaimInProgressError::Cancelled),
            res = ctx.do_wait_peer_trust() => res,
        };
        match result {
            Ok(next) => {
                self.advance(ctx.base.token, handle, ExchangeContext::ClaimerInProgress3(next));
                Ok(ClaimInProgress3Info { handle })
            }
            Err(err) => {
                self.settle_claimer_failure(
                    handle,
                    ctx.base.clone(),
                    ExchangeContext::ClaimerInProgress2(ctx),
                    &err,
                );
                Err(err)
            }
        }
    }

    /// Submits the claim and decodes the greeter's confirmation.
    #[instrument(skip(self, requested_device_label, requested_human_handle))]
    pub async fn claimer_in_progress_3_do_claim(
        &self,
        canceller: Handle,
        handle: Handle,
        requested_device_label: Option<DeviceLabel>,
        requested_human_handle: Option<HumanHandle>,
    ) -> Result<ClaimFinalizeInfo, ClaimInProgressError> {
        let ctx = match self.take_context(handle)? {
            ExchangeContext::ClaimerInProgress3(ctx) => ctx,
            other => return Err(self.wrong_stage(handle, "claimer_in_progress_3", other)),
        };
        let guard = self.bind_claimer(
            canceller,
            handle,
            ExchangeContext::ClaimerInProgress3(ctx.clone()),
        )?;
        let result = tokio::select! {
            _ = guard.cancelled() => Err(ClaimInProgressError::Cancelled),
            res = ctx.do_claim(requested_device_label, requested_human_handle) => res,
        };
        match result {
            Ok(next) => {
                let info = ClaimFinalizeInfo {
                    handle,
                    new_local_device: next.new_local_device().clone(),
                };
                self.advance(ctx.base.token, handle, ExchangeContext::ClaimerFinalize(next));
                Ok(info)
            }
            Err(err) => {
                self.settle_claimer_failure(
                    handle,
                    ctx.base.clone(),
                    ExchangeContext::ClaimerInProgress3(ctx),
                    &err,
                );
                Err(err)
            }
        }
    }

    /// Persists the freshly enrolled device and closes the exchange.
    ///
    /// A storage failure keeps the handle alive so the save can be retried
    /// with another strategy; the enrollment itself already happened.
    #[instrument(skip(self, save_strategy))]
    pub async fn claimer_finalize_save_local_device(
        &self,
        handle: Handle,
        save_strategy: DeviceSaveStrategy,
    ) -> Result<AvailableDevice, ClaimInProgressError> {
        let ctx = match self.take_context(handle)? {
            ExchangeContext::ClaimerFinalize(ctx) => ctx,
            other => return Err(self.wrong_stage(handle, "claimer_finalize", other)),
        };
        let storage = match &self.storage {
            Some(storage) => storage.clone(),
            None => {
                self.handles
                    .restore(handle, ExchangeContext::ClaimerFinalize(ctx));
                return Err(ClaimInProgressError::internal(
                    "no device storage configured",
                ));
            }
        };
        match storage
            .save_device(ctx.new_local_device().clone(), &save_strategy)
            .await
        {
            Ok(available) => {
                self.handles.release(handle);
                Ok(available)
            }
            Err(err) => {
                self.handles
                    .restore(handle, ExchangeContext::ClaimerFinalize(ctx));
                Err(ClaimInProgressError::SaveDevice(err))
            }
        }
    }

    // ------------------------------------------------------------------------
    // Greeter operations
    // ------------------------------------------------------------------------

    /// Opens a greeter exchange for a user invitation.
    pub fn start_user_invitation_greet(
        &self,
        token: InvitationToken,
    ) -> Result<Handle, StartInvitationGreetError> {
        self.start_greet(token, InvitationType::User)
    }

    /// Opens a greeter exchange for a device invitation on our own account.
    pub fn start_device_invitation_greet(
        &self,
        token: InvitationToken,
    ) -> Result<Handle, StartInvitationGreetError> {
        self.start_greet(token, InvitationType::Device)
    }

    fn start_greet(
        &self,
        token: InvitationToken,
        invitation_type: InvitationType,
    ) -> Result<Handle, StartInvitationGreetError> {
        let transport =
            self.authenticated
                .as_ref()
                .ok_or_else(|| StartInvitationGreetError::Internal {
                    message: "no authenticated transport configured".into(),
                })?;
        let device = self
            .greeter_device
            .as_ref()
            .ok_or_else(|| StartInvitationGreetError::Internal {
                message: "no greeter device configured".into(),
            })?;
        let handle = self
            .handles
            .register(ExchangeContext::GreeterInitial(GreeterInitialCtx::new(
                GreeterBase {
                    transport: transport.clone(),
                    token,
                    device: device.clone(),
                },
            )));
        debug!(handle, %token, ?invitation_type, "greeter exchange opened");
        Ok(handle)
    }

    /// Runs the greeter's key agreement stage.
    #[instrument(skip(self))]
    pub async fn greeter_initial_do_wait_peer(
        &self,
        canceller: Handle,
        handle: Handle,
    ) -> Result<GreetInProgress1Info, GreetInProgressError> {
        let ctx = match self.take_greeter_context(handle)? {
            ExchangeContext::GreeterInitial(ctx) => ctx,
            other => return Err(self.wrong_greeter_stage(handle, "greeter_initial", other)),
        };
        let guard = self.bind_greeter(
            canceller,
            handle,
            ExchangeContext::GreeterInitial(ctx.clone()),
        )?;
        let result = tokio::select! {
            _ = guard.cancelled() => Err(GreetInProgressError::Cancelled),
            res = ctx.do_wait_peer() => res,
        };
        match result {
            Ok(next) => {
                let info = GreetInProgress1Info {
                    handle,
                    greeter_sas: next.greeter_sas().clone(),
                };
                self.advance(ctx.base.token, handle, ExchangeContext::GreeterInProgress1(next));
                Ok(info)
            }
            Err(err) => {
                self.settle_greeter_failure(
                    handle,
                    ctx.base.clone(),
                    ExchangeContext::GreeterInitial(ctx),
                    &err,
                );
                Err(err)
            }
        }
    }

    /// Waits for the claimer to confirm our code.
    #[instrument(skip(self))]
    pub async fn greeter_in_progress_1_do_wait_peer_trust(
        &self,
        canceller: Handle,
        handle: Handle,
    ) -> Result<GreetInProgress2Info, GreetInProgressError> {
        let ctx = match self.take_greeter_context(handle)? {
            ExchangeContext::GreeterInProgress1(ctx) => ctx,
            other => return Err(self.wrong_greeter_stage(handle, "greeter_in_progress_1", other)),
        };
        let guard = self.bind_greeter(
            canceller,
            handle,
            ExchangeContext::GreeterInProgress1(ctx.clone()),
        )?;
        let result = tokio::select! {
            _ = guard.cancelled() => Err(GreetInProgressError::Cancelled),
            res = ctx.do_wait_peer_trust() => res,
        };
        match result {
            Ok(next) => {
                let info = GreetInProgress2Info {
                    handle,
                    claimer_sas: next.claimer_sas().clone(),
                    claimer_sas_choices: next.generate_claimer_sas_choices(SAS_CODE_CANDIDATES),
                };
                self.advance(ctx.base.token, handle, ExchangeContext::GreeterInProgress2(next));
                Ok(info)
            }
            Err(err) => {
                self.settle_greeter_failure(
                    handle,
                    ctx.base.clone(),
                    ExchangeContext::GreeterInProgress1(ctx),
                    &err,
                );
                Err(err)
            }
        }
    }

    /// Confirms the claimer's code checked out on our side.
    #[instrument(skip(self))]
    pub async fn greeter_in_progress_2_do_signify_trust(
        &self,
        canceller: Handle,
        handle: Handle,
    ) -> Result<GreetInProgress3Info, GreetInProgressError> {
        let ctx = match self.take_greeter_context(handle)? {
            ExchangeContext::GreeterInProgress2(ctx) => ctx,
            other => return Err(self.wrong_greeter_stage(handle, "greeter_in_progress_2", other)),
        };
        let guard = self.bind_greeter(
            canceller,
            handle,
            ExchangeContext::GreeterInProgress2(ctx.clone()),
        )?;
        let result = tokio::select! {
            _ = guard.cancelled() => Err(GreetInProgressError::Cancelled),
            res = ctx.do_signify_trust() => res,
        };
        match result {
            Ok(next) => {
                self.advance(ctx.base.token, handle, ExchangeContext::GreeterInProgress3(next));
                Ok(GreetInProgress3Info { handle })
            }
            Err(err) => {
                self.settle_greeter_failure(
                    handle,
                    ctx.base.clone(),
                    ExchangeContext::GreeterInProgress2(ctx),
                    &err,
                );
                Err(err)
            }
        }
    }

    /// Waits for the claimer's claim request.
    #[instrument(skip(self))]
    pub async fn greeter_in_progress_3_do_get_claim_requests(
        &self,
        canceller: Handle,
        handle: Handle,
    ) -> Result<GreetInProgress4Info, GreetInProgressError> {
        let ctx = match self.take_greeter_context(handle)? {
            ExchangeContext::GreeterInProgress3(ctx) => ctx,
            other => return Err(self.wrong_greeter_stage(handle, "greeter_in_progress_3", other)),
        };
        let guard = self.bind_greeter(
            canceller,
            handle,
            ExchangeContext::GreeterInProgress3(ctx.clone()),
        )?;
        let result = tokio::select! {
            _ = guard.cancelled() => Err(GreetInProgressError::Cancelled),
            res = ctx.do_get_claim_requests() => res,
        };
        match result {
            Ok(next) => {
                let info = GreetInProgress4Info {
                    handle,
                    requested_device_label: next.requested_device_label().cloned(),
                    requested_human_handle: next.requested_human_handle().cloned(),
                };
                self.advance(ctx.base.token, handle, ExchangeContext::GreeterInProgress4(next));
                Ok(info)
            }
            Err(err) => {
                self.settle_greeter_failure(
                    handle,
                    ctx.base.clone(),
                    ExchangeContext::GreeterInProgress3(ctx),
                    &err,
                );
                Err(err)
            }
        }
    }

    /// Creates the new user and closes the exchange.
    #[instrument(skip(self, human_handle, device_label))]
    pub async fn greeter_in_progress_4_do_create_new_user(
        &self,
        canceller: Handle,
        handle: Handle,
        human_handle: Option<HumanHandle>,
        device_label: Option<DeviceLabel>,
        profile: UserProfile,
    ) -> Result<(), GreetInProgressError> {
        let ctx = match self.take_greeter_context(handle)? {
            ExchangeContext::GreeterInProgress4(ctx) => ctx,
            other => return Err(self.wrong_greeter_stage(handle, "greeter_in_progress_4", other)),
        };
        let guard = self.bind_greeter(
            canceller,
            handle,
            ExchangeContext::GreeterInProgress4(ctx.clone()),
        )?;
        let result = tokio::select! {
            _ = guard.cancelled() => Err(GreetInProgressError::Cancelled),
            res = ctx.do_create_new_user(human_handle, device_label, profile) => res,
        };
        match result {
            Ok(()) => {
                let token = ctx.base.token;
                self.handles.release(handle);
                self.events.publish(InviteEvent::InvitationChanged {
                    token,
                    status: InvitationStatus::Deleted,
                });
                Ok(())
            }
            Err(err) => {
                self.settle_greeter_failure(
                    handle,
                    ctx.base.clone(),
                    ExchangeContext::GreeterInProgress4(ctx),
                    &err,
                );
                Err(err)
            }
        }
    }

    /// Creates a new device on our own account and closes the exchange.
    #[instrument(skip(self, device_label))]
    pub async fn greeter_in_progress_4_do_create_new_device(
        &self,
        canceller: Handle,
        handle: Handle,
        device_label: Option<DeviceLabel>,
    ) -> Result<(), GreetInProgressError> {
        let ctx = match self.take_greeter_context(handle)? {
            ExchangeContext::GreeterInProgress4(ctx) => ctx,
            other => return Err(self.wrong_greeter_stage(handle, "greeter_in_progress_4", other)),
        };
        let guard = self.bind_greeter(
            canceller,
            handle,
            ExchangeContext::GreeterInProgress4(ctx.clone()),
        )?;
        let result = tokio::select! {
            _ = guard.cancelled() => Err(GreetInProgressError::Cancelled),
            res = ctx.do_create_new_device(device_label) => res,
        };
        match result {
            Ok(()) => {
                let token = ctx.base.token;
                self.handles.release(handle);
                self.events.publish(InviteEvent::InvitationChanged {
                    token,
                    status: InvitationStatus::Deleted,
                });
                Ok(())
            }
            Err(err) => {
                self.settle_greeter_failure(
                    handle,
                    ctx.base.clone(),
                    ExchangeContext::GreeterInProgress4(ctx),
                    &err,
                );
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Checkpointing
    // ------------------------------------------------------------------------

    fn take_context(&self, handle: Handle) -> Result<ExchangeContext, ClaimInProgressError> {
        self.handles
            .take(handle)
            .map_err(|err| ClaimInProgressError::internal(take_error_message(handle, err)))
    }

    fn take_greeter_context(&self, handle: Handle) -> Result<ExchangeContext, GreetInProgressError> {
        self.handles
            .take(handle)
            .map_err(|err| GreetInProgressError::internal(take_error_message(handle, err)))
    }

    fn wrong_stage(
        &self,
        handle: Handle,
        expected: &str,
        actual: ExchangeContext,
    ) -> ClaimInProgressError {
        let message = format!(
            "handle {handle} is at stage {}, expected {expected}",
            actual.stage()
        );
        self.handles.restore(handle, actual);
        ClaimInProgressError::internal(message)
    }

    fn wrong_greeter_stage(
        &self,
        handle: Handle,
        expected: &str,
        actual: ExchangeContext,
    ) -> GreetInProgressError {
        let message = format!(
            "handle {handle} is at stage {}, expected {expected}",
            actual.stage()
        );
        self.handles.restore(handle, actual);
        GreetInProgressError::internal(message)
    }

    /// Binding fails only when the caller reuses a canceller that is
    /// already driving another operation; the stage context goes back
    /// untouched so the handle stays usable.
    fn bind_claimer(
        &self,
        canceller: Handle,
        handle: Handle,
        same_stage: ExchangeContext,
    ) -> Result<CancellerGuard, ClaimInProgressError> {
        self.cancellers.bind(canceller).map_err(|err| {
            self.handles.restore(handle, same_stage);
            ClaimInProgressError::internal(err.to_string())
        })
    }

    fn bind_greeter(
        &self,
        canceller: Handle,
        handle: Handle,
        same_stage: ExchangeContext,
    ) -> Result<CancellerGuard, GreetInProgressError> {
        self.cancellers.bind(canceller).map_err(|err| {
            self.handles.restore(handle, same_stage);
            GreetInProgressError::internal(err.to_string())
        })
    }

    fn advance(&self, token: InvitationToken, handle: Handle, next: ExchangeContext) {
        let stage = next.stage();
        debug!(handle, stage, "exchange advanced");
        self.handles.restore(handle, next);
        self.events
            .publish(InviteEvent::ExchangeProgress { token, stage });
    }

    /// Decides what the handle points at after a claimer stage failed.
    fn settle_claimer_failure(
        &self,
        handle: Handle,
        base: ClaimerBase,
        same_stage: ExchangeContext,
        err: &ClaimInProgressError,
    ) {
        match err {
            // Retryable without losing progress
            ClaimInProgressError::Cancelled | ClaimInProgressError::Offline => {
                self.handles.restore(handle, same_stage);
            }
            // The peer started over; so must we
            ClaimInProgressError::PeerReset => {
                self.handles.restore(
                    handle,
                    ExchangeContext::ClaimerInitial(ClaimerInitialCtx::new(base)),
                );
            }
            _ => self.handles.release(handle),
        }
    }

    /// Decides what the handle points at after a greeter stage failed.
    fn settle_greeter_failure(
        &self,
        handle: Handle,
        base: GreeterBase,
        same_stage: ExchangeContext,
        err: &GreetInProgressError,
    ) {
        match err {
            // Retryable without losing progress; a bad timestamp only needs
            // the clock fixed, not a new handshake
            GreetInProgressError::Cancelled
            | GreetInProgressError::Offline
            | GreetInProgressError::BadTimestamp(_) => {
                self.handles.restore(handle, same_stage);
            }
            GreetInProgressError::PeerReset => {
                self.handles.restore(
                    handle,
                    ExchangeContext::GreeterInitial(GreeterInitialCtx::new(base)),
                );
            }
            _ => self.handles.release(handle),
        }
    }
}

impl Default for InviteService {
    fn default() -> Self {
        Self::new()
    }
}

fn take_error_message(handle: Handle, err: TakeError) -> String {
    match err {
        TakeError::NotFound => format!("unknown or released handle {handle}"),
        TakeError::Busy => format!("operation already in flight on handle {handle}"),
    }
}
