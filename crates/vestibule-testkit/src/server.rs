//! In-memory invitation server
//!
//! Stands in for the real backend in tests: one [`MemoryServer`] holds the
//! invitation and member tables plus one rendezvous conduit per token, and
//! hands out [`InvitedTransport`] / [`AuthenticatedTransport`] connections
//! backed by it. Both halves of a handshake run as ordinary tokio tasks
//! against the same server and meet in the conduit's watch cells.
//!
//! Failure injection knobs (`set_offline`, `set_clock_skew`,
//! `set_active_users_limit`, `reset_exchange`) cover the error paths a real
//! server would produce; the tamper knobs flip bytes on relayed handshake
//! material to exercise the integrity checks (`NonceMismatch` and the
//! `Corrupted*` outcomes).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;

use vestibule_core::time::is_in_ballpark;
use vestibule_core::{
    DeviceId, DeviceLabel, HumanHandle, InvitationEmailSentStatus, InvitationInfo,
    InvitationStatus, InvitationToken, InvitationType, InviteListItem, LocalDevice,
    OrganizationId, PublicKey, TimestampOutOfBallpark, UserId, UserProfile,
    BALLPARK_CLIENT_EARLY_OFFSET_SECS, BALLPARK_CLIENT_LATE_OFFSET_SECS,
};
use vestibule_invite::transport::{
    AuthenticatedTransport, InvitedTransport, NewDevice, NewUser, TransportError,
};

// ============================================================================
// Rendezvous conduit
// ============================================================================

/// Single-value rendezvous cell. Writers replace, readers wait until a value
/// is present.
struct Cell<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T: Clone> Cell<T> {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    fn put(&self, value: T) {
        self.tx.send_replace(Some(value));
    }

    fn is_set(&self) -> bool {
        self.tx.borrow().is_some()
    }

    fn clear(&self) {
        self.tx.send_replace(None);
    }

    /// Waits for a value, aborting with `PeerReset` if the conduit's epoch
    /// advances first.
    async fn wait(&self, epoch: &watch::Sender<u64>) -> Result<T, TransportError> {
        let mut rx = self.tx.subscribe();
        let mut epoch_rx = epoch.subscribe();
        epoch_rx.borrow_and_update();
        tokio::select! {
            _ = epoch_rx.changed() => Err(TransportError::PeerReset),
            found = rx.wait_for(|v| v.is_some()) => match found {
                Ok(value) => value.clone().ok_or_else(|| TransportError::Internal {
                    message: "rendezvous cell emptied mid-wait".into(),
                }),
                Err(_) => Err(TransportError::Internal {
                    message: "conduit dropped while waiting".into(),
                }),
            },
        }
    }
}

/// Per-invitation meeting point for the two halves of a handshake.
struct Conduit {
    epoch: watch::Sender<u64>,
    claimer_key: Cell<PublicKey>,
    greeter_key: Cell<PublicKey>,
    hashed_nonce: Cell<[u8; 32]>,
    greeter_nonce: Cell<Vec<u8>>,
    claimer_nonce: Cell<Vec<u8>>,
    claimer_trust: Cell<()>,
    greeter_trust: Cell<()>,
    claim_payload: Cell<Vec<u8>>,
    confirm_payload: Cell<Vec<u8>>,
}

impl Conduit {
    fn new() -> Self {
        let (epoch, _rx) = watch::channel(0);
        Self {
            epoch,
            claimer_key: Cell::new(),
            greeter_key: Cell::new(),
            hashed_nonce: Cell::new(),
            greeter_nonce: Cell::new(),
            claimer_nonce: Cell::new(),
            claimer_trust: Cell::new(),
            greeter_trust: Cell::new(),
            claim_payload: Cell::new(),
            confirm_payload: Cell::new(),
        }
    }

    /// Wipes all exchanged material and kicks every current waiter out with
    /// `PeerReset`.
    fn reset(&self) {
        self.claimer_key.clear();
        self.greeter_key.clear();
        self.hashed_nonce.clear();
        self.greeter_nonce.clear();
        self.claimer_nonce.clear();
        self.claimer_trust.clear();
        self.greeter_trust.clear();
        self.claim_payload.clear();
        self.confirm_payload.clear();
        self.epoch.send_modify(|e| *e += 1);
    }
}

// ============================================================================
// Server state
// ============================================================================

struct InvitationRecord {
    invitation_type: InvitationType,
    claimer_email: Option<String>,
    greeter: UserId,
    created_on: DateTime<Utc>,
    status: InvitationStatus,
    // Deleted because it was claimed, as opposed to cancelled by an admin
    used: bool,
}

struct UserRecord {
    user_id: UserId,
    human_handle: Option<HumanHandle>,
    profile: UserProfile,
}

struct DeviceRecord {
    user_id: UserId,
    device_id: DeviceId,
    device_label: Option<DeviceLabel>,
}

#[derive(Default)]
struct ServerState {
    invitations: HashMap<InvitationToken, InvitationRecord>,
    users: Vec<UserRecord>,
    devices: Vec<DeviceRecord>,
    active_users_limit: Option<usize>,
}

/// One-shot flags flipping bytes on relayed handshake material.
#[derive(Default)]
struct TamperFlags {
    claimer_nonce: AtomicBool,
    claim_payload: AtomicBool,
    confirm_payload: AtomicBool,
}

/// The in-memory backend itself. Cheap to create, one per test.
pub struct MemoryServer {
    organization_id: OrganizationId,
    state: Mutex<ServerState>,
    conduits: Mutex<HashMap<InvitationToken, Arc<Conduit>>>,
    offline: AtomicBool,
    // Artificial skew added to the server clock when validating greeter
    // timestamps
    clock_skew: Mutex<Duration>,
    tamper: TamperFlags,
}

impl MemoryServer {
    pub fn new(organization_id: OrganizationId) -> Arc<Self> {
        Arc::new(Self {
            organization_id,
            state: Mutex::new(ServerState::default()),
            conduits: Mutex::new(HashMap::new()),
            offline: AtomicBool::new(false),
            clock_skew: Mutex::new(Duration::zero()),
            tamper: TamperFlags::default(),
        })
    }

    pub fn organization_id(&self) -> &OrganizationId {
        &self.organization_id
    }

    /// Registers an existing member and returns the local device a service
    /// acting as that member would hold.
    pub fn add_user(
        self: &Arc<Self>,
        human_handle: Option<HumanHandle>,
        profile: UserProfile,
        device_label: Option<DeviceLabel>,
    ) -> LocalDevice {
        let user_id = UserId::new();
        let device_id = DeviceId::new();
        let mut state = self.lock_state();
        state.users.push(UserRecord {
            user_id,
            human_handle: human_handle.clone(),
            profile,
        });
        state.devices.push(DeviceRecord {
            user_id,
            device_id,
            device_label: device_label.clone(),
        });
        LocalDevice {
            organization_id: self.organization_id.clone(),
            user_id,
            device_id,
            device_label,
            human_handle,
            profile,
        }
    }

    /// Claimer-side connection scoped to `token`.
    pub fn invited(self: &Arc<Self>, token: InvitationToken) -> Arc<dyn InvitedTransport> {
        Arc::new(InvitedConn {
            server: self.clone(),
            token,
        })
    }

    /// Greeter-side connection acting as the member behind `device`.
    pub fn authenticated(self: &Arc<Self>, device: &LocalDevice) -> Arc<dyn AuthenticatedTransport> {
        Arc::new(AuthenticatedConn {
            server: self.clone(),
            user_id: device.user_id,
        })
    }

    // ------------------------------------------------------------------------
    // Failure injection
    // ------------------------------------------------------------------------

    /// While offline, every transport call fails with `Offline`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Shifts the server clock used to validate greeter timestamps.
    pub fn set_clock_skew(&self, skew: Duration) {
        *self.lock_skew() = skew;
    }

    /// Caps how many users the organization may hold.
    pub fn set_active_users_limit(&self, limit: Option<usize>) {
        self.lock_state().active_users_limit = limit;
    }

    /// Flips a byte in the claimer nonce relayed to the greeter, breaking
    /// the commitment check: the greeter's next `wait_peer` fails with
    /// `NonceMismatch`. One-shot.
    pub fn tamper_next_claimer_nonce(&self) {
        self.tamper.claimer_nonce.store(true, Ordering::SeqCst);
    }

    /// Flips a byte in the next sealed claim request relayed to the greeter,
    /// so its unseal fails (`CorruptedClaimRequest`). One-shot.
    pub fn tamper_next_claim_payload(&self) {
        self.tamper.claim_payload.store(true, Ordering::SeqCst);
    }

    /// Flips a byte in the next sealed confirmation relayed to the claimer,
    /// so its unseal fails (`CorruptedConfirmation`). One-shot.
    pub fn tamper_next_confirmation(&self) {
        self.tamper.confirm_payload.store(true, Ordering::SeqCst);
    }

    /// Simulates one side restarting its half of the exchange: all waiters
    /// on the conduit observe `PeerReset` and exchanged material is wiped.
    pub fn reset_exchange(&self, token: InvitationToken) {
        if let Some(conduit) = self.lock_conduits().get(&token) {
            conduit.reset();
        }
    }

    /// Whether either side has posted its key on the conduit yet. Lets
    /// tests wait for a handshake to actually be in flight before injecting
    /// a reset or a cancel.
    pub fn exchange_started(&self, token: InvitationToken) -> bool {
        self.lock_conduits()
            .get(&token)
            .map(|c| c.claimer_key.is_set() || c.greeter_key.is_set())
            .unwrap_or(false)
    }

    /// Number of users currently enrolled.
    pub fn user_count(&self) -> usize {
        self.lock_state().users.len()
    }

    /// Looks up an enrolled user by email, for test assertions.
    pub fn find_user_by_email(&self, email: &str) -> Option<(UserId, UserProfile)> {
        self.lock_state()
            .users
            .iter()
            .find(|u| u.human_handle.as_ref().is_some_and(|h| h.email() == email))
            .map(|u| (u.user_id, u.profile))
    }

    /// Number of devices enrolled for `user_id`.
    pub fn device_count_for(&self, user_id: UserId) -> usize {
        self.lock_state()
            .devices
            .iter()
            .filter(|d| d.user_id == user_id)
            .count()
    }

    /// Label of a specific enrolled device, for test assertions.
    pub fn device_label_of(&self, device_id: DeviceId) -> Option<DeviceLabel> {
        self.lock_state()
            .devices
            .iter()
            .find(|d| d.device_id == device_id)
            .and_then(|d| d.device_label.clone())
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn conduit(&self, token: InvitationToken) -> Arc<Conduit> {
        self.lock_conduits()
            .entry(token)
            .or_insert_with(|| Arc::new(Conduit::new()))
            .clone()
    }

    fn check_online(&self) -> Result<(), TransportError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(TransportError::Offline)
        } else {
            Ok(())
        }
    }

    /// Validates that the invitation exists and is still claimable.
    fn check_invitation(&self, token: InvitationToken) -> Result<(), TransportError> {
        let state = self.lock_state();
        match state.invitations.get(&token) {
            None => Err(TransportError::InvitationNotFound),
            Some(record) if record.used => Err(TransportError::InvitationAlreadyUsed),
            Some(record) if record.status == InvitationStatus::Deleted => {
                Err(TransportError::InvitationAlreadyDeleted)
            }
            Some(_) => Ok(()),
        }
    }

    fn server_now(&self) -> DateTime<Utc> {
        Utc::now() + *self.lock_skew()
    }

    fn check_ballpark(&self, client_timestamp: DateTime<Utc>) -> Result<(), TransportError> {
        let server_timestamp = self.server_now();
        if is_in_ballpark(client_timestamp, server_timestamp) {
            Ok(())
        } else {
            Err(TransportError::BadTimestamp(TimestampOutOfBallpark {
                server_timestamp,
                client_timestamp,
                ballpark_client_early_offset: BALLPARK_CLIENT_EARLY_OFFSET_SECS,
                ballpark_client_late_offset: BALLPARK_CLIENT_LATE_OFFSET_SECS,
            }))
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ServerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_conduits(&self) -> MutexGuard<'_, HashMap<InvitationToken, Arc<Conduit>>> {
        match self.conduits.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_skew(&self) -> MutexGuard<'_, Duration> {
        match self.clock_skew.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// ============================================================================
// Claimer-side connection
// ============================================================================

struct InvitedConn {
    server: Arc<MemoryServer>,
    token: InvitationToken,
}

#[async_trait]
impl InvitedTransport for InvitedConn {
    async fn invitation_info(&self) -> Result<InvitationInfo, TransportError> {
        self.server.check_online()?;
        self.server.check_invitation(self.token)?;
        let state = self.server.lock_state();
        let record = state
            .invitations
            .get(&self.token)
            .ok_or(TransportError::InvitationNotFound)?;
        let greeter = state
            .users
            .iter()
            .find(|u| u.user_id == record.greeter)
            .ok_or_else(|| TransportError::Internal {
                message: "invitation references an unknown greeter".into(),
            })?;
        Ok(match record.invitation_type {
            InvitationType::User => InvitationInfo::User {
                claimer_email: record.claimer_email.clone().unwrap_or_default(),
                greeter_user_id: greeter.user_id,
                greeter_human_handle: greeter.human_handle.clone(),
            },
            InvitationType::Device => InvitationInfo::Device {
                greeter_user_id: greeter.user_id,
                greeter_human_handle: greeter.human_handle.clone(),
            },
        })
    }

    async fn wait_peer(&self, claimer_public_key: PublicKey) -> Result<PublicKey, TransportError> {
        self.server.check_online()?;
        self.server.check_invitation(self.token)?;
        // The claimer showing up moves the invitation from idle to ready
        {
            let mut state = self.server.lock_state();
            if let Some(record) = state.invitations.get_mut(&self.token) {
                if record.status == InvitationStatus::Idle {
                    record.status = InvitationStatus::Ready;
                }
            }
        }
        let conduit = self.server.conduit(self.token);
        conduit.claimer_key.put(claimer_public_key);
        conduit.greeter_key.wait(&conduit.epoch).await
    }

    async fn send_hashed_nonce(&self, hashed_nonce: [u8; 32]) -> Result<Vec<u8>, TransportError> {
        self.server.check_online()?;
        self.server.check_invitation(self.token)?;
        let conduit = self.server.conduit(self.token);
        conduit.hashed_nonce.put(hashed_nonce);
        conduit.greeter_nonce.wait(&conduit.epoch).await
    }

    async fn send_nonce(&self, claimer_nonce: Vec<u8>) -> Result<(), TransportError> {
        self.server.check_online()?;
        self.server.check_invitation(self.token)?;
        let conduit = self.server.conduit(self.token);
        conduit.claimer_nonce.put(claimer_nonce);
        Ok(())
    }

    async fn signify_trust(&self) -> Result<(), TransportError> {
        self.server.check_online()?;
        self.server.check_invitation(self.token)?;
        let conduit = self.server.conduit(self.token);
        conduit.claimer_trust.put(());
        Ok(())
    }

    async fn wait_peer_trust(&self) -> Result<(), TransportError> {
        self.server.check_online()?;
        self.server.check_invitation(self.token)?;
        let conduit = self.server.conduit(self.token);
        conduit.greeter_trust.wait(&conduit.epoch).await
    }

    async fn communicate(&self, sealed_payload: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        self.server.check_online()?;
        self.server.check_invitation(self.token)?;
        let conduit = self.server.conduit(self.token);
        conduit.claim_payload.put(sealed_payload);
        let confirmation = conduit.confirm_payload.wait(&conduit.epoch).await?;
        if self.server.tamper.confirm_payload.swap(false, Ordering::SeqCst) {
            return Ok(flip_first_byte(confirmation));
        }
        Ok(confirmation)
    }
}

// ============================================================================
// Greeter-side connection
// ============================================================================

struct AuthenticatedConn {
    server: Arc<MemoryServer>,
    user_id: UserId,
}

impl AuthenticatedConn {
    fn profile(&self) -> Result<UserProfile, TransportError> {
        self.server
            .lock_state()
            .users
            .iter()
            .find(|u| u.user_id == self.user_id)
            .map(|u| u.profile)
            .ok_or_else(|| TransportError::Internal {
                message: "authenticated connection for an unknown member".into(),
            })
    }
}

#[async_trait]
impl AuthenticatedTransport for AuthenticatedConn {
    async fn list_invitations(&self) -> Result<Vec<InviteListItem>, TransportError> {
        self.server.check_online()?;
        let state = self.server.lock_state();
        let mut items: Vec<_> = state
            .invitations
            .iter()
            .filter(|(_, record)| record.status != InvitationStatus::Deleted)
            .map(|(token, record)| match record.invitation_type {
                InvitationType::User => InviteListItem::User {
                    token: *token,
                    created_on: record.created_on,
                    claimer_email: record.claimer_email.clone().unwrap_or_default(),
                    status: record.status,
                },
                InvitationType::Device => InviteListItem::Device {
                    token: *token,
                    created_on: record.created_on,
                    status: record.status,
                },
            })
            .collect();
        items.sort_by_key(|item| match item {
            InviteListItem::User { created_on, .. }
            | InviteListItem::Device { created_on, .. } => *created_on,
        });
        Ok(items)
    }

    async fn new_user_invitation(
        &self,
        claimer_email: String,
        send_email: bool,
    ) -> Result<(InvitationToken, InvitationEmailSentStatus), TransportError> {
        self.server.check_online()?;
        if self.profile()? != UserProfile::Admin {
            return Err(TransportError::NotAllowed {
                message: "only admins may invite users".into(),
            });
        }
        let mut state = self.server.lock_state();
        if state.users.iter().any(|u| {
            u.human_handle
                .as_ref()
                .is_some_and(|h| h.email() == claimer_email)
        }) {
            return Err(TransportError::AlreadyMember);
        }
        // Creating twice for the same email returns the outstanding
        // invitation instead of minting another token
        if let Some((token, _)) = state.invitations.iter().find(|(_, record)| {
            record.invitation_type == InvitationType::User
                && record.status != InvitationStatus::Deleted
                && record.claimer_email.as_deref() == Some(claimer_email.as_str())
        }) {
            let token = *token;
            return Ok((token, email_status(send_email)));
        }
        let token = InvitationToken::new();
        state.invitations.insert(
            token,
            InvitationRecord {
                invitation_type: InvitationType::User,
                claimer_email: Some(claimer_email),
                greeter: self.user_id,
                created_on: Utc::now(),
                status: InvitationStatus::Idle,
                used: false,
            },
        );
        Ok((token, email_status(send_email)))
    }

    async fn new_device_invitation(
        &self,
        send_email: bool,
    ) -> Result<(InvitationToken, InvitationEmailSentStatus), TransportError> {
        self.server.check_online()?;
        let mut state = self.server.lock_state();
        let greeter = state
            .users
            .iter()
            .find(|u| u.user_id == self.user_id)
            .ok_or_else(|| TransportError::Internal {
                message: "authenticated connection for an unknown member".into(),
            })?;
        if send_email && greeter.human_handle.is_none() {
            return Err(TransportError::SendEmailToUserWithoutEmail);
        }
        let token = InvitationToken::new();
        state.invitations.insert(
            token,
            InvitationRecord {
                invitation_type: InvitationType::Device,
                claimer_email: None,
                greeter: self.user_id,
                created_on: Utc::now(),
                status: InvitationStatus::Idle,
                used: false,
            },
        );
        Ok((token, email_status(send_email)))
    }

    async fn delete_invitation(&self, token: InvitationToken) -> Result<(), TransportError> {
        self.server.check_online()?;
        let mut state = self.server.lock_state();
        let record = state
            .invitations
            .get_mut(&token)
            .ok_or(TransportError::InvitationNotFound)?;
        if record.status == InvitationStatus::Deleted {
            return Err(TransportError::InvitationAlreadyDeleted);
        }
        record.status = InvitationStatus::Deleted;
        Ok(())
    }

    async fn wait_peer(
        &self,
        token: InvitationToken,
        greeter_public_key: PublicKey,
    ) -> Result<PublicKey, TransportError> {
        self.server.check_online()?;
        self.server.check_invitation(token)?;
        let conduit = self.server.conduit(token);
        conduit.greeter_key.put(greeter_public_key);
        conduit.claimer_key.wait(&conduit.epoch).await
    }

    async fn get_hashed_nonce(&self, token: InvitationToken) -> Result<[u8; 32], TransportError> {
        self.server.check_online()?;
        self.server.check_invitation(token)?;
        let conduit = self.server.conduit(token);
        conduit.hashed_nonce.wait(&conduit.epoch).await
    }

    async fn send_nonce(
        &self,
        token: InvitationToken,
        greeter_nonce: Vec<u8>,
    ) -> Result<Vec<u8>, TransportError> {
        self.server.check_online()?;
        self.server.check_invitation(token)?;
        let conduit = self.server.conduit(token);
        conduit.greeter_nonce.put(greeter_nonce);
        let claimer_nonce = conduit.claimer_nonce.wait(&conduit.epoch).await?;
        if self.server.tamper.claimer_nonce.swap(false, Ordering::SeqCst) {
            return Ok(flip_first_byte(claimer_nonce));
        }
        Ok(claimer_nonce)
    }

    async fn wait_peer_trust(&self, token: InvitationToken) -> Result<(), TransportError> {
        self.server.check_online()?;
        self.server.check_invitation(token)?;
        let conduit = self.server.conduit(token);
        conduit.claimer_trust.wait(&conduit.epoch).await
    }

    async fn signify_trust(&self, token: InvitationToken) -> Result<(), TransportError> {
        self.server.check_online()?;
        self.server.check_invitation(token)?;
        let conduit = self.server.conduit(token);
        conduit.greeter_trust.put(());
        Ok(())
    }

    async fn get_claim_request(&self, token: InvitationToken) -> Result<Vec<u8>, TransportError> {
        self.server.check_online()?;
        self.server.check_invitation(token)?;
        let conduit = self.server.conduit(token);
        let request = conduit.claim_payload.wait(&conduit.epoch).await?;
        if self.server.tamper.claim_payload.swap(false, Ordering::SeqCst) {
            return Ok(flip_first_byte(request));
        }
        Ok(request)
    }

    async fn send_confirmation(
        &self,
        token: InvitationToken,
        sealed_payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        self.server.check_online()?;
        self.server.check_invitation(token)?;
        let conduit = self.server.conduit(token);
        conduit.confirm_payload.put(sealed_payload);
        Ok(())
    }

    async fn create_user(
        &self,
        token: InvitationToken,
        new_user: NewUser,
    ) -> Result<(), TransportError> {
        self.server.check_online()?;
        if self.profile()? != UserProfile::Admin {
            return Err(TransportError::NotAllowed {
                message: "only admins may create users".into(),
            });
        }
        self.server.check_ballpark(new_user.timestamp)?;
        let mut state = self.server.lock_state();
        // All checks and the claim happen under one lock: a concurrent
        // second creation sees the invitation as used
        let record = state
            .invitations
            .get_mut(&token)
            .ok_or(TransportError::InvitationNotFound)?;
        if record.used {
            return Err(TransportError::InvitationAlreadyUsed);
        }
        if record.status == InvitationStatus::Deleted {
            return Err(TransportError::InvitationAlreadyDeleted);
        }
        if let Some(limit) = state.active_users_limit {
            if state.users.len() >= limit {
                return Err(TransportError::ActiveUsersLimitReached);
            }
        }
        if state.users.iter().any(|u| {
            u.user_id == new_user.user_id
                || (u.human_handle.is_some() && u.human_handle == new_user.human_handle)
        }) {
            return Err(TransportError::UserAlreadyExists);
        }
        let record = state
            .invitations
            .get_mut(&token)
            .ok_or(TransportError::InvitationNotFound)?;
        record.used = true;
        record.status = InvitationStatus::Deleted;
        state.users.push(UserRecord {
            user_id: new_user.user_id,
            human_handle: new_user.human_handle,
            profile: new_user.profile,
        });
        state.devices.push(DeviceRecord {
            user_id: new_user.user_id,
            device_id: new_user.device_id,
            device_label: new_user.device_label,
        });
        Ok(())
    }

    async fn create_device(
        &self,
        token: InvitationToken,
        new_device: NewDevice,
    ) -> Result<(), TransportError> {
        self.server.check_online()?;
        self.server.check_ballpark(new_device.timestamp)?;
        let mut state = self.server.lock_state();
        let record = state
            .invitations
            .get_mut(&token)
            .ok_or(TransportError::InvitationNotFound)?;
        if record.used {
            return Err(TransportError::InvitationAlreadyUsed);
        }
        if record.status == InvitationStatus::Deleted {
            return Err(TransportError::InvitationAlreadyDeleted);
        }
        if state
            .devices
            .iter()
            .any(|d| d.device_id == new_device.device_id)
        {
            return Err(TransportError::DeviceAlreadyExists);
        }
        let record = state
            .invitations
            .get_mut(&token)
            .ok_or(TransportError::InvitationNotFound)?;
        record.used = true;
        record.status = InvitationStatus::Deleted;
        let owner = record.greeter;
        state.devices.push(DeviceRecord {
            user_id: owner,
            device_id: new_device.device_id,
            device_label: new_device.device_label,
        });
        Ok(())
    }
}

fn flip_first_byte(mut bytes: Vec<u8>) -> Vec<u8> {
    if let Some(byte) = bytes.first_mut() {
        *byte ^= 0x01;
    }
    bytes
}

fn email_status(send_email: bool) -> InvitationEmailSentStatus {
    if send_email {
        InvitationEmailSentStatus::Success
    } else {
        InvitationEmailSentStatus::NotAvailable
    }
}
