//! Invitation handshake protocol
//!
//! Enrolls new users and new devices into an organization through a mutually
//! authenticated handshake between a *claimer* (the person joining) and a
//! *greeter* (an existing member vouching for them). Neither side trusts the
//! server with more than message passing: an ephemeral key agreement plus
//! two short authentication codes, compared by the humans out-of-band, pin
//! the channel to the two people actually talking.
//!
//! # Architecture
//!
//! ```text
//!   caller ──handles──> InviteService ──contexts──> claimer / greeter
//!                            │                        state machines
//!                      HandleRegistry                      │
//!                      CancellerRegistry           InvitedTransport /
//!                      EventBus                  AuthenticatedTransport
//! ```
//!
//! [`service::InviteService`] is the only entry point. Callers hold opaque
//! numeric handles into the exchange arena and drive one stage at a time;
//! each stage operation is cancellable through a canceller token and
//! reports failures with its own closed error enum. Transport and device
//! storage are trait collaborators, injected at construction.

#![forbid(unsafe_code)]

pub mod canceller;
pub mod claimer;
pub mod errors;
pub mod events;
pub mod greeter;
pub mod handle;
pub mod management;
pub mod service;
pub mod transport;

pub use errors::{
    AbortOperationError, CancelError, ClaimInProgressError, ClaimerRetrieveInfoError,
    DeleteInvitationError, GreetInProgressError, ListInvitationsError, NewDeviceInvitationError,
    NewUserInvitationError, StartInvitationGreetError,
};
pub use events::InviteEvent;
pub use handle::Handle;
pub use service::{
    ClaimFinalizeInfo, ClaimInProgress1Info, ClaimInProgress2Info, ClaimInProgress3Info,
    GreetInProgress1Info, GreetInProgress2Info, GreetInProgress3Info, GreetInProgress4Info,
    InviteService,
};
pub use transport::{
    AuthenticatedTransport, ClaimRequest, Confirmation, InvitedTransport, NewDevice, NewUser,
    TransportError,
};
