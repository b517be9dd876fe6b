//! Ballpark (clock skew) checking
//!
//! The server rejects greeter-signed material whose timestamp strays too far
//! from its own clock. The tolerance window is asymmetric: a client may run
//! slightly ahead of the server (early offset) or further behind it (late
//! offset). The rejection payload carries everything a UI needs to explain
//! the discrepancy instead of just failing.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// How many seconds ahead of the server a client clock may run.
pub const BALLPARK_CLIENT_EARLY_OFFSET_SECS: i64 = 300;

/// How many seconds behind the server a client clock may run.
pub const BALLPARK_CLIENT_LATE_OFFSET_SECS: i64 = 320;

/// Payload of a `BadTimestamp` rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampOutOfBallpark {
    /// The server's clock when it evaluated the request
    pub server_timestamp: DateTime<Utc>,
    /// The timestamp the client supplied
    pub client_timestamp: DateTime<Utc>,
    /// Early tolerance in effect, seconds
    pub ballpark_client_early_offset: i64,
    /// Late tolerance in effect, seconds
    pub ballpark_client_late_offset: i64,
}

/// Whether `client_timestamp` falls inside the tolerance window around
/// `server_timestamp`.
pub fn is_in_ballpark(client_timestamp: DateTime<Utc>, server_timestamp: DateTime<Utc>) -> bool {
    let early = Duration::seconds(BALLPARK_CLIENT_EARLY_OFFSET_SECS);
    let late = Duration::seconds(BALLPARK_CLIENT_LATE_OFFSET_SECS);
    client_timestamp <= server_timestamp + early && client_timestamp >= server_timestamp - late
}
