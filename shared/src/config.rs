//! Session tunables shared by the server and client binaries

use crate::possession::{AnchorId, AttachParams};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const PROTOCOL_VERSION: u32 = 1;

/// How long a follower waits to confirm ownership before applying the policy
pub const VERIFY_TIMEOUT: Duration = Duration::from_secs(3);
/// How long the controller waits for any arbiter response
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Lifetime of an unconfirmed reservation
pub const RESERVATION_TIMEOUT: Duration = Duration::from_secs(5);
/// Silence after which the server drops a client
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);
/// Mirror groups free themselves after this long
pub const MIRROR_OCCUPANCY_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_SLOT_CAPACITY: usize = 4;
pub const MAX_PACKET_SIZE: usize = 2048;

/// What a follower does when ownership could not be verified in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutPolicy {
    /// Refuse to move the object and hand it back for re-arbitration
    #[default]
    Strict,
    /// Follow anyway and log the inconsistency
    DegradedAllow,
}

impl FromStr for TimeoutPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(TimeoutPolicy::Strict),
            "degraded" | "degraded-allow" | "degraded_allow" => Ok(TimeoutPolicy::DegradedAllow),
            other => Err(format!("unknown timeout policy '{}'", other)),
        }
    }
}

impl fmt::Display for TimeoutPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutPolicy::Strict => f.write_str("strict"),
            TimeoutPolicy::DegradedAllow => f.write_str("degraded-allow"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_clients: usize,
    pub max_held_per_actor: usize,
    pub reservation_timeout: Duration,
    pub client_timeout: Duration,
    pub mirror_occupancy_timeout: Duration,
    pub tick_duration: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_clients: 16,
            max_held_per_actor: 1,
            reservation_timeout: RESERVATION_TIMEOUT,
            client_timeout: CLIENT_TIMEOUT,
            mirror_occupancy_timeout: MIRROR_OCCUPANCY_TIMEOUT,
            tick_duration: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub verify_timeout: Duration,
    pub request_timeout: Duration,
    pub timeout_policy: TimeoutPolicy,
    pub slot_capacity: usize,
    pub hand_anchor: AnchorId,
    pub hand_params: AttachParams,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            verify_timeout: VERIFY_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
            timeout_policy: TimeoutPolicy::Strict,
            slot_capacity: DEFAULT_SLOT_CAPACITY,
            hand_anchor: AnchorId::hand(),
            hand_params: AttachParams::default(),
        }
    }
}
