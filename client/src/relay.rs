//! Client half of the mirror relay
//!
//! One relay request may be in flight at a time. The server answers the
//! requester with an `Ack` naming the new possessable and tells everyone
//! about the copy with a `DuplicateBroadcast`; the two can arrive in either
//! order.

use log::{debug, info, warn};
use shared::{DenyReason, PossessableId, RequestId};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const RECENT_DUPLICATES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    AwaitingGrant {
        request_id: RequestId,
        source: PossessableId,
        deadline: Instant,
    },
    Broadcasting {
        request_id: RequestId,
        new_id: PossessableId,
        deadline: Instant,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEvent {
    Delivered {
        request_id: RequestId,
        new_id: PossessableId,
    },
    Failed {
        request_id: RequestId,
        reason: DenyReason,
    },
    TimedOut {
        request_id: RequestId,
    },
}

pub struct RelayTracker {
    state: RelayState,
    timeout: Duration,
    /// Copies announced before our ack named them
    seen: VecDeque<PossessableId>,
    events: Vec<RelayEvent>,
}

impl RelayTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: RelayState::Idle,
            timeout,
            seen: VecDeque::with_capacity(RECENT_DUPLICATES),
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == RelayState::Idle
    }

    /// Request id of the relay in flight, if any
    pub fn request_id(&self) -> Option<RequestId> {
        match self.state {
            RelayState::Idle => None,
            RelayState::AwaitingGrant { request_id, .. }
            | RelayState::Broadcasting { request_id, .. } => Some(request_id),
        }
    }

    /// Starts tracking a relay request; returns false while another is in flight
    pub fn begin(&mut self, request_id: RequestId, source: PossessableId, now: Instant) -> bool {
        if !self.is_idle() {
            debug!("Relay already in flight, ignoring request {}", request_id);
            return false;
        }
        self.state = RelayState::AwaitingGrant {
            request_id,
            source,
            deadline: now + self.timeout,
        };
        true
    }

    /// Requester-only acknowledgement naming the spawned copy
    pub fn on_ack(&mut self, request_id: RequestId, new_id: PossessableId) -> bool {
        let RelayState::AwaitingGrant { request_id: expected, deadline, .. } = self.state else {
            return false;
        };
        if expected != request_id {
            return false;
        }

        if self.seen.contains(&new_id) {
            self.deliver(request_id, new_id);
        } else {
            self.state = RelayState::Broadcasting {
                request_id,
                new_id,
                deadline,
            };
        }
        true
    }

    /// Everyone hears about every copy; only ours completes the relay
    pub fn on_duplicate(&mut self, new_id: PossessableId) {
        match self.state {
            RelayState::Broadcasting {
                request_id,
                new_id: expected,
                ..
            } if expected == new_id => self.deliver(request_id, new_id),
            _ => {
                if self.seen.len() == RECENT_DUPLICATES {
                    self.seen.pop_front();
                }
                self.seen.push_back(new_id);
            }
        }
    }

    pub fn on_denied(&mut self, request_id: RequestId, reason: DenyReason) -> bool {
        if self.request_id() != Some(request_id) {
            return false;
        }
        warn!("Mirror relay {} refused: {:?}", request_id, reason);
        self.state = RelayState::Idle;
        self.events.push(RelayEvent::Failed { request_id, reason });
        true
    }

    pub fn tick(&mut self, now: Instant) {
        let (request_id, deadline) = match self.state {
            RelayState::Idle => return,
            RelayState::AwaitingGrant {
                request_id,
                deadline,
                ..
            }
            | RelayState::Broadcasting {
                request_id,
                deadline,
                ..
            } => (request_id, deadline),
        };
        if now >= deadline {
            warn!("Mirror relay {} timed out", request_id);
            self.state = RelayState::Idle;
            self.events.push(RelayEvent::TimedOut { request_id });
        }
    }

    pub fn drain_events(&mut self) -> Vec<RelayEvent> {
        std::mem::take(&mut self.events)
    }

    fn deliver(&mut self, request_id: RequestId, new_id: PossessableId) {
        info!("Mirror relay {} delivered as {}", request_id, new_id);
        self.seen.retain(|seen| *seen != new_id);
        self.state = RelayState::Idle;
        self.events.push(RelayEvent::Delivered { request_id, new_id });
    }
}
