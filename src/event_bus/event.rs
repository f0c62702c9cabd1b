//! The internal envelope carried on the EventBus firehose, wrapping a wire
//! [`OutboundEvent`](crate::protocol::OutboundEvent) with the session it
//! belongs to and a monotonic sequence number for sink-side ordering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::OutboundEvent;
use crate::session::SessionKey;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionEnvelope {
    pub session: SessionKey,
    pub seq: u64,
    pub when: DateTime<Utc>,
    pub event: OutboundEvent,
}

impl SessionEnvelope {
    pub fn new(session: SessionKey, seq: u64, event: OutboundEvent) -> Self {
        Self {
            session,
            seq,
            when: Utc::now(),
            event,
        }
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl std::fmt::Display for SessionEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}#{}] {:?}", self.session, self.seq, self.event)
    }
}
