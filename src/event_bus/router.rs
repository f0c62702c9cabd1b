//! Session-addressed delivery with the overflow policy required by §4.1:
//! when no subscriber has attached yet, events queue in a bounded backlog;
//! once the backlog is full, the oldest droppable (non-protected) event is
//! evicted to make room. `markdown`, `form_request`, and the
//! `_workflow_finish` sentinel are never evicted — the backlog grows past
//! capacity rather than lose one of them.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::protocol::OutboundEvent;
use crate::session::SessionKey;

pub const DEFAULT_SESSION_BACKLOG: usize = 256;

struct SessionChannel {
    backlog: VecDeque<OutboundEvent>,
    subscribers: Vec<flume::Sender<OutboundEvent>>,
}

impl SessionChannel {
    fn new() -> Self {
        Self {
            backlog: VecDeque::new(),
            subscribers: Vec::new(),
        }
    }
}

/// Per-`(tenant_id, session_id)` pub/sub with bounded, priority-aware
/// buffering (§4.1). Multiple subscribers per session are allowed; each
/// gets an independent cursor starting from the live backlog at the time
/// it subscribed.
pub struct SessionRouter {
    capacity: usize,
    channels: Mutex<FxHashMap<SessionKey, SessionChannel>>,
}

impl SessionRouter {
    pub fn new(capacity: usize) -> Arc<Self> {
        let capacity = if capacity == 0 {
            DEFAULT_SESSION_BACKLOG
        } else {
            capacity
        };
        Arc::new(Self {
            capacity,
            channels: Mutex::new(FxHashMap::default()),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Deliver `event` for `session`. Live subscribers receive it
    /// immediately; if none exist yet it joins the bounded backlog.
    pub fn publish(&self, session: &SessionKey, event: OutboundEvent) {
        let mut channels = self.channels.lock();
        let channel = channels
            .entry(session.clone())
            .or_insert_with(SessionChannel::new);

        channel
            .subscribers
            .retain(|tx| !tx.is_disconnected());

        if channel.subscribers.is_empty() {
            Self::push_backlog(channel, event, self.capacity, session);
            return;
        }

        for tx in &channel.subscribers {
            // Subscribers are fed from an unbounded channel once attached;
            // the bounded/priority-drop policy only governs the pre-attach
            // backlog (§4.1: "if no subscriber exists, events are buffered").
            let _ = tx.send(event.clone());
        }
    }

    fn push_backlog(
        channel: &mut SessionChannel,
        event: OutboundEvent,
        capacity: usize,
        session: &SessionKey,
    ) {
        if channel.backlog.len() >= capacity {
            let evicted = channel
                .backlog
                .iter()
                .position(|e| !e.is_protected())
                .map(|idx| channel.backlog.remove(idx));
            match evicted {
                Some(_) => {
                    warn!(%session, "session backlog full; dropped oldest progress event");
                }
                None => {
                    warn!(
                        %session,
                        "session backlog full of protected events; growing past capacity"
                    );
                }
            }
        }
        channel.backlog.push_back(event);
    }

    /// Subscribe to a session. The returned stream first drains whatever is
    /// in the backlog (oldest first), then receives events live.
    pub fn subscribe(&self, session: &SessionKey) -> flume::Receiver<OutboundEvent> {
        let mut channels = self.channels.lock();
        let channel = channels
            .entry(session.clone())
            .or_insert_with(SessionChannel::new);

        let (tx, rx) = flume::unbounded();
        for event in channel.backlog.drain(..) {
            let _ = tx.send(event);
        }
        channel.subscribers.push(tx);
        rx
    }

    pub fn close(&self, session: &SessionKey) {
        self.channels.lock().remove(session);
    }

    pub fn backlog_len(&self, session: &SessionKey) -> usize {
        self.channels
            .lock()
            .get(session)
            .map(|c| c.backlog.len())
            .unwrap_or(0)
    }
}
