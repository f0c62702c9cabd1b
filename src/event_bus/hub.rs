//! The firehose: every published [`SessionEnvelope`] also flows through a
//! single broadcast channel that sinks (stdout, JSON lines, in-memory,
//! channel) subscribe to for logging/observability. This mirrors the
//! teacher's `EventHub` almost exactly; the session-addressed, priority-aware
//! bounded delivery contract required by §4.1 lives in [`super::router`]
//! instead, since a single uniform-capacity broadcast cannot express
//! "drop oldest progress, never drop markdown/form_request/workflow_finish".

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::RwLock;
use tokio::sync::broadcast::{self, Receiver, Sender, error};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::warn;

use super::emitter::{EmitterError, EventEmitter};
use super::event::SessionEnvelope;

pub const DEFAULT_FIREHOSE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy)]
pub struct EventHubMetrics {
    pub capacity: usize,
    pub dropped: usize,
}

#[derive(Debug)]
pub struct EventHub {
    sender: RwLock<Option<Sender<SessionEnvelope>>>,
    dropped_events: AtomicUsize,
    capacity: usize,
}

impl EventHub {
    pub fn new(capacity: usize) -> Arc<Self> {
        let capacity = if capacity == 0 {
            DEFAULT_FIREHOSE_CAPACITY
        } else {
            capacity
        };
        let (tx, _rx) = broadcast::channel(capacity);
        Arc::new(Self {
            sender: RwLock::new(Some(tx)),
            dropped_events: AtomicUsize::new(0),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped(&self) -> usize {
        self.dropped_events.load(Ordering::Relaxed)
    }

    pub fn metrics(&self) -> EventHubMetrics {
        EventHubMetrics {
            capacity: self.capacity,
            dropped: self.dropped(),
        }
    }

    pub async fn current_sender(&self) -> Option<Sender<SessionEnvelope>> {
        self.sender.read().await.clone()
    }

    /// Publish to every current subscriber. If there are no subscribers the
    /// event is simply discarded from the firehose (sinks only care about
    /// events emitted while they're running); this never affects per-session
    /// delivery, which goes through [`super::router::SessionRouter`] instead.
    pub async fn publish(&self, envelope: SessionEnvelope) {
        if let Some(tx) = self.current_sender().await
            && let Err(err) = tx.send(envelope)
        {
            warn!(sessions = 0, "firehose has no subscribers: {err}");
        }
    }

    pub async fn subscribe(self: &Arc<Self>) -> EventStream {
        let receiver = self
            .current_sender()
            .await
            .expect("hub closed before subscribe")
            .subscribe();
        EventStream {
            receiver,
            hub: Arc::clone(self),
            shutdown: None,
        }
    }

    pub async fn close(&self) {
        *self.sender.write().await = None;
    }

    pub fn record_lag(&self, n: usize) {
        self.dropped_events.fetch_add(n, Ordering::Relaxed);
        warn!(lagged = n, "event hub subscriber lagged; events dropped");
    }

    pub fn emitter(self: &Arc<Self>) -> HubEmitter {
        HubEmitter { hub: Arc::clone(self) }
    }
}

#[derive(Debug, Clone)]
pub struct HubEmitter {
    hub: Arc<EventHub>,
}

impl EventEmitter for HubEmitter {
    fn emit(&self, envelope: SessionEnvelope) -> Result<(), EmitterError> {
        let hub = Arc::clone(&self.hub);
        tokio::spawn(async move {
            hub.publish(envelope).await;
        });
        Ok(())
    }
}

pub struct EventStream {
    receiver: Receiver<SessionEnvelope>,
    hub: Arc<EventHub>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl EventStream {
    pub async fn recv(&mut self) -> Option<SessionEnvelope> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(error::RecvError::Lagged(n)) => {
                    self.hub.record_lag(n as usize);
                    continue;
                }
                Err(error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<SessionEnvelope> {
        match self.receiver.try_recv() {
            Ok(envelope) => Some(envelope),
            Err(_) => None,
        }
    }

    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub async fn next_timeout(&mut self, duration: Duration) -> Option<SessionEnvelope> {
        match timeout(duration, self.recv()).await {
            Ok(envelope) => envelope,
            Err(_) => None,
        }
    }

    pub fn into_async_stream(self) -> BoxStream<'static, SessionEnvelope> {
        stream::unfold(self, |mut s| async move {
            let next = s.recv().await;
            next.map(|envelope| (envelope, s))
        })
        .boxed()
    }
}
