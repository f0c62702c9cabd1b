//! Public `EventBus` API (§4.1): `publish`, `subscribe`, `close`, plus
//! sink management for observability. Combines the session-addressed
//! [`SessionRouter`] (transport delivery, priority-aware bounded backlog)
//! with the firehose [`EventHub`] (sinks, for logs/debugging), mirroring
//! the teacher's `EventBus`/`SinkEntry`/`SinkWorker` shape.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::event::SessionEnvelope;
use super::hub::{EventHub, EventHubMetrics, EventStream};
use super::router::SessionRouter;
use super::sink::EventSink;
use crate::protocol::OutboundEvent;
use crate::session::SessionKey;

struct SinkEntry {
    sink: Arc<Mutex<Box<dyn EventSink>>>,
    worker: Option<SinkWorker>,
}

struct SinkWorker {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Typed, in-process pub/sub addressed by `(tenant_id, session_id)` (§4.1).
pub struct EventBus {
    router: Arc<SessionRouter>,
    hub: Arc<EventHub>,
    sinks: Arc<Mutex<Vec<SinkEntry>>>,
    seq: AtomicU64,
    started: AtomicBool,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacities(
            super::router::DEFAULT_SESSION_BACKLOG,
            super::hub::DEFAULT_FIREHOSE_CAPACITY,
        )
    }

    pub fn with_capacities(session_backlog: usize, firehose_capacity: usize) -> Self {
        Self {
            router: SessionRouter::new(session_backlog),
            hub: EventHub::new(firehose_capacity),
            sinks: Arc::new(Mutex::new(Vec::new())),
            seq: AtomicU64::new(0),
            started: AtomicBool::new(false),
        }
    }

    pub fn with_sinks(sinks: Vec<Box<dyn EventSink>>) -> Self {
        let bus = Self::new();
        for sink in sinks {
            bus.add_boxed_sink(sink);
        }
        bus
    }

    pub fn add_sink<S: EventSink + 'static>(&self, sink: S) {
        self.add_boxed_sink(Box::new(sink));
    }

    pub fn add_boxed_sink(&self, sink: Box<dyn EventSink>) {
        self.sinks.lock().push(SinkEntry {
            sink: Arc::new(Mutex::new(sink)),
            worker: None,
        });
    }

    /// Publish `event` for `session`: delivered to live/backlogged
    /// transport subscribers via the router, and mirrored to the firehose
    /// for sinks. Ordering per session is preserved by the shared `seq`.
    pub async fn publish(&self, session: &SessionKey, event: OutboundEvent) {
        self.router.publish(session, event.clone());
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let envelope = SessionEnvelope::new(session.clone(), seq, event);
        self.hub.publish(envelope).await;
    }

    /// Subscribe to one session's outbound events (transport-facing).
    pub fn subscribe(&self, session: &SessionKey) -> flume::Receiver<OutboundEvent> {
        self.router.subscribe(session)
    }

    pub fn close(&self, session: &SessionKey) {
        self.router.close(session);
    }

    pub fn metrics(&self) -> EventHubMetrics {
        self.hub.metrics()
    }

    /// Subscribe to the raw firehose (all sessions) — used by sinks and by
    /// tests that want to assert on cross-session ordering guarantees.
    pub async fn firehose(&self) -> EventStream {
        self.hub.subscribe().await
    }

    /// Start one worker task per registered sink, each consuming its own
    /// firehose subscription.
    pub fn listen_for_events(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut sinks = self.sinks.lock();
        for entry in sinks.iter_mut() {
            if entry.worker.is_some() {
                continue;
            }
            entry.worker = Some(Self::spawn_worker(Arc::clone(&self.hub), Arc::clone(&entry.sink)));
        }
    }

    fn spawn_worker(hub: Arc<EventHub>, sink: Arc<Mutex<Box<dyn EventSink>>>) -> SinkWorker {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut stream = hub.subscribe().await;
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    envelope = stream.recv() => {
                        match envelope {
                            Some(envelope) => {
                                if let Err(err) = sink.lock().handle(&envelope) {
                                    tracing::warn!(error = %err, "event sink failed to handle envelope");
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
        });
        SinkWorker {
            shutdown: shutdown_tx,
            handle,
        }
    }

    pub fn stop_listener(&self) {
        let mut sinks = self.sinks.lock();
        for entry in sinks.iter_mut() {
            if let Some(worker) = entry.worker.take() {
                let _ = worker.shutdown.send(());
                worker.handle.abort();
            }
        }
        self.started.store(false, Ordering::SeqCst);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.stop_listener();
    }
}
