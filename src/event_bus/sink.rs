//! Observability sinks for the firehose: the same `SessionEnvelope` stream
//! every session publishes to, consumed for logs/debugging rather than
//! transport delivery (that's [`super::router::SessionRouter`]'s job).

use std::io::{self, Result as IoResult, Stdout, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex as ParkingMutex;

use super::event::SessionEnvelope;
use crate::telemetry::{PlainFormatter, TelemetryFormatter};

pub trait EventSink: Sync + Send {
    fn handle(&mut self, envelope: &SessionEnvelope) -> IoResult<()>;

    fn name(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

/// Stdout sink with optional formatting; matches the teacher's default
/// local-development sink (§10.1).
pub struct StdOutSink<F: TelemetryFormatter = PlainFormatter> {
    handle: Stdout,
    formatter: F,
}

impl Default for StdOutSink {
    fn default() -> Self {
        Self {
            handle: io::stdout(),
            formatter: PlainFormatter::new(),
        }
    }
}

impl<F: TelemetryFormatter> StdOutSink<F> {
    pub fn with_formatter(formatter: F) -> Self {
        Self {
            handle: io::stdout(),
            formatter,
        }
    }
}

impl<F: TelemetryFormatter> EventSink for StdOutSink<F> {
    fn handle(&mut self, envelope: &SessionEnvelope) -> IoResult<()> {
        let rendered = self.formatter.render_envelope(envelope).join_lines();
        self.handle.write_all(rendered.as_bytes())?;
        self.handle.flush()
    }
}

/// In-memory sink used by tests to snapshot what was published (§10.4).
#[derive(Clone, Default)]
pub struct MemorySink {
    entries: Arc<ParkingMutex<Vec<SessionEnvelope>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<SessionEnvelope> {
        self.entries.lock().clone()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl EventSink for MemorySink {
    fn handle(&mut self, envelope: &SessionEnvelope) -> IoResult<()> {
        self.entries.lock().push(envelope.clone());
        Ok(())
    }
}

/// JSON Lines sink for log aggregation (ELK/Splunk/etc.), one object per line.
pub struct JsonLinesSink {
    handle: Box<dyn Write + Send + Sync>,
    pretty: bool,
}

impl JsonLinesSink {
    pub fn new(handle: Box<dyn Write + Send + Sync>) -> Self {
        Self {
            handle,
            pretty: false,
        }
    }

    pub fn with_pretty_print(handle: Box<dyn Write + Send + Sync>) -> Self {
        Self {
            handle,
            pretty: true,
        }
    }

    pub fn to_stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    pub fn to_file(path: impl AsRef<Path>) -> IoResult<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(Box::new(file)))
    }
}

impl EventSink for JsonLinesSink {
    fn handle(&mut self, envelope: &SessionEnvelope) -> IoResult<()> {
        let json = if self.pretty {
            envelope.to_json_pretty()
        } else {
            envelope.to_json_string()
        }
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writeln!(self.handle, "{json}")?;
        self.handle.flush()
    }

    fn name(&self) -> String {
        if self.pretty {
            "JsonLinesSink(pretty)".to_string()
        } else {
            "JsonLinesSink".to_string()
        }
    }
}

/// Forwards envelopes to an async consumer (SSE, WebSocket fan-out, etc.)
/// via a flume channel.
pub struct ChannelSink {
    tx: flume::Sender<SessionEnvelope>,
}

impl ChannelSink {
    pub fn new(tx: flume::Sender<SessionEnvelope>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn handle(&mut self, envelope: &SessionEnvelope) -> IoResult<()> {
        self.tx
            .send(envelope.clone())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "channel receiver dropped"))
    }
}
