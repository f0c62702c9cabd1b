//! Pretty-printing for published events and error chains (§10.1).
//!
//! `agentloom` never swallows a failure into a bare string: every sink and
//! CLI surface renders through a [`TelemetryFormatter`] so color/plain mode
//! is a single decision point rather than scattered `println!`s.

use crate::error::ErrorRecord;
use crate::event_bus::SessionEnvelope;

/// Explicit color-mode control, independent of stderr TTY auto-detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatterMode {
    Auto,
    Colored,
    Plain,
}

impl FormatterMode {
    fn colored(self) -> bool {
        match self {
            FormatterMode::Colored => true,
            FormatterMode::Plain => false,
            FormatterMode::Auto => std::io::IsTerminal::is_terminal(&std::io::stderr()),
        }
    }
}

/// A rendered block of text lines, kept separate from the context label so
/// callers can join/indent however their sink needs.
pub struct EventRender {
    pub context: String,
    pub lines: Vec<String>,
}

impl EventRender {
    pub fn join_lines(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

pub trait TelemetryFormatter {
    fn render_envelope(&self, envelope: &SessionEnvelope) -> EventRender;
    fn render_errors(&self, errors: &[ErrorRecord]) -> Vec<EventRender>;
}

const CONTEXT_COLOR: &str = "\x1b[32m";
const LINE_COLOR: &str = "\x1b[35m";
const RESET_COLOR: &str = "\x1b[0m";

pub struct PlainFormatter {
    mode: FormatterMode,
}

impl Default for PlainFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl PlainFormatter {
    pub fn new() -> Self {
        Self {
            mode: FormatterMode::Auto,
        }
    }

    pub fn with_mode(mode: FormatterMode) -> Self {
        Self { mode }
    }

    fn wrap(&self, context: &str, body: &str) -> String {
        if self.mode.colored() {
            format!("{CONTEXT_COLOR}{context}{RESET_COLOR} {LINE_COLOR}{body}{RESET_COLOR}")
        } else {
            format!("{context} {body}")
        }
    }
}

impl TelemetryFormatter for PlainFormatter {
    fn render_envelope(&self, envelope: &SessionEnvelope) -> EventRender {
        let context = format!("[{}#{}]", envelope.session, envelope.seq);
        let line = self.wrap(&context, &format!("{:?}", envelope.event));
        EventRender {
            context,
            lines: vec![line],
        }
    }

    fn render_errors(&self, errors: &[ErrorRecord]) -> Vec<EventRender> {
        errors
            .iter()
            .map(|e| {
                let context = format!("[{:?}]", e.kind);
                let mut lines = vec![self.wrap(&context, &format_error_chain(e))];
                if let Some(cause) = &e.cause {
                    lines.push(format!("  caused by: {}", format_error_chain(cause)));
                }
                EventRender { context, lines }
            })
            .collect()
    }
}

fn format_error_chain(error: &ErrorRecord) -> String {
    let mut out = error.message.clone();
    let mut cursor = error.cause.as_deref();
    while let Some(cause) = cursor {
        out.push_str(" -> ");
        out.push_str(&cause.message);
        cursor = cause.cause.as_deref();
    }
    out
}

pub fn pretty_print_with_mode(errors: &[ErrorRecord], mode: FormatterMode) -> String {
    let formatter = PlainFormatter::with_mode(mode);
    let mut out = String::new();
    for (idx, render) in formatter.render_errors(errors).into_iter().enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        out.push_str(&render.join_lines());
    }
    out
}

pub fn pretty_print(errors: &[ErrorRecord]) -> String {
    pretty_print_with_mode(errors, FormatterMode::Auto)
}
