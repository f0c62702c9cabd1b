//! Wire protocol: the event envelope and form schema (§6).
//!
//! This module only defines the shapes on the wire. Nothing here talks to
//! a socket — that's the transport's job, deliberately out of scope (§1).

pub mod envelope;
pub mod form;

pub use envelope::{InboundEvent, OutboundEvent};
pub use form::{Field, FieldType, FormSpec, SelectOption};
