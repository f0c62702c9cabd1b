//! Small cross-module helpers that don't belong to one component.

pub mod cancel;
pub mod id;

pub use cancel::CancelToken;
