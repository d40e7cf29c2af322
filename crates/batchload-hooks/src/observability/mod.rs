//! Observability for batch loading.
//!
//! The core crate emits `tracing` events and spans (one `batch_wave` span per
//! wave, one `batch_scope` span per unit of work); this module installs the
//! subscriber that prints them.

pub mod logging;

pub use logging::{init_logging, subscriber_for};
