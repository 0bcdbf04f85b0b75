//! reflex_hub: session orchestration for networked reaction-test devices
//!
//! This crate drives timed reaction tests against a fleet of small devices
//! (light/touch pads) reachable over a pub/sub gateway. It sends activation
//! commands, correlates answers, enforces reaction timeouts, advances the
//! session according to its mode and keeps running statistics that are
//! reported to the backend when the session ends.
//!
//! The public modules expose the transports (`protocol`, `api`) and the
//! engine (`core`). The command-line wiring and logging setup live in hidden
//! modules used by the binary.

pub mod api;
#[doc(hidden)]
pub mod boot;
#[doc(hidden)]
pub mod cli;
pub mod core;
pub mod protocol;

pub use api::*;
