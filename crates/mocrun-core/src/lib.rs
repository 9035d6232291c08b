//! mocrun-core: Core library for eMOC approval workflow automation
//!
//! This crate drives the five-actor eMOC approval lifecycle (requester,
//! coordinator, acceptor, owner, approver) through the web UI, and keeps
//! the workflow id that links the stages together.
//!
//! # Architecture
//!
//! ```text
//! SessionAuthenticator → Stage controller → Drivers (multi-select, date, modal)
//!                              ↓                   ↓
//!                    WorkflowCorrelationStore   ElementResolver → Page (CDP / memory)
//! ```
//!
//! # Modules
//!
//! - `page`: Browser capability (`Page` trait, in-memory and CDP backends)
//! - `descriptor`: Control descriptors and locating strategies
//! - `resolver`: Multi-strategy resolution with bounded retry
//! - `drivers`: Multi-select, date picker and modal flow drivers
//! - `stages`: Per-actor stage controllers and `run_stage`
//! - `store`: Workflow correlation store
//! - `auth`: Identity-provider login per actor
//! - `config`: Configuration management
//! - `runner`: Login, stage dispatch and result persistence
//! - `diagnostics`: Failure report artifacts
//! - `logging`: Tracing setup and the per-stage span
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod auth;
pub mod catalog;
pub mod config;
pub mod date;
pub mod descriptor;
pub mod diagnostics;
pub mod drivers;
pub mod error;
pub mod logging;
pub mod page;
pub mod resolver;
pub mod retry;
pub mod runner;
pub mod stages;
pub mod store;
pub mod wait;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
