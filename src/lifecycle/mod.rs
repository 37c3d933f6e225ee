//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Init logging/metrics → Start instances
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Stop flush timer → Final flush → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger orchestrator stop
//! ```
//!
//! # Design Decisions
//! - Fail fast: a bind error aborts startup
//! - Already relaying connections are not interrupted by shutdown

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
