//! Proxy subsystem.
//!
//! # Data Flow
//! ```text
//! ProxyOrchestrator
//!     → ProxyInstance (one per proxy_list entry)
//!         → accept loop → ConnectionHandler per connection (handler.rs)
//!             → sniff / intercept → relay.rs
//!         → flush loop (aggregator, every flush interval)
//! ```
//!
//! # Design Decisions
//! - One task per accepted connection, no admission limit
//! - Instances share nothing but the notificator
//! - Stop waits for the accept and flush tasks, then flushes once more

pub(crate) mod handler;
pub mod instance;
pub mod orchestrator;
pub mod relay;

pub use handler::CLIENT_KEEPALIVE;
pub use instance::{InstanceSettings, ProxyInstance};
pub use orchestrator::{OrchestratorError, ProxyOrchestrator};
pub use relay::{relay, Direction, RelayOutcome};
