//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop)
//!     → connection.rs (id, state machine, active count)
//!     → peek.rs (look-ahead buffer for sniffing)
//!     → Hand off to the connection handler
//! ```
//!
//! # Design Decisions
//! - Unbounded accept: one task per connection, no admission limit
//! - Look-ahead is buffered, never consumed, so sniffing is invisible downstream

pub mod connection;
pub mod listener;
pub mod peek;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionState, ConnectionTracker};
pub use listener::{Listener, ListenerError};
pub use peek::PeekableStream;
