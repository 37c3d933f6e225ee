//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → one ProxyInstanceConfig handed to each proxy instance
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields except the per-instance ports and destination have defaults
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::AppConfig;
pub use schema::InterceptConfig;
pub use schema::LogFormat;
pub use schema::NotificationConfig;
pub use schema::ObservabilityConfig;
pub use schema::ProxyInstanceConfig;
pub use schema::TimeoutConfig;
