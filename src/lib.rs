//! Transparent TCP relay with HTTP and h2c sniffing.
//!
//! Every configured port is relayed byte for byte to one destination. When an
//! instance has `notify_http` set, the start of each connection is classified;
//! plaintext HTTP requests are aggregated and reported periodically, h2c
//! connections are reported immediately.

pub mod config;
pub mod net;
pub mod notify;
pub mod proxy;
pub mod sniff;

pub mod lifecycle;
pub mod observability;

pub use config::{load_config, AppConfig, ProxyInstanceConfig};
pub use lifecycle::Shutdown;
pub use notify::{notifier_from_config, NotificationAggregator, NotificationEvent, Notificator};
pub use proxy::{ProxyInstance, ProxyOrchestrator};
