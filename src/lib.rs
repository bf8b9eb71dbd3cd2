mod backend;
mod config;
mod coordinator;
mod error;
mod metrics;

#[cfg(debug_assertions)]
pub mod mock;

pub use self::backend::Backend;
pub use self::backend::CreateMode;
pub use self::backend::EventKind;
pub use self::backend::NodeCallback;
pub use self::backend::NodeEvent;
pub use self::backend::NodeStat;
pub use self::backend::SessionCallback;
pub use self::backend::SessionEvent;
pub use self::backend::Subscription;
pub use self::config::Backend as BackendConfig;
pub use self::config::Config;
pub use self::config::ZookeeperConfig;
pub use self::coordinator::Candidate;
pub use self::coordinator::Coordinator;
pub use self::coordinator::DeferredFire;
pub use self::coordinator::ElectionCallback;
pub use self::coordinator::LockKind;
pub use self::coordinator::Locker;
pub use self::coordinator::NodeDeletionWatcher;
pub use self::coordinator::Observer;
pub use self::error::Error;
pub use self::error::ErrorKind;
pub use self::error::Result;
pub use self::metrics::register_metrics;
