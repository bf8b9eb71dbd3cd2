mod backend;
mod client;
mod metrics;

pub use self::backend::Zookeeper;
pub use self::metrics::register_metrics;
