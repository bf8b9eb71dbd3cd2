use std::sync::Arc;

use slog::Logger;

use super::backend;
use super::backend::Backend;
use super::config::Backend as BackendConfig;
use super::config::Config;
use super::Result;

mod election;
mod locker;
mod watcher;
mod znode;

pub use self::election::Candidate;
pub use self::election::DeferredFire;
pub use self::election::ElectionCallback;
pub use self::election::Observer;
pub use self::locker::LockKind;
pub use self::locker::Locker;
pub use self::watcher::NodeDeletionWatcher;

/// Interface to the distributed locking and election primitives.
#[derive(Clone)]
pub struct Coordinator {
    backend: Arc<dyn Backend>,
    election_root: String,
    lock_root: String,
    logger: Logger,
}

impl Coordinator {
    pub fn new(config: Config, logger: Logger) -> Result<Coordinator> {
        let backend: Arc<dyn Backend> = match &config.backend {
            BackendConfig::Zookeeper(zookeeper) => Arc::new(backend::zookeeper::Zookeeper::new(
                zookeeper.clone(),
                logger.clone(),
            )?),
        };
        Ok(Coordinator::with_backend(backend, config, logger))
    }

    /// Build a `Coordinator` over an explicit coordination client.
    ///
    /// The backend selection in `config` is ignored; the root paths are
    /// not.
    pub fn with_backend(backend: Arc<dyn Backend>, config: Config, logger: Logger) -> Coordinator {
        Coordinator {
            backend,
            election_root: config.election_root,
            lock_root: config.lock_root,
            logger,
        }
    }
}

impl Coordinator {
    /// Named exclusive lock: granted when no other request precedes it.
    ///
    /// `data` is stored in the queue node and exposed to other clients
    /// through `Locker::owner_data`.
    pub fn exclusive_lock<S, D>(&self, name: S, data: D) -> Result<Locker>
    where
        S: Into<String>,
        D: Into<Option<Vec<u8>>>,
    {
        Locker::new(
            Arc::clone(&self.backend),
            LockKind::Exclusive,
            &self.lock_root,
            name.into(),
            data.into().unwrap_or_default(),
            self.logger.clone(),
        )
    }

    /// Named shared lock: granted while no exclusive request precedes it.
    pub fn shared_lock<S, D>(&self, name: S, data: D) -> Result<Locker>
    where
        S: Into<String>,
        D: Into<Option<Vec<u8>>>,
    {
        Locker::new(
            Arc::clone(&self.backend),
            LockKind::Shared,
            &self.lock_root,
            name.into(),
            data.into().unwrap_or_default(),
            self.logger.clone(),
        )
    }

    /// Participant in the named election.
    ///
    /// `data` is stored in the vote node and in the leader
    /// acknowledgement if this candidate wins.
    pub fn candidate<S, D>(&self, election: S, data: D) -> Result<Candidate>
    where
        S: Into<String>,
        D: Into<Option<Vec<u8>>>,
    {
        Candidate::new(
            Arc::clone(&self.backend),
            &self.election_root,
            election.into(),
            data.into().unwrap_or_default(),
            self.logger.clone(),
        )
    }

    /// Read-only watcher of the named election.
    pub fn observer<S>(&self, election: S) -> Result<Observer>
    where
        S: Into<String>,
    {
        Observer::new(
            Arc::clone(&self.backend),
            &self.election_root,
            election.into(),
            self.logger.clone(),
        )
    }
}
