use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use failure::ResultExt;
use slog::debug;
use slog::error;
use slog::info;
use slog::trace;
use slog::warn;
use slog::Logger;

use zookeeper::Acl;
use zookeeper::CreateMode as ZkCreateMode;
use zookeeper::Stat;
use zookeeper::Watcher;
use zookeeper::ZkError;
use zookeeper::ZkResult;
use zookeeper::ZkState;
use zookeeper::ZooKeeper;

use super::super::super::config::ZookeeperConfig;
use super::super::super::ErrorKind;
use super::super::super::Result;

use super::metrics::ZOO_CONNECTION_COUNT;
use super::metrics::ZOO_OP_DURATION;
use super::metrics::ZOO_OP_ERRORS_COUNT;
use super::metrics::ZOO_TIMEOUTS_COUNT;

/// Wrapper around a `ZooKeeper` instance to handle [re]connection requests.
pub struct Client {
    config: ZookeeperConfig,
    keeper: Option<Mutex<CurrentClient>>,
    logger: Logger,
}

impl Client {
    pub fn new(config: ZookeeperConfig, logger: Logger) -> Result<Client> {
        let mut client = Client {
            config,
            keeper: None,
            logger,
        };
        let keeper = Mutex::new(client.new_client()?);
        client.keeper = Some(keeper);
        Ok(client)
    }

    /// Wrapper for `ZooKeeper::create` to track metrics.
    pub fn create(
        keeper: &ZooKeeper,
        path: &str,
        payload: Vec<u8>,
        acl: Vec<Acl>,
        mode: ZkCreateMode,
    ) -> ZkResult<String> {
        let _timer = ZOO_OP_DURATION.with_label_values(&["create"]).start_timer();
        keeper.create(path, payload, acl, mode).map_err(|error| {
            ZOO_OP_ERRORS_COUNT.with_label_values(&["create"]).inc();
            if error == ZkError::OperationTimeout {
                ZOO_TIMEOUTS_COUNT.inc();
            }
            error
        })
    }

    /// Wrapper for `ZooKeeper::delete` to track metrics.
    pub fn delete(keeper: &ZooKeeper, path: &str, version: Option<i32>) -> ZkResult<()> {
        let _timer = ZOO_OP_DURATION.with_label_values(&["delete"]).start_timer();
        keeper.delete(path, version).map_err(|error| {
            ZOO_OP_ERRORS_COUNT.with_label_values(&["delete"]).inc();
            if error == ZkError::OperationTimeout {
                ZOO_TIMEOUTS_COUNT.inc();
            }
            error
        })
    }

    /// Wrapper for `ZooKeeper::exists` to track metrics.
    pub fn exists(keeper: &ZooKeeper, path: &str, watch: bool) -> ZkResult<Option<Stat>> {
        let _timer = ZOO_OP_DURATION.with_label_values(&["exists"]).start_timer();
        keeper.exists(path, watch).map_err(|error| {
            ZOO_OP_ERRORS_COUNT.with_label_values(&["exists"]).inc();
            if error == ZkError::OperationTimeout {
                ZOO_TIMEOUTS_COUNT.inc();
            }
            error
        })
    }

    /// Wrapper for `ZooKeeper::exists_w` to track metrics.
    pub fn exists_w<W>(keeper: &ZooKeeper, path: &str, watcher: W) -> ZkResult<Option<Stat>>
    where
        W: Watcher + 'static,
    {
        let _timer = ZOO_OP_DURATION.with_label_values(&["exists_w"]).start_timer();
        keeper.exists_w(path, watcher).map_err(|error| {
            ZOO_OP_ERRORS_COUNT.with_label_values(&["exists_w"]).inc();
            if error == ZkError::OperationTimeout {
                ZOO_TIMEOUTS_COUNT.inc();
            }
            error
        })
    }

    /// Wrapper for `ZooKeeper::get_children` to track metrics.
    pub fn get_children(keeper: &ZooKeeper, path: &str, watch: bool) -> ZkResult<Vec<String>> {
        let _timer = ZOO_OP_DURATION
            .with_label_values(&["get_children"])
            .start_timer();
        keeper.get_children(path, watch).map_err(|error| {
            ZOO_OP_ERRORS_COUNT
                .with_label_values(&["get_children"])
                .inc();
            if error == ZkError::OperationTimeout {
                ZOO_TIMEOUTS_COUNT.inc();
            }
            error
        })
    }

    /// Wrapper for `ZooKeeper::get_data` to track metrics.
    pub fn get_data(keeper: &ZooKeeper, path: &str, watch: bool) -> ZkResult<(Vec<u8>, Stat)> {
        let _timer = ZOO_OP_DURATION
            .with_label_values(&["get_data"])
            .start_timer();
        keeper.get_data(path, watch).map_err(|error| {
            ZOO_OP_ERRORS_COUNT.with_label_values(&["get_data"]).inc();
            if error == ZkError::OperationTimeout {
                ZOO_TIMEOUTS_COUNT.inc();
            }
            error
        })
    }

    /// Create the given path, and any missing ancestor, as persistent nodes.
    pub fn mkdirp(keeper: &ZooKeeper, path: &str) -> ZkResult<()> {
        let mut current = String::with_capacity(path.len());
        for part in path.split('/').filter(|part| !part.is_empty()) {
            current.push('/');
            current.push_str(part);
            let result = Client::create(
                keeper,
                &current,
                Vec::new(),
                Acl::open_unsafe().clone(),
                ZkCreateMode::Persistent,
            );
            match result {
                Ok(_) => (),
                Err(ZkError::NodeExists) => (),
                Err(error) => return Err(error),
            };
        }
        Ok(())
    }
}

impl Client {
    /// Check if the current zookeeper session is usable without reconnecting.
    pub fn connected(&self) -> bool {
        let mutex = self
            .keeper
            .as_ref()
            .expect("current client must be set after creation");
        let current = mutex.lock().expect("zookeeper client lock was poisoned");
        current.active()
    }

    /// Return the current or a new zookeeper client.
    pub fn get(&self) -> Result<Arc<ZooKeeper>> {
        let mutex = self
            .keeper
            .as_ref()
            .expect("current client must be set after creation");
        let mut current = mutex.lock().expect("zookeeper client lock was poisoned");
        if !current.active() {
            let new_client = self.new_client()?;
            *current = new_client;
        }
        Ok(current.client())
    }
}

impl Client {
    /// Return a new Zookeeper client that will clear itself when disconnected.
    fn new_client(&self) -> Result<CurrentClient> {
        info!(self.logger, "Initiating new zookeeper session");
        let timeout = Duration::from_secs(self.config.timeout);
        ZOO_CONNECTION_COUNT.inc();
        let timer = ZOO_OP_DURATION.with_label_values(&["connect"]).start_timer();
        let keeper = ZooKeeper::connect(&self.config.ensemble, timeout, |_| {})
            .map_err(|error| {
                ZOO_OP_ERRORS_COUNT.with_label_values(&["connect"]).inc();
                if error == ZkError::OperationTimeout {
                    ZOO_TIMEOUTS_COUNT.inc();
                }
                error
            })
            .with_context(|_| ErrorKind::BackendConnect)?;
        timer.observe_duration();

        // Listen for connection events to mark the session as gone.
        let logger = self.logger.clone();
        let active = Arc::new(AtomicBool::new(true));
        let notify_close = Arc::clone(&active);
        keeper.add_listener(move |state| {
            let reset = match state {
                ZkState::AuthFailed => {
                    error!(logger, "Zookeeper authentication error");
                    false
                }
                ZkState::Closed => {
                    warn!(logger, "Zookeeper session closed");
                    true
                }
                ZkState::Connected => {
                    info!(logger, "Zookeeper connection successful");
                    false
                }
                ZkState::ConnectedReadOnly => {
                    warn!(logger, "Zookeeper connection is read-only");
                    false
                }
                ZkState::Connecting => {
                    debug!(logger, "Zookeeper session connecting");
                    false
                }
                event => {
                    trace!(logger, "Ignoring deprecated zookeeper event"; "event" => ?event);
                    false
                }
            };
            if reset {
                notify_close.store(false, Ordering::Relaxed);
                debug!(logger, "Zookeeper session marked as not active");
            }
        });

        Ok(CurrentClient {
            active,
            keeper: Arc::new(keeper),
        })
    }
}

/// Holder of the current zookeeper client with its `active` flag.
struct CurrentClient {
    active: Arc<AtomicBool>,
    keeper: Arc<ZooKeeper>,
}

impl CurrentClient {
    fn active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    fn client(&self) -> Arc<ZooKeeper> {
        Arc::clone(&self.keeper)
    }
}
