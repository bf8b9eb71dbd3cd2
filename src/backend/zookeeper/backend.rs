use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use failure::Fail;
use slog::warn;
use slog::Logger;

use zookeeper::Acl;
use zookeeper::CreateMode as ZkCreateMode;
use zookeeper::Subscription as ZkSubscription;
use zookeeper::WatchedEvent;
use zookeeper::WatchedEventType;
use zookeeper::ZkError;
use zookeeper::ZkState;

use super::super::super::config::ZookeeperConfig;
use super::super::super::Error;
use super::super::super::ErrorKind;
use super::super::super::Result;
use super::super::Backend;
use super::super::CreateMode;
use super::super::EventKind;
use super::super::NodeCallback;
use super::super::NodeEvent;
use super::super::NodeStat;
use super::super::SessionCallback;
use super::super::SessionEvent;
use super::super::Subscription;
use super::client::Client;

/// Map a zookeeper error to the typed error kinds consumed by the core.
fn map_error(op: &'static str, path: &str, error: ZkError) -> Error {
    match error {
        ZkError::NoNode => ErrorKind::NoNode(path.to_string()).into(),
        ZkError::NodeExists => ErrorKind::NodeExists(path.to_string()).into(),
        ZkError::NotEmpty => ErrorKind::NotEmpty(path.to_string()).into(),
        ZkError::ConnectionLoss | ZkError::SessionExpired | ZkError::SessionMoved => {
            ErrorKind::SessionInterrupted(path.to_string()).into()
        }
        error => Error::from(error.context(ErrorKind::Backend(op))),
    }
}

/// Zookeeper-backed coordination client.
pub struct Zookeeper {
    client: Arc<Client>,
    logger: Logger,
    registry: Arc<Registry>,
}

impl Zookeeper {
    pub fn new(config: ZookeeperConfig, logger: Logger) -> Result<Zookeeper> {
        let client = Arc::new(Client::new(config, logger.clone())?);
        Ok(Zookeeper {
            client,
            logger,
            registry: Arc::new(Registry::new()),
        })
    }
}

impl Zookeeper {
    /// Arm a one-shot `exists` watch backing the given registration.
    ///
    /// Watches in zookeeper fire a single time so the registration is
    /// re-armed after every delivery until it is dropped.
    fn arm(
        client: &Arc<Client>,
        registry: &Arc<Registry>,
        logger: &Logger,
        id: u64,
    ) -> Result<()> {
        let path = match registry.node_path(id) {
            Some(path) => path,
            // The registration was dropped, let the watch expire.
            None => return Ok(()),
        };
        let keeper = client.get()?;
        let closure_client = Arc::clone(client);
        let closure_registry = Arc::clone(registry);
        let closure_logger = logger.clone();
        Client::exists_w(&keeper, &path, move |event: WatchedEvent| {
            Zookeeper::dispatch(
                &closure_client,
                &closure_registry,
                &closure_logger,
                id,
                &event,
            );
        })
        .map_err(|error| map_error("watch arming", &path, error))?;
        Ok(())
    }

    /// Deliver a watch event to its registration and re-arm the watch.
    fn dispatch(
        client: &Arc<Client>,
        registry: &Arc<Registry>,
        logger: &Logger,
        id: u64,
        event: &WatchedEvent,
    ) {
        let (path, callback) = match registry.node_entry(id) {
            Some(entry) => entry,
            None => return,
        };
        let kind = match event.event_type {
            WatchedEventType::NodeCreated => Some(EventKind::Created),
            WatchedEventType::NodeDeleted => Some(EventKind::Deleted),
            WatchedEventType::NodeDataChanged => Some(EventKind::DataChanged),
            WatchedEventType::NodeChildrenChanged => Some(EventKind::ChildrenChanged),
            // Connection state notification, the session listener covers it.
            _ => None,
        };
        if let Some(kind) = kind {
            callback(&NodeEvent {
                kind,
                path: path.clone(),
            });
        }
        if let Err(error) = Zookeeper::arm(client, registry, logger, id) {
            warn!(
                logger, "Failed to re-arm node watch";
                "path" => &path, "error" => %error
            );
        }
    }
}

impl Backend for Zookeeper {
    fn connected(&self) -> bool {
        self.client.connected()
    }

    fn create(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> Result<String> {
        let keeper = self.client.get()?;
        let (zk_mode, acl) = match mode {
            CreateMode::Persistent => (ZkCreateMode::Persistent, Acl::open_unsafe().clone()),
            CreateMode::PersistentSequential => (
                ZkCreateMode::PersistentSequential,
                Acl::open_unsafe().clone(),
            ),
            CreateMode::Ephemeral => (ZkCreateMode::Ephemeral, Acl::open_unsafe().clone()),
            CreateMode::EphemeralSequential => (
                ZkCreateMode::EphemeralSequential,
                Acl::open_unsafe().clone(),
            ),
        };
        Client::create(&keeper, path, data, acl, zk_mode)
            .map_err(|error| map_error("node creation", path, error))
    }

    fn delete(&self, path: &str) -> Result<()> {
        let keeper = self.client.get()?;
        Client::delete(&keeper, path, None).map_err(|error| map_error("node deletion", path, error))
    }

    fn exists(&self, path: &str) -> Result<bool> {
        let keeper = self.client.get()?;
        let stat = Client::exists(&keeper, path, false)
            .map_err(|error| map_error("node lookup", path, error))?;
        Ok(stat.is_some())
    }

    fn stat(&self, path: &str) -> Result<Option<NodeStat>> {
        let keeper = self.client.get()?;
        let stat = Client::exists(&keeper, path, false)
            .map_err(|error| map_error("node lookup", path, error))?;
        Ok(stat.map(|stat| NodeStat {
            czxid: stat.czxid,
            ctime: stat.ctime,
        }))
    }

    fn get_data(&self, path: &str) -> Result<(Vec<u8>, NodeStat)> {
        let keeper = self.client.get()?;
        let (data, stat) = Client::get_data(&keeper, path, false)
            .map_err(|error| map_error("node read", path, error))?;
        let stat = NodeStat {
            czxid: stat.czxid,
            ctime: stat.ctime,
        };
        Ok((data, stat))
    }

    fn get_children(&self, path: &str) -> Result<Vec<String>> {
        let keeper = self.client.get()?;
        Client::get_children(&keeper, path, false)
            .map_err(|error| map_error("children listing", path, error))
    }

    fn mkdirp(&self, path: &str) -> Result<()> {
        let keeper = self.client.get()?;
        Client::mkdirp(&keeper, path).map_err(|error| map_error("recursive creation", path, error))
    }

    fn register(&self, path: &str, callback: NodeCallback) -> Result<Subscription> {
        let id = self.registry.insert_node(path.to_string(), callback);
        if let Err(error) = Zookeeper::arm(&self.client, &self.registry, &self.logger, id) {
            self.registry.remove(id);
            return Err(error);
        }
        Ok(Subscription(id))
    }

    fn register_session(&self, callback: SessionCallback) -> Result<Subscription> {
        let keeper = self.client.get()?;
        let handle = keeper.add_listener(move |state| {
            let event = match state {
                ZkState::Connected | ZkState::ConnectedReadOnly => SessionEvent::Connected,
                ZkState::Connecting => SessionEvent::Disconnected,
                ZkState::Closed | ZkState::AuthFailed => SessionEvent::Expired,
                _ => return,
            };
            callback(event);
        });
        let id = self.registry.insert_session(handle);
        Ok(Subscription(id))
    }

    fn unregister(&self, subscription: Subscription) {
        let entry = self.registry.take(subscription.0);
        if let Some(Entry::Session { handle }) = entry {
            if let Ok(keeper) = self.client.get() {
                keeper.remove_listener(handle);
            }
        }
    }
}

/// Registered subscriptions, keyed by the id handed out to the core.
struct Registry {
    entries: Mutex<RegistryState>,
}

struct RegistryState {
    entries: HashMap<u64, Entry>,
    next: u64,
}

enum Entry {
    Node {
        path: String,
        callback: NodeCallback,
    },
    Session {
        handle: ZkSubscription,
    },
}

impl Registry {
    fn new() -> Registry {
        Registry {
            entries: Mutex::new(RegistryState {
                entries: HashMap::new(),
                next: 0,
            }),
        }
    }

    fn insert_node(&self, path: String, callback: NodeCallback) -> u64 {
        let mut state = self.entries.lock().expect("watch registry lock poisoned");
        let id = state.next;
        state.next += 1;
        state.entries.insert(id, Entry::Node { path, callback });
        id
    }

    fn insert_session(&self, handle: ZkSubscription) -> u64 {
        let mut state = self.entries.lock().expect("watch registry lock poisoned");
        let id = state.next;
        state.next += 1;
        state.entries.insert(id, Entry::Session { handle });
        id
    }

    fn node_entry(&self, id: u64) -> Option<(String, NodeCallback)> {
        let state = self.entries.lock().expect("watch registry lock poisoned");
        match state.entries.get(&id) {
            Some(Entry::Node { path, callback }) => Some((path.clone(), Arc::clone(callback))),
            _ => None,
        }
    }

    fn node_path(&self, id: u64) -> Option<String> {
        self.node_entry(id).map(|(path, _)| path)
    }

    fn remove(&self, id: u64) {
        self.take(id);
    }

    fn take(&self, id: u64) -> Option<Entry> {
        let mut state = self.entries.lock().expect("watch registry lock poisoned");
        state.entries.remove(&id)
    }
}
