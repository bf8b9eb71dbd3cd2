use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use super::super::backend::Backend;
use super::super::backend::CreateMode;
use super::super::backend::EventKind;
use super::super::backend::NodeCallback;
use super::super::backend::NodeEvent;
use super::super::backend::NodeStat;
use super::super::backend::SessionCallback;
use super::super::backend::SessionEvent;
use super::super::backend::Subscription;
use super::super::ErrorKind;
use super::super::Result;

/// Parent path of a node, `/` for top-level nodes.
fn parent_path(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(index) => path[..index].to_string(),
    }
}

/// In-memory coordination service tree shared by mock sessions.
///
/// Events are queued while the tree mutex is held and delivered once it
/// is released; events produced by a callback are appended to the queue
/// and delivered after the current batch, preserving the order watchers
/// of a real service would observe.
pub(crate) struct Tree {
    state: Mutex<TreeState>,
}

struct TreeState {
    clock: i64,
    dispatching: bool,
    next_session: u64,
    next_subscription: u64,
    nodes: BTreeMap<String, Node>,
    queue: VecDeque<Job>,
    session_watches: HashMap<u64, SessionWatch>,
    sessions: HashSet<u64>,
    watches: HashMap<u64, Watch>,
}

struct Node {
    counter: u64,
    ctime: i64,
    czxid: i64,
    data: Vec<u8>,
    owner: Option<u64>,
}

struct Watch {
    callback: NodeCallback,
    path: String,
    session: u64,
}

struct SessionWatch {
    callback: SessionCallback,
    session: u64,
}

enum Job {
    Node {
        event: NodeEvent,
        subscription: u64,
    },
    Session {
        event: SessionEvent,
        subscription: u64,
    },
}

impl Tree {
    pub(crate) fn new() -> Tree {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            Node {
                counter: 0,
                ctime: 0,
                czxid: 0,
                data: Vec::new(),
                owner: None,
            },
        );
        Tree {
            state: Mutex::new(TreeState {
                clock: 1,
                dispatching: false,
                next_session: 0,
                next_subscription: 0,
                nodes,
                queue: VecDeque::new(),
                session_watches: HashMap::new(),
                sessions: HashSet::new(),
                watches: HashMap::new(),
            }),
        }
    }

    pub(crate) fn new_session(&self) -> u64 {
        let mut state = self.lock();
        let session = state.next_session;
        state.next_session += 1;
        state.sessions.insert(session);
        session
    }

    /// Expire a session, reaping its ephemeral nodes.
    ///
    /// Every owned node is removed before any event is delivered,
    /// matching the atomicity of a real session teardown.
    pub(crate) fn expire(&self, session: u64) {
        {
            let mut state = self.lock();
            if !state.sessions.remove(&session) {
                return;
            }
            // The dying session's node watches never fire again.
            state.watches.retain(|_, watch| watch.session != session);
            let owned: Vec<String> = state
                .nodes
                .iter()
                .filter(|(_, node)| node.owner == Some(session))
                .map(|(path, _)| path.clone())
                .collect();
            for path in &owned {
                state.nodes.remove(path);
            }
            for path in &owned {
                state.emit(EventKind::Deleted, path);
                state.emit(EventKind::ChildrenChanged, &parent_path(path));
            }
            let expired: Vec<u64> = state
                .session_watches
                .iter()
                .filter(|(_, watch)| watch.session == session)
                .map(|(id, _)| *id)
                .collect();
            for subscription in expired {
                state.queue.push_back(Job::Session {
                    event: SessionEvent::Expired,
                    subscription,
                });
            }
        }
        self.drain();
    }

    /// Test helper: delete a subtree, children first.
    pub(crate) fn delete_recursive(&self, path: &str) {
        {
            let mut state = self.lock();
            let prefix = format!("{}/", path);
            let mut doomed: Vec<String> = state
                .nodes
                .keys()
                .filter(|key| key.as_str() == path || key.starts_with(&prefix))
                .cloned()
                .collect();
            // Children are strictly longer than their parent.
            doomed.sort_by(|a, b| b.len().cmp(&a.len()));
            for path in doomed {
                state.nodes.remove(&path);
                state.emit(EventKind::Deleted, &path);
                state.emit(EventKind::ChildrenChanged, &parent_path(&path));
            }
        }
        self.drain();
    }

    pub(crate) fn create(
        &self,
        session: u64,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
    ) -> Result<String> {
        let created = {
            let mut state = self.lock();
            state.check_session(session, path)?;
            let parent = parent_path(path);
            if !state.nodes.contains_key(&parent) {
                return Err(ErrorKind::NoNode(parent).into());
            }
            let (ephemeral, sequential) = match mode {
                CreateMode::Persistent => (false, false),
                CreateMode::Ephemeral => (true, false),
                CreateMode::PersistentSequential => (false, true),
                CreateMode::EphemeralSequential => (true, true),
            };
            let created = if sequential {
                let counter = {
                    let node = state
                        .nodes
                        .get_mut(&parent)
                        .expect("mock parent node must exist");
                    let counter = node.counter;
                    node.counter += 1;
                    counter
                };
                format!("{}{:010}", path, counter)
            } else {
                path.to_string()
            };
            if state.nodes.contains_key(&created) {
                return Err(ErrorKind::NodeExists(created).into());
            }
            let ctime = state.clock;
            state.clock += 1;
            let owner = if ephemeral { Some(session) } else { None };
            state.nodes.insert(
                created.clone(),
                Node {
                    counter: 0,
                    ctime,
                    czxid: ctime,
                    data,
                    owner,
                },
            );
            state.emit(EventKind::Created, &created);
            state.emit(EventKind::ChildrenChanged, &parent);
            created
        };
        self.drain();
        Ok(created)
    }

    pub(crate) fn delete(&self, session: u64, path: &str) -> Result<()> {
        {
            let mut state = self.lock();
            state.check_session(session, path)?;
            if !state.nodes.contains_key(path) {
                return Err(ErrorKind::NoNode(path.to_string()).into());
            }
            let prefix = format!("{}/", path);
            if state.nodes.keys().any(|key| key.starts_with(&prefix)) {
                return Err(ErrorKind::NotEmpty(path.to_string()).into());
            }
            state.nodes.remove(path);
            state.emit(EventKind::Deleted, path);
            state.emit(EventKind::ChildrenChanged, &parent_path(path));
        }
        self.drain();
        Ok(())
    }

    pub(crate) fn stat(&self, session: u64, path: &str) -> Result<Option<NodeStat>> {
        let state = self.lock();
        state.check_session(session, path)?;
        Ok(state.nodes.get(path).map(|node| NodeStat {
            czxid: node.czxid,
            ctime: node.ctime,
        }))
    }

    pub(crate) fn get_data(&self, session: u64, path: &str) -> Result<(Vec<u8>, NodeStat)> {
        let state = self.lock();
        state.check_session(session, path)?;
        match state.nodes.get(path) {
            Some(node) => Ok((
                node.data.clone(),
                NodeStat {
                    czxid: node.czxid,
                    ctime: node.ctime,
                },
            )),
            None => Err(ErrorKind::NoNode(path.to_string()).into()),
        }
    }

    pub(crate) fn get_children(&self, session: u64, path: &str) -> Result<Vec<String>> {
        let state = self.lock();
        state.check_session(session, path)?;
        if !state.nodes.contains_key(path) {
            return Err(ErrorKind::NoNode(path.to_string()).into());
        }
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        let children = state
            .nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let rest = &key[prefix.len()..];
                if rest.is_empty() || rest.contains('/') {
                    None
                } else {
                    Some(rest.to_string())
                }
            })
            .collect();
        Ok(children)
    }

    pub(crate) fn register(
        &self,
        session: u64,
        path: &str,
        callback: NodeCallback,
    ) -> Result<Subscription> {
        let mut state = self.lock();
        state.check_session(session, path)?;
        let id = state.next_subscription;
        state.next_subscription += 1;
        state.watches.insert(
            id,
            Watch {
                callback,
                path: path.to_string(),
                session,
            },
        );
        Ok(Subscription(id))
    }

    pub(crate) fn register_session(
        &self,
        session: u64,
        callback: SessionCallback,
    ) -> Result<Subscription> {
        let mut state = self.lock();
        state.check_session(session, "/")?;
        let id = state.next_subscription;
        state.next_subscription += 1;
        state
            .session_watches
            .insert(id, SessionWatch { callback, session });
        Ok(Subscription(id))
    }

    pub(crate) fn unregister(&self, subscription: Subscription) {
        let mut state = self.lock();
        state.watches.remove(&subscription.0);
        state.session_watches.remove(&subscription.0);
    }

    pub(crate) fn connected(&self, session: u64) -> bool {
        let state = self.lock();
        state.sessions.contains(&session)
    }
}

impl Tree {
    fn lock(&self) -> ::std::sync::MutexGuard<TreeState> {
        self.state.lock().expect("mock tree lock poisoned")
    }

    /// Deliver queued events, one batch owner at a time.
    ///
    /// Callbacks run without the tree mutex; mutations they perform are
    /// appended to the queue and delivered by the active drainer.
    fn drain(&self) {
        loop {
            let job = {
                let mut state = self.lock();
                if state.dispatching {
                    return;
                }
                match state.queue.pop_front() {
                    None => return,
                    Some(job) => {
                        state.dispatching = true;
                        job
                    }
                }
            };
            match job {
                Job::Node {
                    event,
                    subscription,
                } => {
                    let callback = {
                        let state = self.lock();
                        state
                            .watches
                            .get(&subscription)
                            .map(|watch| Arc::clone(&watch.callback))
                    };
                    if let Some(callback) = callback {
                        callback(&event);
                    }
                }
                Job::Session {
                    event,
                    subscription,
                } => {
                    let callback = {
                        let state = self.lock();
                        state
                            .session_watches
                            .get(&subscription)
                            .map(|watch| Arc::clone(&watch.callback))
                    };
                    if let Some(callback) = callback {
                        callback(event);
                    }
                }
            }
            let mut state = self.lock();
            state.dispatching = false;
        }
    }
}

impl TreeState {
    fn check_session(&self, session: u64, path: &str) -> Result<()> {
        if self.sessions.contains(&session) {
            return Ok(());
        }
        Err(ErrorKind::SessionInterrupted(path.to_string()).into())
    }

    /// Queue an event for every live watch on `path`.
    fn emit(&mut self, kind: EventKind, path: &str) {
        let jobs: Vec<Job> = self
            .watches
            .iter()
            .filter(|(_, watch)| watch.path == path && self.sessions.contains(&watch.session))
            .map(|(id, _)| Job::Node {
                event: NodeEvent {
                    kind,
                    path: path.to_string(),
                },
                subscription: *id,
            })
            .collect();
        self.queue.extend(jobs);
    }
}

/// A single session against the shared in-memory tree.
pub(crate) struct MemorySession {
    id: u64,
    tree: Arc<Tree>,
}

impl MemorySession {
    pub(crate) fn new(tree: Arc<Tree>) -> MemorySession {
        let id = tree.new_session();
        MemorySession { id, tree }
    }

    pub(crate) fn expire(&self) {
        self.tree.expire(self.id);
    }
}

impl Backend for MemorySession {
    fn connected(&self) -> bool {
        self.tree.connected(self.id)
    }

    fn create(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> Result<String> {
        self.tree.create(self.id, path, data, mode)
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.tree.delete(self.id, path)
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.tree.stat(self.id, path)?.is_some())
    }

    fn stat(&self, path: &str) -> Result<Option<NodeStat>> {
        self.tree.stat(self.id, path)
    }

    fn get_data(&self, path: &str) -> Result<(Vec<u8>, NodeStat)> {
        self.tree.get_data(self.id, path)
    }

    fn get_children(&self, path: &str) -> Result<Vec<String>> {
        self.tree.get_children(self.id, path)
    }

    fn mkdirp(&self, path: &str) -> Result<()> {
        let mut current = String::with_capacity(path.len());
        for part in path.split('/').filter(|part| !part.is_empty()) {
            current.push('/');
            current.push_str(part);
            match self.tree.create(self.id, &current, Vec::new(), CreateMode::Persistent) {
                Ok(_) => (),
                Err(ref error) if error.kind().is_node_exists() => (),
                Err(error) => return Err(error),
            };
        }
        Ok(())
    }

    fn register(&self, path: &str, callback: NodeCallback) -> Result<Subscription> {
        self.tree.register(self.id, path, callback)
    }

    fn register_session(&self, callback: SessionCallback) -> Result<Subscription> {
        self.tree.register_session(self.id, callback)
    }

    fn unregister(&self, subscription: Subscription) {
        self.tree.unregister(subscription);
    }
}
