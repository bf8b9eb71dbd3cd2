use std::sync::Arc;

use super::Result;

pub mod zookeeper;

/// Callback invoked for node events on a registered path.
pub type NodeCallback = Arc<dyn Fn(&NodeEvent) + Send + Sync>;

/// Callback invoked for session lifecycle events.
pub type SessionCallback = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// Coordination service client interface consumed by locks and elections.
///
/// The contract mirrors the node model of Zookeeper-like services:
/// a tree of nodes with ephemeral and sequential creation modes,
/// per-path event registration and a session whose death reaps the
/// ephemeral nodes it created.
pub trait Backend: Send + Sync {
    /// Check if the session behind this client is currently usable.
    fn connected(&self) -> bool;

    /// Create a node, returning the path actually created.
    ///
    /// Sequential modes append a 10-digit, zero-padded counter to the
    /// requested path; the counter is scoped to the parent node.
    fn create(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> Result<String>;

    /// Delete a node.
    ///
    /// Fails with `ErrorKind::NoNode` if the node does not exist and
    /// `ErrorKind::NotEmpty` if it still has children.
    fn delete(&self, path: &str) -> Result<()>;

    /// Check if a node exists.
    fn exists(&self, path: &str) -> Result<bool>;

    /// Fetch a node's metadata, `None` if the node does not exist.
    fn stat(&self, path: &str) -> Result<Option<NodeStat>>;

    /// Fetch a node's content, failing with `ErrorKind::NoNode` if missing.
    fn get_data(&self, path: &str) -> Result<(Vec<u8>, NodeStat)>;

    /// List the basenames of a node's children, in no particular order.
    ///
    /// Fails with `ErrorKind::NoNode` if the parent does not exist.
    fn get_children(&self, path: &str) -> Result<Vec<String>>;

    /// Create the given path, and any missing ancestor, as persistent nodes.
    fn mkdirp(&self, path: &str) -> Result<()>;

    /// Subscribe to events for a path until the subscription is dropped.
    ///
    /// The path does not need to exist: creation of a watched path is
    /// itself an event.
    fn register(&self, path: &str, callback: NodeCallback) -> Result<Subscription>;

    /// Subscribe to session lifecycle events.
    fn register_session(&self, callback: SessionCallback) -> Result<Subscription>;

    /// Remove a subscription created by `register` or `register_session`.
    fn unregister(&self, subscription: Subscription);
}

/// Node creation modes supported by the coordination service.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum CreateMode {
    Persistent,
    Ephemeral,
    PersistentSequential,
    EphemeralSequential,
}

/// Kinds of node events delivered to registered callbacks.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum EventKind {
    Created,
    Deleted,
    DataChanged,
    ChildrenChanged,
}

/// A node event delivered to a registered callback.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct NodeEvent {
    pub kind: EventKind,
    pub path: String,
}

/// Node metadata exposed to the core.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct NodeStat {
    /// Transaction ID that created the node.
    pub czxid: i64,

    /// Node creation timestamp, the parent-identity token for locks.
    pub ctime: i64,
}

/// Session lifecycle events delivered to registered callbacks.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    Expired,
}

/// Opaque handle to an event registration.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct Subscription(pub u64);
