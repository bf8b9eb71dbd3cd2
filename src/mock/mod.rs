use std::sync::Arc;

use slog::Logger;

use super::backend::Backend;
use super::backend::CreateMode;
use super::config::Config;
use super::coordinator::Coordinator;

mod backend;

use self::backend::MemorySession;
use self::backend::Tree;

/// Helper to mock the coordination service in tests.
///
/// A `MockCoordinator` owns an in-memory node tree shared by any number
/// of simulated sessions, each obtained with `client`. The raw tree
/// helpers bypass session semantics for test setup and assertions and
/// panic on invalid use.
pub struct MockCoordinator {
    admin: Arc<MemorySession>,
    logger: Logger,
    tree: Arc<Tree>,
}

impl MockCoordinator {
    pub fn new(logger: Logger) -> MockCoordinator {
        let tree = Arc::new(Tree::new());
        let admin = Arc::new(MemorySession::new(Arc::clone(&tree)));
        MockCoordinator {
            admin,
            logger,
            tree,
        }
    }

    /// Open a new session against the shared in-memory tree.
    pub fn client(&self) -> MockClient {
        MockClient {
            logger: self.logger.clone(),
            session: Arc::new(MemorySession::new(Arc::clone(&self.tree))),
        }
    }

    /// Create a node directly, for test setup.
    pub fn create(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> String {
        self.admin
            .create(path, data, mode)
            .expect("mock node creation failed")
    }

    /// Delete a node directly, for test setup.
    pub fn delete(&self, path: &str) {
        self.admin
            .delete(path)
            .expect("mock node deletion failed")
    }

    /// Delete a whole subtree directly, for test setup.
    pub fn delete_recursive(&self, path: &str) {
        self.tree.delete_recursive(path);
    }

    /// Check a node's existence directly.
    pub fn exists(&self, path: &str) -> bool {
        self.admin
            .exists(path)
            .expect("mock node lookup failed")
    }

    /// Read a node's content directly; `None` if the node is missing.
    pub fn data(&self, path: &str) -> Option<Vec<u8>> {
        match self.admin.get_data(path) {
            Ok((data, _)) => Some(data),
            Err(_) => None,
        }
    }

    /// List a node's children directly; empty if the node is missing.
    pub fn children(&self, path: &str) -> Vec<String> {
        self.admin.get_children(path).unwrap_or_default()
    }
}

/// A simulated client session against a `MockCoordinator` tree.
pub struct MockClient {
    logger: Logger,
    session: Arc<MemorySession>,
}

impl MockClient {
    /// Coordination backend handle for this session.
    pub fn backend(&self) -> Arc<dyn Backend> {
        Arc::clone(&self.session) as Arc<dyn Backend>
    }

    /// A `Coordinator` facade, with default roots, over this session.
    pub fn coordinator(&self) -> Coordinator {
        Coordinator::with_backend(self.backend(), Config::default(), self.logger.clone())
    }

    /// Expire the session.
    ///
    /// Its ephemeral nodes are reaped before any watch event is
    /// delivered, like a real session teardown, and session watchers
    /// receive `SessionEvent::Expired`.
    pub fn expire(&self) {
        self.session.expire();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;

    use slog::o;
    use slog::Discard;
    use slog::Logger;

    use super::super::backend::Backend;
    use super::super::backend::CreateMode;
    use super::super::backend::EventKind;
    use super::MockCoordinator;

    fn mock() -> MockCoordinator {
        MockCoordinator::new(Logger::root(Discard, o!()))
    }

    #[test]
    fn sequential_names_share_the_parent_counter() {
        let mock = mock();
        let backend = mock.client().backend();
        backend.mkdirp("/queue").expect("parent to build");
        let first = backend
            .create("/queue/ex", Vec::new(), CreateMode::EphemeralSequential)
            .expect("first node to create");
        let second = backend
            .create("/queue/sh", Vec::new(), CreateMode::EphemeralSequential)
            .expect("second node to create");
        assert_eq!(first, "/queue/ex0000000000");
        assert_eq!(second, "/queue/sh0000000001");
    }

    #[test]
    fn recreated_parent_restarts_the_counter() {
        let mock = mock();
        let backend = mock.client().backend();
        backend.mkdirp("/queue").expect("parent to build");
        backend
            .create("/queue/ex", Vec::new(), CreateMode::EphemeralSequential)
            .expect("node to create");
        mock.delete_recursive("/queue");
        backend.mkdirp("/queue").expect("parent to rebuild");
        let restarted = backend
            .create("/queue/ex", Vec::new(), CreateMode::EphemeralSequential)
            .expect("node to create");
        assert_eq!(restarted, "/queue/ex0000000000");
    }

    #[test]
    fn expire_reaps_only_owned_ephemerals() {
        let mock = mock();
        let dying = mock.client();
        let survivor = mock.client();
        dying
            .backend()
            .create("/doomed", Vec::new(), CreateMode::Ephemeral)
            .expect("ephemeral to create");
        survivor
            .backend()
            .create("/kept", Vec::new(), CreateMode::Ephemeral)
            .expect("ephemeral to create");
        mock.create("/stable", Vec::new(), CreateMode::Persistent);
        dying.expire();
        assert!(!mock.exists("/doomed"));
        assert!(mock.exists("/kept"));
        assert!(mock.exists("/stable"));
        assert!(!dying.backend().connected());
        assert!(survivor.backend().connected());
    }

    #[test]
    fn delete_refuses_non_empty_nodes() {
        let mock = mock();
        let backend = mock.client().backend();
        backend.mkdirp("/a/b").expect("tree to build");
        match backend.delete("/a") {
            Ok(()) => panic!("non-empty delete succeeded"),
            Err(error) => assert!(error.kind().is_not_empty()),
        }
    }

    #[test]
    fn watches_fire_for_creation_and_deletion() {
        let mock = mock();
        let backend = mock.client().backend();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let subscription = {
            let seen = Arc::clone(&seen);
            backend
                .register(
                    "/observed",
                    Arc::new(move |event| {
                        seen.lock().expect("seen lock").push(event.kind);
                    }),
                )
                .expect("watch to register")
        };
        mock.create("/observed", Vec::new(), CreateMode::Persistent);
        mock.delete("/observed");
        assert_eq!(
            *seen.lock().expect("seen lock"),
            vec![EventKind::Created, EventKind::Deleted]
        );
        backend.unregister(subscription);
        mock.create("/observed", Vec::new(), CreateMode::Persistent);
        assert_eq!(seen.lock().expect("seen lock").len(), 2);
    }
}
