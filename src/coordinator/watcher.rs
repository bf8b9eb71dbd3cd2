use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use slog::debug;
use slog::Logger;

use super::super::backend::Backend;
use super::super::backend::EventKind;
use super::super::backend::NodeCallback;
use super::super::backend::SessionCallback;
use super::super::backend::SessionEvent;
use super::super::ErrorKind;
use super::super::Result;

/// Waiter that blocks a caller until a node is deleted.
///
/// The waiter subscribes to deletion events for the path and to session
/// interruptions, then parks on a condition variable. Existence is
/// re-checked after every wake up, so a path recreated before the waiter
/// runs simply re-enters the wait.
#[derive(Clone)]
pub struct NodeDeletionWatcher {
    inner: Arc<WatcherInner>,
}

impl NodeDeletionWatcher {
    pub fn new(backend: Arc<dyn Backend>, path: String, logger: Logger) -> NodeDeletionWatcher {
        NodeDeletionWatcher {
            inner: Arc::new(WatcherInner {
                backend,
                logger,
                path,
                signal: Condvar::new(),
                state: Mutex::new(WatcherState::default()),
            }),
        }
    }

    /// Check if a `wait` caller is currently parked on the condition variable.
    pub fn blocked(&self) -> bool {
        let state = self
            .inner
            .state
            .lock()
            .expect("NodeDeletionWatcher state lock poisoned");
        state.blocked
    }

    /// Path this watcher waits on.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Block until the watched node no longer exists.
    ///
    /// Returns as soon as the node is missing, including when it never
    /// existed in the first place. Fails with `ErrorKind::SessionInterrupted`
    /// if the session is lost or the client is closed while waiting.
    pub fn wait(&self) -> Result<()> {
        let inner = &self.inner;
        // Subscribe before the first existence check so a deletion cannot
        // slip between the check and the watch.
        let node_events = {
            let closure = Arc::clone(inner);
            let callback: NodeCallback = Arc::new(move |event| {
                if let EventKind::Deleted = event.kind {
                    closure.notify(false);
                }
            });
            inner.backend.register(&inner.path, callback)?
        };
        let session_events = {
            let closure = Arc::clone(inner);
            let callback: SessionCallback = Arc::new(move |event| {
                if let SessionEvent::Expired = event {
                    closure.notify(true);
                }
            });
            match inner.backend.register_session(callback) {
                Ok(subscription) => subscription,
                Err(error) => {
                    inner.backend.unregister(node_events);
                    return Err(error);
                }
            }
        };
        let result = inner.wait_for_deletion();
        inner.backend.unregister(node_events);
        inner.backend.unregister(session_events);
        result
    }

    /// Test aid: block until `wait` has parked, failing after `timeout`.
    pub fn wait_until_blocked(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self
            .inner
            .state
            .lock()
            .expect("NodeDeletionWatcher state lock poisoned");
        while !state.blocked {
            let now = Instant::now();
            if now >= deadline {
                return Err(ErrorKind::WaitTimeout("deletion watcher to block").into());
            }
            let (new_state, _) = self
                .inner
                .signal
                .wait_timeout(state, deadline - now)
                .expect("NodeDeletionWatcher state lock poisoned");
            state = new_state;
        }
        Ok(())
    }
}

struct WatcherInner {
    backend: Arc<dyn Backend>,
    logger: Logger,
    path: String,
    signal: Condvar,
    state: Mutex<WatcherState>,
}

#[derive(Default)]
struct WatcherState {
    blocked: bool,
    interrupted: bool,
    pending: bool,
}

impl WatcherInner {
    /// Wake the waiter for an event on the watched path or the session.
    fn notify(&self, interrupted: bool) {
        let mut state = self
            .state
            .lock()
            .expect("NodeDeletionWatcher state lock poisoned");
        if interrupted {
            state.interrupted = true;
        }
        state.pending = true;
        self.signal.notify_all();
    }

    fn wait_for_deletion(&self) -> Result<()> {
        loop {
            {
                let mut state = self
                    .state
                    .lock()
                    .expect("NodeDeletionWatcher state lock poisoned");
                if state.interrupted {
                    state.blocked = false;
                    return Err(ErrorKind::SessionInterrupted(self.path.clone()).into());
                }
                // Events delivered from here on trigger another check.
                state.pending = false;
            }
            let exists = match self.backend.exists(&self.path) {
                Ok(exists) => exists,
                Err(error) => {
                    self.clear_blocked();
                    return Err(error);
                }
            };
            if !exists {
                debug!(self.logger, "Watched node is gone"; "path" => &self.path);
                self.clear_blocked();
                return Ok(());
            }
            let mut state = self
                .state
                .lock()
                .expect("NodeDeletionWatcher state lock poisoned");
            while !state.pending && !state.interrupted {
                state.blocked = true;
                self.signal.notify_all();
                state = self
                    .signal
                    .wait(state)
                    .expect("NodeDeletionWatcher state lock poisoned");
            }
            state.blocked = false;
        }
    }

    fn clear_blocked(&self) {
        let mut state = self
            .state
            .lock()
            .expect("NodeDeletionWatcher state lock poisoned");
        state.blocked = false;
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use slog::o;
    use slog::Discard;
    use slog::Logger;

    use super::super::super::backend::CreateMode;
    use super::super::super::mock::MockCoordinator;
    use super::NodeDeletionWatcher;

    fn logger() -> Logger {
        Logger::root(Discard, o!())
    }

    #[test]
    fn missing_node_returns_immediately() {
        let mock = MockCoordinator::new(logger());
        let client = mock.client();
        let watcher =
            NodeDeletionWatcher::new(client.backend(), "/not/there".to_string(), logger());
        watcher.wait().expect("wait to return for a missing node");
        assert!(!watcher.blocked());
    }

    #[test]
    fn wakes_on_deletion() {
        let mock = MockCoordinator::new(logger());
        let client = mock.client();
        mock.create("/watched", Vec::new(), CreateMode::Persistent);
        let watcher = NodeDeletionWatcher::new(client.backend(), "/watched".to_string(), logger());
        let handle = {
            let watcher = watcher.clone();
            thread::spawn(move || watcher.wait())
        };
        watcher
            .wait_until_blocked(Duration::from_secs(1))
            .expect("watcher to block");
        assert!(watcher.blocked());
        mock.delete("/watched");
        handle
            .join()
            .expect("watcher thread panicked")
            .expect("wait to resolve after deletion");
        assert!(!watcher.blocked());
    }

    #[test]
    fn session_interruption_unblocks() {
        let mock = MockCoordinator::new(logger());
        let client = mock.client();
        mock.create("/watched", Vec::new(), CreateMode::Persistent);
        let watcher = NodeDeletionWatcher::new(client.backend(), "/watched".to_string(), logger());
        let handle = {
            let watcher = watcher.clone();
            thread::spawn(move || watcher.wait())
        };
        watcher
            .wait_until_blocked(Duration::from_secs(1))
            .expect("watcher to block");
        client.expire();
        let result = handle.join().expect("watcher thread panicked");
        match result {
            Ok(()) => panic!("wait resolved without a session"),
            Err(error) => assert!(error.kind().is_session_interrupted()),
        }
    }

    #[test]
    fn wait_until_blocked_times_out() {
        let mock = MockCoordinator::new(logger());
        let client = mock.client();
        let watcher = NodeDeletionWatcher::new(client.backend(), "/idle".to_string(), logger());
        let result = watcher.wait_until_blocked(Duration::from_millis(20));
        assert!(result.is_err());
    }
}
