use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use slog::debug;
use slog::error;
use slog::warn;
use slog::Logger;

use super::super::backend::Backend;
use super::super::metrics::LOCK_ACQUIRE_FAIL;
use super::super::metrics::LOCK_ACQUIRE_TOTAL;
use super::super::metrics::LOCK_CONTENDED_TOTAL;
use super::super::metrics::LOCK_DROP_FAIL;
use super::super::metrics::LOCK_DROP_TOTAL;
use super::super::metrics::LOCK_INTERRUPTED_TOTAL;
use super::super::metrics::LOCK_RELEASE_FAIL;
use super::super::metrics::LOCK_RELEASE_TOTAL;
use super::super::Error;
use super::super::ErrorKind;
use super::super::Result;
use super::watcher::NodeDeletionWatcher;
use super::znode;
use super::znode::SequencedNode;
use super::znode::EXCLUSIVE_PREFIX;
use super::znode::SHARED_PREFIX;

/// Queueing policy applied to the sequence-ordered children of a lock.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum LockKind {
    /// Granted only to the request at the head of the queue.
    Exclusive,

    /// Granted to every request not preceded by an exclusive one.
    Shared,
}

impl LockKind {
    pub(crate) fn prefix(self) -> &'static str {
        match self {
            LockKind::Exclusive => EXCLUSIVE_PREFIX,
            LockKind::Shared => SHARED_PREFIX,
        }
    }

    /// Sibling whose deletion can promote the request at `position`.
    ///
    /// `None` means the request owns the lock right now.
    fn blocker(self, siblings: &[SequencedNode], position: usize) -> Option<&SequencedNode> {
        match self {
            // Exclusive requests wait on their immediate predecessor,
            // whatever its kind.
            LockKind::Exclusive => match position {
                0 => None,
                position => Some(&siblings[position - 1]),
            },
            // Shared requests only wait on the nearest preceding
            // exclusive request.
            LockKind::Shared => siblings[..position].iter().rev().find(|node| node.exclusive()),
        }
    }

    /// Would a fresh request of this kind acquire against these holders?
    fn acquirable(self, holders: &[SequencedNode]) -> bool {
        match self {
            LockKind::Exclusive => holders.is_empty(),
            LockKind::Shared => !holders.iter().any(|node| node.exclusive()),
        }
    }

    /// Node currently considered the owner of the lock, if any.
    fn owner(self, siblings: &[SequencedNode]) -> Option<&SequencedNode> {
        match self {
            LockKind::Exclusive => siblings.first(),
            // The writer readers wait on, else any reader.
            LockKind::Shared => siblings
                .iter()
                .find(|node| node.exclusive())
                .or_else(|| siblings.first()),
        }
    }
}

/// A named distributed lock, exclusive or shared.
///
/// Requests queue as sequential ephemeral children of a per-name parent
/// node; ownership is decided by the `LockKind` policy over the sequence
/// order. Crashed holders are expelled by the coordination service when
/// their session dies.
///
/// Cloning shares the same lock instance. Mutating operations (`lock`,
/// `unlock`) must not be invoked concurrently from multiple threads;
/// observation (`locked`, `waiting`) is safe from anywhere.
#[derive(Clone)]
pub struct Locker {
    inner: Arc<LockerInner>,
}

impl Locker {
    pub(crate) fn new(
        backend: Arc<dyn Backend>,
        kind: LockKind,
        root: &str,
        name: String,
        data: Vec<u8>,
        logger: Logger,
    ) -> Result<Locker> {
        if name.is_empty() {
            return Err(ErrorKind::BadArguments("lock name must not be empty").into());
        }
        let parent_path = format!("{}/{}", root, znode::escape_name(&name));
        Ok(Locker {
            inner: Arc::new(LockerInner {
                backend,
                data,
                kind,
                logger,
                name,
                notify: Condvar::new(),
                parent_path,
                state: Mutex::new(LockerState::default()),
            }),
        })
    }

    /// Attempt to acquire the lock.
    ///
    /// Returns `Ok(true)` once the lock is owned. When the lock is
    /// contended a non-blocking call removes its queue node and returns
    /// `Ok(false)`; a blocking call waits for the deletion of the single
    /// node whose removal can promote it, re-applying the policy after
    /// every promotion until the lock is owned.
    ///
    /// Calling `lock` while the lock is already held succeeds without
    /// creating another queue node. Only one attempt may be in flight
    /// per instance.
    pub fn lock(&self, blocking: bool) -> Result<bool> {
        LOCK_ACQUIRE_TOTAL.inc();
        {
            let mut state = self.inner.lock_state();
            if state.locked {
                return Ok(true);
            }
            if state.attempting {
                return Err(
                    ErrorKind::BadArguments("another lock attempt is already in flight").into(),
                );
            }
            state.attempting = true;
        }
        let result = self.inner.attempt(blocking);
        {
            let mut state = self.inner.lock_state();
            state.attempting = false;
            state.watcher = None;
            self.inner.notify.notify_all();
        }
        if result.is_err() {
            LOCK_ACQUIRE_FAIL.inc();
        }
        result
    }

    /// Release the lock.
    ///
    /// Returns `Ok(true)` when this instance held the lock and its queue
    /// node was cleaned up. Idempotent: releasing an unheld lock returns
    /// `Ok(false)` without side effects, as does releasing a lock whose
    /// parent node was replaced since acquisition (the replacement is
    /// left untouched).
    pub fn unlock(&self) -> Result<bool> {
        LOCK_RELEASE_TOTAL.inc();
        let result = self.inner.release();
        if result.is_err() {
            LOCK_RELEASE_FAIL.inc();
        }
        result
    }

    /// Acquire the lock, run `body` and release on every exit path.
    pub fn with_lock<F, T>(&self, body: F) -> Result<T>
    where
        F: FnOnce() -> T,
    {
        self.lock(true)?;
        let guard = ReleaseGuard { inner: &self.inner };
        let result = body();
        drop(guard);
        Ok(result)
    }

    /// Local view of ownership; no server round-trip.
    pub fn locked(&self) -> bool {
        self.inner.lock_state().locked
    }

    /// Check if a blocking attempt is currently parked behind a predecessor.
    pub fn waiting(&self) -> bool {
        let state = self.inner.lock_state();
        state
            .watcher
            .as_ref()
            .map(|watcher| watcher.blocked())
            .unwrap_or(false)
    }

    /// Path of the queue node backing the current acquisition, if any.
    pub fn lock_path(&self) -> Option<String> {
        self.inner.lock_state().lock_path.clone()
    }

    /// Server-side check: would a fresh request acquire right now?
    pub fn acquirable(&self) -> Result<bool> {
        self.inner.acquirable()
    }

    /// Raise unless every ownership invariant still holds on the server.
    ///
    /// Guards callers against silent session loss and replaced parents:
    /// the instance must believe it is locked, the client must be
    /// connected, the queue node must exist, the parent-identity token
    /// must match and the policy must still rank this request first.
    pub fn assert_held(&self) -> Result<()> {
        self.inner.assert_held()
    }

    /// Content of the node currently considered the lock owner.
    pub fn owner_data(&self) -> Result<Option<Vec<u8>>> {
        self.inner.owner_data()
    }

    /// Test aid: block until a pending `lock(true)` is parked.
    pub fn wait_until_blocked(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let watcher = {
            let mut state = self.inner.lock_state();
            loop {
                if let Some(watcher) = state.watcher.clone() {
                    break watcher;
                }
                let now = Instant::now();
                if now >= deadline {
                    return Err(ErrorKind::WaitTimeout("lock attempt to start waiting").into());
                }
                let (new_state, _) = self
                    .inner
                    .notify
                    .wait_timeout(state, deadline - now)
                    .expect("Locker state lock poisoned");
                state = new_state;
            }
        };
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .unwrap_or_default();
        watcher.wait_until_blocked(remaining)
    }

    /// Name this lock was created with.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Queueing policy of this lock.
    pub fn kind(&self) -> LockKind {
        self.inner.kind
    }
}

struct LockerInner {
    backend: Arc<dyn Backend>,
    data: Vec<u8>,
    kind: LockKind,
    logger: Logger,
    name: String,
    notify: Condvar,
    parent_path: String,
    state: Mutex<LockerState>,
}

#[derive(Default)]
struct LockerState {
    attempting: bool,
    lock_path: Option<String>,
    locked: bool,
    parent_ctime: Option<i64>,
    watcher: Option<NodeDeletionWatcher>,
}

impl LockerInner {
    fn lock_state(&self) -> ::std::sync::MutexGuard<LockerState> {
        self.state.lock().expect("Locker state lock poisoned")
    }

    /// Run a single acquisition attempt.
    fn attempt(&self, blocking: bool) -> Result<bool> {
        let lock_path =
            znode::create_sequenced(&*self.backend, &self.parent_path, self.kind.prefix(), &self.data)?;
        // Remember the parent identity to never delete a parent recreated
        // by someone else after our session loses the lock.
        let parent_ctime = match self.backend.stat(&self.parent_path)? {
            Some(stat) => stat.ctime,
            None => return Err(ErrorKind::NoNode(self.parent_path.clone()).into()),
        };
        let node_name = znode::basename(&lock_path).to_string();
        {
            let mut state = self.lock_state();
            state.lock_path = Some(lock_path);
            state.parent_ctime = Some(parent_ctime);
        }
        loop {
            let siblings = match znode::sequenced_children(&*self.backend, &self.parent_path) {
                Ok(siblings) => siblings,
                Err(error) => {
                    let _ = self.discard();
                    return Err(error);
                }
            };
            let position = match siblings.iter().position(|node| node.name == node_name) {
                Some(position) => position,
                None => {
                    // Our node vanished from the queue: the session is
                    // gone or the queue was removed from under us.
                    self.forget();
                    return Err(ErrorKind::LockLost(self.name.clone()).into());
                }
            };
            let blocker = match self.kind.blocker(&siblings, position) {
                None => {
                    let mut state = self.lock_state();
                    state.locked = true;
                    self.notify.notify_all();
                    debug!(
                        self.logger, "Acquired lock";
                        "lock" => &self.name, "node" => &node_name
                    );
                    return Ok(true);
                }
                Some(node) => format!("{}/{}", self.parent_path, node.name),
            };
            if !blocking {
                self.discard()?;
                return Ok(false);
            }
            LOCK_CONTENDED_TOTAL.inc();
            let watcher = NodeDeletionWatcher::new(
                Arc::clone(&self.backend),
                blocker,
                self.logger.clone(),
            );
            {
                let mut state = self.lock_state();
                state.watcher = Some(watcher.clone());
                self.notify.notify_all();
            }
            debug!(
                self.logger, "Waiting on lock predecessor";
                "lock" => &self.name, "predecessor" => watcher.path()
            );
            if let Err(error) = watcher.wait() {
                if error.kind().is_session_interrupted() {
                    LOCK_INTERRUPTED_TOTAL.inc();
                    // The queue node dies with the session, nothing to
                    // clean up server-side.
                    self.forget();
                } else {
                    let _ = self.discard();
                }
                return Err(error);
            }
            let mut state = self.lock_state();
            state.watcher = None;
        }
    }

    /// Release the lock if held; see `Locker::unlock`.
    fn release(&self) -> Result<bool> {
        let mut state = self.lock_state();
        if !state.locked {
            return Ok(false);
        }
        let outcome = self.cleanup(&state);
        state.locked = false;
        state.lock_path = None;
        state.parent_ctime = None;
        state.watcher = None;
        self.notify.notify_all();
        outcome
    }

    /// Remove our queue node and, opportunistically, the parent.
    ///
    /// Nothing is deleted when the parent-identity check fails: the
    /// parent (and any same-named child) belongs to someone else.
    fn cleanup(&self, state: &LockerState) -> Result<bool> {
        let lock_path = match state.lock_path.as_ref() {
            Some(path) => path.clone(),
            None => return Ok(false),
        };
        let recorded = match state.parent_ctime {
            Some(ctime) => ctime,
            None => return Ok(false),
        };
        let matched = match self.backend.stat(&self.parent_path)? {
            Some(stat) => stat.ctime == recorded,
            None => false,
        };
        if !matched {
            warn!(
                self.logger, "Lock parent was replaced, leaving its nodes untouched";
                "lock" => &self.name, "parent" => &self.parent_path
            );
            return Ok(false);
        }
        match self.backend.delete(&lock_path) {
            Ok(()) => (),
            Err(ref error) if error.kind().is_no_node() => (),
            Err(error) => return Err(error),
        };
        // Drop the parent when we were its last user.
        match self.backend.delete(&self.parent_path) {
            Ok(()) => (),
            Err(ref error) if error.kind().is_no_node() || error.kind().is_not_empty() => (),
            Err(error) => return Err(error),
        };
        Ok(true)
    }

    /// Remove the queue node of an attempt that did not acquire.
    fn discard(&self) -> Result<()> {
        let mut state = self.lock_state();
        let result = self.cleanup(&state);
        state.locked = false;
        state.lock_path = None;
        state.parent_ctime = None;
        state.watcher = None;
        self.notify.notify_all();
        result.map(|_| ())
    }

    /// Clear local bookkeeping without touching the server.
    fn forget(&self) {
        let mut state = self.lock_state();
        state.locked = false;
        state.lock_path = None;
        state.parent_ctime = None;
        state.watcher = None;
        self.notify.notify_all();
    }

    fn acquirable(&self) -> Result<bool> {
        let (locked, own) = {
            let state = self.lock_state();
            (state.locked, state.lock_path.clone())
        };
        if locked {
            return Ok(true);
        }
        let siblings = match znode::sequenced_children(&*self.backend, &self.parent_path) {
            Ok(siblings) => siblings,
            Err(ref error) if error.kind().is_no_node() => return Ok(true),
            Err(error) => return Err(error),
        };
        let own = own.map(|path| znode::basename(&path).to_string());
        let holders: Vec<SequencedNode> = siblings
            .into_iter()
            .filter(|node| own.as_deref() != Some(node.name.as_str()))
            .collect();
        Ok(self.kind.acquirable(&holders))
    }

    fn assert_held(&self) -> Result<()> {
        let (lock_path, recorded) = {
            let state = self.lock_state();
            if !state.locked {
                return Err(self.assertion("lock is not held"));
            }
            let path = match state.lock_path.clone() {
                Some(path) => path,
                None => return Err(self.assertion("no lock node recorded")),
            };
            let ctime = match state.parent_ctime {
                Some(ctime) => ctime,
                None => return Err(self.assertion("no parent identity recorded")),
            };
            (path, ctime)
        };
        if !self.backend.connected() {
            return Err(self.assertion("coordination client is not connected"));
        }
        if !self.backend.exists(&lock_path)? {
            return Err(self.assertion("lock node does not exist"));
        }
        match self.backend.stat(&self.parent_path)? {
            Some(ref stat) if stat.ctime == recorded => (),
            _ => return Err(self.assertion("lock parent was replaced")),
        };
        let siblings = znode::sequenced_children(&*self.backend, &self.parent_path)?;
        let name = znode::basename(&lock_path);
        let position = match siblings.iter().position(|node| node.name == name) {
            Some(position) => position,
            None => return Err(self.assertion("lock node is not queued")),
        };
        if self.kind.blocker(&siblings, position).is_some() {
            return Err(self.assertion("lock is not first in its queue"));
        }
        Ok(())
    }

    fn owner_data(&self) -> Result<Option<Vec<u8>>> {
        let siblings = match znode::sequenced_children(&*self.backend, &self.parent_path) {
            Ok(siblings) => siblings,
            Err(ref error) if error.kind().is_no_node() => return Ok(None),
            Err(error) => return Err(error),
        };
        let owner = match self.kind.owner(&siblings) {
            Some(node) => node.name.clone(),
            None => return Ok(None),
        };
        let path = format!("{}/{}", self.parent_path, owner);
        match self.backend.get_data(&path) {
            Ok((data, _)) => Ok(Some(data)),
            Err(ref error) if error.kind().is_no_node() => Ok(None),
            Err(error) => Err(error),
        }
    }

    fn assertion(&self, reason: &'static str) -> Error {
        ErrorKind::LockAssertionFailed(self.name.clone(), reason).into()
    }
}

impl Drop for LockerInner {
    fn drop(&mut self) {
        let locked = self.lock_state().locked;
        if !locked {
            return;
        }
        LOCK_DROP_TOTAL.inc();
        if let Err(error) = self.release() {
            LOCK_DROP_FAIL.inc();
            error!(
                self.logger, "Failed to release lock from destructor";
                "lock" => &self.name, "error" => %error
            );
        }
    }
}

/// Releases the lock when dropped, even if the scoped closure panicked.
struct ReleaseGuard<'a> {
    inner: &'a LockerInner,
}

impl<'a> Drop for ReleaseGuard<'a> {
    fn drop(&mut self) {
        if let Err(error) = self.inner.release() {
            error!(
                self.inner.logger, "Failed to release scoped lock";
                "lock" => &self.inner.name, "error" => %error
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::panic;
    use std::panic::AssertUnwindSafe;
    use std::thread;
    use std::time::Duration;

    use slog::o;
    use slog::Discard;
    use slog::Logger;

    use super::super::super::backend::CreateMode;
    use super::super::super::mock::MockClient;
    use super::super::super::mock::MockCoordinator;
    use super::super::super::ErrorKind;
    use super::Locker;

    fn logger() -> Logger {
        Logger::root(Discard, o!())
    }

    fn exclusive(client: &MockClient, name: &str) -> Locker {
        client
            .coordinator()
            .exclusive_lock(name, None)
            .expect("exclusive locker to build")
    }

    fn shared(client: &MockClient, name: &str) -> Locker {
        client
            .coordinator()
            .shared_lock(name, None)
            .expect("shared locker to build")
    }

    #[test]
    fn empty_name_is_rejected() {
        let mock = MockCoordinator::new(logger());
        let client = mock.client();
        match client.coordinator().exclusive_lock("", None) {
            Ok(_) => panic!("empty name accepted"),
            Err(error) => match error.kind() {
                ErrorKind::BadArguments(_) => (),
                kind => panic!("unexpected error kind: {:?}", kind),
            },
        }
    }

    #[test]
    fn uncontended_acquire_and_release() {
        let mock = MockCoordinator::new(logger());
        let client = mock.client();
        let locker = exclusive(&client, "foo");
        assert!(locker.lock(false).expect("lock to acquire"));
        assert!(locker.locked());
        assert_eq!(
            locker.lock_path(),
            Some("/_zklocking/foo/ex0000000000".to_string())
        );
        assert!(mock.exists("/_zklocking/foo/ex0000000000"));
        assert!(locker.unlock().expect("lock to release"));
        assert!(!locker.locked());
        assert_eq!(locker.lock_path(), None);
        assert!(!mock.exists("/_zklocking/foo/ex0000000000"));
        // The parent is dropped with its last user.
        assert!(!mock.exists("/_zklocking/foo"));
    }

    #[test]
    fn relock_while_held_is_a_noop() {
        let mock = MockCoordinator::new(logger());
        let client = mock.client();
        let locker = exclusive(&client, "foo");
        assert!(locker.lock(false).expect("lock to acquire"));
        assert!(locker.lock(true).expect("relock to succeed"));
        assert_eq!(mock.children("/_zklocking/foo").len(), 1);
    }

    #[test]
    fn name_slashes_are_escaped() {
        let mock = MockCoordinator::new(logger());
        let client = mock.client();
        let locker = exclusive(&client, "jobs/cleanup");
        assert!(locker.lock(false).expect("lock to acquire"));
        assert!(mock.exists("/_zklocking/jobs__cleanup"));
    }

    #[test]
    fn contended_nonblocking_returns_false() {
        let mock = MockCoordinator::new(logger());
        let owner = exclusive(&mock.client(), "foo");
        assert!(owner.lock(false).expect("owner to acquire"));
        let contender = exclusive(&mock.client(), "foo");
        assert!(!contender.lock(false).expect("contender attempt"));
        assert!(!contender.locked());
        // The transient queue node was removed.
        assert_eq!(mock.children("/_zklocking/foo").len(), 1);
    }

    #[test]
    fn blocking_acquire_hands_over() {
        let mock = MockCoordinator::new(logger());
        let owner = exclusive(&mock.client(), "foo");
        assert!(owner.lock(false).expect("owner to acquire"));
        let contender = exclusive(&mock.client(), "foo");
        let handle = {
            let contender = contender.clone();
            thread::spawn(move || contender.lock(true))
        };
        contender
            .wait_until_blocked(Duration::from_secs(1))
            .expect("contender to start waiting");
        assert!(contender.waiting());
        assert!(!contender.locked());
        assert!(owner.unlock().expect("owner to release"));
        assert!(handle
            .join()
            .expect("contender thread panicked")
            .expect("contender to acquire"));
        assert!(contender.locked());
        assert_eq!(
            contender.lock_path(),
            Some("/_zklocking/foo/ex0000000001".to_string())
        );
    }

    #[test]
    fn acquisition_follows_sequence_order() {
        let mock = MockCoordinator::new(logger());
        let first = exclusive(&mock.client(), "foo");
        assert!(first.lock(false).expect("first to acquire"));
        let second = exclusive(&mock.client(), "foo");
        let second_thread = {
            let second = second.clone();
            thread::spawn(move || second.lock(true))
        };
        second
            .wait_until_blocked(Duration::from_secs(1))
            .expect("second to start waiting");
        let third = exclusive(&mock.client(), "foo");
        let third_thread = {
            let third = third.clone();
            thread::spawn(move || third.lock(true))
        };
        third
            .wait_until_blocked(Duration::from_secs(1))
            .expect("third to start waiting");
        assert!(first.unlock().expect("first to release"));
        assert!(second_thread
            .join()
            .expect("second thread panicked")
            .expect("second to acquire"));
        assert!(!third.locked());
        assert!(second.unlock().expect("second to release"));
        assert!(third_thread
            .join()
            .expect("third thread panicked")
            .expect("third to acquire"));
    }

    #[test]
    fn shared_readers_do_not_block_each_other() {
        let mock = MockCoordinator::new(logger());
        let reader1 = shared(&mock.client(), "bar");
        let reader2 = shared(&mock.client(), "bar");
        assert!(reader1.lock(false).expect("first reader to acquire"));
        assert!(reader2.lock(false).expect("second reader to acquire"));
        assert!(reader1.locked());
        assert!(reader2.locked());
    }

    #[test]
    fn writer_waits_for_every_reader() {
        let mock = MockCoordinator::new(logger());
        let reader1 = shared(&mock.client(), "bar");
        let reader2 = shared(&mock.client(), "bar");
        assert!(reader1.lock(false).expect("first reader to acquire"));
        assert!(reader2.lock(false).expect("second reader to acquire"));
        let writer = exclusive(&mock.client(), "bar");
        let handle = {
            let writer = writer.clone();
            thread::spawn(move || writer.lock(true))
        };
        writer
            .wait_until_blocked(Duration::from_secs(1))
            .expect("writer to start waiting");
        assert!(reader1.unlock().expect("first reader to release"));
        // One reader left, the writer still waits.
        assert!(!writer.locked());
        assert!(reader2.unlock().expect("second reader to release"));
        assert!(handle
            .join()
            .expect("writer thread panicked")
            .expect("writer to acquire"));
    }

    #[test]
    fn reader_waits_for_writer() {
        let mock = MockCoordinator::new(logger());
        let writer = exclusive(&mock.client(), "bar");
        assert!(writer.lock(false).expect("writer to acquire"));
        let reader = shared(&mock.client(), "bar");
        assert!(!reader.lock(false).expect("reader attempt"));
        let handle = {
            let reader = reader.clone();
            thread::spawn(move || reader.lock(true))
        };
        reader
            .wait_until_blocked(Duration::from_secs(1))
            .expect("reader to start waiting");
        assert!(writer.unlock().expect("writer to release"));
        assert!(handle
            .join()
            .expect("reader thread panicked")
            .expect("reader to acquire"));
    }

    #[test]
    fn unlock_is_idempotent() {
        let mock = MockCoordinator::new(logger());
        let locker = exclusive(&mock.client(), "foo");
        assert!(locker.lock(false).expect("lock to acquire"));
        assert!(locker.unlock().expect("first unlock"));
        assert!(!locker.unlock().expect("second unlock"));
    }

    #[test]
    fn replaced_parent_is_left_untouched() {
        let mock = MockCoordinator::new(logger());
        let locker = exclusive(&mock.client(), "foo");
        assert!(locker.lock(false).expect("lock to acquire"));
        // Someone deletes and recreates the parent behind our back.
        mock.delete_recursive("/_zklocking/foo");
        mock.create("/_zklocking/foo", Vec::new(), CreateMode::Persistent);
        let squatter = exclusive(&mock.client(), "foo");
        assert!(squatter.lock(false).expect("squatter to acquire"));
        assert_eq!(
            squatter.lock_path(),
            Some("/_zklocking/foo/ex0000000000".to_string())
        );
        assert!(!locker.unlock().expect("unlock to disown"));
        // The foreign child survives our release.
        assert!(mock.exists("/_zklocking/foo/ex0000000000"));
    }

    #[test]
    fn with_lock_releases_on_success() {
        let mock = MockCoordinator::new(logger());
        let locker = exclusive(&mock.client(), "foo");
        let value = locker.with_lock(|| 42).expect("scoped lock to run");
        assert_eq!(value, 42);
        assert!(!locker.locked());
        assert!(!mock.exists("/_zklocking/foo"));
    }

    #[test]
    fn with_lock_releases_on_panic() {
        let mock = MockCoordinator::new(logger());
        let locker = exclusive(&mock.client(), "foo");
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _ = locker.with_lock(|| panic!("scoped body exploded"));
        }));
        assert!(result.is_err());
        assert!(!locker.locked());
        assert!(!mock.exists("/_zklocking/foo"));
    }

    #[test]
    fn concurrent_attempts_are_rejected() {
        let mock = MockCoordinator::new(logger());
        let owner = exclusive(&mock.client(), "foo");
        assert!(owner.lock(false).expect("owner to acquire"));
        let contender = exclusive(&mock.client(), "foo");
        let handle = {
            let contender = contender.clone();
            thread::spawn(move || contender.lock(true))
        };
        contender
            .wait_until_blocked(Duration::from_secs(1))
            .expect("contender to start waiting");
        match contender.lock(false) {
            Ok(_) => panic!("second attempt accepted"),
            Err(error) => match error.kind() {
                ErrorKind::BadArguments(_) => (),
                kind => panic!("unexpected error kind: {:?}", kind),
            },
        }
        assert!(owner.unlock().expect("owner to release"));
        handle
            .join()
            .expect("contender thread panicked")
            .expect("contender to acquire");
    }

    #[test]
    fn session_interruption_fails_blocked_attempt() {
        let mock = MockCoordinator::new(logger());
        let owner = exclusive(&mock.client(), "foo");
        assert!(owner.lock(false).expect("owner to acquire"));
        let contender_client = mock.client();
        let contender = exclusive(&contender_client, "foo");
        let handle = {
            let contender = contender.clone();
            thread::spawn(move || contender.lock(true))
        };
        contender
            .wait_until_blocked(Duration::from_secs(1))
            .expect("contender to start waiting");
        contender_client.expire();
        let result = handle.join().expect("contender thread panicked");
        match result {
            Ok(_) => panic!("blocked attempt resolved without a session"),
            Err(error) => assert!(error.kind().is_session_interrupted()),
        }
        assert!(!contender.locked());
    }

    #[test]
    fn acquirable_reflects_current_holders() {
        let mock = MockCoordinator::new(logger());
        let probe = exclusive(&mock.client(), "foo");
        // No parent at all: acquirable.
        assert!(probe.acquirable().expect("acquirable check"));
        let reader = shared(&mock.client(), "foo");
        assert!(reader.lock(false).expect("reader to acquire"));
        assert!(!probe.acquirable().expect("acquirable check"));
        let shared_probe = shared(&mock.client(), "foo");
        assert!(shared_probe.acquirable().expect("acquirable check"));
        let writer = exclusive(&mock.client(), "foo");
        let handle = {
            let writer = writer.clone();
            thread::spawn(move || writer.lock(true))
        };
        writer
            .wait_until_blocked(Duration::from_secs(1))
            .expect("writer to start waiting");
        assert!(!shared_probe.acquirable().expect("acquirable check"));
        assert!(reader.unlock().expect("reader to release"));
        handle
            .join()
            .expect("writer thread panicked")
            .expect("writer to acquire");
    }

    #[test]
    fn assert_held_passes_for_an_owned_lock() {
        let mock = MockCoordinator::new(logger());
        let locker = exclusive(&mock.client(), "foo");
        assert!(locker.lock(false).expect("lock to acquire"));
        locker.assert_held().expect("assertion to pass");
    }

    #[test]
    fn assert_held_raises_when_not_locked() {
        let mock = MockCoordinator::new(logger());
        let locker = exclusive(&mock.client(), "foo");
        match locker.assert_held() {
            Ok(()) => panic!("assertion passed for an unheld lock"),
            Err(error) => match error.kind() {
                ErrorKind::LockAssertionFailed(_, _) => (),
                kind => panic!("unexpected error kind: {:?}", kind),
            },
        }
    }

    #[test]
    fn assert_held_raises_after_session_loss() {
        let mock = MockCoordinator::new(logger());
        let client = mock.client();
        let locker = exclusive(&client, "foo");
        assert!(locker.lock(false).expect("lock to acquire"));
        client.expire();
        match locker.assert_held() {
            Ok(()) => panic!("assertion passed without a session"),
            Err(error) => match error.kind() {
                ErrorKind::LockAssertionFailed(_, _) => (),
                kind => panic!("unexpected error kind: {:?}", kind),
            },
        }
    }

    #[test]
    fn assert_held_raises_for_replaced_parent() {
        let mock = MockCoordinator::new(logger());
        let locker = exclusive(&mock.client(), "foo");
        assert!(locker.lock(false).expect("lock to acquire"));
        let stolen = locker.lock_path().expect("lock path to be recorded");
        mock.delete_recursive("/_zklocking/foo");
        mock.create("/_zklocking/foo", Vec::new(), CreateMode::Persistent);
        // A bogus writer recreates our node name under the new parent.
        mock.create(&stolen, Vec::new(), CreateMode::Persistent);
        match locker.assert_held() {
            Ok(()) => panic!("assertion passed for a replaced parent"),
            Err(error) => match error.kind() {
                ErrorKind::LockAssertionFailed(_, _) => (),
                kind => panic!("unexpected error kind: {:?}", kind),
            },
        }
    }

    #[test]
    fn owner_data_reads_the_head_of_the_queue() {
        let mock = MockCoordinator::new(logger());
        let owner = mock
            .client()
            .coordinator()
            .exclusive_lock("foo", b"writer".to_vec())
            .expect("locker to build");
        assert!(owner.lock(false).expect("owner to acquire"));
        let probe = exclusive(&mock.client(), "foo");
        assert_eq!(
            probe.owner_data().expect("owner data"),
            Some(b"writer".to_vec())
        );
        assert!(owner.unlock().expect("owner to release"));
        assert_eq!(probe.owner_data().expect("owner data"), None);
    }

    #[test]
    fn dropping_a_held_lock_releases_it() {
        let mock = MockCoordinator::new(logger());
        {
            let locker = exclusive(&mock.client(), "foo");
            assert!(locker.lock(false).expect("lock to acquire"));
            assert!(mock.exists("/_zklocking/foo"));
        }
        assert!(!mock.exists("/_zklocking/foo"));
    }
}
