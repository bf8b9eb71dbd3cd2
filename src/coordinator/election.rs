use std::panic;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::unbounded;
use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use slog::debug;
use slog::error;
use slog::info;
use slog::warn;
use slog::Logger;

use super::super::backend::Backend;
use super::super::backend::CreateMode;
use super::super::backend::EventKind;
use super::super::backend::SessionEvent;
use super::super::backend::Subscription;
use super::super::metrics::ELECTION_DROP_FAIL;
use super::super::metrics::ELECTION_DROP_TOTAL;
use super::super::metrics::ELECTION_PROMOTED_TOTAL;
use super::super::metrics::ELECTION_TERMINATED;
use super::super::metrics::ELECTION_VOTE_FAIL;
use super::super::metrics::ELECTION_VOTE_TOTAL;
use super::super::ErrorKind;
use super::super::Result;
use super::znode;
use super::znode::EXCLUSIVE_PREFIX;

/// Basename of the node a winner writes once its callbacks completed.
const LEADER_ACK_NODE: &str = "leader_ack";

/// Callback fired on election transitions.
///
/// Callbacks run on the thread delivering coordination events and must
/// not call back into the instance that fired them; see `DeferredFire`
/// for moving work onto a thread of the user's choosing.
pub type ElectionCallback = Box<dyn Fn() + Send>;

/// Participant in a named election.
///
/// A candidate queues exactly like an exclusive lock request under the
/// election node. The first candidate in sequence order is the leader:
/// it runs its winning callbacks and only then publishes the leader
/// acknowledgement, so losers learn about the new leader only once it
/// finished initialising.
#[derive(Clone)]
pub struct Candidate {
    inner: Arc<CandidateInner>,
}

impl Candidate {
    pub(crate) fn new(
        backend: Arc<dyn Backend>,
        root: &str,
        name: String,
        data: Vec<u8>,
        logger: Logger,
    ) -> Result<Candidate> {
        if name.is_empty() {
            return Err(ErrorKind::BadArguments("election name must not be empty").into());
        }
        let election_path = format!("{}/{}", root, name);
        let leader_ack_path = format!("{}/{}", election_path, LEADER_ACK_NODE);
        Ok(Candidate {
            inner: Arc::new(CandidateInner {
                backend,
                callbacks: Mutex::new(Callbacks::default()),
                data,
                election_path,
                leader_ack_path,
                logger,
                name,
                state: Mutex::new(CandidateState::default()),
            }),
        })
    }

    /// Register a callback fired when this candidate becomes the leader.
    ///
    /// Callbacks run in registration order, before the acknowledgement
    /// is published. Register before calling `vote`.
    pub fn on_winning_election<F>(&self, callback: F)
    where
        F: Fn() + Send + 'static,
    {
        let mut callbacks = self.inner.lock_callbacks();
        callbacks.winning.push(Box::new(callback));
    }

    /// Register a callback fired when another candidate is acknowledged
    /// as the leader. Register before calling `vote`.
    pub fn on_losing_election<F>(&self, callback: F)
    where
        F: Fn() + Send + 'static,
    {
        let mut callbacks = self.inner.lock_callbacks();
        callbacks.losing.push(Box::new(callback));
    }

    /// Enter the election.
    ///
    /// Returns `Ok(true)` when this candidate won outright: its winning
    /// callbacks have run and the acknowledgement is published. Returns
    /// `Ok(false)` when another candidate precedes it; promotion and the
    /// loss notification then happen on the event-dispatch thread.
    pub fn vote(&self) -> Result<bool> {
        ELECTION_VOTE_TOTAL.inc();
        let result = CandidateInner::vote(&self.inner);
        if result.is_err() {
            ELECTION_VOTE_FAIL.inc();
        }
        result
    }

    /// Server-side check: is our vote first in sequence order?
    pub fn is_leader(&self) -> Result<bool> {
        let vote_name = {
            let state = self.inner.lock_state();
            match state.vote_path.as_ref() {
                Some(path) => znode::basename(path).to_string(),
                None => return Ok(false),
            }
        };
        let votes = match znode::sequenced_children(&*self.inner.backend, &self.inner.election_path)
        {
            Ok(votes) => votes,
            Err(ref error) if error.kind().is_no_node() => return Ok(false),
            Err(error) => return Err(error),
        };
        Ok(votes
            .first()
            .map(|vote| vote.name == vote_name)
            .unwrap_or(false))
    }

    /// Check if the current leader published its acknowledgement.
    pub fn leader_acked(&self) -> Result<bool> {
        self.inner.backend.exists(&self.inner.leader_ack_path)
    }

    /// Leave the election, removing the vote node and, when leading,
    /// the acknowledgement. No further callbacks fire.
    pub fn close(&self) -> Result<()> {
        self.inner.close()
    }

    /// Name of the election this candidate participates in.
    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

#[derive(Default)]
struct Callbacks {
    losing: Vec<ElectionCallback>,
    winning: Vec<ElectionCallback>,
}

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
enum Phase {
    NotVoted,
    Waiting,
    Winner,
    Closed,
}

impl Default for Phase {
    fn default() -> Phase {
        Phase::NotVoted
    }
}

#[derive(Default)]
struct CandidateState {
    ack_sub: Option<Subscription>,
    losing_fired: bool,
    phase: Phase,
    predecessor_sub: Option<Subscription>,
    session_sub: Option<Subscription>,
    vote_path: Option<String>,
}

struct CandidateInner {
    backend: Arc<dyn Backend>,
    callbacks: Mutex<Callbacks>,
    data: Vec<u8>,
    election_path: String,
    leader_ack_path: String,
    logger: Logger,
    name: String,
    state: Mutex<CandidateState>,
}

impl CandidateInner {
    fn lock_state(&self) -> ::std::sync::MutexGuard<CandidateState> {
        self.state.lock().expect("Candidate state lock poisoned")
    }

    fn lock_callbacks(&self) -> ::std::sync::MutexGuard<Callbacks> {
        self.callbacks
            .lock()
            .expect("Candidate callbacks lock poisoned")
    }

    fn vote(inner: &Arc<CandidateInner>) -> Result<bool> {
        {
            let state = inner.lock_state();
            if state.phase != Phase::NotVoted {
                return Err(ErrorKind::BadArguments("candidate has already voted").into());
            }
        }
        let session_sub = {
            let closure = Arc::clone(inner);
            inner.backend.register_session(Arc::new(move |event| {
                if let SessionEvent::Expired = event {
                    closure.terminate("session expired");
                }
            }))?
        };
        let vote_path = match znode::create_sequenced(
            &*inner.backend,
            &inner.election_path,
            EXCLUSIVE_PREFIX,
            &inner.data,
        ) {
            Ok(path) => path,
            Err(error) => {
                inner.backend.unregister(session_sub);
                return Err(error);
            }
        };
        {
            let mut state = inner.lock_state();
            state.phase = Phase::Waiting;
            state.session_sub = Some(session_sub);
            state.vote_path = Some(vote_path);
        }
        // Watch for the acknowledgement before looking for it so its
        // creation cannot be missed.
        let ack_sub = {
            let closure = Arc::clone(inner);
            inner
                .backend
                .register(&inner.leader_ack_path, Arc::new(move |event| {
                    if let EventKind::Created = event.kind {
                        CandidateInner::ack_appeared(&closure);
                    }
                }))?
        };
        {
            let mut state = inner.lock_state();
            state.ack_sub = Some(ack_sub);
        }
        let winner = CandidateInner::evaluate(inner)?;
        if !winner && inner.backend.exists(&inner.leader_ack_path)? {
            CandidateInner::ack_appeared(inner);
        }
        Ok(winner)
    }

    /// Re-apply the election policy to the current vote queue.
    ///
    /// Runs synchronously inside `vote` and again on the event-dispatch
    /// thread whenever our current predecessor disappears.
    fn evaluate(inner: &Arc<CandidateInner>) -> Result<bool> {
        loop {
            let vote_name = {
                let state = inner.lock_state();
                match state.phase {
                    Phase::Waiting => (),
                    Phase::Winner => return Ok(true),
                    _ => return Ok(false),
                };
                match state.vote_path.as_ref() {
                    Some(path) => znode::basename(path).to_string(),
                    None => return Ok(false),
                }
            };
            let votes = znode::sequenced_children(&*inner.backend, &inner.election_path)?;
            let position = match votes.iter().position(|vote| vote.name == vote_name) {
                Some(position) => position,
                None => {
                    inner.terminate("vote node lost");
                    return Err(
                        ErrorKind::SessionInterrupted(inner.election_path.clone()).into(),
                    );
                }
            };
            if position == 0 {
                CandidateInner::become_winner(inner)?;
                return Ok(true);
            }
            let predecessor = format!("{}/{}", inner.election_path, votes[position - 1].name);
            let subscription = {
                let closure = Arc::clone(inner);
                inner.backend.register(&predecessor, Arc::new(move |event| {
                    if let EventKind::Deleted = event.kind {
                        CandidateInner::predecessor_died(&closure);
                    }
                }))?
            };
            {
                let mut state = inner.lock_state();
                if let Some(old) = state.predecessor_sub.take() {
                    inner.backend.unregister(old);
                }
                state.predecessor_sub = Some(subscription);
            }
            debug!(
                inner.logger, "Waiting on preceding candidate";
                "election" => &inner.name, "predecessor" => &predecessor
            );
            // The predecessor may have vanished before the watch was
            // armed; walk forward to the new head of the queue.
            if inner.backend.exists(&predecessor)? {
                return Ok(false);
            }
        }
    }

    /// Take leadership: run winning callbacks, then publish the ack.
    fn become_winner(inner: &Arc<CandidateInner>) -> Result<()> {
        {
            let mut state = inner.lock_state();
            if state.phase != Phase::Waiting {
                return Ok(());
            }
            state.phase = Phase::Winner;
            if let Some(subscription) = state.predecessor_sub.take() {
                inner.backend.unregister(subscription);
            }
            // Our own acknowledgement must not read as a loss.
            if let Some(subscription) = state.ack_sub.take() {
                inner.backend.unregister(subscription);
            }
        }
        ELECTION_PROMOTED_TOTAL.inc();
        info!(inner.logger, "Won election"; "election" => &inner.name);
        inner.fire_winning();
        // Losers are gated on the acknowledgement: publish it even when
        // a winning callback panicked.
        let result = inner.backend.create(
            &inner.leader_ack_path,
            inner.data.clone(),
            CreateMode::Ephemeral,
        );
        match result {
            Ok(_) => Ok(()),
            Err(error) => {
                error!(
                    inner.logger, "Failed to publish leader acknowledgement";
                    "election" => &inner.name, "error" => %error
                );
                Err(error)
            }
        }
    }

    /// Event-thread reaction to the death of our predecessor.
    fn predecessor_died(inner: &Arc<CandidateInner>) {
        if let Err(error) = CandidateInner::evaluate(inner) {
            error!(
                inner.logger, "Failed to re-evaluate election";
                "election" => &inner.name, "error" => %error
            );
        }
    }

    /// Event-thread reaction to the leader acknowledgement appearing.
    fn ack_appeared(inner: &Arc<CandidateInner>) {
        let fire = {
            let mut state = inner.lock_state();
            if state.phase != Phase::Waiting || state.losing_fired {
                false
            } else {
                state.losing_fired = true;
                true
            }
        };
        if fire {
            debug!(
                inner.logger, "Election lost, leader acknowledged";
                "election" => &inner.name
            );
            inner.fire_losing();
        }
    }

    fn fire_winning(&self) {
        let callbacks = self.lock_callbacks();
        for callback in callbacks.winning.iter() {
            if panic::catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                error!(
                    self.logger, "Winning election callback panicked";
                    "election" => &self.name
                );
            }
        }
    }

    fn fire_losing(&self) {
        let callbacks = self.lock_callbacks();
        for callback in callbacks.losing.iter() {
            if panic::catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                error!(
                    self.logger, "Losing election callback panicked";
                    "election" => &self.name
                );
            }
        }
    }

    fn close(&self) -> Result<()> {
        let (vote, winner) = match self.reset() {
            Some(parts) => parts,
            None => return Ok(()),
        };
        if let Some(vote) = vote {
            match self.backend.delete(&vote) {
                Ok(()) => (),
                Err(ref error) if error.kind().is_no_node() => (),
                Err(error) => return Err(error),
            };
        }
        if winner {
            match self.backend.delete(&self.leader_ack_path) {
                Ok(()) => (),
                Err(ref error) if error.kind().is_no_node() => (),
                Err(error) => return Err(error),
            };
        }
        Ok(())
    }

    /// Event-thread teardown: best effort, nothing propagates.
    fn terminate(&self, reason: &'static str) {
        let (vote, winner) = match self.reset() {
            Some(parts) => parts,
            None => return,
        };
        ELECTION_TERMINATED.inc();
        warn!(
            self.logger, "Election candidate terminated";
            "election" => &self.name, "reason" => reason
        );
        if let Some(vote) = vote {
            let _ = self.backend.delete(&vote);
        }
        if winner {
            let _ = self.backend.delete(&self.leader_ack_path);
        }
    }

    /// Transition to `Closed`, dropping subscriptions.
    ///
    /// Returns the vote node to delete and whether we led the election,
    /// or `None` when there is nothing to tear down.
    fn reset(&self) -> Option<(Option<String>, bool)> {
        let (vote, winner, subscriptions) = {
            let mut state = self.lock_state();
            match state.phase {
                Phase::NotVoted | Phase::Closed => return None,
                _ => (),
            };
            let winner = state.phase == Phase::Winner;
            state.phase = Phase::Closed;
            let subscriptions: Vec<Subscription> = state
                .ack_sub
                .take()
                .into_iter()
                .chain(state.predecessor_sub.take())
                .chain(state.session_sub.take())
                .collect();
            (state.vote_path.take(), winner, subscriptions)
        };
        for subscription in subscriptions {
            self.backend.unregister(subscription);
        }
        Some((vote, winner))
    }
}

impl Drop for CandidateInner {
    fn drop(&mut self) {
        {
            let state = self.lock_state();
            match state.phase {
                Phase::NotVoted | Phase::Closed => return,
                _ => (),
            };
        }
        ELECTION_DROP_TOTAL.inc();
        if let Err(error) = self.close() {
            ELECTION_DROP_FAIL.inc();
            error!(
                self.logger, "Failed to close election candidate from destructor";
                "election" => &self.name, "error" => %error
            );
        }
    }
}

/// Read-only watcher of a named election.
///
/// Tracks the leader acknowledgement node and surfaces strictly
/// alternating new-leader / leader-death transitions; duplicates are
/// suppressed by gating on the tri-state `leader_alive`.
#[derive(Clone)]
pub struct Observer {
    inner: Arc<ObserverInner>,
}

impl Observer {
    pub(crate) fn new(
        backend: Arc<dyn Backend>,
        root: &str,
        name: String,
        logger: Logger,
    ) -> Result<Observer> {
        if name.is_empty() {
            return Err(ErrorKind::BadArguments("election name must not be empty").into());
        }
        let leader_ack_path = format!("{}/{}/{}", root, name, LEADER_ACK_NODE);
        Ok(Observer {
            inner: Arc::new(ObserverInner {
                backend,
                callbacks: Mutex::new(ObserverCallbacks::default()),
                leader_ack_path,
                logger,
                name,
                state: Mutex::new(ObserverState::default()),
            }),
        })
    }

    /// Register a callback fired when a leader is acknowledged.
    /// Register before calling `observe`.
    pub fn on_new_leader<F>(&self, callback: F)
    where
        F: Fn() + Send + 'static,
    {
        let mut callbacks = self.inner.lock_callbacks();
        callbacks.new_leader.push(Box::new(callback));
    }

    /// Register a callback fired when the acknowledged leader goes away.
    /// Register before calling `observe`.
    pub fn on_leaders_death<F>(&self, callback: F)
    where
        F: Fn() + Send + 'static,
    {
        let mut callbacks = self.inner.lock_callbacks();
        callbacks.leader_death.push(Box::new(callback));
    }

    /// Start observing the election.
    ///
    /// The current state is reported immediately: one new-leader callback
    /// if the acknowledgement exists, one leader-death callback otherwise.
    pub fn observe(&self) -> Result<()> {
        {
            let state = self.inner.lock_state();
            if state.subscription.is_some() {
                return Err(ErrorKind::BadArguments("observer is already watching").into());
            }
        }
        let subscription = {
            let closure = Arc::clone(&self.inner);
            self.inner
                .backend
                .register(&self.inner.leader_ack_path, Arc::new(move |event| {
                    match event.kind {
                        EventKind::Created => ObserverInner::leader_appeared(&closure),
                        EventKind::Deleted => ObserverInner::leader_died(&closure),
                        _ => (),
                    }
                }))?
        };
        {
            let mut state = self.inner.lock_state();
            state.subscription = Some(subscription);
        }
        if self.inner.backend.exists(&self.inner.leader_ack_path)? {
            ObserverInner::leader_appeared(&self.inner);
        } else {
            ObserverInner::leader_died(&self.inner);
        }
        Ok(())
    }

    /// Tri-state leader liveness: `None` until `observe` resolves it.
    pub fn leader_alive(&self) -> Option<bool> {
        self.inner.lock_state().leader_alive
    }

    /// Content of the most recently acknowledged leader's node.
    pub fn leader_data(&self) -> Option<Vec<u8>> {
        self.inner.lock_state().leader_data.clone()
    }

    /// Stop observing; no further callbacks fire.
    pub fn close(&self) {
        let subscription = {
            let mut state = self.inner.lock_state();
            state.subscription.take()
        };
        if let Some(subscription) = subscription {
            self.inner.backend.unregister(subscription);
        }
    }

    /// Name of the observed election.
    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

#[derive(Default)]
struct ObserverCallbacks {
    leader_death: Vec<ElectionCallback>,
    new_leader: Vec<ElectionCallback>,
}

#[derive(Default)]
struct ObserverState {
    leader_alive: Option<bool>,
    leader_data: Option<Vec<u8>>,
    subscription: Option<Subscription>,
}

struct ObserverInner {
    backend: Arc<dyn Backend>,
    callbacks: Mutex<ObserverCallbacks>,
    leader_ack_path: String,
    logger: Logger,
    name: String,
    state: Mutex<ObserverState>,
}

impl ObserverInner {
    fn lock_state(&self) -> ::std::sync::MutexGuard<ObserverState> {
        self.state.lock().expect("Observer state lock poisoned")
    }

    fn lock_callbacks(&self) -> ::std::sync::MutexGuard<ObserverCallbacks> {
        self.callbacks
            .lock()
            .expect("Observer callbacks lock poisoned")
    }

    fn leader_appeared(inner: &Arc<ObserverInner>) {
        {
            let mut state = inner.lock_state();
            if state.leader_alive == Some(true) {
                return;
            }
            state.leader_alive = Some(true);
        }
        let data = match inner.backend.get_data(&inner.leader_ack_path) {
            Ok((data, _)) => Some(data),
            Err(ref error) if error.kind().is_no_node() => None,
            Err(error) => {
                warn!(
                    inner.logger, "Failed to read leader data";
                    "election" => &inner.name, "error" => %error
                );
                None
            }
        };
        {
            let mut state = inner.lock_state();
            state.leader_data = data;
        }
        debug!(inner.logger, "Leader acknowledged"; "election" => &inner.name);
        let callbacks = inner.lock_callbacks();
        for callback in callbacks.new_leader.iter() {
            if panic::catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                error!(
                    inner.logger, "New-leader callback panicked";
                    "election" => &inner.name
                );
            }
        }
    }

    fn leader_died(inner: &Arc<ObserverInner>) {
        {
            let mut state = inner.lock_state();
            if state.leader_alive == Some(false) {
                return;
            }
            state.leader_alive = Some(false);
        }
        debug!(inner.logger, "Leader went away"; "election" => &inner.name);
        let callbacks = inner.lock_callbacks();
        for callback in callbacks.leader_death.iter() {
            if panic::catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                error!(
                    inner.logger, "Leader-death callback panicked";
                    "election" => &inner.name
                );
            }
        }
    }
}

impl Drop for ObserverInner {
    fn drop(&mut self) {
        let subscription = {
            let mut state = self.lock_state();
            state.subscription.take()
        };
        if let Some(subscription) = subscription {
            self.backend.unregister(subscription);
        }
    }
}

type DeferredTask = Arc<dyn Fn() + Send + Sync>;

/// Queue moving election callbacks off the event-dispatch thread.
///
/// Wrapping a callback with `wrap` makes firing only enqueue it; a
/// thread of the user's choosing executes the queued work with
/// `run_pending` or `run_one`.
pub struct DeferredFire {
    receiver: Receiver<DeferredTask>,
    sender: Sender<DeferredTask>,
}

impl DeferredFire {
    pub fn new() -> DeferredFire {
        let (sender, receiver) = unbounded();
        DeferredFire { receiver, sender }
    }

    /// Wrap a callback for registration on a `Candidate` or `Observer`.
    pub fn wrap<F>(&self, callback: F) -> impl Fn() + Send
    where
        F: Fn() + Send + Sync + 'static,
    {
        let task: DeferredTask = Arc::new(callback);
        let sender = self.sender.clone();
        move || {
            let _ = sender.send(Arc::clone(&task));
        }
    }

    /// Run every callback fired since the last call; returns the count.
    pub fn run_pending(&self) -> usize {
        let mut count = 0;
        while let Ok(task) = self.receiver.try_recv() {
            task();
            count += 1;
        }
        count
    }

    /// Wait up to `timeout` for one fired callback and run it.
    pub fn run_one(&self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Ok(task) => {
                task();
                true
            }
            Err(_) => false,
        }
    }
}

impl Default for DeferredFire {
    fn default() -> DeferredFire {
        DeferredFire::new()
    }
}
