use lazy_static::lazy_static;
use prometheus::Counter;
use prometheus::Registry;
use slog::debug;
use slog::Logger;

lazy_static! {
    pub static ref ELECTION_DROP_FAIL: Counter = Counter::new(
        "zklocking_election_drop_fail",
        "Number of candidate close-on-drop operations that failed"
    )
    .expect("Failed to create ELECTION_DROP_FAIL counter");

    pub static ref ELECTION_DROP_TOTAL: Counter = Counter::new(
        "zklocking_election_drop_total",
        "Total number of candidate close-on-drop operations"
    )
    .expect("Failed to create ELECTION_DROP_TOTAL counter");

    pub static ref ELECTION_PROMOTED_TOTAL: Counter = Counter::new(
        "zklocking_election_promoted_total",
        "Number of times a candidate in this process won an election"
    )
    .expect("Failed to create ELECTION_PROMOTED_TOTAL counter");

    pub static ref ELECTION_TERMINATED: Counter = Counter::new(
        "zklocking_election_terminated",
        "Number of elections terminated by session loss or external changes"
    )
    .expect("Failed to create ELECTION_TERMINATED counter");

    pub static ref ELECTION_VOTE_FAIL: Counter = Counter::new(
        "zklocking_election_vote_fail",
        "Number of election vote operations that failed"
    )
    .expect("Failed to create ELECTION_VOTE_FAIL counter");

    pub static ref ELECTION_VOTE_TOTAL: Counter = Counter::new(
        "zklocking_election_vote_total",
        "Total number of election vote operations"
    )
    .expect("Failed to create ELECTION_VOTE_TOTAL counter");

    pub static ref LOCK_ACQUIRE_FAIL: Counter = Counter::new(
        "zklocking_lock_acquire_fail",
        "Number of lock acquire operations that failed"
    )
    .expect("Failed to create LOCK_ACQUIRE_FAIL counter");

    pub static ref LOCK_ACQUIRE_TOTAL: Counter = Counter::new(
        "zklocking_lock_acquire_total",
        "Total number of lock acquire operations"
    )
    .expect("Failed to create LOCK_ACQUIRE_TOTAL counter");

    pub static ref LOCK_CONTENDED_TOTAL: Counter = Counter::new(
        "zklocking_lock_contended_total",
        "Number of lock attempts that had to wait on a predecessor"
    )
    .expect("Failed to create LOCK_CONTENDED_TOTAL counter");

    pub static ref LOCK_DROP_FAIL: Counter = Counter::new(
        "zklocking_lock_drop_fail",
        "Number of lock release-on-drop operations that failed"
    )
    .expect("Failed to create LOCK_DROP_FAIL counter");

    pub static ref LOCK_DROP_TOTAL: Counter = Counter::new(
        "zklocking_lock_drop_total",
        "Total number of lock release-on-drop operations"
    )
    .expect("Failed to create LOCK_DROP_TOTAL counter");

    pub static ref LOCK_INTERRUPTED_TOTAL: Counter = Counter::new(
        "zklocking_lock_interrupted_total",
        "Number of blocked lock attempts aborted by session interruptions"
    )
    .expect("Failed to create LOCK_INTERRUPTED_TOTAL counter");

    pub static ref LOCK_RELEASE_FAIL: Counter = Counter::new(
        "zklocking_lock_release_fail",
        "Number of lock release operations that failed"
    )
    .expect("Failed to create LOCK_RELEASE_FAIL counter");

    pub static ref LOCK_RELEASE_TOTAL: Counter = Counter::new(
        "zklocking_lock_release_total",
        "Total number of lock release operations"
    )
    .expect("Failed to create LOCK_RELEASE_TOTAL counter");
}

/// Attempts to register metrics with the Registry.
///
/// Metrics that fail to register are logged and ignored.
pub fn register_metrics(logger: &Logger, registry: &Registry) {
    if let Err(err) = registry.register(Box::new(ELECTION_DROP_FAIL.clone())) {
        debug!(logger, "Failed to register ELECTION_DROP_FAIL"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(ELECTION_DROP_TOTAL.clone())) {
        debug!(logger, "Failed to register ELECTION_DROP_TOTAL"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(ELECTION_PROMOTED_TOTAL.clone())) {
        debug!(logger, "Failed to register ELECTION_PROMOTED_TOTAL"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(ELECTION_TERMINATED.clone())) {
        debug!(logger, "Failed to register ELECTION_TERMINATED"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(ELECTION_VOTE_FAIL.clone())) {
        debug!(logger, "Failed to register ELECTION_VOTE_FAIL"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(ELECTION_VOTE_TOTAL.clone())) {
        debug!(logger, "Failed to register ELECTION_VOTE_TOTAL"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(LOCK_ACQUIRE_FAIL.clone())) {
        debug!(logger, "Failed to register LOCK_ACQUIRE_FAIL"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(LOCK_ACQUIRE_TOTAL.clone())) {
        debug!(logger, "Failed to register LOCK_ACQUIRE_TOTAL"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(LOCK_CONTENDED_TOTAL.clone())) {
        debug!(logger, "Failed to register LOCK_CONTENDED_TOTAL"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(LOCK_DROP_FAIL.clone())) {
        debug!(logger, "Failed to register LOCK_DROP_FAIL"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(LOCK_DROP_TOTAL.clone())) {
        debug!(logger, "Failed to register LOCK_DROP_TOTAL"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(LOCK_INTERRUPTED_TOTAL.clone())) {
        debug!(logger, "Failed to register LOCK_INTERRUPTED_TOTAL"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(LOCK_RELEASE_FAIL.clone())) {
        debug!(logger, "Failed to register LOCK_RELEASE_FAIL"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(LOCK_RELEASE_TOTAL.clone())) {
        debug!(logger, "Failed to register LOCK_RELEASE_TOTAL"; "error" => ?err);
    }
    super::backend::zookeeper::register_metrics(logger, registry);
}
