use gvbind::constants::*;
use gvbind::{Database, Error, Key, MemoryEngine, TpToken, TransactionOptions, ValidationError};
use std::thread;
use std::time::{Duration, Instant};

const NOTTP: TpToken = TpToken::NOTTP;
const MS: u64 = 1_000_000;

// Two processes attached to the same database
fn setup_test_dbs() -> (Database<MemoryEngine>, Database<MemoryEngine>) {
    let first = Database::new(MemoryEngine::new());
    let second = Database::new(first.engine().process());
    (first, second)
}

fn key(name: &str, subs: &[&str]) -> Key {
    Key::with_subscripts(name, subs)
}

#[test]
fn test_lock_conflicts_between_processes() {
    let (a, b) = setup_test_dbs();

    a.lock_acquire(NOTTP, &[key("^acct", &["1"]), key("^acct", &["2"])], 0).unwrap();

    // Same node, and an ancestor of a held node
    let err = b.lock_incr(NOTTP, &key("^acct", &["1"]), 0).unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(err.status(), Some(YDB_LOCK_TIMEOUT));
    assert!(b.lock_incr(NOTTP, &key("^acct", &[]), 0).unwrap_err().is_timeout());

    // Unrelated nodes are free
    b.lock_incr(NOTTP, &key("^acct", &["3"]), 0).unwrap();
    b.lock_incr(NOTTP, &key("^other", &[]), 0).unwrap();

    a.lock_release_all(NOTTP).unwrap();
    b.lock_incr(NOTTP, &key("^acct", &["1"]), 0).unwrap();
}

#[test]
fn test_lock_acquire_replaces_held_locks() {
    let (a, _b) = setup_test_dbs();
    let first = key("^first", &[]);
    let second = key("^second", &[]);

    a.lock_acquire(NOTTP, &[first.clone()], 0).unwrap();
    a.lock_acquire(NOTTP, &[second.clone()], 0).unwrap();

    assert_eq!(a.engine().lock_count(&first), 0);
    assert_eq!(a.engine().lock_count(&second), 1);

    // An empty list only releases
    a.lock_acquire(NOTTP, &[], 0).unwrap();
    assert_eq!(a.engine().lock_count(&second), 0);
}

#[test]
fn test_lock_acquire_is_all_or_nothing() {
    let (a, b) = setup_test_dbs();
    let free = key("^free", &[]);
    let taken = key("^taken", &[]);

    b.lock_incr(NOTTP, &taken, 0).unwrap();

    let started = Instant::now();
    let err = a.lock_acquire(NOTTP, &[free.clone(), taken.clone()], 20 * MS).unwrap_err();
    assert!(err.is_timeout());
    assert!(started.elapsed() >= Duration::from_millis(20));
    assert_eq!(a.engine().lock_count(&free), 0);

    // Nobody else is kept from the free one
    b.lock_incr(NOTTP, &free, 0).unwrap();
}

#[test]
fn test_lock_reference_counts() {
    let (a, b) = setup_test_dbs();
    let k = key("^counted", &["x"]);

    a.lock_incr(NOTTP, &k, 0).unwrap();
    a.lock_incr(NOTTP, &k, 0).unwrap();
    assert_eq!(a.engine().lock_count(&k), 2);

    a.lock_decr(NOTTP, &k).unwrap();
    assert_eq!(a.engine().lock_count(&k), 1);
    assert!(b.lock_incr(NOTTP, &k, 0).unwrap_err().is_timeout());

    a.lock_release(NOTTP, &k).unwrap();
    assert_eq!(a.engine().lock_count(&k), 0);
    b.lock_incr(NOTTP, &k, 0).unwrap();

    // Releasing something not held is not an error
    a.lock_decr(NOTTP, &k).unwrap();
}

#[test]
fn test_lock_waits_for_release() {
    let (a, b) = setup_test_dbs();
    let k = key("^busy", &[]);
    b.lock_incr(NOTTP, &k, 0).unwrap();

    let holder = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        b.lock_release_all(NOTTP).unwrap();
    });

    a.lock_incr(NOTTP, &k, 2_000 * MS).unwrap();
    assert_eq!(a.engine().lock_count(&k), 1);
    holder.join().unwrap();
}

#[test]
fn test_locks_released_when_process_detaches() {
    let (a, b) = setup_test_dbs();
    let k = key("^owned", &[]);

    b.lock_incr(NOTTP, &k, 0).unwrap();
    drop(b);

    a.lock_incr(NOTTP, &k, 0).unwrap();
}

#[test]
fn test_local_names_lock_too() {
    let (a, b) = setup_test_dbs();

    a.lock_incr(NOTTP, &key("resource", &["1"]), 0).unwrap();
    assert!(b.lock_incr(NOTTP, &key("resource", &["1"]), 0).unwrap_err().is_timeout());
}

#[test]
fn test_locks_inside_a_transaction() {
    let (a, b) = setup_test_dbs();
    let k = key("^txlock", &[]);

    a.run_transaction(NOTTP, &TransactionOptions::new(), |token| {
        a.lock_incr(token, &k, 0)?;
        a.set(token, &k, "held")
    })
    .unwrap();

    // Locks are not transactional: still held after commit
    assert_eq!(a.engine().lock_count(&k), 1);
    assert!(b.lock_incr(NOTTP, &k, 0).unwrap_err().is_timeout());
}

#[test]
fn test_lock_argument_limits() {
    let (a, _b) = setup_test_dbs();

    let err = a.lock_incr(NOTTP, &key("^k", &[]), YDB_MAX_TIME_NSEC + 1).unwrap_err();
    assert!(matches!(err, Error::Validation(ValidationError::TimeoutTooLong { .. })));

    let many: Vec<Key> = (0..=YDB_MAX_NAMES).map(|i| key("^k", &[i.to_string().as_str()])).collect();
    let err = a.lock_acquire(NOTTP, &many, 0).unwrap_err();
    assert!(matches!(err, Error::Validation(ValidationError::TooManyNames { .. })));

    let err = a.lock_incr(NOTTP, &key("bad name", &[]), 0).unwrap_err();
    assert!(matches!(err, Error::Validation(ValidationError::InvalidVarName(_))));
}
