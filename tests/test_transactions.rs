use gvbind::constants::*;
use gvbind::number::Number;
use gvbind::{
    transaction, Database, DataFlags, EngineConfig, Error, Key, MemoryEngine, NativeError, RestartVars, Result,
    TpToken, TransactionOptions, TransactionStatus,
};
use proptest::prelude::*;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::io;
use std::os::raw::c_int;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

const NOTTP: TpToken = TpToken::NOTTP;

// Common test setup
fn setup_test_db() -> Database<MemoryEngine> {
    Database::new(MemoryEngine::new())
}

fn key(name: &str, subs: &[&str]) -> Key {
    Key::with_subscripts(name, subs)
}

fn text(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes).unwrap()
}

fn restart() -> Error {
    NativeError::from_status(YDB_TP_RESTART).into()
}

#[test]
fn test_commit() {
    let db = setup_test_db();

    let status = db
        .run_transaction(NOTTP, &TransactionOptions::new(), |token| {
            assert!(!token.is_nottp());
            assert_eq!(transaction::depth(), 1);
            db.set(token, &key("^commit", &["a"]), "1")?;
            db.set(token, &key("^commit", &["b"]), "2")
        })
        .unwrap();

    assert_eq!(status, YDB_OK);
    assert_eq!(db.get(NOTTP, &key("^commit", &["a"])).unwrap(), b"1");
    assert_eq!(db.get(NOTTP, &key("^commit", &["b"])).unwrap(), b"2");
    assert_eq!(db.engine().tp_depth(), 0);
    assert_eq!(transaction::depth(), 0);
}

proptest! {
    #[test]
    fn test_committed_writes_match_direct_writes(
        writes in prop::collection::vec(("[a-z]{1,4}", "[ -~]{0,8}"), 0..24)
    ) {
        let db = setup_test_db();
        let mut expected = BTreeMap::new();
        for (sub, value) in &writes {
            expected.insert(sub.clone(), value.clone());
        }

        db.run_transaction(NOTTP, &TransactionOptions::new(), |token| {
            for (sub, value) in &writes {
                db.set(token, &key("^prop", &[sub.as_str()]), value)?;
            }
            Ok(())
        })
        .unwrap();

        for (sub, value) in &expected {
            prop_assert_eq!(text(db.get(NOTTP, &key("^prop", &[sub.as_str()])).unwrap()), value.clone());
        }
        let stored = db.subscripts(NOTTP, &key("^prop", &[""])).count();
        prop_assert_eq!(stored, expected.len());
    }
}

#[test]
fn test_restart_discards_the_attempt() {
    let db = setup_test_db();
    let attempts = Cell::new(0);

    let status = db
        .run_transaction(NOTTP, &TransactionOptions::new(), |token| {
            attempts.set(attempts.get() + 1);
            if attempts.get() == 1 {
                db.set(token, &key("^r", &["1"]), "first")?;
                db.set(token, &key("^r", &["2"]), "only first")?;
                return Ok(TransactionStatus::Restart);
            }
            db.set(token, &key("^r", &["1"]), "second")?;
            Ok(TransactionStatus::Ok)
        })
        .unwrap();

    assert_eq!(status, YDB_OK);
    assert_eq!(attempts.get(), 2);
    assert_eq!(db.get(NOTTP, &key("^r", &["1"])).unwrap(), b"second");
    assert_eq!(db.data(NOTTP, &key("^r", &["2"])).unwrap(), DataFlags::UNDEF);
}

#[test]
fn test_restart_requested_through_an_error() {
    let db = setup_test_db();
    let attempts = Cell::new(0);

    db.run_transaction(NOTTP, &TransactionOptions::new(), |token| {
        attempts.set(attempts.get() + 1);
        db.increment(token, &key("^tries", &[]), "1")?;
        if attempts.get() < 3 {
            return Err(restart());
        }
        Ok(())
    })
    .unwrap();

    assert_eq!(attempts.get(), 3);
    // Only the committed attempt's increment remains
    assert_eq!(db.get(NOTTP, &key("^tries", &[])).unwrap(), b"1");
}

#[test]
fn test_rollback_discards_everything() {
    let db = setup_test_db();
    db.set(NOTTP, &key("^acct", &["a"]), "10").unwrap();

    let err = db
        .run_transaction(NOTTP, &TransactionOptions::new(), |token| {
            db.set(token, &key("^acct", &["a"]), "999")?;
            db.set(token, &key("^acct", &["new"]), "1")?;
            db.delete_tree(token, &key("^acct", &["a"]))?;
            Ok(TransactionStatus::Rollback)
        })
        .unwrap_err();

    assert!(err.is_rollback());
    assert_eq!(err.status(), Some(YDB_TP_ROLLBACK));
    assert_eq!(db.get(NOTTP, &key("^acct", &["a"])).unwrap(), b"10");
    assert_eq!(db.data(NOTTP, &key("^acct", &["new"])).unwrap(), DataFlags::UNDEF);
    assert_eq!(db.engine().tp_depth(), 0);
}

fn transfer(db: &Database<MemoryEngine>, from: &str, to: &str, amount: i64) -> Result<c_int> {
    db.run_transaction(NOTTP, &TransactionOptions::new().with_transaction_id("TRANSFER"), |token| {
        let left = db.increment(token, &key("^balance", &[from]), (-amount).to_string())?;
        db.increment(token, &key("^balance", &[to]), amount.to_string())?;
        if Number::parse(&left).map_or(true, |n| n.is_negative()) {
            return Ok(TransactionStatus::Rollback);
        }
        Ok(TransactionStatus::Ok)
    })
}

fn balance(db: &Database<MemoryEngine>, who: &str) -> String {
    text(db.get(NOTTP, &key("^balance", &[who])).unwrap())
}

#[test]
fn test_bank_transfer() {
    let db = setup_test_db();
    db.set(NOTTP, &key("^balance", &["alice"]), "100").unwrap();
    db.set(NOTTP, &key("^balance", &["bob"]), "50").unwrap();

    // Overdraft: both legs already applied are undone
    let err = transfer(&db, "alice", "bob", 150).unwrap_err();
    assert!(err.is_rollback());
    assert_eq!(balance(&db, "alice"), "100");
    assert_eq!(balance(&db, "bob"), "50");

    assert_eq!(transfer(&db, "alice", "bob", 30).unwrap(), YDB_OK);
    assert_eq!(balance(&db, "alice"), "70");
    assert_eq!(balance(&db, "bob"), "80");
}

#[test]
fn test_nested_restart_retries_from_the_top() {
    let db = setup_test_db();
    let outer_attempts = Cell::new(0);
    let inner_attempts = Cell::new(0);

    db.run_transaction(NOTTP, &TransactionOptions::new(), |outer| {
        outer_attempts.set(outer_attempts.get() + 1);
        db.set(outer, &key("^nest", &["outer"]), outer_attempts.get().to_string())?;
        db.run_transaction(outer, &TransactionOptions::new(), |inner| {
            assert_ne!(inner, outer);
            assert_eq!(transaction::depth(), 2);
            inner_attempts.set(inner_attempts.get() + 1);
            db.set(inner, &key("^nest", &["inner"]), inner_attempts.get().to_string())?;
            if inner_attempts.get() == 1 {
                return Ok(TransactionStatus::Restart);
            }
            Ok(TransactionStatus::Ok)
        })?;
        Ok(())
    })
    .unwrap();

    assert_eq!(outer_attempts.get(), 2);
    assert_eq!(inner_attempts.get(), 2);
    assert_eq!(db.get(NOTTP, &key("^nest", &["outer"])).unwrap(), b"2");
    assert_eq!(db.get(NOTTP, &key("^nest", &["inner"])).unwrap(), b"2");
}

#[test]
fn test_nested_rollback_keeps_the_outer_level() {
    let db = setup_test_db();

    db.run_transaction(NOTTP, &TransactionOptions::new(), |outer| {
        db.set(outer, &key("^level", &["outer"]), "kept")?;
        let inner = db.run_transaction(outer, &TransactionOptions::new(), |inner| {
            db.set(inner, &key("^level", &["inner"]), "dropped")?;
            Ok(TransactionStatus::Rollback)
        });
        assert!(inner.unwrap_err().is_rollback());
        Ok(())
    })
    .unwrap();

    assert_eq!(db.get(NOTTP, &key("^level", &["outer"])).unwrap(), b"kept");
    assert_eq!(db.data(NOTTP, &key("^level", &["inner"])).unwrap(), DataFlags::UNDEF);
}

fn nest(db: &Database<MemoryEngine>, tptoken: TpToken, level: usize, deepest: &Cell<usize>) -> Result<c_int> {
    db.run_transaction(tptoken, &TransactionOptions::new(), |token| {
        deepest.set(deepest.get().max(level));
        db.set(token, &key("^depth", &[level.to_string().as_str()]), "x")?;
        nest(db, token, level + 1, deepest).map(|_| ())
    })
}

#[test]
fn test_nesting_depth_limit() {
    // Deep recursion; give it room
    thread::Builder::new()
        .stack_size(64 * 1024 * 1024)
        .spawn(|| {
            let db = setup_test_db();
            let deepest = Cell::new(0);

            let err = nest(&db, NOTTP, 1, &deepest).unwrap_err();

            assert_eq!(err.status(), Some(YDB_ERR_TPTOODEEP));
            assert_eq!(deepest.get(), YDB_MAX_TP_DEPTH);
            assert_eq!(db.data(NOTTP, &key("^depth", &[])).unwrap(), DataFlags::UNDEF);
            assert_eq!(db.engine().tp_depth(), 0);
            assert_eq!(transaction::depth(), 0);
        })
        .unwrap()
        .join()
        .unwrap();
}

#[test]
fn test_restart_vars_are_reset() {
    let db = setup_test_db();
    db.set(NOTTP, &key("x", &[]), "1").unwrap();
    let attempts = Cell::new(0);
    let options = TransactionOptions::new().with_restart_vars(RestartVars::from_names(["x"]));

    db.run_transaction(NOTTP, &options, |token| {
        attempts.set(attempts.get() + 1);
        db.increment(token, &key("x", &[]), "1")?;
        db.increment(token, &key("y", &[]), "1")?;
        if attempts.get() == 1 {
            return Ok(TransactionStatus::Restart);
        }
        Ok(TransactionStatus::Ok)
    })
    .unwrap();

    // x went back to 1 before the retry; y is not restored and kept counting
    assert_eq!(db.get(NOTTP, &key("x", &[])).unwrap(), b"2");
    assert_eq!(db.get(NOTTP, &key("y", &[])).unwrap(), b"2");
}

#[test]
fn test_wildcard_restart_vars() {
    let db = setup_test_db();
    db.set(NOTTP, &key("kept", &[]), "start").unwrap();
    let attempts = Cell::new(0);
    let options = TransactionOptions::new().with_restart_vars(RestartVars::All);

    db.run_transaction(NOTTP, &options, |token| {
        attempts.set(attempts.get() + 1);
        if attempts.get() == 1 {
            db.set(token, &key("kept", &[]), "changed")?;
            db.set(token, &key("scratch", &["1"]), "temp")?;
            return Ok(TransactionStatus::Restart);
        }
        assert_eq!(db.get(token, &key("kept", &[]))?, b"start");
        assert_eq!(db.data(token, &key("scratch", &[]))?, DataFlags::UNDEF);
        Ok(TransactionStatus::Ok)
    })
    .unwrap();

    assert_eq!(attempts.get(), 2);
}

#[test]
fn test_restart_vars_keep_the_earliest_snapshot() {
    let db = setup_test_db();
    db.set(NOTTP, &key("x", &[]), "start").unwrap();
    let seen = std::cell::RefCell::new(Vec::new());
    let nested = TransactionOptions::new().with_restart_vars(RestartVars::from_names(["x"]));

    // Everything is named at the outer level, then x again below it
    db.run_transaction(NOTTP, &TransactionOptions::new().with_restart_vars(RestartVars::All), |outer| {
        seen.borrow_mut().push(text(db.get(outer, &key("x", &[]))?));
        db.set(outer, &key("x", &[]), "changed")?;
        let first = seen.borrow().len() == 1;
        db.run_transaction(outer, &nested, |_| {
            if first {
                return Ok(TransactionStatus::Restart);
            }
            Ok(TransactionStatus::Ok)
        })?;
        Ok(())
    })
    .unwrap();

    assert_eq!(*seen.borrow(), ["start", "start"]);
    assert_eq!(db.get(NOTTP, &key("x", &[])).unwrap(), b"changed");
}

#[test]
fn test_named_restart_vars_outlive_a_later_wildcard() {
    let db = setup_test_db();
    db.set(NOTTP, &key("x", &[]), "start").unwrap();
    let seen = std::cell::RefCell::new(Vec::new());
    let outer_options = TransactionOptions::new().with_restart_vars(RestartVars::from_names(["x"]));
    let nested = TransactionOptions::new().with_restart_vars(RestartVars::All);

    db.run_transaction(NOTTP, &outer_options, |outer| {
        seen.borrow_mut().push(text(db.get(outer, &key("x", &[]))?));
        db.set(outer, &key("x", &[]), "changed")?;
        let first = seen.borrow().len() == 1;
        db.run_transaction(outer, &nested, |inner| {
            db.set(inner, &key("scratch", &[]), "temp")?;
            if first {
                return Ok(TransactionStatus::Restart);
            }
            Ok(TransactionStatus::Ok)
        })?;
        Ok(())
    })
    .unwrap();

    assert_eq!(*seen.borrow(), ["start", "start"]);
}

#[test]
fn test_locals_survive_rollback() {
    let db = setup_test_db();
    let options = TransactionOptions::new().with_restart_vars(RestartVars::from_names(["v"]));

    let err = db
        .run_transaction(NOTTP, &options, |token| {
            db.set(token, &key("v", &[]), "set inside")?;
            db.set(token, &key("^g", &[]), "set inside")?;
            Ok(TransactionStatus::Rollback)
        })
        .unwrap_err();

    assert!(err.is_rollback());
    assert_eq!(db.get(NOTTP, &key("v", &[])).unwrap(), b"set inside");
    assert_eq!(db.data(NOTTP, &key("^g", &[])).unwrap(), DataFlags::UNDEF);
}

#[test]
fn test_callback_errors_pass_through() {
    let db = setup_test_db();
    let attempts = Cell::new(0);

    let err = db
        .run_transaction(NOTTP, &TransactionOptions::new(), |token| {
            attempts.set(attempts.get() + 1);
            db.set(token, &key("^fault", &[]), "partial")?;
            Err::<(), _>(Error::callback(io::Error::new(io::ErrorKind::Other, "boom")))
        })
        .unwrap_err();

    assert!(matches!(err, Error::Callback(_)));
    assert_eq!(err.to_string(), "boom");
    assert_eq!(attempts.get(), 1);
    assert_eq!(db.data(NOTTP, &key("^fault", &[])).unwrap(), DataFlags::UNDEF);
}

#[test]
fn test_nested_callback_errors_unwind_every_level() {
    let db = setup_test_db();

    let err = db
        .run_transaction(NOTTP, &TransactionOptions::new(), |outer| {
            db.set(outer, &key("^fault", &["outer"]), "partial")?;
            db.run_transaction(outer, &TransactionOptions::new(), |inner| {
                db.set(inner, &key("^fault", &["inner"]), "partial")?;
                db.run_transaction(inner, &TransactionOptions::new(), |innermost| {
                    db.set(innermost, &key("^fault", &["innermost"]), "partial")?;
                    Err::<(), _>(Error::callback(io::Error::new(io::ErrorKind::Other, "deep boom")))
                })?;
                Ok(())
            })?;
            Ok(())
        })
        .unwrap_err();

    assert!(matches!(err, Error::Callback(_)));
    assert_eq!(err.to_string(), "deep boom");
    assert_eq!(transaction::depth(), 0);
    assert_eq!(db.data(NOTTP, &key("^fault", &[])).unwrap(), DataFlags::UNDEF);
}

#[test]
fn test_callback_panics_resume() {
    let db = setup_test_db();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        db.run_transaction(NOTTP, &TransactionOptions::new(), |token| {
            db.set(token, &key("^panic", &[]), "partial")?;
            if token.raw() != 0 {
                panic!("kaboom");
            }
            Ok(())
        })
    }));

    let payload = result.unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"kaboom"));
    assert_eq!(db.data(NOTTP, &key("^panic", &[])).unwrap(), DataFlags::UNDEF);
    assert_eq!(db.engine().tp_depth(), 0);
    assert_eq!(transaction::depth(), 0);

    // The process is still usable
    db.run_transaction(NOTTP, &TransactionOptions::new(), |token| db.set(token, &key("^panic", &[]), "ok"))
        .unwrap();
    assert_eq!(db.get(NOTTP, &key("^panic", &[])).unwrap(), b"ok");
}

#[test]
fn test_restart_budget_times_out() {
    let db = Database::new(MemoryEngine::with_config(EngineConfig::default().with_max_restarts(3)));
    let attempts = Cell::new(0);

    let err = db
        .run_transaction(NOTTP, &TransactionOptions::new(), |token| {
            attempts.set(attempts.get() + 1);
            db.increment(token, &key("^spin", &[]), "1")?;
            Ok(TransactionStatus::Restart)
        })
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(err.status(), Some(YDB_ERR_TPTIMEOUT));
    assert_eq!(attempts.get(), 4);
    assert_eq!(db.data(NOTTP, &key("^spin", &[])).unwrap(), DataFlags::UNDEF);
}

#[test]
fn test_restart_time_limit() {
    let config = EngineConfig::default().with_max_tp_time(Duration::from_millis(20));
    let db = Database::new(MemoryEngine::with_config(config));

    let err = db
        .run_transaction(NOTTP, &TransactionOptions::new(), |_| {
            thread::sleep(Duration::from_millis(5));
            Ok(TransactionStatus::Restart)
        })
        .unwrap_err();

    assert!(err.is_timeout());
}

#[test]
fn test_raw_statuses_from_the_callback() {
    let db = setup_test_db();

    // A negative status is reported as it is
    let err = db
        .run_transaction(NOTTP, &TransactionOptions::new(), |_| Ok(YDB_ERR_TPTIMEOUT))
        .unwrap_err();
    assert_eq!(err.status(), Some(YDB_ERR_TPTIMEOUT));

    // A positive status with no meaning is rejected
    let err = db
        .run_transaction(NOTTP, &TransactionOptions::new(), |_| Ok(TransactionStatus::Status(12345)))
        .unwrap_err();
    assert_eq!(err.status(), Some(YDB_ERR_TPCALLBACKINVRETVAL));

    assert_eq!(
        db.run_transaction(NOTTP, &TransactionOptions::new(), |_| Ok(YDB_OK)).unwrap(),
        YDB_OK
    );
}

#[test]
fn test_tokens_are_checked() {
    let db = setup_test_db();
    let seen = Cell::new(NOTTP);

    // NOTTP inside a transaction
    let err = db
        .run_transaction(NOTTP, &TransactionOptions::new(), |token| {
            seen.set(token);
            db.set(NOTTP, &key("^tok", &[]), "x")
        })
        .unwrap_err();
    assert_eq!(err.status(), Some(YDB_ERR_INVTPTRANS));

    // A token whose level has closed
    let err = db.get(seen.get(), &key("^tok", &[])).unwrap_err();
    assert_eq!(err.status(), Some(YDB_ERR_INVTPTRANS));

    // The outer token inside a nested level
    let err = db
        .run_transaction(NOTTP, &TransactionOptions::new(), |outer| {
            db.run_transaction(outer, &TransactionOptions::new(), |_inner| db.set(outer, &key("^tok", &[]), "x"))
                .map(|_| ())
        })
        .unwrap_err();
    assert_eq!(err.status(), Some(YDB_ERR_INVTPTRANS));
    assert_eq!(db.data(NOTTP, &key("^tok", &[])).unwrap(), DataFlags::UNDEF);
}

#[test]
fn test_invalid_options() {
    let db = setup_test_db();
    let calls = Cell::new(0);

    let options = TransactionOptions::new().with_restart_vars(RestartVars::from_names(["^global"]));
    let err = db
        .run_transaction(NOTTP, &options, |_| {
            calls.set(calls.get() + 1);
            Ok(())
        })
        .unwrap_err();

    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(calls.get(), 0);
}

#[test]
fn test_other_processes_see_only_commits() {
    let db = setup_test_db();
    let reader = Database::new(db.engine().process());
    let (ready_tx, ready_rx) = mpsc::channel();

    let handle = thread::spawn(move || {
        ready_rx.recv().unwrap();
        // Blocks until the writer's transaction is over
        text(reader.get(NOTTP, &key("^iso", &[])).unwrap())
    });

    db.run_transaction(NOTTP, &TransactionOptions::new(), |token| {
        db.set(token, &key("^iso", &[]), "uncommitted")?;
        ready_tx.send(()).unwrap();
        thread::sleep(Duration::from_millis(50));
        db.set(token, &key("^iso", &[]), "committed")
    })
    .unwrap();

    assert_eq!(handle.join().unwrap(), "committed");
}
