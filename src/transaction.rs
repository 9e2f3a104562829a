//! Runs caller code as a nested engine transaction.
//!
//! The engine owns the retry loop: it opens a level, invokes the callback
//! with a fresh token and decides from the returned status whether to
//! commit, restart or roll back. This module only turns the callback's
//! `Result` into that status, keeps faults it cannot express as a status,
//! and hands them back unchanged once the engine has unwound the level.

use log::{debug, trace, warn};
use std::any::Any;
use std::cell::Cell;
use std::os::raw::c_int;
use std::panic::{self, AssertUnwindSafe};

use crate::constants::*;
use crate::engine::Engine;
use crate::error::{Error, NativeError, Result, ValidationError};
use crate::key::validate_local_name;
use crate::types::{RestartVars, TpToken};

thread_local! {
    /// Bridge nesting level on this thread
    static DEPTH: Cell<usize> = Cell::new(0);
}

/// Number of `run_transaction` calls currently active on this thread
pub fn depth() -> usize {
    DEPTH.with(Cell::get)
}

/// Tracks one bridge level; unwinds on every exit path including panics
struct DepthGuard {
    level: usize,
}

impl DepthGuard {
    fn enter() -> Self {
        let level = DEPTH.with(|d| {
            let level = d.get() + 1;
            d.set(level);
            level
        });
        DepthGuard { level }
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        DEPTH.with(|d| d.set(self.level - 1));
    }
}

/// How a callback asks the engine to close its level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Commit
    Ok,
    /// Discard this attempt and run the callback again
    Restart,
    /// Discard the transaction
    Rollback,
    /// Any other status, passed to the engine verbatim
    Status(c_int),
}

impl TransactionStatus {
    pub fn to_native(self) -> c_int {
        match self {
            TransactionStatus::Ok => YDB_OK,
            TransactionStatus::Restart => YDB_TP_RESTART,
            TransactionStatus::Rollback => YDB_TP_ROLLBACK,
            TransactionStatus::Status(status) => status,
        }
    }
}

impl From<()> for TransactionStatus {
    fn from(_: ()) -> Self {
        TransactionStatus::Ok
    }
}

impl From<c_int> for TransactionStatus {
    fn from(status: c_int) -> Self {
        match status {
            YDB_OK => TransactionStatus::Ok,
            YDB_TP_RESTART => TransactionStatus::Restart,
            YDB_TP_ROLLBACK => TransactionStatus::Rollback,
            status => TransactionStatus::Status(status),
        }
    }
}

/// Per-call transaction settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Label forwarded to the engine; `BATCH` commits without a journal flush
    pub transaction_id: String,
    /// Locals put back to their starting values when the transaction restarts
    pub restart_vars: RestartVars,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        TransactionOptions {
            transaction_id: YDB_TRANSID_BATCH.to_owned(),
            restart_vars: RestartVars::None,
        }
    }
}

impl TransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transaction_id(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = transaction_id.into();
        self
    }

    pub fn with_restart_vars(mut self, restart_vars: RestartVars) -> Self {
        self.restart_vars = restart_vars;
        self
    }

    fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.transaction_id.contains('\0') {
            return Err(ValidationError::InvalidTransactionId(self.transaction_id.clone()));
        }
        if let RestartVars::Names(names) = &self.restart_vars {
            if names.len() > YDB_MAX_NAMES {
                return Err(ValidationError::TooManyNames {
                    count: names.len(),
                    max: YDB_MAX_NAMES,
                });
            }
            names.iter().try_for_each(|name| validate_local_name(name))?;
        }
        Ok(())
    }
}

/// A fault the engine has no status for
enum Fault {
    Error(Error),
    Panic(Box<dyn Any + Send + 'static>),
}

/// Run `callback` inside a new transaction level opened under `tptoken`.
///
/// The callback receives the level's token and must use it for every
/// engine call it makes. Its outcome decides how the level closes:
///
/// * `Ok(status)` reports `status` (unit means commit);
/// * `Err` carrying a restart signal restarts the transaction, `Err`
///   carrying a rollback signal rolls it back;
/// * any other `Err`, or a panic, rolls the level back and is then
///   returned (or resumed) unchanged.
///
/// Every attempt runs the callback again, so work it does outside the
/// engine must be safe to repeat. Returns the engine's completion status,
/// `YDB_OK` on commit; rollback and engine faults are `Error::Native`.
pub fn run_transaction<E, F, R>(
    engine: &E,
    tptoken: TpToken,
    options: &TransactionOptions,
    mut callback: F,
) -> Result<c_int>
where
    E: Engine + ?Sized,
    F: FnMut(TpToken) -> Result<R>,
    R: Into<TransactionStatus>,
{
    options.validate()?;
    let varnames = options.restart_vars.to_names();
    let guard = DepthGuard::enter();
    let mut fault: Option<Fault> = None;
    let mut attempt = 0u32;

    let status = engine.tp(tptoken, &options.transaction_id, &varnames, &mut |token| {
        attempt += 1;
        let status = match panic::catch_unwind(AssertUnwindSafe(|| callback(token))) {
            Ok(Ok(value)) => Into::<TransactionStatus>::into(value).to_native(),
            Ok(Err(err)) if err.is_restart() => YDB_TP_RESTART,
            Ok(Err(err)) if err.is_rollback() => YDB_TP_ROLLBACK,
            Ok(Err(err)) => {
                fault = Some(Fault::Error(err));
                YDB_TP_ROLLBACK
            }
            Err(payload) => {
                fault = Some(Fault::Panic(payload));
                YDB_TP_ROLLBACK
            }
        };
        trace!(
            "bridge level {} attempt {} token {} closing with {:?}",
            guard.level,
            attempt,
            token,
            TransactionStatus::from(status)
        );
        status
    });

    match fault {
        Some(Fault::Error(err)) => {
            debug!("bridge level {} returning callback fault: {}", guard.level, err);
            return Err(err);
        }
        Some(Fault::Panic(payload)) => {
            debug!("bridge level {} resuming callback panic", guard.level);
            panic::resume_unwind(payload);
        }
        None => {}
    }

    if status == YDB_OK {
        return Ok(status);
    }
    let message = engine
        .message(tptoken, status)
        .unwrap_or_else(|| NativeError::from_status(status).message);
    let err = NativeError::new(status, message);
    if err.is_rollback() {
        debug!("bridge level {} rolled back after {} attempt(s)", guard.level, attempt);
    } else if err.is_timeout() {
        warn!("bridge level {} gave up after {} attempt(s): {}", guard.level, attempt, err);
    }
    Err(err.into())
}
