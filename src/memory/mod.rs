//! In-process engine.
//!
//! Implements the full [`Engine`] contract without the native library:
//! globals shared between process handles, per-process locals, advisory
//! locks and nested transactions with restart, rollback and restart-variable
//! restore. Nothing is persisted.

mod locks;
mod tp;
mod tree;

use log::{debug, trace, warn};
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::constants::*;
use crate::engine::{Engine, EngineResult, Status, TpCallback};
use crate::env::EngineConfig;
use crate::error::message_for;
use crate::key::{validate_local_name, Key};
use crate::number;
use crate::types::{ApiMode, RestartVars, TpToken};
use crate::zwr;

use self::locks::LockTable;
use self::tp::{TpState, UndoEntry};
use self::tree::{path_of, raw_path, Path, Store, Subscript};

/// State shared by every process handle of one engine
#[derive(Debug)]
struct Shared {
    globals: Mutex<Store>,
    locks: LockTable,
    /// Held for the whole of an outermost transaction and for every data
    /// operation, which serialises transactions against all other work
    gate: ReentrantMutex<()>,
    next_process: AtomicU64,
}

/// An engine living entirely in memory.
///
/// Each value returned by [`MemoryEngine::process`] behaves like a separate
/// process attached to the same database: globals (`^name`) and locks are
/// shared, locals and transaction state are not.
#[derive(Debug)]
pub struct MemoryEngine {
    shared: Arc<Shared>,
    process: u64,
    config: EngineConfig,
    locals: Mutex<Store>,
    tp: Mutex<TpState>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        MemoryEngine::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        MemoryEngine::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let shared = Arc::new(Shared {
            globals: Mutex::new(Store::new()),
            locks: LockTable::default(),
            gate: ReentrantMutex::new(()),
            next_process: AtomicU64::new(1),
        });
        MemoryEngine::attach(shared, config)
    }

    fn attach(shared: Arc<Shared>, config: EngineConfig) -> Self {
        let process = shared.next_process.fetch_add(1, Ordering::Relaxed);
        debug!("attached process {} ({} call set)", process, config.api_mode);
        MemoryEngine {
            shared,
            process,
            config,
            locals: Mutex::new(Store::new()),
            tp: Mutex::new(TpState::default()),
        }
    }

    /// Another process attached to the same globals and locks
    pub fn process(&self) -> MemoryEngine {
        MemoryEngine::attach(Arc::clone(&self.shared), self.config.clone())
    }

    pub fn process_id(&self) -> u64 {
        self.process
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current transaction nesting depth of this process
    pub fn tp_depth(&self) -> usize {
        self.tp.lock().depth()
    }

    /// Reference count this process holds on the lock `key`
    pub fn lock_count(&self, key: &Key) -> u32 {
        self.shared.locks.count(self.process, key)
    }

    /// Pass the gate and validate the token. Returns whether the operation
    /// runs inside this process's open transaction.
    fn enter(&self, tptoken: TpToken) -> EngineResult<(ReentrantMutexGuard<'_, ()>, bool)> {
        let gate = self.shared.gate.lock();
        let in_tp = self.tp.lock().check(tptoken, self.config.api_mode)?;
        Ok((gate, in_tp))
    }

    fn with_store<T>(&self, key: &Key, f: impl FnOnce(&mut Store) -> T) -> T {
        if key.is_global() {
            f(&mut *self.shared.globals.lock())
        } else {
            f(&mut *self.locals.lock())
        }
    }

    /// Record prior global values so the open level can undo them
    fn journal(&self, in_tp: bool, key: &Key, previous: Vec<(Path, Option<Vec<u8>>)>) {
        if !(in_tp && key.is_global()) || previous.is_empty() {
            return;
        }
        let var = key.name().to_owned();
        self.tp.lock().journal(previous.into_iter().map(|(path, previous)| UndoEntry {
            var: var.clone(),
            path,
            previous,
        }));
    }

    fn undefined(key: &Key) -> Status {
        if key.is_global() {
            YDB_ERR_GVUNDEF
        } else {
            YDB_ERR_LVUNDEF
        }
    }

    fn check_key(key: &Key) -> EngineResult<()> {
        key.validate().map_err(|_| {
            if key.subscripts().len() > YDB_MAX_SUBS {
                YDB_ERR_MAXNRSUBSCRIPTS
            } else if key.subscripts().iter().any(|s| s.len() > YDB_MAX_STR) {
                YDB_ERR_MAXSTRLEN
            } else if key.name().trim_start_matches('^').len() > YDB_MAX_IDENT {
                YDB_ERR_VARNAME2LONG
            } else {
                YDB_ERR_INVVARNAME
            }
        })
    }

    fn check_lock_args(&self, tptoken: TpToken, timeout_ns: u64, keys: &[Key]) -> EngineResult<()> {
        self.tp.lock().check(tptoken, self.config.api_mode)?;
        if timeout_ns > YDB_MAX_TIME_NSEC {
            return Err(YDB_ERR_TIME2LONG);
        }
        if keys.len() > YDB_MAX_NAMES {
            return Err(YDB_ERR_NAMECOUNT2HI);
        }
        keys.iter().try_for_each(MemoryEngine::check_key)
    }

    /// Undo `undo` against the shared globals
    fn rollback(&self, undo: Vec<UndoEntry>) {
        if !undo.is_empty() {
            tp::rollback(&mut *self.shared.globals.lock(), undo);
        }
    }

    fn restore_locals(&self) {
        let state = self.tp.lock();
        if state.restore.is_empty() {
            return;
        }
        debug!("process {} restoring restart variables", self.process);
        state.restore.restore(&mut *self.locals.lock());
    }

    /// Close the current level after its callback panicked
    fn abandon_level(&self, outermost: bool) {
        let level = self.tp.lock().levels.pop();
        if let Some(level) = level {
            self.rollback(level.undo);
        }
        if outermost {
            self.tp.lock().finish();
        }
    }
}

impl Drop for MemoryEngine {
    fn drop(&mut self) {
        self.shared.locks.release_all(self.process);
    }
}

impl Engine for MemoryEngine {
    fn get(&self, tptoken: TpToken, key: &Key) -> EngineResult<Vec<u8>> {
        MemoryEngine::check_key(key)?;
        let (_gate, _) = self.enter(tptoken)?;
        let path = path_of(key.subscripts());
        self.with_store(key, |store| store.get(key.name()).and_then(|t| t.get(&path)).cloned())
            .ok_or_else(|| MemoryEngine::undefined(key))
    }

    fn set(&self, tptoken: TpToken, key: &Key, value: &[u8]) -> EngineResult<()> {
        MemoryEngine::check_key(key)?;
        if value.len() > YDB_MAX_STR {
            return Err(YDB_ERR_MAXSTRLEN);
        }
        let (_gate, in_tp) = self.enter(tptoken)?;
        let path = path_of(key.subscripts());
        let previous = self.with_store(key, |store| {
            store
                .entry(key.name().to_owned())
                .or_default()
                .set(path.clone(), value.to_vec())
        });
        self.journal(in_tp, key, vec![(path, previous)]);
        Ok(())
    }

    fn delete(&self, tptoken: TpToken, key: &Key, kind: DeleteType) -> EngineResult<()> {
        MemoryEngine::check_key(key)?;
        let (_gate, in_tp) = self.enter(tptoken)?;
        let path = path_of(key.subscripts());
        let removed = self.with_store(key, |store| {
            let tree = match store.get_mut(key.name()) {
                Some(tree) => tree,
                None => return Vec::new(),
            };
            let removed: Vec<(Path, Option<Vec<u8>>)> = match kind {
                DeleteType::Node => tree
                    .remove(&path)
                    .map(|value| (path.clone(), Some(value)))
                    .into_iter()
                    .collect(),
                DeleteType::Tree => tree
                    .remove_tree(&path)
                    .into_iter()
                    .map(|(p, v)| (p, Some(v)))
                    .collect(),
            };
            if tree.is_empty() {
                store.remove(key.name());
            }
            removed
        });
        self.journal(in_tp, key, removed);
        Ok(())
    }

    fn data(&self, tptoken: TpToken, key: &Key) -> EngineResult<DataFlags> {
        MemoryEngine::check_key(key)?;
        let (_gate, _) = self.enter(tptoken)?;
        let path = path_of(key.subscripts());
        Ok(self.with_store(key, |store| {
            store
                .get(key.name())
                .map_or(DataFlags::UNDEF, |tree| tree.data(&path))
        }))
    }

    fn incr(&self, tptoken: TpToken, key: &Key, increment: &[u8]) -> EngineResult<Vec<u8>> {
        MemoryEngine::check_key(key)?;
        let (_gate, in_tp) = self.enter(tptoken)?;
        let path = path_of(key.subscripts());
        let (result, previous) = self.with_store(key, |store| {
            let current = store
                .get(key.name())
                .and_then(|t| t.get(&path))
                .cloned()
                .unwrap_or_default();
            let result = number::increment(&current, increment)
                .map_err(|_| YDB_ERR_NUMOFLOW)?
                .into_bytes();
            let previous = store
                .entry(key.name().to_owned())
                .or_default()
                .set(path.clone(), result.clone());
            Ok::<_, Status>((result, previous))
        })?;
        self.journal(in_tp, key, vec![(path, previous)]);
        Ok(result)
    }

    fn subscript_next(&self, tptoken: TpToken, key: &Key) -> EngineResult<Vec<u8>> {
        MemoryEngine::check_key(key)?;
        let (_gate, _) = self.enter(tptoken)?;
        self.with_store(key, |store| {
            let (last, parent) = match key.subscripts().split_last() {
                Some(split) => split,
                None => return tree::next_name(store, key.name()).map(|n| n.clone().into_bytes()),
            };
            let tree = store.get(key.name())?;
            tree.subscript_next(&path_of(parent), &Subscript::new(last))
                .map(|s| s.raw().to_vec())
        })
        .ok_or(YDB_ERR_NODEEND)
    }

    fn subscript_previous(&self, tptoken: TpToken, key: &Key) -> EngineResult<Vec<u8>> {
        MemoryEngine::check_key(key)?;
        let (_gate, _) = self.enter(tptoken)?;
        self.with_store(key, |store| {
            let (last, parent) = match key.subscripts().split_last() {
                Some(split) => split,
                None => {
                    return tree::previous_name(store, key.name()).map(|n| n.clone().into_bytes())
                }
            };
            let tree = store.get(key.name())?;
            tree.subscript_previous(&path_of(parent), &Subscript::new(last))
                .map(|s| s.raw().to_vec())
        })
        .ok_or(YDB_ERR_NODEEND)
    }

    fn node_next(&self, tptoken: TpToken, key: &Key) -> EngineResult<Vec<Vec<u8>>> {
        MemoryEngine::check_key(key)?;
        let (_gate, _) = self.enter(tptoken)?;
        let path = path_of(key.subscripts());
        self.with_store(key, |store| {
            store
                .get(key.name())
                .and_then(|tree| tree.node_next(&path))
                .map(raw_path)
        })
        .ok_or(YDB_ERR_NODEEND)
    }

    fn node_previous(&self, tptoken: TpToken, key: &Key) -> EngineResult<Vec<Vec<u8>>> {
        MemoryEngine::check_key(key)?;
        let (_gate, _) = self.enter(tptoken)?;
        let path = path_of(key.subscripts());
        self.with_store(key, |store| {
            store
                .get(key.name())
                .and_then(|tree| tree.node_previous(&path))
                .map(raw_path)
        })
        .ok_or(YDB_ERR_NODEEND)
    }

    fn lock(&self, tptoken: TpToken, timeout_ns: u64, keys: &[Key]) -> EngineResult<()> {
        self.check_lock_args(tptoken, timeout_ns, keys)?;
        self.shared.locks.release_all(self.process);
        if keys.is_empty() {
            return Ok(());
        }
        if self
            .shared
            .locks
            .acquire(self.process, keys, Duration::from_nanos(timeout_ns))
        {
            Ok(())
        } else {
            debug!("process {} timed out acquiring {} lock(s)", self.process, keys.len());
            Err(YDB_LOCK_TIMEOUT)
        }
    }

    fn lock_incr(&self, tptoken: TpToken, timeout_ns: u64, key: &Key) -> EngineResult<()> {
        self.check_lock_args(tptoken, timeout_ns, std::slice::from_ref(key))?;
        if self.shared.locks.acquire(
            self.process,
            std::slice::from_ref(key),
            Duration::from_nanos(timeout_ns),
        ) {
            Ok(())
        } else {
            debug!("process {} timed out locking {}", self.process, key);
            Err(YDB_LOCK_TIMEOUT)
        }
    }

    fn lock_decr(&self, tptoken: TpToken, key: &Key) -> EngineResult<()> {
        self.check_lock_args(tptoken, 0, std::slice::from_ref(key))?;
        self.shared.locks.decrement(self.process, key);
        Ok(())
    }

    fn delete_excl(&self, tptoken: TpToken, names: &[String]) -> EngineResult<()> {
        if names.len() > YDB_MAX_NAMES {
            return Err(YDB_ERR_NAMECOUNT2HI);
        }
        if names.iter().any(|n| validate_local_name(n).is_err()) {
            return Err(YDB_ERR_INVVARNAME);
        }
        let (_gate, _) = self.enter(tptoken)?;
        self.locals.lock().retain(|name, _| names.contains(name));
        Ok(())
    }

    fn str2zwr(&self, tptoken: TpToken, input: &[u8]) -> EngineResult<Vec<u8>> {
        let (_gate, _) = self.enter(tptoken)?;
        let out = zwr::str2zwr(input);
        if out.len() > YDB_MAX_STR {
            return Err(YDB_ERR_MAXSTRLEN);
        }
        Ok(out)
    }

    fn zwr2str(&self, tptoken: TpToken, input: &[u8]) -> EngineResult<Vec<u8>> {
        let (_gate, _) = self.enter(tptoken)?;
        zwr::zwr2str(input).map_err(|_| YDB_ERR_INVZWRITECHAR)
    }

    fn tp(
        &self,
        tptoken: TpToken,
        transid: &str,
        varnames: &[String],
        callback: &mut TpCallback<'_>,
    ) -> Status {
        if varnames.len() > YDB_MAX_NAMES {
            return YDB_ERR_NAMECOUNT2HI;
        }
        let invalid = varnames
            .iter()
            .any(|n| n != RestartVars::WILDCARD && validate_local_name(n).is_err());
        if invalid {
            return YDB_ERR_INVVARNAME;
        }

        let _gate = self.shared.gate.lock();
        let outermost = {
            let mut state = self.tp.lock();
            if let Err(status) = state.check(tptoken, self.config.api_mode) {
                return status;
            }
            if state.depth() >= self.config.max_tp_depth {
                debug!("process {} refused level {}", self.process, state.depth() + 1);
                return YDB_ERR_TPTOODEEP;
            }
            let outermost = state.depth() == 0;
            if outermost {
                state.begin();
            }
            outermost
        };

        loop {
            let (token, depth) = {
                let mut state = self.tp.lock();
                state.restore.record(&*self.locals.lock(), varnames);
                (state.open(transid), state.depth())
            };
            trace!(
                "process {} opened level {} token {} transid {:?}",
                self.process,
                depth,
                token,
                transid
            );
            let handed = match self.config.api_mode {
                ApiMode::Simple => TpToken::NOTTP,
                ApiMode::Threaded => token,
            };

            let returned = match panic::catch_unwind(AssertUnwindSafe(|| callback(handed))) {
                Ok(status) => status,
                Err(payload) => {
                    self.abandon_level(outermost);
                    panic::resume_unwind(payload);
                }
            };

            let level = match self.tp.lock().levels.pop() {
                Some(level) => level,
                None => return YDB_NOTOK,
            };

            match returned {
                YDB_OK => {
                    let mut state = self.tp.lock();
                    if outermost {
                        trace!(
                            "process {} committed {} transaction {:?} after {} restart(s)",
                            self.process,
                            if tp::is_batch(&level.transid) { "batch" } else { "journaled" },
                            level.transid,
                            state.restarts()
                        );
                        state.finish();
                    } else {
                        state.journal(level.undo);
                    }
                    return YDB_OK;
                }
                YDB_TP_RESTART => {
                    self.rollback(level.undo);
                    if !outermost {
                        return YDB_TP_RESTART;
                    }
                    let allowed = self.tp.lock().allow_restart(&self.config);
                    if !allowed {
                        warn!(
                            "process {} transaction {:?} exhausted its restart budget",
                            self.process, transid
                        );
                        self.tp.lock().finish();
                        return YDB_ERR_TPTIMEOUT;
                    }
                    debug!("process {} restarting transaction {:?}", self.process, transid);
                    self.restore_locals();
                }
                status => {
                    self.rollback(level.undo);
                    if outermost {
                        self.tp.lock().finish();
                    }
                    return match status {
                        YDB_TP_ROLLBACK => {
                            debug!("process {} rolled back level {}", self.process, depth);
                            YDB_TP_ROLLBACK
                        }
                        status if status < 0 => status,
                        _ => YDB_ERR_TPCALLBACKINVRETVAL,
                    };
                }
            }
        }
    }

    fn message(&self, _tptoken: TpToken, status: Status) -> Option<String> {
        message_for(status).map(str::to_owned)
    }
}
