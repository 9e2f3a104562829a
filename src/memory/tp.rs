use std::collections::BTreeMap;
use std::thread::{self, ThreadId};
use std::time::Instant;

use crate::constants::YDB_ERR_INVTPTRANS;
use crate::engine::Status;
use crate::env::EngineConfig;
use crate::memory::tree::{Path, Store, Tree};
use crate::types::{ApiMode, RestartVars, TpToken};

/// Prior state of one global node, restored if the level does not commit
#[derive(Debug)]
pub(crate) struct UndoEntry {
    pub(crate) var: String,
    pub(crate) path: Path,
    pub(crate) previous: Option<Vec<u8>>,
}

/// One open nesting level
#[derive(Debug)]
pub(crate) struct Level {
    pub(crate) token: TpToken,
    pub(crate) transid: String,
    pub(crate) undo: Vec<UndoEntry>,
}

/// Local variables as they were when they were first named for restore
#[derive(Debug, Default)]
pub(crate) struct RestoreSet {
    all: Option<Store>,
    vars: BTreeMap<String, Option<Tree>>,
}

impl RestoreSet {
    /// Snapshot the named locals not already recorded
    pub(crate) fn record(&mut self, locals: &Store, varnames: &[String]) {
        for name in varnames {
            if name == RestartVars::WILDCARD {
                if self.all.is_none() {
                    self.all = Some(locals.clone());
                }
            } else if self.all.is_none() {
                self.vars
                    .entry(name.clone())
                    .or_insert_with(|| locals.get(name).cloned());
            }
        }
    }

    /// Named entries are only ever older than the wildcard snapshot
    pub(crate) fn restore(&self, locals: &mut Store) {
        if let Some(all) = &self.all {
            *locals = all.clone();
        }
        for (name, tree) in &self.vars {
            match tree {
                Some(tree) => {
                    locals.insert(name.clone(), tree.clone());
                }
                None => {
                    locals.remove(name);
                }
            }
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.all.is_none() && self.vars.is_empty()
    }
}

/// Transaction bookkeeping of one process handle
#[derive(Debug, Default)]
pub(crate) struct TpState {
    /// Thread running the outermost level
    thread: Option<ThreadId>,
    pub(crate) levels: Vec<Level>,
    pub(crate) restore: RestoreSet,
    /// Start of the first attempt of the outermost level
    started: Option<Instant>,
    restarts: u32,
    serial: u64,
}

impl TpState {
    pub(crate) fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Whether an operation carrying `token` may run, and if so whether it
    /// runs inside the open transaction
    pub(crate) fn check(&self, token: TpToken, mode: ApiMode) -> Result<bool, Status> {
        let level = match self.levels.last() {
            Some(level) => level,
            None if token.is_nottp() || mode == ApiMode::Simple => return Ok(false),
            None => return Err(YDB_ERR_INVTPTRANS),
        };
        if self.thread != Some(thread::current().id()) {
            // Another thread of this process, outside the transaction
            return if token.is_nottp() {
                Ok(false)
            } else {
                Err(YDB_ERR_INVTPTRANS)
            };
        }
        if mode == ApiMode::Simple || level.token == token {
            Ok(true)
        } else {
            Err(YDB_ERR_INVTPTRANS)
        }
    }

    /// Start an outermost transaction on the calling thread
    pub(crate) fn begin(&mut self) {
        self.thread = Some(thread::current().id());
        self.restore = RestoreSet::default();
        self.started = Some(Instant::now());
        self.restarts = 0;
    }

    pub(crate) fn finish(&mut self) {
        self.thread = None;
        self.restore = RestoreSet::default();
        self.started = None;
        self.levels.clear();
    }

    /// Push a level with a fresh token
    pub(crate) fn open(&mut self, transid: &str) -> TpToken {
        self.serial += 1;
        let depth = self.levels.len() as u64 + 1;
        let token = TpToken((self.serial << 8) | depth);
        self.levels.push(Level {
            token,
            transid: transid.to_owned(),
            undo: Vec::new(),
        });
        token
    }

    pub(crate) fn journal(&mut self, entries: impl IntoIterator<Item = UndoEntry>) {
        if let Some(level) = self.levels.last_mut() {
            level.undo.extend(entries);
        }
    }

    /// Count a restart of the outermost level; false once the configured
    /// budget is spent
    pub(crate) fn allow_restart(&mut self, config: &EngineConfig) -> bool {
        self.restarts += 1;
        if config.max_restarts.map_or(false, |max| self.restarts > max) {
            return false;
        }
        match (config.max_tp_time, self.started) {
            (Some(limit), Some(started)) => started.elapsed() < limit,
            _ => true,
        }
    }

    pub(crate) fn restarts(&self) -> u32 {
        self.restarts
    }
}

/// Put back every node recorded in `undo`, newest first
pub(crate) fn rollback(globals: &mut Store, undo: Vec<UndoEntry>) {
    for entry in undo.into_iter().rev() {
        let tree = globals.entry(entry.var.clone()).or_default();
        match entry.previous {
            Some(value) => {
                tree.set(entry.path, value);
            }
            None => {
                tree.remove(&entry.path);
            }
        }
        if tree.is_empty() {
            globals.remove(&entry.var);
        }
    }
}

/// `BATCH` and `BA`, in any case, commit without waiting for the journal
pub(crate) fn is_batch(transid: &str) -> bool {
    transid.eq_ignore_ascii_case("BATCH") || transid.eq_ignore_ascii_case("BA")
}
