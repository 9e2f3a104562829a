use std::os::raw::c_int;
use std::sync::Arc;

use crate::constants::*;
use crate::cursor::{Nodes, Subscripts, VarNames};
use crate::engine::{Engine, EngineResult, Status};
use crate::error::{Error, NativeError, Result, ValidationError};
use crate::key::{validate_local_name, Key};
use crate::transaction::{self, TransactionOptions, TransactionStatus};
use crate::types::TpToken;

/// Database handle over an engine.
///
/// Every operation takes the transaction token it runs under:
/// [`TpToken::NOTTP`] outside a transaction, or the token handed to a
/// transaction callback inside one. Arguments are validated before the
/// engine is called; engine failures come back as [`Error::Native`].
pub struct Database<E: Engine> {
    engine: Arc<E>,
}

impl<E: Engine> Clone for Database<E> {
    fn clone(&self) -> Self {
        Database {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<E: Engine> Database<E> {
    pub fn new(engine: E) -> Self {
        Database {
            engine: Arc::new(engine),
        }
    }

    pub fn from_arc(engine: Arc<E>) -> Self {
        Database { engine }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Translate an engine status into an error, naming the key for the
    /// statuses where that helps
    fn fail(&self, tptoken: TpToken, status: Status, key: Option<&Key>) -> Error {
        let message = self
            .engine
            .message(tptoken, status)
            .unwrap_or_else(|| NativeError::from_status(status).message);
        let message = match key {
            Some(key) if status < 0 => format!("{}: {}", message, key),
            _ => message,
        };
        NativeError::new(status, message).into()
    }

    fn check<T>(&self, tptoken: TpToken, key: Option<&Key>, result: EngineResult<T>) -> Result<T> {
        result.map_err(|status| self.fail(tptoken, status, key))
    }

    fn check_value(value: &[u8]) -> Result<()> {
        if value.len() > YDB_MAX_STR {
            return Err(ValidationError::ValueTooLong {
                len: value.len(),
                max: YDB_MAX_STR,
            }
            .into());
        }
        Ok(())
    }

    fn check_timeout(timeout_ns: u64) -> Result<()> {
        if timeout_ns > YDB_MAX_TIME_NSEC {
            return Err(ValidationError::TimeoutTooLong {
                nanos: timeout_ns,
                max: YDB_MAX_TIME_NSEC,
            }
            .into());
        }
        Ok(())
    }

    fn check_name_count(count: usize) -> Result<()> {
        if count > YDB_MAX_NAMES {
            return Err(ValidationError::TooManyNames {
                count,
                max: YDB_MAX_NAMES,
            }
            .into());
        }
        Ok(())
    }

    /// Value at `key`; an undefined node is an error
    pub fn get(&self, tptoken: TpToken, key: &Key) -> Result<Vec<u8>> {
        key.validate()?;
        self.check(tptoken, Some(key), self.engine.get(tptoken, key))
    }

    /// Value at `key`, or `None` if the node has no value
    pub fn get_opt(&self, tptoken: TpToken, key: &Key) -> Result<Option<Vec<u8>>> {
        match self.get(tptoken, key) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_undefined() => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn set(&self, tptoken: TpToken, key: &Key, value: impl AsRef<[u8]>) -> Result<()> {
        let value = value.as_ref();
        key.validate()?;
        Self::check_value(value)?;
        self.check(tptoken, Some(key), self.engine.set(tptoken, key, value))
    }

    /// Remove the value at `key`, keeping its descendants
    pub fn delete_node(&self, tptoken: TpToken, key: &Key) -> Result<()> {
        key.validate()?;
        let result = self.engine.delete(tptoken, key, DeleteType::Node);
        self.check(tptoken, Some(key), result)
    }

    /// Remove the value at `key` and its whole subtree
    pub fn delete_tree(&self, tptoken: TpToken, key: &Key) -> Result<()> {
        key.validate()?;
        let result = self.engine.delete(tptoken, key, DeleteType::Tree);
        self.check(tptoken, Some(key), result)
    }

    pub fn data(&self, tptoken: TpToken, key: &Key) -> Result<DataFlags> {
        key.validate()?;
        self.check(tptoken, Some(key), self.engine.data(tptoken, key))
    }

    /// Add `delta` to the numeric value at `key` (undefined counts as 0)
    /// and return the new value
    pub fn increment(&self, tptoken: TpToken, key: &Key, delta: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        let delta = delta.as_ref();
        key.validate()?;
        Self::check_value(delta)?;
        self.check(tptoken, Some(key), self.engine.incr(tptoken, key, delta))
    }

    /// Next sibling subscript after the last subscript of `key` (an empty
    /// last subscript starts from the first). NODEEND past the last one.
    pub fn subscript_next(&self, tptoken: TpToken, key: &Key) -> Result<Vec<u8>> {
        key.validate()?;
        self.check(tptoken, Some(key), self.engine.subscript_next(tptoken, key))
    }

    pub fn subscript_previous(&self, tptoken: TpToken, key: &Key) -> Result<Vec<u8>> {
        key.validate()?;
        self.check(tptoken, Some(key), self.engine.subscript_previous(tptoken, key))
    }

    /// Subscripts of the next valued node after `key`, depth first
    pub fn node_next(&self, tptoken: TpToken, key: &Key) -> Result<Vec<Vec<u8>>> {
        key.validate()?;
        self.check(tptoken, Some(key), self.engine.node_next(tptoken, key))
    }

    pub fn node_previous(&self, tptoken: TpToken, key: &Key) -> Result<Vec<Vec<u8>>> {
        key.validate()?;
        self.check(tptoken, Some(key), self.engine.node_previous(tptoken, key))
    }

    /// Release every lock held, then acquire all of `keys` within
    /// `timeout_ns`. On timeout none of them is held.
    pub fn lock_acquire(&self, tptoken: TpToken, keys: &[Key], timeout_ns: u64) -> Result<()> {
        Self::check_timeout(timeout_ns)?;
        Self::check_name_count(keys.len())?;
        keys.iter().try_for_each(Key::validate)?;
        self.check(tptoken, None, self.engine.lock(tptoken, timeout_ns, keys))
    }

    /// Take one more reference to the lock on `key`
    pub fn lock_incr(&self, tptoken: TpToken, key: &Key, timeout_ns: u64) -> Result<()> {
        Self::check_timeout(timeout_ns)?;
        key.validate()?;
        self.check(tptoken, Some(key), self.engine.lock_incr(tptoken, timeout_ns, key))
    }

    /// Drop one reference to the lock on `key`
    pub fn lock_decr(&self, tptoken: TpToken, key: &Key) -> Result<()> {
        key.validate()?;
        self.check(tptoken, Some(key), self.engine.lock_decr(tptoken, key))
    }

    pub fn lock_release(&self, tptoken: TpToken, key: &Key) -> Result<()> {
        self.lock_decr(tptoken, key)
    }

    pub fn lock_release_all(&self, tptoken: TpToken) -> Result<()> {
        self.check(tptoken, None, self.engine.lock(tptoken, 0, &[]))
    }

    /// Delete every local variable except `keep`
    pub fn delete_excl(&self, tptoken: TpToken, keep: &[&str]) -> Result<()> {
        Self::check_name_count(keep.len())?;
        keep.iter().try_for_each(|name| validate_local_name(name))?;
        let names: Vec<String> = keep.iter().map(|n| (*n).to_owned()).collect();
        self.check(tptoken, None, self.engine.delete_excl(tptoken, &names))
    }

    /// ZWRITE spelling of `input`
    pub fn str2zwr(&self, tptoken: TpToken, input: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        let input = input.as_ref();
        Self::check_value(input)?;
        self.check(tptoken, None, self.engine.str2zwr(tptoken, input))
    }

    pub fn zwr2str(&self, tptoken: TpToken, input: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        let input = input.as_ref();
        Self::check_value(input)?;
        self.check(tptoken, None, self.engine.zwr2str(tptoken, input))
    }

    /// Run `callback` as a transaction; see [`transaction::run_transaction`]
    pub fn run_transaction<F, R>(&self, tptoken: TpToken, options: &TransactionOptions, callback: F) -> Result<c_int>
    where
        F: FnMut(TpToken) -> Result<R>,
        R: Into<TransactionStatus>,
    {
        transaction::run_transaction(&*self.engine, tptoken, options, callback)
    }

    /// Sibling subscripts after the last subscript of `key`
    pub fn subscripts(&self, tptoken: TpToken, key: &Key) -> Subscripts<'_, E> {
        Subscripts::new(self, tptoken, key.clone(), false)
    }

    /// Sibling subscripts before the last subscript of `key`, in reverse
    pub fn subscripts_rev(&self, tptoken: TpToken, key: &Key) -> Subscripts<'_, E> {
        Subscripts::new(self, tptoken, key.clone(), true)
    }

    /// Every valued node of the variable `name`, depth first
    pub fn nodes(&self, tptoken: TpToken, name: &str) -> Nodes<'_, E> {
        Nodes::new(self, tptoken, Key::new(name))
    }

    /// Names of defined global (`true`) or local variables
    pub fn var_names(&self, tptoken: TpToken, global: bool) -> VarNames<'_, E> {
        VarNames::new(self, tptoken, global)
    }
}
