//! Contract between the binding and a hierarchical key-value engine.
//!
//! Every call carries the transaction token it runs under and reports
//! failure as the engine's raw status code. Translation into [`Error`]
//! happens one layer up, in [`Database`].
//!
//! [`Error`]: crate::error::Error
//! [`Database`]: crate::database::Database

use std::os::raw::c_int;

use crate::constants::{DataFlags, DeleteType};
use crate::key::Key;
use crate::types::TpToken;

/// Raw engine status
pub type Status = c_int;

pub type EngineResult<T> = std::result::Result<T, Status>;

/// Callback run inside one transaction nesting level. Returns the status
/// used to close that level.
pub type TpCallback<'a> = dyn FnMut(TpToken) -> Status + 'a;

pub trait Engine: Send + Sync {
    /// Value at `key`; GVUNDEF/LVUNDEF if there is none
    fn get(&self, tptoken: TpToken, key: &Key) -> EngineResult<Vec<u8>>;

    fn set(&self, tptoken: TpToken, key: &Key, value: &[u8]) -> EngineResult<()>;

    fn delete(&self, tptoken: TpToken, key: &Key, kind: DeleteType) -> EngineResult<()>;

    fn data(&self, tptoken: TpToken, key: &Key) -> EngineResult<DataFlags>;

    /// Add `increment` to the numeric value at `key`, returning the new value
    fn incr(&self, tptoken: TpToken, key: &Key, increment: &[u8]) -> EngineResult<Vec<u8>>;

    /// Next sibling subscript of the last subscript of `key`. For an
    /// unsubscripted key this is the next variable name.
    fn subscript_next(&self, tptoken: TpToken, key: &Key) -> EngineResult<Vec<u8>>;

    fn subscript_previous(&self, tptoken: TpToken, key: &Key) -> EngineResult<Vec<u8>>;

    /// Subscripts of the next node holding a value, depth first
    fn node_next(&self, tptoken: TpToken, key: &Key) -> EngineResult<Vec<Vec<u8>>>;

    fn node_previous(&self, tptoken: TpToken, key: &Key) -> EngineResult<Vec<Vec<u8>>>;

    /// Release every lock this process holds, then acquire all of `keys`
    fn lock(&self, tptoken: TpToken, timeout_ns: u64, keys: &[Key]) -> EngineResult<()>;

    fn lock_incr(&self, tptoken: TpToken, timeout_ns: u64, key: &Key) -> EngineResult<()>;

    fn lock_decr(&self, tptoken: TpToken, key: &Key) -> EngineResult<()>;

    /// Delete every local variable except those named
    fn delete_excl(&self, tptoken: TpToken, names: &[String]) -> EngineResult<()>;

    fn str2zwr(&self, tptoken: TpToken, input: &[u8]) -> EngineResult<Vec<u8>>;

    fn zwr2str(&self, tptoken: TpToken, input: &[u8]) -> EngineResult<Vec<u8>>;

    /// Open a transaction nesting level and run `callback` inside it,
    /// closing the level according to the status the callback returns.
    ///
    /// `varnames` lists locals restored when the transaction restarts
    /// (`*` for all). Returns the completion status of the level.
    fn tp(
        &self,
        tptoken: TpToken,
        transid: &str,
        varnames: &[String],
        callback: &mut TpCallback<'_>,
    ) -> Status;

    /// Formatted message for `status`
    fn message(&self, tptoken: TpToken, status: Status) -> Option<String>;
}
