//! Bindings to a hierarchical, transactional key-value engine of the M
//! (MUMPS) family.
//!
//! Data lives in sparse trees addressed by a variable name and a list of
//! byte-string subscripts. Names starting with `^` are globals, persisted
//! and shared between processes; other names are process-private locals.
//!
//! Every call takes a [`TpToken`]. Outside a transaction that is
//! [`TpToken::NOTTP`]; [`Database::run_transaction`] hands its callback the
//! token of the level it opened, and work done with that token commits or
//! rolls back with the level.
//!
//! Two engines implement [`Engine`]: [`MemoryEngine`], an in-process engine
//! with the same semantics, and `ffi::NativeEngine` (feature `native`),
//! which calls `libyottadb`.

pub mod constants;
pub mod cursor;
pub mod database;
pub mod engine;
pub mod env;
pub mod error;
#[cfg(feature = "native")]
pub mod ffi;
pub mod key;
pub mod memory;
pub mod number;
pub mod transaction;
pub mod types;
pub mod zwr;

pub use constants::{DataFlags, DeleteType};
pub use database::Database;
pub use engine::Engine;
pub use env::EngineConfig;
pub use error::{Error, ErrorCode, NativeError, Result, ValidationError};
pub use key::Key;
pub use memory::MemoryEngine;
pub use transaction::{run_transaction, TransactionOptions, TransactionStatus};
pub use types::{ApiMode, RestartVars, TpToken};
