use lazy_static::lazy_static;
use std::collections::HashMap;
use std::fmt;
use std::os::raw::c_int;
use std::result;
use thiserror::Error as ThisError;

use crate::constants::*;

/// Custom result type for engine operations
pub type Result<T> = result::Result<T, Error>;

/// Native status codes, one variant per code the binding cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The transaction must be restarted
    TpRestart,
    /// The transaction was rolled back
    TpRollback,
    /// Generic failure reported by the engine
    NotOk,
    /// Not all requested locks were acquired in time
    LockTimeout,
    /// Global variable has no value
    GvUndef,
    /// Local variable has no value
    LvUndef,
    /// Number too large for the engine
    NumOflow,
    /// Output buffer too small for the result
    InvStrLen,
    /// Too many subscripts
    MaxNrSubscripts,
    /// String longer than the engine maximum
    MaxStrLen,
    /// Restart requested outside a transaction
    TpRetry,
    /// Transaction restart condition raised by an operation
    TpRestartCondition,
    /// Transaction nesting too deep
    TpTooDeep,
    /// Transaction exceeded its restart budget or time limit
    TpTimeout,
    /// Malformed ZWRITE string
    InvZwriteChar,
    /// Variable name is not valid
    InvVarName,
    /// Parameter out of range
    ParamInvalid,
    /// Output subscript array too small
    InsuffSubs,
    /// Too many names in a list
    NameCount2Hi,
    /// Timeout too long
    Time2Long,
    /// Variable name too long
    VarName2Long,
    /// Simple API call nested inside a simple API transaction
    SimpleApiNest,
    /// End of the list of subscripts or nodes
    NodeEnd,
    /// Token does not belong to the open transaction
    InvTpTrans,
    /// Threaded call set used after the simple one
    ThreadedApiNotAllowed,
    /// Simple call set used after the threaded one
    SimpleApiNotAllowed,
    /// Call made after the engine shut down
    CallInAfterXit,
    /// Transaction callback returned an unusable status
    TpCallbackInvRetVal,
    /// Lock subscript too long
    LockSub2Long,
    /// Any other native status
    Other(c_int),
}

impl From<c_int> for ErrorCode {
    fn from(code: c_int) -> ErrorCode {
        match code {
            YDB_TP_RESTART => ErrorCode::TpRestart,
            YDB_TP_ROLLBACK => ErrorCode::TpRollback,
            YDB_NOTOK => ErrorCode::NotOk,
            YDB_LOCK_TIMEOUT => ErrorCode::LockTimeout,
            YDB_ERR_GVUNDEF => ErrorCode::GvUndef,
            YDB_ERR_LVUNDEF => ErrorCode::LvUndef,
            YDB_ERR_NUMOFLOW => ErrorCode::NumOflow,
            YDB_ERR_INVSTRLEN => ErrorCode::InvStrLen,
            YDB_ERR_MAXNRSUBSCRIPTS => ErrorCode::MaxNrSubscripts,
            YDB_ERR_MAXSTRLEN => ErrorCode::MaxStrLen,
            YDB_ERR_TPRETRY => ErrorCode::TpRetry,
            YDB_ERR_TPRESTART => ErrorCode::TpRestartCondition,
            YDB_ERR_TPTOODEEP => ErrorCode::TpTooDeep,
            YDB_ERR_TPTIMEOUT => ErrorCode::TpTimeout,
            YDB_ERR_INVZWRITECHAR => ErrorCode::InvZwriteChar,
            YDB_ERR_INVVARNAME => ErrorCode::InvVarName,
            YDB_ERR_PARAMINVALID => ErrorCode::ParamInvalid,
            YDB_ERR_INSUFFSUBS => ErrorCode::InsuffSubs,
            YDB_ERR_NAMECOUNT2HI => ErrorCode::NameCount2Hi,
            YDB_ERR_TIME2LONG => ErrorCode::Time2Long,
            YDB_ERR_VARNAME2LONG => ErrorCode::VarName2Long,
            YDB_ERR_SIMPLEAPINEST => ErrorCode::SimpleApiNest,
            YDB_ERR_NODEEND => ErrorCode::NodeEnd,
            YDB_ERR_INVTPTRANS => ErrorCode::InvTpTrans,
            YDB_ERR_THREADEDAPINOTALLOWED => ErrorCode::ThreadedApiNotAllowed,
            YDB_ERR_SIMPLEAPINOTALLOWED => ErrorCode::SimpleApiNotAllowed,
            YDB_ERR_CALLINAFTERXIT => ErrorCode::CallInAfterXit,
            YDB_ERR_TPCALLBACKINVRETVAL => ErrorCode::TpCallbackInvRetVal,
            YDB_ERR_LOCKSUB2LONG => ErrorCode::LockSub2Long,
            code => ErrorCode::Other(code),
        }
    }
}

impl ErrorCode {
    /// The native integer for this code
    pub fn code(self) -> c_int {
        match self {
            ErrorCode::TpRestart => YDB_TP_RESTART,
            ErrorCode::TpRollback => YDB_TP_ROLLBACK,
            ErrorCode::NotOk => YDB_NOTOK,
            ErrorCode::LockTimeout => YDB_LOCK_TIMEOUT,
            ErrorCode::GvUndef => YDB_ERR_GVUNDEF,
            ErrorCode::LvUndef => YDB_ERR_LVUNDEF,
            ErrorCode::NumOflow => YDB_ERR_NUMOFLOW,
            ErrorCode::InvStrLen => YDB_ERR_INVSTRLEN,
            ErrorCode::MaxNrSubscripts => YDB_ERR_MAXNRSUBSCRIPTS,
            ErrorCode::MaxStrLen => YDB_ERR_MAXSTRLEN,
            ErrorCode::TpRetry => YDB_ERR_TPRETRY,
            ErrorCode::TpRestartCondition => YDB_ERR_TPRESTART,
            ErrorCode::TpTooDeep => YDB_ERR_TPTOODEEP,
            ErrorCode::TpTimeout => YDB_ERR_TPTIMEOUT,
            ErrorCode::InvZwriteChar => YDB_ERR_INVZWRITECHAR,
            ErrorCode::InvVarName => YDB_ERR_INVVARNAME,
            ErrorCode::ParamInvalid => YDB_ERR_PARAMINVALID,
            ErrorCode::InsuffSubs => YDB_ERR_INSUFFSUBS,
            ErrorCode::NameCount2Hi => YDB_ERR_NAMECOUNT2HI,
            ErrorCode::Time2Long => YDB_ERR_TIME2LONG,
            ErrorCode::VarName2Long => YDB_ERR_VARNAME2LONG,
            ErrorCode::SimpleApiNest => YDB_ERR_SIMPLEAPINEST,
            ErrorCode::NodeEnd => YDB_ERR_NODEEND,
            ErrorCode::InvTpTrans => YDB_ERR_INVTPTRANS,
            ErrorCode::ThreadedApiNotAllowed => YDB_ERR_THREADEDAPINOTALLOWED,
            ErrorCode::SimpleApiNotAllowed => YDB_ERR_SIMPLEAPINOTALLOWED,
            ErrorCode::CallInAfterXit => YDB_ERR_CALLINAFTERXIT,
            ErrorCode::TpCallbackInvRetVal => YDB_ERR_TPCALLBACKINVRETVAL,
            ErrorCode::LockSub2Long => YDB_ERR_LOCKSUB2LONG,
            ErrorCode::Other(code) => code,
        }
    }

    /// Mnemonic used in formatted messages
    pub fn mnemonic(self) -> &'static str {
        match self {
            ErrorCode::TpRestart => "TPRESTART",
            ErrorCode::TpRollback => "TPROLLBACK",
            ErrorCode::NotOk => "NOTOK",
            ErrorCode::LockTimeout => "LOCKTIMEOUT",
            ErrorCode::GvUndef => "GVUNDEF",
            ErrorCode::LvUndef => "LVUNDEF",
            ErrorCode::NumOflow => "NUMOFLOW",
            ErrorCode::InvStrLen => "INVSTRLEN",
            ErrorCode::MaxNrSubscripts => "MAXNRSUBSCRIPTS",
            ErrorCode::MaxStrLen => "MAXSTRLEN",
            ErrorCode::TpRetry => "TPRETRY",
            ErrorCode::TpRestartCondition => "TPRESTART",
            ErrorCode::TpTooDeep => "TPTOODEEP",
            ErrorCode::TpTimeout => "TPTIMEOUT",
            ErrorCode::InvZwriteChar => "INVZWRITECHAR",
            ErrorCode::InvVarName => "INVVARNAME",
            ErrorCode::ParamInvalid => "PARAMINVALID",
            ErrorCode::InsuffSubs => "INSUFFSUBS",
            ErrorCode::NameCount2Hi => "NAMECOUNT2HI",
            ErrorCode::Time2Long => "TIME2LONG",
            ErrorCode::VarName2Long => "VARNAME2LONG",
            ErrorCode::SimpleApiNest => "SIMPLEAPINEST",
            ErrorCode::NodeEnd => "NODEEND",
            ErrorCode::InvTpTrans => "INVTPTRANS",
            ErrorCode::ThreadedApiNotAllowed => "THREADEDAPINOTALLOWED",
            ErrorCode::SimpleApiNotAllowed => "SIMPLEAPINOTALLOWED",
            ErrorCode::CallInAfterXit => "CALLINAFTERXIT",
            ErrorCode::TpCallbackInvRetVal => "TPCALLBACKINVRETVAL",
            ErrorCode::LockSub2Long => "LOCKSUB2LONG",
            ErrorCode::Other(_) => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorCode::Other(code) => write!(f, "status {}", code),
            code => write!(f, "{} ({})", code.mnemonic(), code.code()),
        }
    }
}

lazy_static! {
    /// Message texts for codes the engine did not format itself
    static ref MESSAGES: HashMap<c_int, &'static str> = {
        let mut m = HashMap::new();
        m.insert(YDB_TP_RESTART, "%YDB-I-TPRESTART, Transaction restart requested");
        m.insert(YDB_TP_ROLLBACK, "%YDB-I-TPROLLBACK, Transaction rolled back");
        m.insert(YDB_NOTOK, "%YDB-E-NOTOK, Operation failed");
        m.insert(YDB_LOCK_TIMEOUT, "%YDB-I-LOCKTIMEOUT, Not able to acquire all requested locks in the specified time");
        m.insert(YDB_ERR_GVUNDEF, "%YDB-E-GVUNDEF, Global variable undefined");
        m.insert(YDB_ERR_LVUNDEF, "%YDB-E-LVUNDEF, Undefined local variable");
        m.insert(YDB_ERR_NUMOFLOW, "%YDB-E-NUMOFLOW, Numeric overflow");
        m.insert(YDB_ERR_INVSTRLEN, "%YDB-E-INVSTRLEN, Invalid string length");
        m.insert(YDB_ERR_MAXNRSUBSCRIPTS, "%YDB-E-MAXNRSUBSCRIPTS, Maximum number of subscripts exceeded");
        m.insert(YDB_ERR_MAXSTRLEN, "%YDB-E-MAXSTRLEN, Maximum string length exceeded");
        m.insert(YDB_ERR_TPRETRY, "%YDB-E-TPRETRY, Restart requested outside of a transaction");
        m.insert(YDB_ERR_TPRESTART, "%YDB-I-TPRESTART, Database conflict caused a transaction restart");
        m.insert(YDB_ERR_TPTOODEEP, "%YDB-E-TPTOODEEP, Transaction nesting too deep");
        m.insert(YDB_ERR_TPTIMEOUT, "%YDB-E-TPTIMEOUT, Transaction timeout");
        m.insert(YDB_ERR_INVZWRITECHAR, "%YDB-E-INVZWRITECHAR, Invalid character in ZWRITE format string");
        m.insert(YDB_ERR_INVVARNAME, "%YDB-E-INVVARNAME, Invalid variable name");
        m.insert(YDB_ERR_PARAMINVALID, "%YDB-E-PARAMINVALID, Invalid parameter");
        m.insert(YDB_ERR_INSUFFSUBS, "%YDB-E-INSUFFSUBS, Insufficient subscripts in return array");
        m.insert(YDB_ERR_NAMECOUNT2HI, "%YDB-E-NAMECOUNT2HI, Too many names specified");
        m.insert(YDB_ERR_TIME2LONG, "%YDB-E-TIME2LONG, Timeout exceeds the maximum allowed");
        m.insert(YDB_ERR_VARNAME2LONG, "%YDB-E-VARNAME2LONG, Variable name exceeds the maximum length");
        m.insert(YDB_ERR_SIMPLEAPINEST, "%YDB-E-SIMPLEAPINEST, Nested simple API call");
        m.insert(YDB_ERR_NODEEND, "%YDB-E-NODEEND, End of list of nodes/subscripts");
        m.insert(YDB_ERR_INVTPTRANS, "%YDB-E-INVTPTRANS, Invalid transaction token");
        m.insert(YDB_ERR_THREADEDAPINOTALLOWED, "%YDB-E-THREADEDAPINOTALLOWED, Threaded API not allowed after simple API");
        m.insert(YDB_ERR_SIMPLEAPINOTALLOWED, "%YDB-E-SIMPLEAPINOTALLOWED, Simple API not allowed after threaded API");
        m.insert(YDB_ERR_CALLINAFTERXIT, "%YDB-E-CALLINAFTERXIT, Call after engine exit");
        m.insert(YDB_ERR_TPCALLBACKINVRETVAL, "%YDB-E-TPCALLBACKINVRETVAL, Invalid return value from transaction callback");
        m.insert(YDB_ERR_LOCKSUB2LONG, "%YDB-E-LOCKSUB2LONG, Lock subscript too long");
        m
    };
}

/// Canonical message for a status, if one is known
pub fn message_for(code: c_int) -> Option<&'static str> {
    MESSAGES.get(&code).copied()
}

/// A non-OK status reported by the engine
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[error("{message} [{code}]")]
pub struct NativeError {
    pub code: ErrorCode,
    pub message: String,
}

impl NativeError {
    pub fn new(code: impl Into<ErrorCode>, message: impl Into<String>) -> Self {
        NativeError {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Build from a status, using the canonical message table
    pub fn from_status(status: c_int) -> Self {
        let message = message_for(status)
            .map(str::to_owned)
            .unwrap_or_else(|| format!("%YDB-E-UNKNOWN, Unknown status {}", status));
        NativeError::new(status, message)
    }

    pub fn status(&self) -> c_int {
        self.code.code()
    }

    /// Transaction restart signal, explicit or raised by the engine
    pub fn is_restart(&self) -> bool {
        matches!(self.code, ErrorCode::TpRestart | ErrorCode::TpRestartCondition)
    }

    pub fn is_rollback(&self) -> bool {
        self.code == ErrorCode::TpRollback
    }

    /// Lock timeout or transaction restart-budget timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self.code, ErrorCode::LockTimeout | ErrorCode::TpTimeout)
    }

    pub fn is_node_end(&self) -> bool {
        self.code == ErrorCode::NodeEnd
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self.code, ErrorCode::GvUndef | ErrorCode::LvUndef)
    }
}

/// Argument rejected before any engine call
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum ValidationError {
    #[error("variable name is empty")]
    EmptyVarName,
    #[error("variable name {name:?} is longer than {max} characters")]
    VarNameTooLong { name: String, max: usize },
    #[error("variable name {0:?} is not a valid identifier")]
    InvalidVarName(String),
    #[error("{count} subscripts exceeds the maximum of {max}")]
    TooManySubscripts { count: usize, max: usize },
    #[error("subscript {index} is {len} bytes, exceeding the maximum of {max}")]
    SubscriptTooLong { index: usize, len: usize, max: usize },
    #[error("value is {len} bytes, exceeding the maximum of {max}")]
    ValueTooLong { len: usize, max: usize },
    #[error("{count} names exceeds the maximum of {max}")]
    TooManyNames { count: usize, max: usize },
    #[error("timeout of {nanos}ns exceeds the maximum of {max}ns")]
    TimeoutTooLong { nanos: u64, max: u64 },
    #[error("{0:?} must be a local variable name")]
    NotLocal(String),
    #[error("transaction id {0:?} contains a NUL byte")]
    InvalidTransactionId(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Errors surfaced by the binding
#[derive(Debug, ThisError)]
pub enum Error {
    /// A key or argument violates a fixed structural limit
    #[error("invalid argument: {0}")]
    Validation(#[from] ValidationError),
    /// The engine returned a non-OK status
    #[error(transparent)]
    Native(#[from] NativeError),
    /// Raised by caller code inside a transaction; passed through untouched
    #[error(transparent)]
    Callback(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl Error {
    /// Wrap an arbitrary caller error
    pub fn callback<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        Error::Callback(err.into())
    }

    pub fn native(&self) -> Option<&NativeError> {
        match self {
            Error::Native(e) => Some(e),
            _ => None,
        }
    }

    /// The native status carried by this error, if any
    pub fn status(&self) -> Option<c_int> {
        self.native().map(NativeError::status)
    }

    pub fn is_restart(&self) -> bool {
        self.native().map_or(false, NativeError::is_restart)
    }

    pub fn is_rollback(&self) -> bool {
        self.native().map_or(false, NativeError::is_rollback)
    }

    pub fn is_timeout(&self) -> bool {
        self.native().map_or(false, NativeError::is_timeout)
    }

    pub fn is_node_end(&self) -> bool {
        self.native().map_or(false, NativeError::is_node_end)
    }

    pub fn is_undefined(&self) -> bool {
        self.native().map_or(false, NativeError::is_undefined)
    }
}

/// Helper trait for converting native status codes to Results
#[cfg(any(test, feature = "native"))]
pub(crate) trait IntoResult {
    fn into_result(self) -> Result<()>;
}

#[cfg(any(test, feature = "native"))]
impl IntoResult for c_int {
    fn into_result(self) -> Result<()> {
        if self == YDB_OK {
            Ok(())
        } else {
            Err(Error::Native(NativeError::from_status(self)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_through_the_table() {
        for status in [
            YDB_TP_RESTART,
            YDB_TP_ROLLBACK,
            YDB_LOCK_TIMEOUT,
            YDB_ERR_GVUNDEF,
            YDB_ERR_NODEEND,
            YDB_ERR_TPTIMEOUT,
            YDB_ERR_TPTOODEEP,
            -42,
        ] {
            assert_eq!(ErrorCode::from(status).code(), status);
        }
        assert_eq!(ErrorCode::from(-42), ErrorCode::Other(-42));
    }

    #[test]
    fn every_named_code_has_a_message() {
        for status in [YDB_ERR_NODEEND, YDB_ERR_LVUNDEF, YDB_ERR_NUMOFLOW, YDB_LOCK_TIMEOUT] {
            let err = NativeError::from_status(status);
            assert!(err.message.contains(ErrorCode::from(status).mnemonic()));
        }
    }

    #[test]
    fn signal_predicates() {
        let err: Error = NativeError::from_status(YDB_TP_RESTART).into();
        assert!(err.is_restart());
        assert!(!err.is_rollback());

        let err: Error = NativeError::from_status(YDB_ERR_TPTIMEOUT).into();
        assert!(err.is_timeout());

        let err = Error::callback("boom");
        assert!(err.status().is_none());
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn ok_status_is_ok() {
        assert!(YDB_OK.into_result().is_ok());
        let err = YDB_ERR_NODEEND.into_result().unwrap_err();
        assert!(err.is_node_end());
    }
}
