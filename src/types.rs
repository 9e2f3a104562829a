use std::fmt;

use crate::constants::YDB_NOTTP;

/// Handle for one open transaction nesting level.
///
/// Tokens are only meaningful inside the callback they were handed to and
/// must not be sent to other threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TpToken(pub u64);

impl TpToken {
    /// No transaction in progress
    pub const NOTTP: TpToken = TpToken(YDB_NOTTP);

    pub fn is_nottp(self) -> bool {
        self.0 == YDB_NOTTP
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl Default for TpToken {
    fn default() -> Self {
        TpToken::NOTTP
    }
}

impl fmt::Display for TpToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_nottp() {
            f.write_str("NOTTP")
        } else {
            write!(f, "{:#x}", self.0)
        }
    }
}

/// Which native call set the process uses. Chosen once per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiMode {
    /// Single-threaded `ydb_*_s` functions; tokens are ignored
    Simple,
    /// Thread-aware `ydb_*_st` functions taking explicit tokens
    Threaded,
}

impl ApiMode {
    pub fn name(self) -> &'static str {
        match self {
            ApiMode::Simple => "simple",
            ApiMode::Threaded => "threaded",
        }
    }
}

impl fmt::Display for ApiMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Local variables restored when a transaction restarts
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RestartVars {
    /// Restore nothing
    #[default]
    None,
    /// Restore only these local variables
    Names(Vec<String>),
    /// Restore every local variable
    All,
}

impl RestartVars {
    /// Native wildcard meaning "all locals"
    pub const WILDCARD: &'static str = "*";

    /// Build from a list of names, recognising the `*` wildcard
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.iter().any(|n| n == Self::WILDCARD) {
            RestartVars::All
        } else if names.is_empty() {
            RestartVars::None
        } else {
            RestartVars::Names(names)
        }
    }

    /// Names as passed to the native engine
    pub fn to_names(&self) -> Vec<String> {
        match self {
            RestartVars::None => Vec::new(),
            RestartVars::Names(names) => names.clone(),
            RestartVars::All => vec![Self::WILDCARD.to_owned()],
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            RestartVars::None => true,
            RestartVars::Names(names) => names.is_empty(),
            RestartVars::All => false,
        }
    }
}
