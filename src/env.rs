use log::debug;
use once_cell::sync::OnceCell;
use std::time::Duration;

use crate::constants::YDB_MAX_TP_DEPTH;
use crate::error::{Result, ValidationError};
use crate::types::ApiMode;

/// Environment variable holding the transaction time limit in seconds
pub const MAXTPTIME_VAR: &str = "ydb_maxtptime";

/// Environment variable selecting the call set (`simple` or `threaded`)
pub const API_MODE_VAR: &str = "gvbind_api_mode";

static API_MODE: OnceCell<ApiMode> = OnceCell::new();

/// Engine-side settings.
///
/// The restart budget belongs to the engine: the transaction bridge never
/// counts restarts itself. With both limits unset a transaction restarts
/// for as long as its callback asks it to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Call set used by the adapter
    pub api_mode: ApiMode,
    /// Restarts allowed before an outermost transaction fails with TPTIMEOUT
    pub max_restarts: Option<u32>,
    /// Wall-clock budget of an outermost transaction across its restarts
    pub max_tp_time: Option<Duration>,
    /// Maximum transaction nesting depth
    pub max_tp_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_mode: ApiMode::Threaded,
            max_restarts: None,
            max_tp_time: None,
            max_tp_depth: YDB_MAX_TP_DEPTH,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `ydb_maxtptime` and `gvbind_api_mode`
    pub fn from_env() -> Result<Self> {
        let maxtptime = std::env::var(MAXTPTIME_VAR).ok();
        let mode = std::env::var(API_MODE_VAR).ok();
        Self::from_vars(maxtptime.as_deref(), mode.as_deref())
    }

    pub(crate) fn from_vars(maxtptime: Option<&str>, mode: Option<&str>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(raw) = maxtptime {
            let seconds: u64 = raw.trim().parse().map_err(|_| {
                ValidationError::Config(format!("{}={:?} is not a number of seconds", MAXTPTIME_VAR, raw))
            })?;
            // Zero means no limit
            config.max_tp_time = (seconds > 0).then(|| Duration::from_secs(seconds));
        }
        if let Some(raw) = mode {
            config.api_mode = parse_api_mode(raw)?;
        }
        debug!("engine config {:?}", config);
        Ok(config)
    }

    pub fn with_api_mode(mut self, api_mode: ApiMode) -> Self {
        self.api_mode = api_mode;
        self
    }

    pub fn with_max_restarts(mut self, max_restarts: u32) -> Self {
        self.max_restarts = Some(max_restarts);
        self
    }

    pub fn with_max_tp_time(mut self, max_tp_time: Duration) -> Self {
        self.max_tp_time = Some(max_tp_time);
        self
    }

    /// Clamped to the engine's own maximum
    pub fn with_max_tp_depth(mut self, max_tp_depth: usize) -> Self {
        self.max_tp_depth = max_tp_depth.min(YDB_MAX_TP_DEPTH);
        self
    }
}

fn parse_api_mode(raw: &str) -> Result<ApiMode> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "simple" => Ok(ApiMode::Simple),
        "threaded" => Ok(ApiMode::Threaded),
        _ => Err(ValidationError::Config(format!("{}={:?} is not simple or threaded", API_MODE_VAR, raw)).into()),
    }
}

/// Fix the call set for the rest of the process.
///
/// Selecting the same mode again is a no-op; selecting a different one
/// after the first choice fails.
pub fn select_api_mode(mode: ApiMode) -> Result<ApiMode> {
    let selected = *API_MODE.get_or_init(|| {
        debug!("selected {} call set", mode);
        mode
    });
    if selected != mode {
        return Err(ValidationError::Config(format!(
            "{} call set requested after the {} call set was selected",
            mode, selected
        ))
        .into());
    }
    Ok(selected)
}

/// The call set in use; threaded until one is selected
pub fn api_mode() -> ApiMode {
    API_MODE.get().copied().unwrap_or(ApiMode::Threaded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.api_mode, ApiMode::Threaded);
        assert_eq!(config.max_restarts, None);
        assert_eq!(config.max_tp_depth, 126);
    }

    #[test]
    fn reads_variables() {
        let config = EngineConfig::from_vars(Some("5"), Some("Simple")).unwrap();
        assert_eq!(config.max_tp_time, Some(Duration::from_secs(5)));
        assert_eq!(config.api_mode, ApiMode::Simple);

        let config = EngineConfig::from_vars(Some("0"), None).unwrap();
        assert_eq!(config.max_tp_time, None);

        assert!(EngineConfig::from_vars(Some("soon"), None).is_err());
        assert!(EngineConfig::from_vars(None, Some("parallel")).is_err());
    }

    #[test]
    fn builder() {
        let config = EngineConfig::new()
            .with_max_restarts(3)
            .with_max_tp_time(Duration::from_millis(50))
            .with_max_tp_depth(500);
        assert_eq!(config.max_restarts, Some(3));
        assert_eq!(config.max_tp_time, Some(Duration::from_millis(50)));
        assert_eq!(config.max_tp_depth, 126);
    }

    #[test]
    fn mode_is_selected_once() {
        assert_eq!(select_api_mode(ApiMode::Threaded).unwrap(), ApiMode::Threaded);
        assert_eq!(api_mode(), ApiMode::Threaded);
        assert!(select_api_mode(ApiMode::Threaded).is_ok());
        assert!(select_api_mode(ApiMode::Simple).is_err());
    }
}
