//! Application settings configuration.

use serde::{Deserialize, Serialize};

/// Default per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

/// Application-wide settings from the `[settings]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// The connection used when none is named explicitly.
    #[serde(default)]
    pub default_connection: Option<String>,
    /// Hard per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_connection: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}
