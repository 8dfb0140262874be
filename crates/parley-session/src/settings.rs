//! Tunable timeouts and caps for the call lifecycle.
//!
//! Every deployment-specific knob lives here so that divergent deployments
//! differ in configuration, not in code. The server maps its `[session]`
//! TOML section directly onto [`SessionSettings`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_participant_wait_secs() -> u64 {
    10
}

fn default_recent_call_window_secs() -> u64 {
    60
}

fn default_partial_save_interval_ms() -> u64 {
    3_000
}

fn default_identity_confirm_timeout_secs() -> u64 {
    10
}

fn default_access_code_timeout_secs() -> u64 {
    15
}

fn default_admin_max_failures() -> u32 {
    5
}

fn default_admin_failure_window_secs() -> u64 {
    15 * 60
}

fn default_admin_code_attempts_per_call() -> u32 {
    3
}

fn default_vendor_timeout_secs() -> u64 {
    15
}

fn default_max_topics() -> usize {
    10
}

fn default_unassigned_message() -> String {
    "Sorry, this number is not currently assigned. Goodbye.".to_string()
}

/// Lifecycle settings shared by every call a worker handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// How long bootstrap waits for the provider-side participant to join.
    #[serde(default = "default_participant_wait_secs")]
    pub participant_wait_secs: u64,

    /// Trailing window for "recent call record" heuristics.
    #[serde(default = "default_recent_call_window_secs")]
    pub recent_call_window_secs: u64,

    /// Minimum spacing between partial transcript writes.
    #[serde(default = "default_partial_save_interval_ms")]
    pub partial_save_interval_ms: u64,

    #[serde(default = "default_identity_confirm_timeout_secs")]
    pub identity_confirm_timeout_secs: u64,

    #[serde(default = "default_access_code_timeout_secs")]
    pub access_code_timeout_secs: u64,

    /// Failures within the window that lock an admin record.
    #[serde(default = "default_admin_max_failures")]
    pub admin_max_failures: u32,

    /// Failure counting window, also used as the lock duration.
    #[serde(default = "default_admin_failure_window_secs")]
    pub admin_failure_window_secs: u64,

    #[serde(default = "default_admin_code_attempts_per_call")]
    pub admin_code_attempts_per_call: u32,

    /// Upper bound on any single capability vendor call.
    #[serde(default = "default_vendor_timeout_secs")]
    pub vendor_timeout_secs: u64,

    /// Cap on the merged topic list of a conversation memory.
    #[serde(default = "default_max_topics")]
    pub max_topics: usize,

    /// Spoken before hanging up a call whose tenant cannot be resolved.
    #[serde(default = "default_unassigned_message")]
    pub unassigned_message: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            participant_wait_secs: default_participant_wait_secs(),
            recent_call_window_secs: default_recent_call_window_secs(),
            partial_save_interval_ms: default_partial_save_interval_ms(),
            identity_confirm_timeout_secs: default_identity_confirm_timeout_secs(),
            access_code_timeout_secs: default_access_code_timeout_secs(),
            admin_max_failures: default_admin_max_failures(),
            admin_failure_window_secs: default_admin_failure_window_secs(),
            admin_code_attempts_per_call: default_admin_code_attempts_per_call(),
            vendor_timeout_secs: default_vendor_timeout_secs(),
            max_topics: default_max_topics(),
            unassigned_message: default_unassigned_message(),
        }
    }
}

impl SessionSettings {
    pub fn participant_wait(&self) -> Duration {
        Duration::from_secs(self.participant_wait_secs)
    }

    pub fn recent_call_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.recent_call_window_secs as i64)
    }

    pub fn partial_save_interval(&self) -> Duration {
        Duration::from_millis(self.partial_save_interval_ms)
    }

    pub fn identity_confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.identity_confirm_timeout_secs)
    }

    pub fn access_code_timeout(&self) -> Duration {
        Duration::from_secs(self.access_code_timeout_secs)
    }

    pub fn admin_failure_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.admin_failure_window_secs as i64)
    }

    pub fn vendor_timeout(&self) -> Duration {
        Duration::from_secs(self.vendor_timeout_secs)
    }
}
