//! Store key schema.
//!
//! ```text
//! {namespace}:leader
//! {namespace}:job:{task_id}:{slot}      slot = 2026-10-14T12:00:00Z
//! ```

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::ConfigError;

pub const DEFAULT_NAMESPACE: &str = "scheduler";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    namespace: String,
}

impl KeySpace {
    pub fn new(namespace: impl Into<String>) -> Result<Self, ConfigError> {
        let namespace = namespace.into();
        if namespace.is_empty() || namespace.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidNamespace(namespace));
        }
        Ok(Self { namespace })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn leader_key(&self) -> String {
        format!("{}:leader", self.namespace)
    }

    /// Keyed by the scheduled slot, not the time the run actually starts.
    pub fn job_key(&self, task_id: &str, slot: DateTime<Utc>) -> String {
        format!("{}:job:{}:{}", self.namespace, task_id, format_slot(slot))
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

pub fn format_slot(slot: DateTime<Utc>) -> String {
    slot.to_rfc3339_opts(SecondsFormat::Secs, true)
}
