use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::env::ReadEnv;
use crate::error::ConfigError;

/// Environment variables consulted for the replica identity, highest priority first.
pub const IDENTITY_SOURCES: [&str; 3] = ["SCHEDULER_REPLICA_ID", "POD_NAME", "HOSTNAME"];

const IDENTITY_SOURCES_LABEL: &str = "SCHEDULER_REPLICA_ID, POD_NAME, HOSTNAME";

/// Process-wide identity compared against every lock value before ownership is assumed.
///
/// Cheap to clone; resolved once at startup and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ReplicaId(Arc<str>);

impl ReplicaId {
    pub fn new(value: impl AsRef<str>) -> Result<Self, ConfigError> {
        let value = value.as_ref();
        if value.is_empty() || value.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidReplicaId(value.to_string()));
        }
        Ok(Self(Arc::from(value)))
    }

    pub fn generated() -> Self {
        Self(Arc::from(format!("replica-{}", Uuid::new_v4())))
    }

    /// Resolve from the environment, falling back to a generated id unless
    /// `require` is set.
    pub fn from_env<E: ReadEnv>(env: &E, require: bool) -> Result<Self, ConfigError> {
        for var in IDENTITY_SOURCES {
            if let Some(value) = env.non_empty(var) {
                tracing::debug!(source = var, replica_id = %value, "Resolved replica identity");
                return Self::new(value);
            }
        }

        if require {
            return Err(ConfigError::MissingReplicaId {
                sources: IDENTITY_SOURCES_LABEL,
            });
        }

        let id = Self::generated();
        tracing::warn!(
            replica_id = %id,
            "No replica identity in environment, using a generated one"
        );
        Ok(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ReplicaId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::InMemoryEnv;

    #[test]
    fn explicit_id_wins_over_pod_and_host() {
        let env = InMemoryEnv::new();
        env.set("SCHEDULER_REPLICA_ID", "explicit");
        env.set("POD_NAME", "pod-0");
        env.set("HOSTNAME", "host-0");

        let id = ReplicaId::from_env(&env, false).unwrap();
        assert_eq!(id.as_str(), "explicit");
    }

    #[test]
    fn pod_name_wins_over_hostname() {
        let env = InMemoryEnv::new();
        env.set("POD_NAME", "poller-7f9c");
        env.set("HOSTNAME", "host-0");

        assert_eq!(ReplicaId::from_env(&env, false).unwrap().as_str(), "poller-7f9c");
    }

    #[test]
    fn blank_values_are_skipped() {
        let env = InMemoryEnv::new();
        env.set("SCHEDULER_REPLICA_ID", "  ");
        env.set("HOSTNAME", "host-0");

        assert_eq!(ReplicaId::from_env(&env, false).unwrap().as_str(), "host-0");
    }

    #[test]
    fn falls_back_to_generated_id() {
        let env = InMemoryEnv::new();
        let id = ReplicaId::from_env(&env, false).unwrap();
        assert!(id.as_str().starts_with("replica-"));
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(ReplicaId::generated(), ReplicaId::generated());
    }

    #[test]
    fn missing_id_is_fatal_when_required() {
        let env = InMemoryEnv::new();
        let err = ReplicaId::from_env(&env, true).unwrap_err();
        assert!(matches!(err, ConfigError::MissingReplicaId { .. }));
    }

    #[test]
    fn whitespace_in_id_is_rejected() {
        assert!(matches!(
            ReplicaId::new("pod 0"),
            Err(ConfigError::InvalidReplicaId(_))
        ));
        assert!(ReplicaId::new("").is_err());
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = ReplicaId::new("pod-0").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"pod-0\"");
    }
}
