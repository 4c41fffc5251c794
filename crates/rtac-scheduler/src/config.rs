use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::env::ReadEnv;
use crate::error::ConfigError;
use crate::identity::ReplicaId;
use crate::keys::{DEFAULT_NAMESPACE, KeySpace};
use crate::status::DEFAULT_OUTCOME_HISTORY;
use crate::task::{DEFAULT_JOB_LOCK_BUFFER, LockTtlPolicy};

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379/0";
pub const DEFAULT_LEADER_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(2000);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_TASKS_FILE: &str = "config/tasks.toml";
pub const DEFAULT_HEALTH_ADDR: &str = "0.0.0.0:8080";

/// Coordination settings. Constructed directly in tests or read with
/// [`from_env`](Self::from_env).
///
/// Set but unparseable variables are fatal, so replicas never start with
/// silently differing settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub replica_id: ReplicaId,
    pub keys: KeySpace,

    // ── Leader lease ──────────────────────────────────────────────────────
    /// TTL of the leader key. Read from `SCHEDULER_LEADER_LOCK_TTL` (seconds).
    pub leader_ttl: Duration,
    /// Renewal cadence, must be shorter than `leader_ttl`. About a third of it is recommended.
    pub heartbeat_interval: Duration,
    /// Upper bound on a single store call, must be shorter than `heartbeat_interval`.
    pub store_timeout: Duration,

    // ── Job locks ─────────────────────────────────────────────────────────
    pub job_lock_ttl: LockTtlPolicy,

    // ── Lifecycle ─────────────────────────────────────────────────────────
    /// How long shutdown waits for in-flight runs before cancelling them.
    pub shutdown_timeout: Duration,
    /// Outcomes kept for the status surface.
    pub outcome_history: usize,
}

impl SchedulerConfig {
    pub fn new(replica_id: ReplicaId) -> Self {
        Self {
            replica_id,
            keys: KeySpace::default(),
            leader_ttl: DEFAULT_LEADER_TTL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            job_lock_ttl: LockTtlPolicy::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            outcome_history: DEFAULT_OUTCOME_HISTORY,
        }
    }

    pub fn from_env<E: ReadEnv>(env: &E) -> Result<Self, ConfigError> {
        let require_id = parse_bool(env, "SCHEDULER_REQUIRE_REPLICA_ID", false)?;
        let replica_id = ReplicaId::from_env(env, require_id)?;

        let namespace = env
            .non_empty("SCHEDULER_NAMESPACE")
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        let config = Self {
            replica_id,
            keys: KeySpace::new(namespace)?,
            leader_ttl: secs(env, "SCHEDULER_LEADER_LOCK_TTL", DEFAULT_LEADER_TTL)?,
            heartbeat_interval: secs(
                env,
                "SCHEDULER_HEARTBEAT_INTERVAL",
                DEFAULT_HEARTBEAT_INTERVAL,
            )?,
            store_timeout: Duration::from_millis(parse_or(
                env,
                "SCHEDULER_STORE_TIMEOUT_MS",
                DEFAULT_STORE_TIMEOUT.as_millis() as u64,
            )?),
            job_lock_ttl: LockTtlPolicy {
                global_override: positive::<_, u64>(env, "SCHEDULER_JOB_LOCK_TTL")?
                    .map(Duration::from_secs),
                buffer: secs(env, "SCHEDULER_JOB_LOCK_BUFFER", DEFAULT_JOB_LOCK_BUFFER)?,
            },
            shutdown_timeout: secs(env, "SCHEDULER_SHUTDOWN_TIMEOUT", DEFAULT_SHUTDOWN_TIMEOUT)?,
            outcome_history: positive(env, "SCHEDULER_OUTCOME_HISTORY")?
                .unwrap_or(DEFAULT_OUTCOME_HISTORY),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject TTL orderings that would leave failover behaviour undefined.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                var: "SCHEDULER_HEARTBEAT_INTERVAL",
                value: "0".into(),
            });
        }
        if self.store_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                var: "SCHEDULER_STORE_TIMEOUT_MS",
                value: "0".into(),
            });
        }
        if self.heartbeat_interval >= self.leader_ttl {
            return Err(ConfigError::HeartbeatNotBelowTtl {
                heartbeat: self.heartbeat_interval,
                ttl: self.leader_ttl,
            });
        }
        if self.store_timeout >= self.heartbeat_interval {
            return Err(ConfigError::StoreTimeoutNotBelowHeartbeat {
                timeout: self.store_timeout,
                heartbeat: self.heartbeat_interval,
            });
        }
        if self.heartbeat_interval > self.leader_ttl / 2 {
            tracing::warn!(
                heartbeat_secs = self.heartbeat_interval.as_secs_f64(),
                ttl_secs = self.leader_ttl.as_secs_f64(),
                "Heartbeat interval leaves fewer than two renewals per lease, TTL/3 is recommended"
            );
        }
        Ok(())
    }
}

/// Everything the binary needs on top of [`SchedulerConfig`].
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// When false the binary serves health only and never joins the election.
    pub enabled: bool,
    pub redis_url: String,
    pub tasks_file: PathBuf,
    pub health_addr: SocketAddr,
    pub scheduler: SchedulerConfig,
}

impl ServiceConfig {
    pub fn from_env<E: ReadEnv>(env: &E) -> Result<Self, ConfigError> {
        let health_addr = match env.non_empty("SCHEDULER_HEALTH_ADDR") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                var: "SCHEDULER_HEALTH_ADDR",
                value: raw,
            })?,
            None => default_health_addr(),
        };

        Ok(Self {
            enabled: parse_bool(env, "SCHEDULER_ENABLED", true)?,
            redis_url: env
                .non_empty("REDIS_URL")
                .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            tasks_file: env
                .non_empty("SCHEDULER_TASKS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TASKS_FILE)),
            health_addr,
            scheduler: SchedulerConfig::from_env(env)?,
        })
    }
}

fn default_health_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn parse<E: ReadEnv, T: FromStr>(env: &E, var: &'static str) -> Result<Option<T>, ConfigError> {
    env.non_empty(var)
        .map(|raw| raw.parse().map_err(|_| ConfigError::InvalidValue { var, value: raw }))
        .transpose()
}

fn parse_or<E, T>(env: &E, var: &'static str, default: T) -> Result<T, ConfigError>
where
    E: ReadEnv,
    T: FromStr,
{
    Ok(parse(env, var)?.unwrap_or(default))
}

/// Like [`parse`], but zero is rejected too.
fn positive<E, T>(env: &E, var: &'static str) -> Result<Option<T>, ConfigError>
where
    E: ReadEnv,
    T: FromStr + PartialEq + Default,
{
    match parse(env, var)? {
        Some(v) if v == T::default() => Err(ConfigError::InvalidValue { var, value: "0".into() }),
        v => Ok(v),
    }
}

fn secs<E: ReadEnv>(
    env: &E,
    var: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    parse_or(env, var, default.as_secs()).map(Duration::from_secs)
}

fn parse_bool<E: ReadEnv>(env: &E, var: &'static str, default: bool) -> Result<bool, ConfigError> {
    let Some(raw) = env.non_empty(var) else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { var, value: raw }),
    }
}
