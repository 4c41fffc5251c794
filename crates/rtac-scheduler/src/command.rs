//! Task bodies that spawn an external process.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tokio::process::Child;
use uuid::Uuid;

use crate::error::ConfigError;
use crate::identity::ReplicaId;
use crate::task::{Schedule, TaskDescriptor};
use crate::tasks_file::TaskSpec;

const MAX_TERM_GRACE: Duration = Duration::from_secs(5);

/// Time the process gets before SIGTERM. The engine's hard timeout at
/// `expected` follows, dropping the child with SIGKILL.
pub fn soft_deadline(expected: Duration) -> Duration {
    expected - MAX_TERM_GRACE.min(expected / 2)
}

#[derive(Debug, Clone)]
pub struct CommandTask {
    task_id: String,
    bin: String,
    args: Vec<String>,
    replica_id: ReplicaId,
    expected_duration: Duration,
}

impl CommandTask {
    pub fn new(
        task_id: impl Into<String>,
        bin: impl Into<String>,
        args: Vec<String>,
        replica_id: ReplicaId,
        expected_duration: Duration,
    ) -> Result<Self, ConfigError> {
        let command = Self {
            task_id: task_id.into(),
            bin: bin.into(),
            args,
            replica_id,
            expected_duration,
        };
        command.check_spawnable()?;
        Ok(command)
    }

    /// Build the task for one `[[task]]` entry of the tasks file.
    pub fn descriptor_from_spec(
        spec: &TaskSpec,
        replica_id: &ReplicaId,
    ) -> Result<TaskDescriptor, ConfigError> {
        let command = Self::new(
            spec.id.clone(),
            spec.command.bin.clone(),
            spec.command.args.clone(),
            replica_id.clone(),
            spec.expected_duration(),
        )?;
        let descriptor = command.into_descriptor(spec.schedule.clone());
        Ok(match spec.lock_ttl() {
            Some(ttl) => descriptor.with_lock_ttl(ttl),
            None => descriptor,
        })
    }

    pub fn into_descriptor(self, schedule: Schedule) -> TaskDescriptor {
        let id = self.task_id.clone();
        let expected = self.expected_duration;
        TaskDescriptor::new(id, schedule, expected, move || {
            let command = self.clone();
            async move { command.run().await }
        })
    }

    /// A bad binary must fail at startup on every replica, not at the first slot.
    fn check_spawnable(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidCommand {
            id: self.task_id.clone(),
            reason,
        };

        let path = Path::new(&self.bin);
        if !path.is_absolute() {
            return Err(invalid(format!("bin must be an absolute path, got: {}", self.bin)));
        }
        let meta = std::fs::metadata(path)
            .map_err(|e| invalid(format!("cannot access bin '{}': {e}", self.bin)))?;
        if !meta.is_file() {
            return Err(invalid(format!("bin '{}' is not a regular file", self.bin)));
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if meta.permissions().mode() & 0o111 == 0 {
                return Err(invalid(format!("bin '{}' is not executable", self.bin)));
            }
        }

        match self.args.iter().position(|a| a.contains('\0')) {
            Some(i) => Err(invalid(format!("argument {i} contains a null byte"))),
            None => Ok(()),
        }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let execution_id = Uuid::new_v4().to_string();
        tracing::debug!(
            task_id = %self.task_id,
            bin = %self.bin,
            execution_id = %execution_id,
            "Spawning process"
        );

        let mut cmd = tokio::process::Command::new(&self.bin);
        cmd.args(&self.args)
            .env("SCHEDULER_TASK_ID", &self.task_id)
            .env("SCHEDULER_FIRED_AT", Utc::now().to_rfc3339())
            .env("SCHEDULER_REPLICA_ID", self.replica_id.as_str())
            .env("SCHEDULER_EXECUTION_ID", &execution_id)
            // Dropping the child (engine timeout or cancel) sends SIGKILL.
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn process '{}'", self.bin))?;

        let soft = soft_deadline(self.expected_duration);
        match tokio::time::timeout(soft, child.wait()).await {
            Ok(Ok(status)) if status.success() => {
                tracing::debug!(task_id = %self.task_id, %status, "Process completed");
                Ok(())
            }
            Ok(Ok(status)) => anyhow::bail!("process exited with status: {status}"),
            Ok(Err(e)) => Err(e).context("process wait error"),
            Err(_) => {
                let grace = self.expected_duration - soft;
                let how = if self.terminate(&mut child, grace).await {
                    "stopped on SIGTERM"
                } else {
                    "killed"
                };
                anyhow::bail!("process {how} after running past {}s", soft.as_secs_f64())
            }
        }
    }

    /// SIGTERM, then SIGKILL once `grace` runs out. True if SIGTERM was enough.
    async fn terminate(&self, child: &mut Child, grace: Duration) -> bool {
        tracing::warn!(
            task_id = %self.task_id,
            replica_id = %self.replica_id,
            grace_ms = grace.as_millis() as u64,
            "Process overran its soft deadline, sending SIGTERM"
        );
        if send_sigterm(child) && tokio::time::timeout(grace, child.wait()).await.is_ok() {
            return true;
        }

        tracing::warn!(task_id = %self.task_id, "Process still running, sending SIGKILL");
        if let Err(e) = child.kill().await {
            tracing::error!(task_id = %self.task_id, error = %e, "Failed to kill process");
        }
        false
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    match child.id() {
        Some(pid) => kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok(),
        None => false,
    }
}

// No SIGTERM here, so go straight to SIGKILL.
#[cfg(not(unix))]
fn send_sigterm(_child: &Child) -> bool {
    false
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn replica() -> ReplicaId {
        ReplicaId::new("poller-0").unwrap()
    }

    fn sh(script: &str, expected: Duration) -> CommandTask {
        CommandTask::new(
            "poll",
            "/bin/sh",
            vec!["-c".into(), script.into()],
            replica(),
            expected,
        )
        .unwrap()
    }

    fn command(bin: &str, args: &[&str]) -> Result<CommandTask, ConfigError> {
        let args = args.iter().map(|a| a.to_string()).collect();
        CommandTask::new("poll", bin, args, replica(), Duration::from_secs(10))
    }

    #[test]
    fn rejects_relative_bin() {
        let err = command("modbus-poll", &[]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCommand { ref id, .. } if id == "poll"));
    }

    #[test]
    fn rejects_missing_bin() {
        let err = command("/nonexistent/modbus-poll", &[]).unwrap_err();
        assert!(err.to_string().contains("cannot access"), "{err}");
    }

    #[test]
    fn rejects_directory_as_bin() {
        let err = command("/", &[]).unwrap_err();
        assert!(err.to_string().contains("not a regular file"), "{err}");
    }

    #[test]
    fn rejects_null_byte_in_args() {
        let err = command("/bin/sh", &["-c", "a\0b"]).unwrap_err();
        assert!(err.to_string().contains("argument 1 contains a null byte"), "{err}");
    }

    #[test]
    fn soft_deadline_leaves_grace_before_hard_timeout() {
        assert_eq!(soft_deadline(Duration::from_secs(30)), Duration::from_secs(25));
        assert_eq!(soft_deadline(Duration::from_secs(4)), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn zero_exit_is_success() {
        sh("exit 0", Duration::from_secs(10)).run().await.unwrap();
    }

    #[tokio::test]
    async fn non_zero_exit_is_failure() {
        let err = sh("exit 3", Duration::from_secs(10)).run().await.unwrap_err();
        assert!(err.to_string().contains("exit status: 3"), "{err}");
    }

    #[tokio::test]
    async fn context_is_passed_in_environment() {
        let script = concat!(
            r#"test "$SCHEDULER_TASK_ID" = poll"#,
            r#" && test "$SCHEDULER_REPLICA_ID" = poller-0"#,
            r#" && test -n "$SCHEDULER_EXECUTION_ID""#,
            r#" && test -n "$SCHEDULER_FIRED_AT""#,
        );
        sh(script, Duration::from_secs(10))
        .run()
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn overrunning_process_is_terminated() {
        let started = std::time::Instant::now();
        let err = sh("sleep 30", Duration::from_secs(2)).run().await.unwrap_err();
        assert!(err.to_string().contains("stopped on SIGTERM"), "{err}");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn process_ignoring_sigterm_is_killed() {
        let started = std::time::Instant::now();
        let stubborn = sh("trap '' TERM; while :; do sleep 1; done", Duration::from_secs(2));
        let err = stubborn.run().await.unwrap_err();
        assert!(err.to_string().starts_with("process killed"), "{err}");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn descriptor_from_spec_applies_lock_ttl() {
        let spec: TaskSpec = toml::from_str(
            r#"
id = "poll"
schedule = { type = "interval", every_sec = 60 }
expected_duration_sec = 30
lock_ttl_sec = 65
command = { bin = "/bin/sh", args = ["-c", "exit 0"] }
"#,
        )
        .unwrap();

        let task = CommandTask::descriptor_from_spec(&spec, &replica()).unwrap();
        assert_eq!(task.id(), "poll");
        assert_eq!(task.lock_ttl(), Some(Duration::from_secs(65)));
        task.invoke().await.unwrap();
    }
}
