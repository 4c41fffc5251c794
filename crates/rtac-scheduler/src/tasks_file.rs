//! TOML task definitions for the binary.
//!
//! ```toml
//! [[task]]
//! id = "modbus_poll"
//! schedule = { type = "interval", every_sec = 60 }
//! expected_duration_sec = 30
//! lock_ttl_sec = 65
//! command = { bin = "/usr/local/bin/modbus-poll", args = ["--site", "main"] }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::task::Schedule;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TasksFile {
    #[serde(default, rename = "task")]
    pub tasks: Vec<TaskSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    pub schedule: Schedule,
    pub expected_duration_sec: u64,
    #[serde(default)]
    pub lock_ttl_sec: Option<u64>,
    pub command: CommandSpec,
}

impl TaskSpec {
    pub fn expected_duration(&self) -> Duration {
        Duration::from_secs(self.expected_duration_sec)
    }

    pub fn lock_ttl(&self) -> Option<Duration> {
        self.lock_ttl_sec.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandSpec {
    pub bin: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl TasksFile {
    pub fn parse(path: &Path, raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|source| ConfigError::TasksFileParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::TasksFileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[[task]]
id = "modbus_poll"
schedule = { type = "interval", every_sec = 60 }
expected_duration_sec = 30
lock_ttl_sec = 65
command = { bin = "/usr/local/bin/modbus-poll", args = ["--site", "main"] }

[[task]]
id = "daily_rollup"
schedule = { type = "cron", expr = "0 0 2 * * *" }
expected_duration_sec = 600
command = { bin = "/usr/local/bin/rollup" }
"#;

    #[test]
    fn parses_interval_and_cron_tasks() {
        let file = TasksFile::parse(Path::new("tasks.toml"), SAMPLE).unwrap();
        assert_eq!(file.tasks.len(), 2);

        let poll = &file.tasks[0];
        assert_eq!(poll.id, "modbus_poll");
        assert_eq!(poll.schedule, Schedule::Interval { every_sec: 60 });
        assert_eq!(poll.expected_duration(), Duration::from_secs(30));
        assert_eq!(poll.lock_ttl(), Some(Duration::from_secs(65)));
        assert_eq!(poll.command.args, ["--site", "main"]);

        let rollup = &file.tasks[1];
        assert_eq!(rollup.schedule, Schedule::cron("0 0 2 * * *"));
        assert_eq!(rollup.lock_ttl(), None);
        assert!(rollup.command.args.is_empty());
    }

    #[test]
    fn empty_file_has_no_tasks() {
        let file = TasksFile::parse(Path::new("tasks.toml"), "").unwrap();
        assert!(file.tasks.is_empty());
    }

    #[test]
    fn parse_error_names_the_file() {
        let err = TasksFile::parse(Path::new("/etc/tasks.toml"), "[[task]]\nid = 1").unwrap_err();
        assert!(matches!(err, ConfigError::TasksFileParse { .. }));
        assert!(err.to_string().contains("/etc/tasks.toml"));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = TasksFile::load(Path::new("/nonexistent/rtac/tasks.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::TasksFileRead { .. }));
    }
}
