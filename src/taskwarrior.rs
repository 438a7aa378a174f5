//! Taskwarrior command-line adapter: export, modify, add and sync.
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::config;
use crate::model::{Priority, Task};

static CREATED_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Created task (\d+)").expect("valid created-task regex"));

#[derive(Debug, Error)]
pub enum TaskwarriorError {
    #[error("`{command}` unavailable: {reason}")]
    SourceUnavailable { command: String, reason: String },
    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
    #[error("malformed export output: {0}")]
    MalformedOutput(String),
    #[error("`{command}` did not confirm the change: {output}")]
    Unconfirmed { command: String, output: String },
    #[error("task uuid must be non-empty")]
    EmptyUuid,
}

/// Produces the current list of active tasks.
#[async_trait]
pub trait TaskSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<Task>, TaskwarriorError>;
}

/// A task to create through the control API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTask {
    pub description: String,
    pub project: Option<String>,
    pub tags: Vec<String>,
    pub priority: Option<Priority>,
    /// `(attribute, value)` for the notification date, if any.
    pub notification_date: Option<(String, String)>,
    pub annotations: Vec<String>,
}

/// Mutations against the tracker.
#[async_trait]
pub trait TaskEditor: Send + Sync {
    async fn modify(&self, uuid: &str, args: &[String]) -> Result<(), TaskwarriorError>;

    /// Returns the UUID of the created task.
    async fn add(&self, task: &NewTask) -> Result<String, TaskwarriorError>;

    async fn sync(&self) -> Result<(), TaskwarriorError>;
}

/// Extract the JSON array from export output that may carry noise around it.
pub fn extract_json_array(raw: &str) -> Result<&str, TaskwarriorError> {
    match (raw.find('['), raw.rfind(']')) {
        (Some(start), Some(end)) if end > start => Ok(&raw[start..=end]),
        _ => Err(TaskwarriorError::MalformedOutput(
            "could not find JSON array in export output".into(),
        )),
    }
}

/// Decode one `task export` output into tasks.
pub fn parse_export(raw: &str) -> Result<Vec<Task>, TaskwarriorError> {
    let array = extract_json_array(raw)?;
    serde_json::from_str(array).map_err(|err| TaskwarriorError::MalformedOutput(err.to_string()))
}

/// Runs the real `task` binary.
#[derive(Debug, Clone)]
pub struct TaskwarriorCli {
    program: String,
    timeout: Duration,
}

struct CommandOutput {
    stdout: String,
    stderr: String,
}

impl CommandOutput {
    fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

impl TaskwarriorCli {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn from_config(cfg: &config::Taskwarrior) -> Self {
        Self::new(cfg.command.clone(), Duration::from_secs(cfg.timeout_secs))
    }

    /// Ensure the binary runs by invoking `task --version`.
    pub async fn ensure_available(&self) -> Result<String, TaskwarriorError> {
        let output = self.run(&["--version".to_string()]).await?;
        Ok(output.stdout.trim().to_string())
    }

    fn describe(&self, args: &[String]) -> String {
        format!("{} {}", self.program, args.join(" "))
    }

    async fn run(&self, args: &[String]) -> Result<CommandOutput, TaskwarriorError> {
        let command = self.describe(args);
        debug!(%command, "running taskwarrior");
        let child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Err(_) => {
                return Err(TaskwarriorError::Timeout {
                    command,
                    timeout: self.timeout,
                })
            }
            Ok(Err(err)) => {
                return Err(TaskwarriorError::SourceUnavailable {
                    command,
                    reason: err.to_string(),
                })
            }
            Ok(Ok(output)) => output,
        };

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if !output.status.success() {
            return Err(TaskwarriorError::SourceUnavailable {
                command,
                reason: format!("{}: {}", output.status, result.combined().trim()),
            });
        }
        Ok(result)
    }

    async fn export(&self, status: &str) -> Result<Vec<Task>, TaskwarriorError> {
        let args = [
            format!("status:{status}"),
            "export".to_string(),
            "rc.json.array=on".to_string(),
        ];
        let output = self.run(&args).await?;
        parse_export(&output.stdout)
    }

    async fn resolve_uuid(&self, id: &str) -> Result<String, TaskwarriorError> {
        let args = ["_get".to_string(), format!("{id}.uuid")];
        let output = self.run(&args).await?;
        let uuid = output.stdout.trim();
        uuid::Uuid::parse_str(uuid).map_err(|err| {
            TaskwarriorError::MalformedOutput(format!("invalid uuid {uuid:?} for task {id}: {err}"))
        })?;
        Ok(uuid.to_string())
    }
}

#[async_trait]
impl TaskSource for TaskwarriorCli {
    #[instrument(skip_all)]
    async fn fetch(&self) -> Result<Vec<Task>, TaskwarriorError> {
        let mut tasks = self.export("pending").await?;
        let waiting = self.export("waiting").await?;
        debug!(
            pending = tasks.len(),
            waiting = waiting.len(),
            "exported tasks"
        );
        tasks.extend(waiting);
        Ok(tasks)
    }
}

#[async_trait]
impl TaskEditor for TaskwarriorCli {
    async fn modify(&self, uuid: &str, args: &[String]) -> Result<(), TaskwarriorError> {
        let uuid = uuid.trim();
        if uuid.is_empty() {
            return Err(TaskwarriorError::EmptyUuid);
        }
        let mut full = vec![
            "rc.confirmation=off".to_string(),
            uuid.to_string(),
            "modify".to_string(),
        ];
        full.extend(args.iter().cloned());
        let output = self.run(&full).await?.combined();
        if !output.contains("Modified") && !output.contains("modification") {
            return Err(TaskwarriorError::Unconfirmed {
                command: self.describe(&full),
                output: output.trim().to_string(),
            });
        }
        info!(uuid, ?args, "modified task");
        Ok(())
    }

    async fn add(&self, task: &NewTask) -> Result<String, TaskwarriorError> {
        let mut args = vec!["add".to_string(), task.description.clone()];
        if let Some(project) = task.project.as_deref().filter(|p| !p.is_empty()) {
            args.push(format!("project:{project}"));
        }
        for tag in task.tags.iter().filter(|t| !t.is_empty()) {
            args.push(format!("+{tag}"));
        }
        if let Some(priority) = task.priority {
            args.push(format!("priority:{}", priority.as_str()));
        }
        if let Some((field, value)) = &task.notification_date {
            args.push(format!("{field}:{value}"));
        }

        let output = self.run(&args).await?.combined();
        let id = CREATED_ID
            .captures(&output)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| TaskwarriorError::Unconfirmed {
                command: self.describe(&args),
                output: output.trim().to_string(),
            })?;
        let uuid = self.resolve_uuid(&id).await?;

        for note in task.annotations.iter().filter(|a| !a.trim().is_empty()) {
            let annotate = vec![uuid.clone(), "annotate".to_string(), note.clone()];
            if let Err(err) = self.run(&annotate).await {
                warn!(%err, %uuid, "failed to annotate new task");
            }
        }
        info!(%uuid, %id, "created task");
        Ok(uuid)
    }

    async fn sync(&self) -> Result<(), TaskwarriorError> {
        let args = ["sync".to_string()];
        let output = self.run(&args).await?.combined();
        let confirmed = ["Sync completed", "synchronized", "Syncing with sync server"]
            .iter()
            .any(|marker| output.contains(marker));
        if !confirmed {
            return Err(TaskwarriorError::Unconfirmed {
                command: self.describe(&args),
                output: output.trim().to_string(),
            });
        }
        info!("task sync succeeded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_array_between_noise() {
        let raw = "Configuration override rc.json.array=on\n[{\"uuid\":\"a\"}]\ntrailing log";
        assert_eq!(extract_json_array(raw).unwrap(), "[{\"uuid\":\"a\"}]");
    }

    #[test]
    fn missing_brackets_is_malformed() {
        for raw in ["", "no json here", "] backwards [", "[ only open", "only close ]"] {
            assert!(
                matches!(extract_json_array(raw), Err(TaskwarriorError::MalformedOutput(_))),
                "input {raw:?}"
            );
        }
    }

    #[test]
    fn undecodable_array_is_malformed() {
        assert!(matches!(
            parse_export("[{\"uuid\": }]"),
            Err(TaskwarriorError::MalformedOutput(_))
        ));
    }

    #[test]
    fn parses_export_records() {
        let raw = r#"[
            {"id":1,"uuid":"abc","description":"pending task","notification_date":"2025-08-31 14:30:00","tags":[],"priority":"H","project":"demo","status":"pending"},
            {"id":0,"uuid":"def","description":"waiting task","status":"waiting"}
        ]"#;
        let tasks = parse_export(raw).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].priority, Some(Priority::High));
        assert_eq!(tasks[1].status, "waiting");
    }

    #[test]
    fn empty_export_is_ok() {
        assert!(parse_export("[]").unwrap().is_empty());
    }
}
