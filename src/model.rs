use chrono::{DateTime, Local};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;

/// Taskwarrior priority class. Anything outside `H`/`M`/`L` is treated as absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Case-insensitive parse of the single-letter form.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "H" | "h" => Some(Priority::High),
            "M" | "m" => Some(Priority::Medium),
            "L" | "l" => Some(Priority::Low),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "H",
            Priority::Medium => "M",
            Priority::Low => "L",
        }
    }

    /// ntfy priority name for an optional task priority.
    pub fn ntfy_level(priority: Option<Priority>) -> &'static str {
        match priority {
            Some(Priority::High) => "max",
            Some(Priority::Medium) => "high",
            Some(Priority::Low) | None => "default",
        }
    }
}

impl Serialize for Priority {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

fn lenient_priority<'de, D>(deserializer: D) -> Result<Option<Priority>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(Priority::parse))
}

/// One task as exported by `task export`.
///
/// Every attribute without a dedicated field (UDAs, `entry`, `urgency`, ...)
/// lands in `extra`, which is where custom date sources are read from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    #[serde(default)]
    pub id: u64,
    pub uuid: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_priority",
        skip_serializing_if = "Option::is_none"
    )]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Task {
    /// Minimal task, mostly useful for tests and fakes.
    pub fn new(id: u64, uuid: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id,
            uuid: uuid.into(),
            description: description.into(),
            tags: Vec::new(),
            project: None,
            priority: None,
            status: "pending".into(),
            notification_date: None,
            due: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn project_name(&self) -> &str {
        self.project.as_deref().unwrap_or("")
    }

    /// String value of an extra (UDA) attribute, if present.
    pub fn extra_str(&self, name: &str) -> Option<&str> {
        self.extra.get(name).and_then(Value::as_str)
    }
}

/// Read-only projection of a task handed to templates.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskInfo {
    pub id: String,
    pub uuid: String,
    pub description: String,
    pub tags: Vec<String>,
    pub project: String,
    pub priority: String,
    pub due: Option<DateTime<Local>>,
    pub notification_date: Option<DateTime<Local>>,
}

impl TaskInfo {
    pub fn from_task(task: &Task, notification_date: Option<DateTime<Local>>) -> Self {
        Self {
            id: task.id.to_string(),
            uuid: task.uuid.clone(),
            description: task.description.clone(),
            tags: task.tags.clone(),
            project: task.project_name().to_string(),
            priority: task.priority.map(|p| p.as_str().to_string()).unwrap_or_default(),
            due: task
                .due
                .as_deref()
                .and_then(crate::due::parse_notification_date),
            notification_date,
        }
    }
}
