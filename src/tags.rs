//! `+tag` markers typed into a description are turned into real tags.
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::model::Task;
use crate::taskwarrior::TaskEditor;

static TAG_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\B\+([a-zA-Z0-9_\-]+)").expect("valid tag regex"));

/// Distinct tag names in order of first appearance.
pub fn extract_tags(description: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for cap in TAG_MARKER.captures_iter(description) {
        let tag = &cap[1];
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}

/// Description with markers removed, inner whitespace collapsed and trimmed.
pub fn remove_tags(description: &str) -> String {
    let stripped = TAG_MARKER.replace_all(description, "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Changes one task needs to turn its markers into tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagDirective {
    pub uuid: String,
    pub add_tags: Vec<String>,
    pub description: String,
}

impl TagDirective {
    /// `None` when the description carries no markers.
    pub fn plan(task: &Task) -> Option<Self> {
        let add_tags = extract_tags(&task.description);
        if add_tags.is_empty() {
            return None;
        }
        Some(Self {
            uuid: task.uuid.clone(),
            add_tags,
            description: remove_tags(&task.description),
        })
    }

    pub fn modify_args(&self) -> Vec<String> {
        let mut args: Vec<String> = self.add_tags.iter().map(|t| format!("+{t}")).collect();
        args.push(format!("description:{}", self.description));
        args
    }

    pub fn apply_local(&self, task: &mut Task) {
        for tag in &self.add_tags {
            if !task.tags.contains(tag) {
                task.tags.push(tag.clone());
            }
        }
        task.description = self.description.clone();
    }

    /// Errors are logged and swallowed.
    pub async fn apply_remote(&self, editor: &dyn TaskEditor) {
        match editor.modify(&self.uuid, &self.modify_args()).await {
            Ok(()) => info!(uuid = %self.uuid, tags = ?self.add_tags, "applied tag directive"),
            Err(err) => warn!(%err, uuid = %self.uuid, "failed to apply tag directive"),
        }
    }
}

/// Apply every directive in `tasks`, remotely first when an editor is given.
pub async fn cleanup(tasks: &mut [Task], editor: Option<&dyn TaskEditor>) -> usize {
    let mut applied = 0;
    for task in tasks.iter_mut() {
        let Some(directive) = TagDirective::plan(task) else {
            continue;
        };
        if let Some(editor) = editor {
            directive.apply_remote(editor).await;
        }
        directive.apply_local(task);
        applied += 1;
    }
    applied
}
