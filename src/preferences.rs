//! Typed notification preferences.
//!
//! Profiles store preferences as a free-form JSON object. Every known switch
//! defaults to enabled when the key is missing, the value is not a boolean, or
//! the user has no profile at all.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Which preference switch guards a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationGate {
    Assignment,
    TaskComplete,
    FileUpload,
    Comments,
    DeadlineWarning,
    Deadline,
    /// No opt-out exists (priority changes).
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreferences {
    #[serde(default = "enabled")]
    pub assignment: bool,
    #[serde(default = "enabled")]
    pub task_complete: bool,
    #[serde(default = "enabled")]
    pub file_upload: bool,
    #[serde(default = "enabled")]
    pub comments: bool,
    #[serde(default = "enabled")]
    pub deadline_warning: bool,
    #[serde(default = "enabled")]
    pub deadline: bool,
}

fn enabled() -> bool {
    true
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            assignment: true,
            task_complete: true,
            file_upload: true,
            comments: true,
            deadline_warning: true,
            deadline: true,
        }
    }
}

impl NotificationPreferences {
    /// Read preferences from a stored settings map.
    pub fn from_settings(settings: &Map<String, Value>) -> Self {
        let flag = |key: &str| settings.get(key).and_then(Value::as_bool).unwrap_or(true);
        Self {
            assignment: flag("assignment"),
            task_complete: flag("task_complete"),
            file_upload: flag("file_upload"),
            comments: flag("comments"),
            deadline_warning: flag("deadline_warning"),
            deadline: flag("deadline"),
        }
    }

    pub fn allows(&self, gate: NotificationGate) -> bool {
        match gate {
            NotificationGate::Assignment => self.assignment,
            NotificationGate::TaskComplete => self.task_complete,
            NotificationGate::FileUpload => self.file_upload,
            NotificationGate::Comments => self.comments,
            NotificationGate::DeadlineWarning => self.deadline_warning,
            NotificationGate::Deadline => self.deadline,
            NotificationGate::Always => true,
        }
    }
}

/// Shallow-merge `patch` into `current`; keys in the patch win.
pub fn merge_settings(current: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        current.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn missing_keys_default_to_enabled() {
        let prefs = NotificationPreferences::from_settings(&Map::new());
        assert_eq!(prefs, NotificationPreferences::default());
        assert!(prefs.allows(NotificationGate::Deadline));
    }

    #[test]
    fn explicit_false_disables_only_that_gate() {
        let prefs = NotificationPreferences::from_settings(&map(json!({ "comments": false })));
        assert!(!prefs.allows(NotificationGate::Comments));
        assert!(prefs.allows(NotificationGate::Assignment));
        assert!(prefs.allows(NotificationGate::Always));
    }

    #[test]
    fn non_boolean_values_are_ignored() {
        let prefs = NotificationPreferences::from_settings(&map(json!({ "deadline": "no" })));
        assert!(prefs.deadline);
    }

    #[test]
    fn merge_keeps_untouched_keys() {
        let mut current = map(json!({ "comments": false, "deadline": false }));
        merge_settings(&mut current, map(json!({ "deadline": true })));
        assert_eq!(current.get("comments"), Some(&json!(false)));
        assert_eq!(current.get("deadline"), Some(&json!(true)));
    }
}
