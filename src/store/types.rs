/// Record types for the flow / run / step / task hierarchy
///
/// Field names follow the workflow client's service API (`flow_id`, `run_number`,
/// `ts_epoch`, ...) so records on disk and on the wire are the same JSON.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;

/// Fields shared by every hierarchy record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub user_name: String,
    /// User tags in insertion order, duplicates allowed
    #[serde(default)]
    pub tags: Vec<String>,
    /// System tags, kept free of duplicates
    #[serde(default)]
    pub system_tags: Vec<String>,
    /// Creation time in epoch milliseconds
    #[serde(rename = "ts_epoch")]
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub flow_id: String,
    #[serde(flatten)]
    pub meta: ObjectMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub flow_id: String,
    pub run_number: String,
    #[serde(flatten)]
    pub meta: ObjectMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub flow_id: String,
    pub run_number: String,
    pub step_name: String,
    #[serde(flatten)]
    pub meta: ObjectMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub flow_id: String,
    pub run_number: String,
    pub step_name: String,
    pub task_id: String,
    #[serde(flatten)]
    pub meta: ObjectMeta,
}

impl TaskRecord {
    /// `flow/run/step/task` pathspec
    pub fn pathspec(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.flow_id, self.run_number, self.step_name, self.task_id
        )
    }
}

/// Request body accepted by every create endpoint
///
/// All fields are optional; missing ones are filled in by [`ObjectBody::into_meta`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ObjectBody {
    pub user_name: Option<String>,
    pub tags: Option<Vec<String>>,
    pub system_tags: Option<Vec<String>>,
    pub ts_epoch: Option<i64>,
}

impl ObjectBody {
    /// Resolve defaults: current user, empty tag lists, current time
    pub fn into_meta(self) -> ObjectMeta {
        let mut system_tags: Vec<String> = Vec::new();
        for tag in self.system_tags.unwrap_or_default() {
            if !system_tags.contains(&tag) {
                system_tags.push(tag);
            }
        }

        ObjectMeta {
            user_name: self
                .user_name
                .filter(|name| !name.is_empty())
                .unwrap_or_else(current_user),
            tags: self.tags.unwrap_or_default(),
            system_tags,
            created_at: self.ts_epoch.unwrap_or_else(now_millis),
        }
    }
}

/// A named output of one task attempt
///
/// Only `name` and `attempt_id` are interpreted; everything else the client sends
/// (sha, location, content_type, ...) is stored and returned untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    #[serde(default)]
    pub attempt_id: u32,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// One append-only metadata entry of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    #[serde(default = "unknown_field")]
    pub field_name: String,
    #[serde(default)]
    pub value: Value,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl MetadataEntry {
    /// Value as text for pattern matching; strings are used verbatim
    pub fn value_text(&self) -> Cow<'_, str> {
        match &self.value {
            Value::String(s) => Cow::Borrowed(s.as_str()),
            Value::Null => Cow::Borrowed(""),
            other => Cow::Owned(other.to_string()),
        }
    }
}

/// Body of `PATCH .../tag/mutate`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TagMutation {
    pub tags_to_add: Vec<String>,
    pub tags_to_remove: Vec<String>,
}

fn unknown_field() -> String {
    "unknown".to_string()
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Wall clock in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn body_defaults_fill_missing_fields() {
        let meta = ObjectBody::default().into_meta();
        assert!(!meta.user_name.is_empty());
        assert!(meta.tags.is_empty());
        assert!(meta.created_at > 0);
    }

    #[test]
    fn body_keeps_tag_order_and_dedups_system_tags() {
        let body: ObjectBody = serde_json::from_value(json!({
            "user_name": "alice",
            "tags": ["b", "a", "b"],
            "system_tags": ["runtime:dev", "runtime:dev", "user:alice"],
            "ts_epoch": 42
        }))
        .unwrap();
        let meta = body.into_meta();
        assert_eq!(meta.user_name, "alice");
        assert_eq!(meta.tags, vec!["b", "a", "b"]);
        assert_eq!(meta.system_tags, vec!["runtime:dev", "user:alice"]);
        assert_eq!(meta.created_at, 42);
    }

    #[test]
    fn run_record_uses_client_field_names() {
        let record = RunRecord {
            flow_id: "F".into(),
            run_number: "17".into(),
            meta: ObjectMeta {
                user_name: "u".into(),
                tags: vec![],
                system_tags: vec![],
                created_at: 5,
            },
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["run_number"], "17");
        assert_eq!(value["ts_epoch"], 5);
        assert!(value.get("meta").is_none());
    }

    #[test]
    fn artifact_keeps_unknown_fields() {
        let artifact: Artifact = serde_json::from_value(json!({
            "name": "x",
            "sha": "abc",
            "ds_type": "local"
        }))
        .unwrap();
        assert_eq!(artifact.attempt_id, 0);
        assert_eq!(artifact.fields["sha"], "abc");
        let back = serde_json::to_value(&artifact).unwrap();
        assert_eq!(back["ds_type"], "local");
    }

    #[test]
    fn metadata_value_text() {
        let entry: MetadataEntry =
            serde_json::from_value(json!({"field_name": "n", "value": 3})).unwrap();
        assert_eq!(entry.value_text(), "3");
        let entry: MetadataEntry = serde_json::from_value(json!({"value": "py"})).unwrap();
        assert_eq!(entry.field_name, "unknown");
        assert_eq!(entry.value_text(), "py");
    }
}
