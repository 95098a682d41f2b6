// ContextData: the per-turn context bag modules enrich in parallel
//
// Each module's hook_data_gathering receives its own deep copy and the
// results are collapsed through `merge`. Merge policy:
//   - immutable fields (agent_id, user_id, input_content) always come from
//     the original
//   - list fields append the elements a module added (no duplicates of what
//     was already there)
//   - dict fields deep-merge, scalars override per key
//   - remaining scalar fields: last non-null writer wins

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::WorkingSource;

/// Origin track of a recalled chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTrack {
    LongTerm,
    ShortTerm,
}

/// One message in the turn's assembled chat history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_type: Option<MemoryTrack>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_source: Option<WorkingSource>,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            memory_type: None,
            instance_id: None,
            working_source: None,
        }
    }
}

/// The context bag handed to module hooks
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextData {
    // Immutable under merge
    pub agent_id: String,
    pub user_id: String,
    pub input_content: String,

    /// Instance ids loaded for this turn; set by the runtime, read by hooks
    #[serde(default)]
    pub instance_ids: Vec<String>,

    // List fields (append-merged)
    #[serde(default)]
    pub chat_history: Vec<ChatMessage>,

    // Dict fields (deep-merged)
    #[serde(default)]
    pub user_profile: Map<String, Value>,
    #[serde(default)]
    pub extra_data: Map<String, Value>,

    // Simple fields (last non-empty writer wins)
    #[serde(default)]
    pub jobs_information: Option<String>,
    #[serde(default)]
    pub awareness: Option<String>,
    #[serde(default)]
    pub narrative_summary: Option<String>,
}

impl ContextData {
    pub fn new(
        agent_id: impl Into<String>,
        user_id: impl Into<String>,
        input_content: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            user_id: user_id.into(),
            input_content: input_content.into(),
            ..Default::default()
        }
    }

    /// Collapse per-module copies back into one context.
    pub fn merge(original: &ContextData, updates: Vec<ContextData>) -> ContextData {
        let mut result = original.clone();

        for update in updates {
            // List: append only what the module added beyond the original
            for msg in &update.chat_history {
                if !original.chat_history.contains(msg) && !result.chat_history.contains(msg) {
                    result.chat_history.push(msg.clone());
                }
            }

            deep_merge(&mut result.user_profile, &update.user_profile);
            deep_merge(&mut result.extra_data, &update.extra_data);

            if update.jobs_information.is_some()
                && update.jobs_information != original.jobs_information
            {
                result.jobs_information = update.jobs_information;
            }
            if update.awareness.is_some() && update.awareness != original.awareness {
                result.awareness = update.awareness;
            }
            if update.narrative_summary.is_some()
                && update.narrative_summary != original.narrative_summary
            {
                result.narrative_summary = update.narrative_summary;
            }
        }

        // Immutable fields are restored regardless of what hooks did
        result.agent_id = original.agent_id.clone();
        result.user_id = original.user_id.clone();
        result.input_content = original.input_content.clone();
        result.instance_ids = original.instance_ids.clone();

        result
    }
}

fn deep_merge(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, value) in source {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> ContextData {
        ContextData::new("agent_1", "user_1", "hello")
    }

    #[test]
    fn immutable_fields_survive_hostile_updates() {
        let original = base();
        let mut update = original.clone();
        update.agent_id = "agent_evil".into();
        update.user_id = "user_evil".into();
        update.input_content = "tampered".into();

        let merged = ContextData::merge(&original, vec![update]);
        assert_eq!(merged.agent_id, "agent_1");
        assert_eq!(merged.user_id, "user_1");
        assert_eq!(merged.input_content, "hello");
    }

    #[test]
    fn chat_history_appends_in_module_order_without_duplicates() {
        let mut original = base();
        original
            .chat_history
            .push(ChatMessage::new("user", "hello"));

        let mut a = original.clone();
        a.chat_history.push(ChatMessage::new("assistant", "from a"));
        let mut b = original.clone();
        b.chat_history.push(ChatMessage::new("assistant", "from b"));
        // b also echoes the original message; it must not duplicate
        b.chat_history.push(ChatMessage::new("user", "hello"));

        let merged = ContextData::merge(&original, vec![a, b]);
        let contents: Vec<&str> = merged
            .chat_history
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(contents, vec!["hello", "from a", "from b"]);
    }

    #[test]
    fn dict_fields_deep_merge_with_scalar_override() {
        let mut original = base();
        original.user_profile.insert(
            "prefs".into(),
            json!({"lang": "en", "nested": {"keep": true}}),
        );

        let mut a = original.clone();
        a.user_profile
            .insert("prefs".into(), json!({"lang": "fr", "nested": {"add": 1}}));
        let mut b = original.clone();
        b.extra_data.insert("social".into(), json!({"count": 2}));

        let merged = ContextData::merge(&original, vec![a, b]);
        assert_eq!(merged.user_profile["prefs"]["lang"], "fr");
        assert_eq!(merged.user_profile["prefs"]["nested"]["keep"], true);
        assert_eq!(merged.user_profile["prefs"]["nested"]["add"], 1);
        assert_eq!(merged.extra_data["social"]["count"], 2);
    }

    #[test]
    fn scalar_fields_take_last_non_null_writer() {
        let original = base();
        let mut a = original.clone();
        a.jobs_information = Some("2 active jobs".into());
        let b = original.clone();

        let merged = ContextData::merge(&original, vec![a, b]);
        assert_eq!(merged.jobs_information.as_deref(), Some("2 active jobs"));
    }
}
