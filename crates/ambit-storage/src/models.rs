// Database row models (internal; domain types live in ambit-core)

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;

use ambit_core::types::{
    InstanceStatus, ModuleClass, ModuleInstance, NarrativeInfo,
};

// ============================================
// Agents and users
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct AgentRow {
    pub agent_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_by: String,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateAgent {
    pub name: String,
    pub description: Option<String>,
    pub created_by: String,
    pub is_public: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateAgent {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_public: Option<bool>,
}

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub user_id: String,
    pub user_type: String,
    pub display_name: Option<String>,
    pub timezone: String,
    pub status: String,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateUser {
    pub user_id: String,
    pub user_type: String,
    pub display_name: Option<String>,
    pub timezone: Option<String>,
}

// ============================================
// Narratives and events
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct NarrativeRow {
    pub narrative_id: String,
    pub agent_id: String,
    pub narrative_info: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NarrativeRow {
    /// Parse the JSON info payload; corrupted payloads read as empty with a
    /// warning rather than failing the turn.
    pub fn info(&self) -> NarrativeInfo {
        match serde_json::from_value(self.narrative_info.clone()) {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(
                    narrative_id = %self.narrative_id,
                    error = %e,
                    "Corrupted narrative_info, treating as empty"
                );
                NarrativeInfo::default()
            }
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct EventRow {
    pub event_id: String,
    pub narrative_id: String,
    pub agent_id: String,
    pub user_id: Option<String>,
    pub trigger: String,
    pub trigger_source: String,
    pub final_output: Option<String>,
    pub event_log: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateEvent {
    pub event_id: String,
    pub narrative_id: String,
    pub agent_id: String,
    pub user_id: Option<String>,
    pub trigger: String,
    pub trigger_source: String,
    pub final_output: Option<String>,
    pub event_log: Value,
}

// ============================================
// Module instances and narrative links
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct ModuleInstanceRow {
    pub instance_id: String,
    pub module_class: String,
    pub agent_id: String,
    pub user_id: Option<String>,
    pub is_public: bool,
    pub status: String,
    pub description: String,
    pub dependencies: Value,
    pub config: Value,
    pub state: Value,
    pub keywords: Value,
    pub topic_hint: Option<String>,
    pub routing_embedding: Option<Value>,
    pub last_polled_status: Option<String>,
    pub callback_processed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ModuleInstanceRow {
    /// Convert into the domain view. Unknown enum values and corrupted JSON
    /// degrade to safe defaults with a warning.
    pub fn into_domain(self) -> ModuleInstance {
        let module_class = self.module_class.parse::<ModuleClass>().unwrap_or_else(|e| {
            tracing::warn!(instance_id = %self.instance_id, error = %e, "Unknown module class, treating as ChatModule");
            ModuleClass::Chat
        });
        let status = self.status.parse::<InstanceStatus>().unwrap_or_else(|e| {
            tracing::warn!(instance_id = %self.instance_id, error = %e, "Unknown instance status, treating as active");
            InstanceStatus::Active
        });
        ModuleInstance {
            instance_id: self.instance_id,
            module_class,
            agent_id: self.agent_id,
            user_id: self.user_id,
            is_public: self.is_public,
            status,
            description: self.description,
            dependencies: json_string_list(&self.dependencies),
            config: self.config,
            state: self.state,
            keywords: json_string_list(&self.keywords),
            topic_hint: self.topic_hint,
            last_polled_status: self
                .last_polled_status
                .as_deref()
                .and_then(|s| s.parse().ok()),
            callback_processed: self.callback_processed,
            created_at: self.created_at,
            last_used_at: self.last_used_at,
            completed_at: self.completed_at,
        }
    }
}

/// Read a JSONB column expected to hold a string list; anything else is empty
pub fn json_string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

#[derive(Debug, Clone)]
pub struct CreateModuleInstance {
    pub instance_id: String,
    pub module_class: ModuleClass,
    pub agent_id: String,
    pub user_id: Option<String>,
    pub is_public: bool,
    pub status: InstanceStatus,
    pub description: String,
    pub dependencies: Vec<String>,
    pub config: Value,
    pub state: Value,
    pub keywords: Vec<String>,
    pub topic_hint: Option<String>,
    pub routing_embedding: Option<Vec<f32>>,
}

impl CreateModuleInstance {
    pub fn new(
        instance_id: impl Into<String>,
        module_class: ModuleClass,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            module_class,
            agent_id: agent_id.into(),
            user_id: None,
            is_public: false,
            status: InstanceStatus::Active,
            description: String::new(),
            dependencies: Vec::new(),
            config: Value::Null,
            state: Value::Null,
            keywords: Vec::new(),
            topic_hint: None,
            routing_embedding: None,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct InstanceLinkRow {
    pub instance_id: String,
    pub narrative_id: String,
    pub link_type: String,
    pub created_at: DateTime<Utc>,
}

// ============================================
// Jobs
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub job_id: String,
    pub instance_id: String,
    pub agent_id: String,
    pub user_id: String,
    pub job_type: String,
    pub title: String,
    pub description: String,
    pub payload: String,
    pub trigger_config: Value,
    pub status: String,
    pub process: Value,
    pub last_run_time: Option<DateTime<Utc>>,
    pub next_run_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub iteration_count: i32,
    pub related_entity_id: Option<String>,
    pub narrative_id: Option<String>,
    pub monitored_job_ids: Value,
    pub notification_method: String,
    pub embedding: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRow {
    pub fn job_type(&self) -> ambit_core::types::JobType {
        self.job_type.parse().unwrap_or_else(|e: String| {
            tracing::warn!(job_id = %self.job_id, error = %e, "Unknown job type, treating as one_off");
            ambit_core::types::JobType::OneOff
        })
    }

    pub fn status(&self) -> ambit_core::types::JobStatus {
        self.status.parse().unwrap_or_else(|e: String| {
            tracing::warn!(job_id = %self.job_id, error = %e, "Unknown job status, treating as pending");
            ambit_core::types::JobStatus::Pending
        })
    }

    /// Parse the trigger config; corrupted payloads read as None
    pub fn trigger(&self) -> Option<ambit_core::types::TriggerConfig> {
        serde_json::from_value(self.trigger_config.clone()).ok()
    }

    /// Short human-readable execution notes
    pub fn process_notes(&self) -> Vec<String> {
        json_string_list(&self.process)
    }
}

#[derive(Debug, Clone)]
pub struct CreateJob {
    pub job_id: String,
    pub instance_id: String,
    pub agent_id: String,
    pub user_id: String,
    pub job_type: ambit_core::types::JobType,
    pub title: String,
    pub description: String,
    pub payload: String,
    pub trigger_config: ambit_core::types::TriggerConfig,
    pub next_run_time: Option<DateTime<Utc>>,
    pub related_entity_id: Option<String>,
    pub narrative_id: Option<String>,
    pub notification_method: ambit_core::types::NotificationMethod,
    pub embedding: Option<Vec<f32>>,
}

// ============================================
// Inbox and agent messages
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct InboxMessageRow {
    pub message_id: String,
    pub user_id: String,
    pub title: String,
    pub content: String,
    pub message_type: String,
    pub source_type: String,
    pub source_id: String,
    pub event_id: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateInboxMessage {
    pub user_id: String,
    pub title: String,
    pub content: String,
    pub message_type: ambit_core::types::InboxMessageType,
    pub source_type: String,
    pub source_id: String,
    pub event_id: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct AgentMessageRow {
    pub message_id: String,
    pub agent_id: String,
    pub from_agent_id: Option<String>,
    pub title: String,
    pub content: String,
    pub message_type: String,
    pub source_type: String,
    pub source_id: String,
    pub if_response: bool,
    pub created_at: DateTime<Utc>,
}

// ============================================
// Social entities
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct SocialEntityRow {
    pub entity_id: String,
    pub instance_id: String,
    pub entity_name: String,
    pub entity_description: Option<String>,
    pub entity_type: String,
    pub identity_info: Value,
    pub contact_info: Value,
    pub tags: Value,
    pub relationship_strength: f64,
    pub interaction_count: i32,
    pub last_interaction_time: Option<DateTime<Utc>>,
    pub persona: Option<String>,
    pub related_job_ids: Value,
    pub expertise_domains: Value,
    pub embedding: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SocialEntityRow {
    pub fn tag_list(&self) -> Vec<String> {
        json_string_list(&self.tags)
    }

    pub fn related_jobs(&self) -> Vec<String> {
        json_string_list(&self.related_job_ids)
    }

    pub fn expertise(&self) -> Vec<String> {
        json_string_list(&self.expertise_domains)
    }
}

#[derive(Debug, Clone)]
pub struct CreateSocialEntity {
    pub entity_id: String,
    pub instance_id: String,
    pub entity_name: String,
    pub entity_description: Option<String>,
    pub entity_type: String,
    pub tags: Vec<String>,
}

// ============================================
// MCP endpoints and RAG store
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct McpUrlRow {
    pub mcp_id: String,
    pub agent_id: String,
    pub user_id: String,
    pub name: String,
    pub url: String,
    pub description: Option<String>,
    pub is_enabled: bool,
    pub connection_status: String,
    pub last_check_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateMcpUrl {
    pub agent_id: String,
    pub user_id: String,
    pub name: String,
    pub url: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct RagStoreRow {
    pub display_name: String,
    pub store_name: String,
    pub keywords: Value,
    pub file_count: i32,
    pub uploaded_files: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct AwarenessRow {
    pub instance_id: String,
    pub agent_id: String,
    pub awareness: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn corrupted_json_lists_read_as_empty() {
        assert_eq!(json_string_list(&json!(["a", "b"])), vec!["a", "b"]);
        assert!(json_string_list(&json!("not a list")).is_empty());
        assert!(json_string_list(&Value::Null).is_empty());
        // Mixed arrays keep only the strings
        assert_eq!(json_string_list(&json!(["a", 1, null])), vec!["a"]);
    }

    #[test]
    fn instance_row_degrades_unknown_enums() {
        let row = ModuleInstanceRow {
            instance_id: "job_a1b2c3d4".into(),
            module_class: "NoSuchModule".into(),
            agent_id: "agent_1".into(),
            user_id: None,
            is_public: false,
            status: "weird".into(),
            description: String::new(),
            dependencies: json!(["job_00000001"]),
            config: Value::Null,
            state: Value::Null,
            keywords: json!("corrupt"),
            topic_hint: None,
            routing_embedding: None,
            last_polled_status: Some("in_progress".into()),
            callback_processed: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_used_at: None,
            completed_at: None,
        };
        let inst = row.into_domain();
        assert_eq!(inst.status, InstanceStatus::Active);
        assert_eq!(inst.dependencies, vec!["job_00000001"]);
        assert!(inst.keywords.is_empty());
        assert_eq!(inst.last_polled_status, Some(InstanceStatus::InProgress));
    }
}
