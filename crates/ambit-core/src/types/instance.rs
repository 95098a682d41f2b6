// Module instance types: the unit of scheduling, dependency and memory

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The seven module classes an instance can be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleClass {
    #[serde(rename = "ChatModule")]
    Chat,
    #[serde(rename = "JobModule")]
    Job,
    #[serde(rename = "AwarenessModule")]
    Awareness,
    #[serde(rename = "SocialNetworkModule")]
    SocialNetwork,
    #[serde(rename = "BasicInfoModule")]
    BasicInfo,
    #[serde(rename = "GeminiRAGModule")]
    Rag,
    #[serde(rename = "SkillModule")]
    Skill,
}

impl ModuleClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleClass::Chat => "ChatModule",
            ModuleClass::Job => "JobModule",
            ModuleClass::Awareness => "AwarenessModule",
            ModuleClass::SocialNetwork => "SocialNetworkModule",
            ModuleClass::BasicInfo => "BasicInfoModule",
            ModuleClass::Rag => "GeminiRAGModule",
            ModuleClass::Skill => "SkillModule",
        }
    }

    /// The four agent-level public module classes, created once per agent
    pub const AGENT_LEVEL: [ModuleClass; 4] = [
        ModuleClass::Awareness,
        ModuleClass::SocialNetwork,
        ModuleClass::BasicInfo,
        ModuleClass::Rag,
    ];
}

impl fmt::Display for ModuleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ChatModule" => Ok(ModuleClass::Chat),
            "JobModule" => Ok(ModuleClass::Job),
            "AwarenessModule" => Ok(ModuleClass::Awareness),
            "SocialNetworkModule" => Ok(ModuleClass::SocialNetwork),
            "BasicInfoModule" => Ok(ModuleClass::BasicInfo),
            "GeminiRAGModule" => Ok(ModuleClass::Rag),
            "SkillModule" => Ok(ModuleClass::Skill),
            other => Err(format!("unknown module class: {other}")),
        }
    }
}

/// How the planner treats a module: capability modules are always-on context,
/// task modules are scheduled work the planner manages explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleType {
    Capability,
    Task,
}

impl ModuleClass {
    pub fn module_type(&self) -> ModuleType {
        match self {
            ModuleClass::Job => ModuleType::Task,
            _ => ModuleType::Capability,
        }
    }
}

/// Lifecycle status of a module instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Active,
    InProgress,
    Blocked,
    Completed,
    Failed,
    Cancelled,
    Archived,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Active => "active",
            InstanceStatus::InProgress => "in_progress",
            InstanceStatus::Blocked => "blocked",
            InstanceStatus::Completed => "completed",
            InstanceStatus::Failed => "failed",
            InstanceStatus::Cancelled => "cancelled",
            InstanceStatus::Archived => "archived",
        }
    }

    /// Terminal statuses for dependency purposes. A failed dependency still
    /// unblocks its dependents; the downstream payload decides what to do
    /// with the failed upstream output.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Completed | InstanceStatus::Failed | InstanceStatus::Cancelled
        )
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(InstanceStatus::Active),
            "in_progress" => Ok(InstanceStatus::InProgress),
            "blocked" => Ok(InstanceStatus::Blocked),
            "completed" => Ok(InstanceStatus::Completed),
            "failed" => Ok(InstanceStatus::Failed),
            "cancelled" => Ok(InstanceStatus::Cancelled),
            "archived" => Ok(InstanceStatus::Archived),
            other => Err(format!("unknown instance status: {other}")),
        }
    }
}

/// Link type between an instance and a narrative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    Active,
    Historical,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Active => "active",
            LinkType::Historical => "historical",
        }
    }
}

/// Domain view of a module instance, the unit of scheduling, dependency
/// and memory. Storage rows convert into this for everything above the
/// repository layer.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModuleInstance {
    pub instance_id: String,
    pub module_class: ModuleClass,
    pub agent_id: String,
    /// None for public (agent-level) instances
    pub user_id: Option<String>,
    pub is_public: bool,
    pub status: InstanceStatus,
    pub description: String,
    /// Instance ids that must reach a terminal status first
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub state: serde_json::Value,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub topic_hint: Option<String>,
    #[serde(default)]
    pub last_polled_status: Option<InstanceStatus>,
    #[serde(default)]
    pub callback_processed: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub last_used_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ModuleInstance {
    /// A synthetic in-memory instance with no backing row (always-load
    /// modules, the job-module fallback).
    pub fn synthetic(
        instance_id: impl Into<String>,
        module_class: ModuleClass,
        agent_id: impl Into<String>,
        user_id: Option<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            module_class,
            agent_id: agent_id.into(),
            user_id,
            is_public: false,
            status: InstanceStatus::Active,
            description: description.into(),
            dependencies: Vec::new(),
            config: serde_json::Value::Null,
            state: serde_json::Value::Null,
            keywords: Vec::new(),
            topic_hint: None,
            last_polled_status: None,
            callback_processed: false,
            created_at: chrono::Utc::now(),
            last_used_at: None,
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_class_round_trips_through_strings() {
        for class in [
            ModuleClass::Chat,
            ModuleClass::Job,
            ModuleClass::Awareness,
            ModuleClass::SocialNetwork,
            ModuleClass::BasicInfo,
            ModuleClass::Rag,
            ModuleClass::Skill,
        ] {
            assert_eq!(class.as_str().parse::<ModuleClass>().unwrap(), class);
        }
    }

    #[test]
    fn only_job_is_a_task_module() {
        assert_eq!(ModuleClass::Job.module_type(), ModuleType::Task);
        assert_eq!(ModuleClass::Chat.module_type(), ModuleType::Capability);
        assert_eq!(ModuleClass::Rag.module_type(), ModuleType::Capability);
    }

    #[test]
    fn terminal_set_matches_dependency_semantics() {
        assert!(InstanceStatus::Completed.is_terminal());
        assert!(InstanceStatus::Failed.is_terminal());
        assert!(InstanceStatus::Cancelled.is_terminal());
        assert!(!InstanceStatus::Blocked.is_terminal());
        assert!(!InstanceStatus::InProgress.is_terminal());
        assert!(!InstanceStatus::Archived.is_terminal());
    }
}
