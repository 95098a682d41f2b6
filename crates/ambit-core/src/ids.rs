// Prefixed id generation and validation
//
// Every entity id is `{prefix}_{hex}`. Module instances use an 8-hex tail
// (`job_fe7382f7`); standalone records (events, messages) use longer tails.

use regex::Regex;
use std::sync::OnceLock;
use uuid::Uuid;

use crate::types::ModuleClass;

/// Generate an id of the form `{prefix}_{8 hex chars}`
pub fn generate_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &hex[..8])
}

/// Generate a long id of the form `{prefix}_{12 hex chars}` (events, jobs, messages)
pub fn generate_long_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &hex[..12])
}

/// Instance id prefix for a module class
pub fn instance_prefix(module_class: ModuleClass) -> &'static str {
    match module_class {
        ModuleClass::Chat => "chat",
        ModuleClass::Job => "job",
        ModuleClass::Awareness => "aware",
        ModuleClass::SocialNetwork => "social",
        ModuleClass::BasicInfo => "basic",
        ModuleClass::Rag => "rag",
        ModuleClass::Skill => "skill",
    }
}

/// Generate a fresh instance id for a module class
pub fn generate_instance_id(module_class: ModuleClass) -> String {
    generate_id(instance_prefix(module_class))
}

fn instance_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z]+_[0-9a-f]{8}$").expect("valid regex"))
}

/// True when `id` is a well-formed instance id (`prefix_xxxxxxxx`).
/// The planner sometimes echoes task keys into the id slot; those fail here
/// and get a freshly allocated id instead.
pub fn is_valid_instance_id(id: &str) -> bool {
    instance_id_pattern().is_match(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_valid() {
        let id = generate_instance_id(ModuleClass::Job);
        assert!(id.starts_with("job_"));
        assert!(is_valid_instance_id(&id));
    }

    #[test]
    fn rejects_task_keys_and_malformed_ids() {
        assert!(!is_valid_instance_id("fetch_data"));
        assert!(!is_valid_instance_id("job_XYZ12345"));
        assert!(!is_valid_instance_id("job_12345"));
        assert!(is_valid_instance_id("chat_a1b2c3d4"));
    }

    #[test]
    fn prefix_table_is_stable() {
        assert_eq!(instance_prefix(ModuleClass::Awareness), "aware");
        assert_eq!(instance_prefix(ModuleClass::SocialNetwork), "social");
        assert_eq!(instance_prefix(ModuleClass::BasicInfo), "basic");
        assert_eq!(instance_prefix(ModuleClass::Skill), "skill");
    }
}
