// Instance creation factory
//
// Creation strategies by module level:
//   - Agent level (awareness, social-network, basic-info, rag): created once
//     per agent, public, user_id null
//   - Narrative level (chat): one per (agent, user, narrative)
//   - Task level (job): one per job

use anyhow::Result;
use serde_json::json;
use tracing::{debug, info};

use ambit_core::ids::generate_instance_id;
use ambit_core::types::{InstanceStatus, LinkType, ModuleClass, ModuleInstance};
use ambit_storage::{CreateModuleInstance, Database};

#[derive(Clone)]
pub struct InstanceFactory {
    db: Database,
}

impl InstanceFactory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // ===== Agent level =====

    /// Idempotently create the four agent-scoped public instances
    pub async fn create_agent_level_instances(
        &self,
        agent_id: &str,
    ) -> Result<Vec<ModuleInstance>> {
        let mut instances = Vec::with_capacity(ModuleClass::AGENT_LEVEL.len());
        for class in ModuleClass::AGENT_LEVEL {
            instances.push(self.ensure_agent_level_instance(agent_id, class).await?);
        }
        info!(agent_id = %agent_id, count = instances.len(), "Agent-level instances ready");
        Ok(instances)
    }

    async fn ensure_agent_level_instance(
        &self,
        agent_id: &str,
        class: ModuleClass,
    ) -> Result<ModuleInstance> {
        let existing = self
            .db
            .get_instances_by_agent(agent_id, Some(class), Some(true))
            .await?;
        if let Some(row) = existing.into_iter().next() {
            debug!(agent_id = %agent_id, module = %class, "Agent-level instance already exists");
            return Ok(row.into_domain());
        }

        let (description, keywords, topic_hint) = agent_level_defaults(class);
        let mut input =
            CreateModuleInstance::new(generate_instance_id(class), class, agent_id);
        input.is_public = true;
        input.status = InstanceStatus::Active;
        input.description = description.to_string();
        input.keywords = keywords.iter().map(|k| k.to_string()).collect();
        input.topic_hint = Some(topic_hint.to_string());

        let row = self.db.create_instance(input).await?;
        info!(instance_id = %row.instance_id, module = %class, "Created agent-level instance");
        Ok(row.into_domain())
    }

    // ===== Narrative level =====

    /// Create the chat instance bound to a narrative via an active link
    pub async fn create_chat_instance(
        &self,
        agent_id: &str,
        user_id: &str,
        narrative_id: &str,
    ) -> Result<ModuleInstance> {
        let mut input = CreateModuleInstance::new(
            generate_instance_id(ModuleClass::Chat),
            ModuleClass::Chat,
            agent_id,
        );
        input.user_id = Some(user_id.to_string());
        input.description = "Chat management and history".to_string();
        input.keywords = vec!["chat".into(), "conversation".into(), "dialogue".into()];
        input.topic_hint = Some("Chat interactions and message history".into());

        let row = self.db.create_instance(input).await?;
        self.db
            .link_instance_to_narrative(&row.instance_id, narrative_id, LinkType::Active)
            .await?;
        info!(instance_id = %row.instance_id, narrative_id = %narrative_id, "Created chat instance");
        Ok(row.into_domain())
    }

    // ===== Task level =====

    /// Create a job-module instance, optionally linked to a narrative
    pub async fn create_job_instance(
        &self,
        agent_id: &str,
        user_id: &str,
        title: &str,
        job_type: &str,
        narrative_id: Option<&str>,
    ) -> Result<ModuleInstance> {
        let mut input = CreateModuleInstance::new(
            generate_instance_id(ModuleClass::Job),
            ModuleClass::Job,
            agent_id,
        );
        input.user_id = Some(user_id.to_string());
        input.description = format!("Execute task: {title}");
        input.keywords = vec!["job".into(), "task".into(), job_type.to_string()];
        input.topic_hint = Some(title.to_string());
        input.state = json!({ "job_type": job_type, "progress": [] });

        let row = self.db.create_instance(input).await?;
        if let Some(narrative_id) = narrative_id {
            self.db
                .link_instance_to_narrative(&row.instance_id, narrative_id, LinkType::Active)
                .await?;
        }
        info!(instance_id = %row.instance_id, title = %title, "Created job instance");
        Ok(row.into_domain())
    }

    // ===== Loading =====

    /// Union of the agent's public instances and the narrative's active
    /// links. Linked instances load when active or in_progress (running
    /// ongoing jobs stay visible). Other users' chat instances are excluded
    /// from the turn.
    pub async fn load_instances_for_narrative(
        &self,
        agent_id: &str,
        user_id: &str,
        narrative_id: &str,
    ) -> Result<Vec<ModuleInstance>> {
        let public_rows = self.db.get_public_instances(agent_id).await?;

        let links = self.db.get_links_for_narrative(narrative_id).await?;
        let linked_ids: Vec<String> = links.into_iter().map(|l| l.instance_id).collect();
        let linked_rows = self.db.get_instances_by_ids(&linked_ids).await?;

        let mut seen = std::collections::HashSet::new();
        let mut result = Vec::new();

        for row in public_rows {
            let inst = row.into_domain();
            if seen.insert(inst.instance_id.clone()) {
                result.push(inst);
            }
        }

        for row in linked_rows.into_iter().flatten() {
            let inst = row.into_domain();
            if !matches!(
                inst.status,
                InstanceStatus::Active | InstanceStatus::InProgress
            ) {
                continue;
            }
            if inst.module_class == ModuleClass::Chat
                && inst.user_id.as_deref() != Some(user_id)
            {
                debug!(
                    instance_id = %inst.instance_id,
                    "Skipping another user's chat instance"
                );
                continue;
            }
            if seen.insert(inst.instance_id.clone()) {
                result.push(inst);
            }
        }

        debug!(
            narrative_id = %narrative_id,
            count = result.len(),
            "Loaded instances for narrative"
        );
        Ok(result)
    }
}

fn agent_level_defaults(class: ModuleClass) -> (&'static str, &'static [&'static str], &'static str) {
    match class {
        ModuleClass::Awareness => (
            "Agent self-awareness and cognitive state management",
            &["awareness", "self", "cognition"],
            "Agent's self-cognition, goals and state",
        ),
        ModuleClass::SocialNetwork => (
            "Social network entities and relationships",
            &["social", "network", "entity", "relationship"],
            "Social relationship network, user and entity information",
        ),
        ModuleClass::BasicInfo => (
            "Basic information and environment context",
            &["basic", "info", "time", "context"],
            "Basic information, time, environment context",
        ),
        ModuleClass::Rag => (
            "Agent knowledge base and document retrieval",
            &["rag", "knowledge", "document", "retrieval"],
            "Agent documents and knowledge retrieval",
        ),
        _ => ("", &[], ""),
    }
}
