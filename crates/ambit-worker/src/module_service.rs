// Module service: the front door for a user turn
//
// Loads the narrative's current instances, asks the planner for a decision,
// materializes the plan through the sync pass and returns the full module
// set for the runtime, including the synthetic fallbacks.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use tracing::{debug, info};

use ambit_core::error::{CoreError, Result};
use ambit_core::module::ModuleRegistry;
use ambit_core::plan::{DirectTrigger, ExecutionPath, JobInfo, PlannedInstance};
use ambit_core::types::{ModuleClass, ModuleInstance, ModuleType, WorkingSource};
use ambit_storage::Database;

use crate::decider::{DecisionInputs, InstanceDecider};
use crate::factory::InstanceFactory;
use crate::sync::InstanceSync;

/// Modules appended every turn with synthetic in-memory instances
const ALWAYS_LOAD_MODULES: [ModuleClass; 1] = [ModuleClass::Skill];

/// What a turn gets back from module loading
#[derive(Debug)]
pub struct LoadResult {
    pub active_instances: Vec<ModuleInstance>,
    pub execution_type: ExecutionPath,
    pub direct_trigger: Option<DirectTrigger>,
    pub changes: Value,
    pub relationship_graph: Value,
    pub key_to_id: BTreeMap<String, String>,
    pub raw_instances: Vec<PlannedInstance>,
}

#[derive(Clone)]
pub struct ModuleService {
    db: Database,
    factory: InstanceFactory,
    decider: InstanceDecider,
    sync: InstanceSync,
    registry: ModuleRegistry,
}

impl ModuleService {
    pub fn new(
        db: Database,
        factory: InstanceFactory,
        decider: InstanceDecider,
        sync: InstanceSync,
        registry: ModuleRegistry,
    ) -> Self {
        Self {
            db,
            factory,
            decider,
            sync,
            registry,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn load_modules(
        &self,
        agent_id: &str,
        user_id: &str,
        narrative_id: &str,
        input_content: &str,
        narrative_summary: &str,
        history_markdown: &str,
        awareness: &str,
        _working_source: WorkingSource,
    ) -> Result<LoadResult> {
        let current = self
            .factory
            .load_instances_for_narrative(agent_id, user_id, narrative_id)
            .await
            .map_err(|e| CoreError::storage(e.to_string()))?;

        let (capability, task): (Vec<ModuleInstance>, Vec<ModuleInstance>) = current
            .into_iter()
            .partition(|inst| inst.module_class.module_type() == ModuleType::Capability);
        debug!(
            capability = capability.len(),
            task = task.len(),
            "Partitioned current instances"
        );

        let job_info_map = self.job_info_map(narrative_id).await?;
        let capability_info = self.registry.capability_info();

        let plan = self
            .decider
            .decide(DecisionInputs {
                user_input: input_content,
                task_instances: &task,
                capability_info: &capability_info,
                narrative_summary,
                history_markdown,
                awareness,
                current_user_id: user_id,
                job_info_map: &job_info_map,
            })
            .await?;

        let outcome = self
            .sync
            .process(plan.active_instances, agent_id, user_id, Some(narrative_id))
            .await?;
        self.sync
            .link_plan_instances(&outcome.instances, narrative_id)
            .await
            .map_err(|e| CoreError::storage(e.to_string()))?;

        let changes = diff_changes(&task, &outcome.instances);

        // Capability instances carry over untouched; planned instances join
        // them, loaded from the database where they exist
        let mut active = capability;
        for planned in &outcome.instances {
            if let Some(instance) = self.materialize(planned, agent_id, user_id).await? {
                if !active.iter().any(|i| i.instance_id == instance.instance_id) {
                    active.push(instance);
                }
            }
        }

        self.ensure_job_module_loaded(&mut active, agent_id, user_id);
        self.ensure_always_load_modules(&mut active, agent_id, user_id);

        info!(
            active = active.len(),
            execution = ?plan.execution_path,
            "Modules loaded for turn"
        );
        Ok(LoadResult {
            active_instances: active,
            execution_type: plan.execution_path,
            direct_trigger: plan.direct_trigger,
            changes,
            relationship_graph: plan.relationship_graph,
            key_to_id: outcome.key_to_id,
            raw_instances: outcome.instances,
        })
    }

    async fn job_info_map(&self, narrative_id: &str) -> Result<BTreeMap<String, JobInfo>> {
        let jobs = self
            .db
            .get_active_jobs_by_narrative(narrative_id, 100)
            .await
            .map_err(|e| CoreError::storage(e.to_string()))?;
        Ok(jobs
            .into_iter()
            .map(|job| {
                (
                    job.instance_id.clone(),
                    JobInfo {
                        related_entity_id: job.related_entity_id.clone(),
                        job_type: job.job_type.clone(),
                        title: job.title.clone(),
                    },
                )
            })
            .collect())
    }

    /// Planned instance -> loaded instance: database row when one exists,
    /// synthetic otherwise
    async fn materialize(
        &self,
        planned: &PlannedInstance,
        agent_id: &str,
        user_id: &str,
    ) -> Result<Option<ModuleInstance>> {
        let Some(instance_id) = &planned.instance_id else {
            return Ok(None);
        };
        if let Some(row) = self
            .db
            .get_instance(instance_id)
            .await
            .map_err(|e| CoreError::storage(e.to_string()))?
        {
            return Ok(Some(row.into_domain()));
        }
        Ok(Some(ModuleInstance::synthetic(
            instance_id.clone(),
            planned.module_class,
            agent_id,
            Some(user_id.to_string()),
            planned.description.clone(),
        )))
    }

    /// Keep job tools reachable even when the planner returned no JobModule
    /// instance. The synthetic instance is never persisted.
    fn ensure_job_module_loaded(
        &self,
        active: &mut Vec<ModuleInstance>,
        agent_id: &str,
        user_id: &str,
    ) {
        if active
            .iter()
            .any(|inst| inst.module_class == ModuleClass::Job)
        {
            return;
        }
        debug!("No JobModule in plan, appending synthetic instance");
        active.push(ModuleInstance::synthetic(
            format!("job_fallback_{user_id}"),
            ModuleClass::Job,
            agent_id,
            Some(user_id.to_string()),
            "Background job management",
        ));
    }

    fn ensure_always_load_modules(
        &self,
        active: &mut Vec<ModuleInstance>,
        agent_id: &str,
        user_id: &str,
    ) {
        for class in ALWAYS_LOAD_MODULES {
            if active.iter().any(|inst| inst.module_class == class) {
                continue;
            }
            active.push(ModuleInstance::synthetic(
                format!("{}_always_{user_id}", ambit_core::ids::instance_prefix(class)),
                class,
                agent_id,
                Some(user_id.to_string()),
                "Always-loaded module",
            ));
        }
    }
}

/// Summarize what the plan changed relative to the previous task set
fn diff_changes(previous: &[ModuleInstance], planned: &[PlannedInstance]) -> Value {
    let planned_ids: Vec<&str> = planned
        .iter()
        .filter_map(|p| p.instance_id.as_deref())
        .collect();
    let added: Vec<&str> = planned
        .iter()
        .filter(|p| {
            !p.is_existing
                && p.instance_id
                    .as_deref()
                    .map(|id| !previous.iter().any(|prev| prev.instance_id == id))
                    .unwrap_or(false)
        })
        .filter_map(|p| p.instance_id.as_deref())
        .collect();
    let reused: Vec<&str> = previous
        .iter()
        .filter(|prev| planned_ids.contains(&prev.instance_id.as_str()))
        .map(|prev| prev.instance_id.as_str())
        .collect();
    let suppressed: Vec<&str> = planned
        .iter()
        .filter(|p| p.similar_match)
        .filter_map(|p| p.existing_job_id.as_deref())
        .collect();

    json!({
        "added": added,
        "reused": reused,
        "suppressed_duplicates": suppressed,
    })
}
