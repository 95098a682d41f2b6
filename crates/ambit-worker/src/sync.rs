// Instance sync: turn planner output into a concrete instance graph
//
// Pure transformation first (key->id mapping, dependency resolution, cycle
// detection, initial status), then persistence (duplicate suppression, job
// materialization, social-network and narrative side effects).

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use ambit_core::error::CoreError;
use ambit_core::ids::{generate_instance_id, generate_long_id, is_valid_instance_id};
use ambit_core::llm::LlmClient;
use ambit_core::plan::{PlannedInstance, PlannedJobConfig};
use ambit_core::similarity::titles_similar;
use ambit_core::types::{
    InstanceStatus, JobType, LinkType, ModuleClass, NotificationMethod, TriggerConfig,
};
use ambit_storage::{CreateJob, CreateModuleInstance, CreateSocialEntity, Database, JobRow};

use crate::config::SyncConfig;
use crate::schedule::initial_run_time;

/// Result of one sync pass
#[derive(Debug)]
pub struct SyncOutcome {
    pub instances: Vec<PlannedInstance>,
    pub key_to_id: BTreeMap<String, String>,
    pub created_job_ids: Vec<String>,
}

#[derive(Clone)]
pub struct InstanceSync {
    db: Database,
    llm: Arc<dyn LlmClient>,
    config: SyncConfig,
}

impl InstanceSync {
    pub fn new(db: Database, llm: Arc<dyn LlmClient>, config: SyncConfig) -> Self {
        Self { db, llm, config }
    }

    /// Full pass: transform, then persist job-typed instances.
    pub async fn process(
        &self,
        mut instances: Vec<PlannedInstance>,
        agent_id: &str,
        user_id: &str,
        narrative_id: Option<&str>,
    ) -> Result<SyncOutcome, CoreError> {
        info!(count = instances.len(), "InstanceSync: processing plan");

        let key_to_id = transform_plan(&mut instances)?;

        let created_job_ids = self
            .materialize_jobs(&mut instances, agent_id, user_id, narrative_id, &key_to_id)
            .await
            .map_err(|e| CoreError::storage(e.to_string()))?;

        Ok(SyncOutcome {
            instances,
            key_to_id,
            created_job_ids,
        })
    }

    async fn materialize_jobs(
        &self,
        instances: &mut [PlannedInstance],
        agent_id: &str,
        user_id: &str,
        narrative_id: Option<&str>,
        key_to_id: &BTreeMap<String, String>,
    ) -> Result<Vec<String>> {
        let existing_jobs = match narrative_id {
            Some(nid) => self.db.get_active_jobs_by_narrative(nid, 100).await?,
            None => Vec::new(),
        };
        debug!(existing = existing_jobs.len(), "Active jobs for duplicate check");

        let mut created = Vec::new();
        let mut batch_titles: HashSet<String> = HashSet::new();
        let now = Utc::now();

        for inst in instances.iter_mut() {
            if inst.module_class != ModuleClass::Job {
                continue;
            }
            let Some(job_config) = inst.job_config.clone() else {
                warn!(task_key = %inst.task_key, "JobModule instance missing job_config, skipping");
                continue;
            };
            let instance_id = key_to_id
                .get(&inst.task_key)
                .cloned()
                .or_else(|| inst.instance_id.clone())
                .unwrap_or_else(|| generate_instance_id(ModuleClass::Job));

            // Intra-batch duplicate titles
            if !batch_titles.insert(job_config.title.clone()) {
                warn!(title = %job_config.title, "Duplicate job title within batch, skipping");
                inst.is_existing = true;
                continue;
            }

            // Semantic duplicate against the narrative's active jobs
            if let Some(similar) = self.find_similar_job(&job_config.title, &existing_jobs) {
                warn!(
                    new_title = %job_config.title,
                    existing_title = %similar.title,
                    existing_job_id = %similar.job_id,
                    "Semantically similar active job exists, suppressing"
                );
                inst.is_existing = true;
                inst.similar_match = true;
                inst.existing_job_id = Some(similar.job_id.clone());
                inst.instance_id = Some(similar.instance_id.clone());
                continue;
            }

            // An instance that already owns a job keeps it
            if let Some(existing) = self.db.get_job_by_instance(&instance_id).await? {
                warn!(
                    instance_id = %instance_id,
                    job_id = %existing.job_id,
                    "Instance already owns a job, reusing"
                );
                inst.is_existing = true;
                inst.existing_job_id = Some(existing.job_id.clone());
                created.push(existing.job_id);
                continue;
            }

            let has_deps = !inst.dependencies.is_empty();
            let (job_type, trigger) = match derive_trigger(&job_config, now) {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(task_key = %inst.task_key, error = %e, "Bad job config, skipping");
                    continue;
                }
            };
            let next_run = if inst.status == InstanceStatus::Blocked {
                None
            } else {
                initial_run_time(&trigger, has_deps, now)
            };

            let embedding = self
                .embed_job(&job_config.title, &inst.description, &job_config.payload)
                .await;

            let mut create_instance =
                CreateModuleInstance::new(&instance_id, ModuleClass::Job, agent_id);
            create_instance.user_id = Some(user_id.to_string());
            create_instance.status = inst.status;
            create_instance.description = inst.description.clone();
            create_instance.dependencies = inst.dependencies.clone();
            create_instance.keywords =
                vec!["job".into(), "task".into(), job_type.as_str().into()];
            create_instance.topic_hint = Some(job_config.title.clone());
            create_instance.state = json!({ "job_type": job_type.as_str(), "progress": [] });
            create_instance.routing_embedding = embedding.clone();

            let job_id = generate_long_id("job");
            let job = CreateJob {
                job_id: job_id.clone(),
                instance_id: instance_id.clone(),
                agent_id: agent_id.to_string(),
                user_id: user_id.to_string(),
                job_type,
                title: job_config.title.clone(),
                description: inst.description.clone(),
                payload: job_config.payload.clone(),
                trigger_config: trigger,
                next_run_time: next_run,
                related_entity_id: job_config.related_entity_id.clone(),
                narrative_id: narrative_id.map(String::from),
                notification_method: NotificationMethod::Inbox,
                embedding,
            };

            match self
                .db
                .create_job_with_instance(create_instance, job, narrative_id)
                .await
            {
                Ok(row) => {
                    info!(
                        job_id = %row.job_id,
                        instance_id = %instance_id,
                        title = %job_config.title,
                        job_type = %job_type,
                        "Created job"
                    );
                    inst.instance_id = Some(instance_id.clone());
                    created.push(row.job_id.clone());

                    if let Some(entity_id) = &job_config.related_entity_id {
                        // Best-effort side effects; a failure here never
                        // fails job creation
                        if let Err(e) = self
                            .sync_job_to_entity(&row.job_id, entity_id, agent_id)
                            .await
                        {
                            warn!(entity_id = %entity_id, error = %e, "Failed to sync job to entity");
                        }
                        if let Some(nid) = narrative_id {
                            if entity_id != user_id {
                                if let Err(e) =
                                    self.add_participant_to_narrative(nid, entity_id).await
                                {
                                    warn!(narrative_id = %nid, error = %e, "Failed to add participant");
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(title = %job_config.title, error = %e, "Failed to create job");
                }
            }
        }

        Ok(created)
    }

    fn find_similar_job<'a>(&self, title: &str, existing: &'a [JobRow]) -> Option<&'a JobRow> {
        existing.iter().find(|job| {
            let hit = titles_similar(title, &job.title, self.config.duplicate_title_threshold);
            if hit {
                debug!(
                    new_title = %title,
                    existing_title = %job.title,
                    containment = ambit_core::similarity::containment_match(title, &job.title),
                    jaccard = ambit_core::similarity::bigram_jaccard(title, &job.title),
                    "Duplicate title signals"
                );
            }
            hit
        })
    }

    async fn embed_job(
        &self,
        title: &str,
        description: &str,
        payload: &str,
    ) -> Option<Vec<f32>> {
        let text = format!("{title}\n{description}\n{payload}");
        match self.llm.embed(&text).await {
            Ok(vec) => Some(vec),
            Err(e) => {
                warn!(error = %e, "Job embedding failed, storing without one");
                None
            }
        }
    }

    /// Append the job to the target entity's related_job_ids, auto-creating
    /// the SocialNetworkModule instance and the entity when missing.
    async fn sync_job_to_entity(
        &self,
        job_id: &str,
        entity_id: &str,
        agent_id: &str,
    ) -> Result<()> {
        let social_instance_id = match self
            .db
            .get_instances_by_agent(agent_id, Some(ModuleClass::SocialNetwork), None)
            .await?
            .into_iter()
            .next()
        {
            Some(row) => row.instance_id,
            None => {
                info!(agent_id = %agent_id, "Auto-creating SocialNetworkModule instance");
                let mut input = CreateModuleInstance::new(
                    generate_instance_id(ModuleClass::SocialNetwork),
                    ModuleClass::SocialNetwork,
                    agent_id,
                );
                input.is_public = true;
                input.description = "Social network entities and relationships".into();
                input.keywords =
                    vec!["social".into(), "network".into(), "entity".into()];
                input.topic_hint = Some("Social network management".into());
                self.db.create_instance(input).await?.instance_id
            }
        };

        if self
            .db
            .get_social_entity(&social_instance_id, entity_id)
            .await?
            .is_none()
        {
            info!(entity_id = %entity_id, "Auto-creating social entity for job target");
            self.db
                .create_social_entity(CreateSocialEntity {
                    entity_id: entity_id.to_string(),
                    instance_id: social_instance_id.clone(),
                    entity_name: entity_id.to_string(),
                    entity_description: Some(format!("Auto-created entity for {entity_id}")),
                    entity_type: "user".to_string(),
                    tags: vec!["auto-created".into(), "job-target".into()],
                })
                .await?;
        }

        self.db
            .append_entity_related_jobs(&social_instance_id, entity_id, &[job_id.to_string()])
            .await?;
        Ok(())
    }

    /// Add the target entity as a participant actor (idempotent)
    async fn add_participant_to_narrative(
        &self,
        narrative_id: &str,
        participant_id: &str,
    ) -> Result<()> {
        let Some(narrative) = self.db.get_narrative(narrative_id).await? else {
            warn!(narrative_id = %narrative_id, "Narrative not found, skipping participant add");
            return Ok(());
        };
        let mut info = narrative.info();
        if info.add_participant(participant_id) {
            self.db.save_narrative_info(narrative_id, &info).await?;
            info!(
                narrative_id = %narrative_id,
                participant = %participant_id,
                "Added participant to narrative"
            );
        }
        Ok(())
    }

    /// Ensure newly-created non-job instances are linked to the narrative
    pub async fn link_plan_instances(
        &self,
        instances: &[PlannedInstance],
        narrative_id: &str,
    ) -> Result<()> {
        for inst in instances {
            if inst.module_class == ModuleClass::Job {
                continue; // linked transactionally at creation
            }
            if let Some(id) = &inst.instance_id {
                self.db
                    .link_instance_to_narrative(id, narrative_id, LinkType::Active)
                    .await?;
            }
        }
        Ok(())
    }
}

// ============================================================
// Pure transformation
// ============================================================

/// First half of the sync pass: id mapping, dependency resolution, cycle
/// detection and initial status. Mutates the plan in place and returns the
/// task_key -> instance_id map.
pub fn transform_plan(
    instances: &mut [PlannedInstance],
) -> Result<BTreeMap<String, String>, CoreError> {
    let key_to_id = build_key_to_id(instances);

    for inst in instances.iter_mut() {
        let needs_id = match &inst.instance_id {
            None => true,
            Some(id) => id == &inst.task_key || !is_valid_instance_id(id),
        };
        if needs_id {
            inst.instance_id = key_to_id.get(&inst.task_key).cloned();
        }
        if !inst.depends_on.is_empty() {
            inst.dependencies = resolve_dependencies(&inst.depends_on, &key_to_id);
            debug!(
                task_key = %inst.task_key,
                depends_on = ?inst.depends_on,
                dependencies = ?inst.dependencies,
                "Resolved dependencies"
            );
        }
    }

    detect_cycles(instances)?;
    set_initial_status(instances);
    Ok(key_to_id)
}

/// Keep well-formed ids the planner echoed back; allocate fresh ones
/// otherwise.
fn build_key_to_id(instances: &[PlannedInstance]) -> BTreeMap<String, String> {
    let mut key_to_id = BTreeMap::new();
    for inst in instances {
        let id = match &inst.instance_id {
            Some(id) if is_valid_instance_id(id) => id.clone(),
            _ => generate_instance_id(inst.module_class),
        };
        key_to_id.insert(inst.task_key.clone(), id);
    }
    key_to_id
}

/// Unresolved task keys warn but do not fail the plan
fn resolve_dependencies(
    depends_on: &[String],
    key_to_id: &BTreeMap<String, String>,
) -> Vec<String> {
    let mut dependencies = Vec::with_capacity(depends_on.len());
    for task_key in depends_on {
        match key_to_id.get(task_key) {
            Some(id) => dependencies.push(id.clone()),
            None => warn!(task_key = %task_key, "Dependent task_key not found in plan"),
        }
    }
    dependencies
}

/// DFS with a recursion stack; any back-edge fails the plan with the full
/// cycle path.
fn detect_cycles(instances: &[PlannedInstance]) -> Result<(), CoreError> {
    let graph: BTreeMap<&str, &[String]> = instances
        .iter()
        .map(|inst| (inst.task_key.as_str(), inst.depends_on.as_slice()))
        .collect();

    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = Vec::new();
    let mut on_stack: HashSet<&str> = HashSet::new();

    fn dfs<'a>(
        node: &'a str,
        graph: &BTreeMap<&'a str, &'a [String]>,
        visited: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a str>,
        on_stack: &mut HashSet<&'a str>,
    ) -> Option<Vec<String>> {
        if on_stack.contains(node) {
            let start = stack.iter().position(|n| *n == node).unwrap_or(0);
            let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
            cycle.push(node.to_string());
            return Some(cycle);
        }
        if visited.contains(node) {
            return None;
        }
        visited.insert(node);
        on_stack.insert(node);
        stack.push(node);

        if let Some(deps) = graph.get(node) {
            for dep in deps.iter() {
                if graph.contains_key(dep.as_str()) {
                    if let Some(cycle) = dfs(dep.as_str(), graph, visited, stack, on_stack) {
                        return Some(cycle);
                    }
                }
            }
        }

        stack.pop();
        on_stack.remove(node);
        None
    }

    for node in graph.keys() {
        if !visited.contains(node) {
            if let Some(cycle) = dfs(node, &graph, &mut visited, &mut stack, &mut on_stack) {
                return Err(CoreError::CircularDependency(cycle.join(" → ")));
            }
        }
    }
    Ok(())
}

/// Only JobModule instances can be blocked. Capability modules drop their
/// depends_on entirely. A job is blocked only when a dependency is part of
/// the current batch; dependencies outside the batch are treated as
/// already-completed history.
fn set_initial_status(instances: &mut [PlannedInstance]) {
    let batch_keys: HashSet<String> =
        instances.iter().map(|inst| inst.task_key.clone()).collect();

    for inst in instances.iter_mut() {
        if inst.module_class != ModuleClass::Job {
            if !inst.depends_on.is_empty() {
                debug!(task_key = %inst.task_key, "Capability module, clearing depends_on");
                inst.depends_on.clear();
                inst.dependencies.clear();
            }
            if inst.status == InstanceStatus::Blocked {
                inst.status = InstanceStatus::Active;
            }
            continue;
        }

        if inst.depends_on.is_empty() {
            if inst.status == InstanceStatus::Blocked {
                inst.status = InstanceStatus::Active;
            }
        } else if inst.depends_on.iter().any(|dep| batch_keys.contains(dep)) {
            inst.status = InstanceStatus::Blocked;
        } else if inst.status == InstanceStatus::Blocked {
            inst.status = InstanceStatus::Active;
        }
    }
}

/// Derive the job type and trigger config from planner output.
/// end_condition + interval ⇒ ongoing; cron or interval alone ⇒ scheduled;
/// scheduled_at ⇒ one-off at that instant; otherwise one-off now.
pub fn derive_trigger(
    config: &PlannedJobConfig,
    now: chrono::DateTime<Utc>,
) -> Result<(JobType, TriggerConfig), String> {
    if let (Some(interval), Some(end_condition)) =
        (config.interval_seconds, config.end_condition.as_ref())
    {
        let trigger = TriggerConfig::Ongoing {
            interval_seconds: interval,
            end_condition: Some(end_condition.clone()),
            max_iterations: config.max_iterations,
        };
        trigger.validate()?;
        return Ok((JobType::Ongoing, trigger));
    }
    if config.end_condition.is_some() && config.interval_seconds.is_none() {
        return Err("end_condition requires interval_seconds".into());
    }
    if let Some(cron) = &config.cron {
        let trigger = TriggerConfig::Scheduled {
            cron: Some(cron.clone()),
            interval_seconds: None,
        };
        trigger.validate()?;
        return Ok((JobType::Scheduled, trigger));
    }
    if let Some(interval) = config.interval_seconds {
        let trigger = TriggerConfig::Scheduled {
            cron: None,
            interval_seconds: Some(interval),
        };
        trigger.validate()?;
        return Ok((JobType::Scheduled, trigger));
    }
    if let Some(scheduled_at) = &config.scheduled_at {
        let run_at = chrono::DateTime::parse_from_rfc3339(scheduled_at)
            .map_err(|e| format!("invalid scheduled_at {scheduled_at:?}: {e}"))?
            .with_timezone(&Utc);
        return Ok((JobType::OneOff, TriggerConfig::OneOff { run_at }));
    }
    Ok((JobType::OneOff, TriggerConfig::OneOff { run_at: now }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn planned(task_key: &str, class: ModuleClass, depends_on: &[&str]) -> PlannedInstance {
        PlannedInstance {
            task_key: task_key.into(),
            instance_id: None,
            module_class: class,
            description: format!("{task_key} description"),
            status: InstanceStatus::Active,
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            dependencies: Vec::new(),
            job_config: Some(PlannedJobConfig {
                title: task_key.into(),
                payload: "do it".into(),
                ..Default::default()
            }),
            is_existing: false,
            similar_match: false,
            existing_job_id: None,
        }
    }

    #[test]
    fn dependent_batch_gets_expected_statuses() {
        let mut plan = vec![
            planned("fetch_data", ModuleClass::Job, &[]),
            planned("analyse", ModuleClass::Job, &["fetch_data"]),
            planned("notify", ModuleClass::Job, &["analyse"]),
        ];
        let key_to_id = transform_plan(&mut plan).unwrap();

        assert_eq!(plan[0].status, InstanceStatus::Active);
        assert_eq!(plan[1].status, InstanceStatus::Blocked);
        assert_eq!(plan[2].status, InstanceStatus::Blocked);
        assert_eq!(
            plan[1].dependencies,
            vec![key_to_id["fetch_data"].clone()]
        );
        assert!(key_to_id.values().all(|id| is_valid_instance_id(id)));
    }

    #[test]
    fn cycle_fails_with_full_path() {
        let mut plan = vec![
            planned("a", ModuleClass::Job, &["b"]),
            planned("b", ModuleClass::Job, &["a"]),
        ];
        let err = transform_plan(&mut plan).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Circular dependency"));
        assert!(message.contains("a") && message.contains("b"));
    }

    #[test]
    fn capability_modules_ignore_dependencies() {
        let mut plan = vec![
            planned("fetch", ModuleClass::Job, &[]),
            {
                let mut chat = planned("main_chat", ModuleClass::Chat, &["fetch"]);
                chat.status = InstanceStatus::Blocked;
                chat.job_config = None;
                chat
            },
        ];
        transform_plan(&mut plan).unwrap();
        assert!(plan[1].depends_on.is_empty());
        assert_eq!(plan[1].status, InstanceStatus::Active);
    }

    #[test]
    fn deps_outside_batch_count_as_history() {
        let mut plan = vec![{
            let mut job = planned("followup", ModuleClass::Job, &["job_12ab34cd"]);
            job.status = InstanceStatus::Blocked;
            job
        }];
        transform_plan(&mut plan).unwrap();
        assert_eq!(plan[0].status, InstanceStatus::Active);
    }

    #[test]
    fn unresolved_dependency_warns_but_does_not_fail() {
        let mut plan = vec![planned("analyse", ModuleClass::Job, &["missing_key"])];
        transform_plan(&mut plan).unwrap();
        assert!(plan[0].dependencies.is_empty());
    }

    #[test]
    fn well_formed_planner_ids_are_kept() {
        let mut plan = vec![{
            let mut job = planned("reuse", ModuleClass::Job, &[]);
            job.instance_id = Some("job_fe7382f7".into());
            job
        }];
        let key_to_id = transform_plan(&mut plan).unwrap();
        assert_eq!(key_to_id["reuse"], "job_fe7382f7");
        assert_eq!(plan[0].instance_id.as_deref(), Some("job_fe7382f7"));
    }

    #[test]
    fn trigger_derivation_precedence() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();

        let ongoing = PlannedJobConfig {
            title: "t".into(),
            payload: "p".into(),
            interval_seconds: Some(86400),
            end_condition: Some("order placed".into()),
            ..Default::default()
        };
        assert_eq!(derive_trigger(&ongoing, now).unwrap().0, JobType::Ongoing);

        let cron = PlannedJobConfig {
            title: "t".into(),
            payload: "p".into(),
            cron: Some("0 9 * * *".into()),
            ..Default::default()
        };
        assert_eq!(derive_trigger(&cron, now).unwrap().0, JobType::Scheduled);

        let interval = PlannedJobConfig {
            title: "t".into(),
            payload: "p".into(),
            interval_seconds: Some(600),
            ..Default::default()
        };
        assert_eq!(derive_trigger(&interval, now).unwrap().0, JobType::Scheduled);

        let one_off = PlannedJobConfig {
            title: "t".into(),
            payload: "p".into(),
            scheduled_at: Some("2026-03-11T09:00:00Z".into()),
            ..Default::default()
        };
        let (job_type, trigger) = derive_trigger(&one_off, now).unwrap();
        assert_eq!(job_type, JobType::OneOff);
        assert_eq!(
            trigger,
            TriggerConfig::OneOff {
                run_at: Utc.with_ymd_and_hms(2026, 3, 11, 9, 0, 0).unwrap()
            }
        );

        let immediate = PlannedJobConfig {
            title: "t".into(),
            payload: "p".into(),
            ..Default::default()
        };
        let (job_type, trigger) = derive_trigger(&immediate, now).unwrap();
        assert_eq!(job_type, JobType::OneOff);
        assert_eq!(trigger, TriggerConfig::OneOff { run_at: now });

        let bad = PlannedJobConfig {
            title: "t".into(),
            payload: "p".into(),
            end_condition: Some("done".into()),
            ..Default::default()
        };
        assert!(derive_trigger(&bad, now).is_err());
    }
}
