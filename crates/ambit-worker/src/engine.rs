// Background job engine (worker pool)
//
// One poller task discovers due jobs and enqueues them; N workers claim and
// execute. The atomic claim (`status IN ('pending','active') -> 'running'`)
// is what guarantees a job runs exactly once across workers and processes.
// Startup recovery resets orphaned `running` jobs from a dead process.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, info, warn};

use ambit_core::protocol::StreamMessage;
use ambit_core::timefmt::{format_in_timezone, resolve_timezone};
use ambit_core::types::{InboxMessageType, InstanceStatus, JobStatus, JobType, WorkingSource};
use ambit_storage::{CreateInboxMessage, Database, JobRow, ModuleInstanceRow};

use crate::config::JobEngineConfig;
use crate::prompts::{
    build_job_prompt, DependencyContext, EntityContext, JobPromptInputs,
};
use crate::runtime::{AgentRuntime, RunParams};
use crate::schedule::next_run_time;

const SHUTDOWN_DRAIN: Duration = Duration::from_secs(30);

pub struct JobEngine {
    db: Database,
    runtime: AgentRuntime,
    config: JobEngineConfig,
    in_flight: Arc<Mutex<HashSet<String>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl JobEngine {
    pub fn new(db: Database, runtime: AgentRuntime, config: JobEngineConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            db,
            runtime,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            shutdown_tx,
            shutdown_rx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Start the poller and the worker pool. Returns once everything is
    /// spawned; the tasks run until `stop`.
    pub async fn start(self: Arc<Self>) -> anyhow::Result<()> {
        info!(
            poll_interval = ?self.config.poll_interval,
            max_workers = self.config.max_workers,
            timeout_minutes = self.config.job_timeout_minutes,
            "JobEngine starting"
        );

        // A previous process was killed mid-execution; those jobs are orphaned
        let recovered = self.db.recover_all_running_jobs().await?;
        if recovered > 0 {
            warn!(recovered, "Startup recovery: reset orphaned running jobs");
        }

        let (queue_tx, queue_rx) = mpsc::channel::<JobRow>(self.config.max_workers * 4);
        let queue_rx = Arc::new(Mutex::new(queue_rx));

        let mut handles = self.handles.lock().await;
        for worker_id in 0..self.config.max_workers {
            let engine = Arc::clone(&self);
            let queue_rx = Arc::clone(&queue_rx);
            let mut shutdown = self.shutdown_rx.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = queue_rx.lock().await;
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            job = rx.recv() => job,
                        }
                    };
                    let Some(job) = job else { break };
                    let job_id = job.job_id.clone();
                    debug!(worker_id, job_id = %job_id, "Worker picked up job");
                    // One poisoned job never kills the worker loop
                    if let Err(e) = engine.execute_job(job).await {
                        error!(worker_id, job_id = %job_id, error = %e, "Job execution error");
                    }
                    engine.in_flight.lock().await.remove(&job_id);
                }
                debug!(worker_id, "Worker stopped");
            }));
        }

        let engine = Arc::clone(&self);
        let mut shutdown = self.shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = engine.poll_once(&queue_tx) => {}
                }
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = sleep(engine.config.poll_interval) => {}
                }
            }
            debug!("Job poller stopped");
        }));

        Ok(())
    }

    /// Graceful shutdown: stop enqueuing, wait for in-flight work up to the
    /// drain window, then cancel.
    pub async fn stop(&self) {
        info!("JobEngine stopping");
        let _ = self.shutdown_tx.send(true);

        let drained = timeout(SHUTDOWN_DRAIN, async {
            loop {
                if self.in_flight.lock().await.is_empty() {
                    break;
                }
                sleep(Duration::from_millis(200)).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!("Timeout waiting for job queue to drain, forcing shutdown");
        }

        for handle in self.handles.lock().await.drain(..) {
            handle.abort();
        }
        info!("JobEngine stopped");
    }

    /// One polling cycle: recover stuck jobs, then enqueue due jobs that
    /// are not already in flight.
    async fn poll_once(&self, queue_tx: &mpsc::Sender<JobRow>) {
        match self
            .db
            .recover_stuck_jobs(self.config.job_timeout_minutes)
            .await
        {
            Ok(0) => {}
            Ok(recovered) => info!(recovered, "Recovered stuck running jobs"),
            Err(e) => error!(error = %e, "Stuck-job recovery failed"),
        }

        let due = match self.db.get_due_jobs().await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "Due-job query failed");
                return;
            }
        };
        if due.is_empty() {
            return;
        }

        let mut enqueued = 0usize;
        for job in due {
            {
                let mut in_flight = self.in_flight.lock().await;
                if !in_flight.insert(job.job_id.clone()) {
                    debug!(job_id = %job.job_id, "Job already in flight, skipped");
                    continue;
                }
            }
            let job_id = job.job_id.clone();
            if queue_tx.send(job).await.is_err() {
                self.in_flight.lock().await.remove(&job_id);
                return;
            }
            enqueued += 1;
        }
        if enqueued > 0 {
            info!(enqueued, "Enqueued due jobs");
        }
    }

    /// Execute one job end to end
    async fn execute_job(&self, job: JobRow) -> anyhow::Result<()> {
        info!(job_id = %job.job_id, title = %job.title, "Executing job");

        // Atomic claim; losing the race is a non-event
        if !self.db.try_acquire_job(&job.job_id).await? {
            warn!(job_id = %job.job_id, "Failed to acquire claim, skipping");
            return Ok(());
        }

        self.db.mark_instance_for_execution(&job.instance_id).await?;

        let result = self.run_job(&job).await;
        match result {
            Ok((event_id, content, tool_names)) => {
                self.write_result_to_inbox(&job, &content, Some(&event_id))
                    .await;
                let _ = self.db.append_job_process(&job.job_id, &event_id).await;
                self.finalize(&job, &tool_names).await?;
                info!(job_id = %job.job_id, "Job executed");
            }
            Err(e) => {
                self.handle_failure(&job, &e.to_string()).await;
            }
        }
        Ok(())
    }

    /// Drive the agent for one job run. Returns (event_id, user-facing
    /// content, tool names).
    async fn run_job(&self, job: &JobRow) -> anyhow::Result<(String, String, Vec<String>)> {
        let prompt = self.build_prompt(job).await?;
        debug!(job_id = %job.job_id, prompt_len = prompt.len(), "Built execution prompt");

        // The job executes under the target user's identity; authority stays
        // with the creator
        let execution_user_id = job
            .related_entity_id
            .clone()
            .unwrap_or_else(|| job.user_id.clone());

        let (tx, mut rx) = mpsc::channel::<StreamMessage>(64);
        let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let outcome = self
            .runtime
            .run(
                RunParams {
                    agent_id: job.agent_id.clone(),
                    user_id: execution_user_id,
                    input_content: prompt,
                    working_source: WorkingSource::Job,
                    forced_narrative_id: job.narrative_id.clone(),
                },
                tx,
            )
            .await;
        drain.abort();
        let outcome = outcome?;

        let content = if outcome.final_output.trim().is_empty() {
            self.empty_output_fallback(job, &outcome.tool_names).await
        } else {
            outcome.final_output.clone()
        };
        Ok((outcome.event_id, content, outcome.tool_names))
    }

    async fn empty_output_fallback(&self, job: &JobRow, tool_names: &[String]) -> String {
        let tz = resolve_timezone(Some(&self.db.get_user_timezone(&job.user_id).await));
        let executed_at = format_in_timezone(Utc::now(), tz);
        let tools = if tool_names.is_empty() {
            "None".to_string()
        } else {
            tool_names.join(", ")
        };
        format!(
            "## Task Completed: {}\n\n\
             The task was executed but produced no text output.\n\n\
             **Execution Details:**\n\
             - Job ID: {}\n\
             - Executed at: {}\n\
             - Tools used: {}\n",
            job.title, job.job_id, executed_at, tools
        )
    }

    async fn write_result_to_inbox(&self, job: &JobRow, content: &str, event_id: Option<&str>) {
        let tz = resolve_timezone(Some(&self.db.get_user_timezone(&job.user_id).await));
        let title = format!("{} - {}", job.title, format_in_timezone(Utc::now(), tz));
        if let Err(e) = self
            .db
            .create_inbox_message(CreateInboxMessage {
                user_id: job.user_id.clone(),
                title,
                content: content.to_string(),
                message_type: InboxMessageType::JobResult,
                source_type: "job".to_string(),
                source_id: job.job_id.clone(),
                event_id: event_id.map(String::from),
            })
            .await
        {
            error!(job_id = %job.job_id, error = %e, "Failed to write inbox message");
        }
    }

    /// Post-run bookkeeping. The interpretation hook ran inside the agent
    /// turn and owns status/next_run_time when it succeeded; the mechanical
    /// update here is the fallback for a job still stuck at `running`.
    async fn finalize(&self, job: &JobRow, _tool_names: &[String]) -> anyhow::Result<()> {
        let now = Utc::now();
        let new_iteration = job.iteration_count + 1;

        let current = self
            .db
            .get_job(&job.job_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("job vanished mid-run"))?;
        let current_status = current.status();

        match job.job_type() {
            JobType::OneOff => {
                if !current_status.is_terminal() {
                    self.db
                        .finalize_job_run(
                            &job.job_id,
                            JobStatus::Completed,
                            None,
                            now,
                            new_iteration,
                            None,
                        )
                        .await?;
                } else {
                    self.db
                        .record_job_run(&job.job_id, now, new_iteration)
                        .await?;
                }
                let status = if current_status == JobStatus::Failed {
                    InstanceStatus::Failed
                } else {
                    InstanceStatus::Completed
                };
                self.db.mark_instance_terminal(&job.instance_id, status).await?;
            }

            JobType::Scheduled => {
                if current_status == JobStatus::Running {
                    // Hook failed or abstained; mechanical reschedule from now
                    let next = current.trigger().and_then(|t| next_run_time(&t, now));
                    warn!(job_id = %job.job_id, "Status still running after hook, mechanical reschedule");
                    self.db
                        .finalize_job_run(
                            &job.job_id,
                            JobStatus::Active,
                            next,
                            now,
                            new_iteration,
                            None,
                        )
                        .await?;
                } else {
                    self.db
                        .record_job_run(&job.job_id, now, new_iteration)
                        .await?;
                }
                if current_status.is_terminal() {
                    self.db
                        .mark_instance_terminal(&job.instance_id, InstanceStatus::Completed)
                        .await?;
                }
            }

            JobType::Ongoing => {
                let max_iterations = match current.trigger() {
                    Some(ambit_core::types::TriggerConfig::Ongoing {
                        max_iterations, ..
                    }) => max_iterations,
                    _ => None,
                };
                if max_iterations.is_some_and(|cap| new_iteration >= cap) {
                    info!(
                        job_id = %job.job_id,
                        iterations = new_iteration,
                        "Iteration cap reached, completing ongoing job"
                    );
                    self.db
                        .finalize_job_run(
                            &job.job_id,
                            JobStatus::Completed,
                            None,
                            now,
                            new_iteration,
                            None,
                        )
                        .await?;
                    self.db
                        .mark_instance_terminal(&job.instance_id, InstanceStatus::Completed)
                        .await?;
                } else if current_status == JobStatus::Running {
                    let next = current.trigger().and_then(|t| next_run_time(&t, now));
                    warn!(job_id = %job.job_id, "Status still running after hook, mechanical reschedule");
                    self.db
                        .finalize_job_run(
                            &job.job_id,
                            JobStatus::Active,
                            next,
                            now,
                            new_iteration,
                            None,
                        )
                        .await?;
                } else {
                    // Hook already decided; keep its status and schedule
                    self.db
                        .record_job_run(&job.job_id, now, new_iteration)
                        .await?;
                    if current_status.is_terminal() {
                        let status = if current_status == JobStatus::Failed {
                            InstanceStatus::Failed
                        } else {
                            InstanceStatus::Completed
                        };
                        self.db
                            .mark_instance_terminal(&job.instance_id, status)
                            .await?;
                    }
                }
            }
        }

        Ok(())
    }

    async fn handle_failure(&self, job: &JobRow, error_text: &str) {
        warn!(job_id = %job.job_id, error = %error_text, "Job failed");
        if let Err(e) = self
            .db
            .update_job_status(&job.job_id, JobStatus::Failed, Some(error_text))
            .await
        {
            error!(job_id = %job.job_id, error = %e, "Failed to mark job failed");
        }
        if let Err(e) = self
            .db
            .mark_instance_terminal(&job.instance_id, InstanceStatus::Failed)
            .await
        {
            error!(instance_id = %job.instance_id, error = %e, "Failed to mark instance failed");
        }

        let tz = resolve_timezone(Some(&self.db.get_user_timezone(&job.user_id).await));
        let content = format!(
            "## Job Execution Failed\n\n\
             **Job:** {}\n**Job ID:** {}\n**Error:** {}\n**Time:** {}\n\n\
             Please check the job configuration and try again.\n",
            job.title,
            job.job_id,
            error_text,
            format_in_timezone(Utc::now(), tz)
        );
        if let Err(e) = self
            .db
            .create_inbox_message(CreateInboxMessage {
                user_id: job.user_id.clone(),
                title: format!("Job Failed: {}", job.title),
                content,
                message_type: InboxMessageType::JobResult,
                source_type: "job".to_string(),
                source_id: job.job_id.clone(),
                event_id: None,
            })
            .await
        {
            error!(job_id = %job.job_id, error = %e, "Failed to write failure notification");
        }
    }

    // ========================================================
    // Prompt context loading
    // ========================================================

    async fn build_prompt(&self, job: &JobRow) -> anyhow::Result<String> {
        let tz = resolve_timezone(Some(&self.db.get_user_timezone(&job.user_id).await));
        let execution_user_id = job
            .related_entity_id
            .clone()
            .unwrap_or_else(|| job.user_id.clone());

        let entities = match &job.related_entity_id {
            Some(entity_id) => self.load_entity_context(&job.agent_id, entity_id).await,
            None => Vec::new(),
        };
        let narrative_summary = match &job.narrative_id {
            Some(narrative_id) => self.load_narrative_summary(narrative_id).await,
            None => String::new(),
        };
        let dependencies = self.load_dependency_outputs(&job.instance_id).await;

        Ok(build_job_prompt(&JobPromptInputs {
            title: job.title.clone(),
            description: job.description.clone(),
            created_str: format_in_timezone(job.created_at, tz),
            now_str: format_in_timezone(Utc::now(), tz),
            execution_user_id,
            requester_user_id: job.user_id.clone(),
            entities,
            narrative_summary,
            dependencies,
            payload: job.payload.clone(),
        }))
    }

    async fn load_entity_context(&self, agent_id: &str, entity_id: &str) -> Vec<EntityContext> {
        let instances = match self
            .db
            .get_instances_by_agent(
                agent_id,
                Some(ambit_core::types::ModuleClass::SocialNetwork),
                None,
            )
            .await
        {
            Ok(instances) => instances,
            Err(e) => {
                warn!(error = %e, "Failed to locate social-network instance");
                return Vec::new();
            }
        };
        let Some(instance) = instances.first() else {
            return Vec::new();
        };

        match self
            .db
            .get_social_entity(&instance.instance_id, entity_id)
            .await
        {
            Ok(Some(entity)) => {
                let persona = entity.persona.clone().or_else(|| {
                    entity
                        .identity_info
                        .get("persona")
                        .and_then(|v| v.as_str())
                        .map(String::from)
                });
                vec![EntityContext {
                    name: entity.entity_name.clone(),
                    entity_type: entity.entity_type.clone(),
                    description: entity.entity_description.clone().unwrap_or_default(),
                    tags: entity.tag_list(),
                    persona,
                }]
            }
            Ok(None) => {
                warn!(entity_id = %entity_id, "Related entity not found");
                Vec::new()
            }
            Err(e) => {
                warn!(entity_id = %entity_id, error = %e, "Failed to load related entity");
                Vec::new()
            }
        }
    }

    async fn load_narrative_summary(&self, narrative_id: &str) -> String {
        match self.db.get_narrative(narrative_id).await {
            Ok(Some(narrative)) => narrative.info().current_summary,
            Ok(None) => {
                warn!(narrative_id = %narrative_id, "Job narrative not found");
                String::new()
            }
            Err(e) => {
                warn!(narrative_id = %narrative_id, error = %e, "Failed to load narrative");
                String::new()
            }
        }
    }

    /// Latest final_output of each dependency's most recent event
    async fn load_dependency_outputs(&self, instance_id: &str) -> Vec<DependencyContext> {
        let instance: Option<ModuleInstanceRow> =
            match self.db.get_instance(instance_id).await {
                Ok(instance) => instance,
                Err(e) => {
                    warn!(error = %e, "Failed to load instance for dependencies");
                    return Vec::new();
                }
            };
        let Some(instance) = instance else {
            return Vec::new();
        };
        let dep_ids = instance.into_domain().dependencies;
        if dep_ids.is_empty() {
            return Vec::new();
        }

        let mut outputs = Vec::with_capacity(dep_ids.len());
        for dep_id in &dep_ids {
            let (title, status, event_ids) = match self.db.get_job_by_instance(dep_id).await {
                Ok(Some(dep_job)) => {
                    let status = match self.db.get_instance(dep_id).await {
                        Ok(Some(row)) => row.status,
                        _ => dep_job.status.clone(),
                    };
                    (dep_job.title.clone(), status, dep_job.process_notes())
                }
                Ok(None) => {
                    warn!(dep_id = %dep_id, "Dependency job not found");
                    continue;
                }
                Err(e) => {
                    outputs.push(DependencyContext {
                        instance_id: dep_id.clone(),
                        title: dep_id.clone(),
                        status: "error".into(),
                        output: format!("[Failed to get output: {e}]"),
                    });
                    continue;
                }
            };

            let mut output = String::new();
            if let Some(event_id) = event_ids.iter().rev().find(|id| id.starts_with("event_")) {
                if let Ok(Some(event)) = self.db.get_event(event_id).await {
                    output = event.final_output.unwrap_or_default();
                }
            }
            outputs.push(DependencyContext {
                instance_id: dep_id.clone(),
                title,
                status,
                output,
            });
        }
        outputs
    }
}
