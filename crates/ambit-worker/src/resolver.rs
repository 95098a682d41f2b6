// Dependency resolution on instance completion
//
// Given a terminal instance, find the narrative's blocked instances whose
// dependencies are now all terminal and flip them to active. Job-typed
// activations also make the controlling job immediately due; the job engine
// picks them up on its next poll (the poller never executes anything
// itself).

use anyhow::Result;
use std::collections::HashMap;
use tracing::{debug, info};

use ambit_core::types::{InstanceStatus, ModuleClass, ModuleInstance};
use ambit_storage::Database;

#[derive(Clone)]
pub struct DependencyResolver {
    db: Database,
}

impl DependencyResolver {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Resolve dependents of a completed instance. Returns the ids of the
    /// instances that became active.
    pub async fn handle_completion(
        &self,
        narrative_id: &str,
        completed_instance_id: &str,
        new_status: InstanceStatus,
    ) -> Result<Vec<String>> {
        debug!(
            narrative_id = %narrative_id,
            instance_id = %completed_instance_id,
            status = %new_status,
            "Resolving dependents"
        );

        let blocked: Vec<ModuleInstance> = self
            .db
            .get_blocked_instances(narrative_id)
            .await?
            .into_iter()
            .map(|row| row.into_domain())
            .collect();
        if blocked.is_empty() {
            return Ok(Vec::new());
        }

        // One batch read of every dependency the blocked set references
        let mut dep_ids: Vec<String> = blocked
            .iter()
            .flat_map(|inst| inst.dependencies.iter().cloned())
            .collect();
        dep_ids.sort();
        dep_ids.dedup();
        let dep_rows = self.db.get_instances_by_ids(&dep_ids).await?;
        let dep_status: HashMap<String, InstanceStatus> = dep_ids
            .iter()
            .cloned()
            .zip(dep_rows.into_iter().map(|row| {
                row.map(|r| r.into_domain().status)
                    .unwrap_or(InstanceStatus::Cancelled)
            }))
            .collect();

        let eligible = eligible_instances(&blocked, completed_instance_id, &dep_status);

        let mut activated = Vec::with_capacity(eligible.len());
        for inst in eligible {
            self.db
                .update_instance_status(&inst.instance_id, InstanceStatus::Active)
                .await?;
            if inst.module_class == ModuleClass::Job {
                self.db.set_job_due_now(&inst.instance_id).await?;
            }
            info!(
                instance_id = %inst.instance_id,
                module = %inst.module_class,
                "Activated after dependency completion"
            );
            activated.push(inst.instance_id.clone());
        }

        Ok(activated)
    }
}

/// Pure eligibility check: blocked instances that depend on the completed
/// one and whose dependencies are all terminal now. Dependencies missing
/// from the status map count as terminal (deleted upstream work cannot
/// block forever).
fn eligible_instances<'a>(
    blocked: &'a [ModuleInstance],
    completed_instance_id: &str,
    dep_status: &HashMap<String, InstanceStatus>,
) -> Vec<&'a ModuleInstance> {
    blocked
        .iter()
        .filter(|inst| {
            inst.dependencies
                .iter()
                .any(|dep| dep == completed_instance_id)
        })
        .filter(|inst| {
            inst.dependencies.iter().all(|dep| {
                dep_status
                    .get(dep)
                    .map(|status| status.is_terminal())
                    .unwrap_or(true)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocked_job(id: &str, deps: &[&str]) -> ModuleInstance {
        let mut inst = ModuleInstance::synthetic(
            id,
            ModuleClass::Job,
            "agent_1",
            Some("user_1".into()),
            "job",
        );
        inst.status = InstanceStatus::Blocked;
        inst.dependencies = deps.iter().map(|s| s.to_string()).collect();
        inst
    }

    fn statuses(pairs: &[(&str, InstanceStatus)]) -> HashMap<String, InstanceStatus> {
        pairs
            .iter()
            .map(|(id, status)| (id.to_string(), *status))
            .collect()
    }

    #[test]
    fn activates_only_when_all_deps_terminal() {
        let blocked = vec![
            blocked_job("job_000000aa", &["job_000000f1"]),
            blocked_job("job_000000ab", &["job_000000f1", "job_000000f2"]),
        ];
        let dep_status = statuses(&[
            ("job_000000f1", InstanceStatus::Completed),
            ("job_000000f2", InstanceStatus::InProgress),
        ]);

        let eligible = eligible_instances(&blocked, "job_000000f1", &dep_status);
        let ids: Vec<&str> = eligible.iter().map(|i| i.instance_id.as_str()).collect();
        assert_eq!(ids, vec!["job_000000aa"]);
    }

    #[test]
    fn failed_dependency_still_unblocks() {
        let blocked = vec![blocked_job("job_000000aa", &["job_000000f1"])];
        let dep_status = statuses(&[("job_000000f1", InstanceStatus::Failed)]);
        let eligible = eligible_instances(&blocked, "job_000000f1", &dep_status);
        assert_eq!(eligible.len(), 1);
    }

    #[test]
    fn untouched_instances_are_ignored() {
        // Blocked on something else entirely; this completion is not theirs
        let blocked = vec![blocked_job("job_000000aa", &["job_000000f9"])];
        let dep_status = statuses(&[("job_000000f9", InstanceStatus::InProgress)]);
        let eligible = eligible_instances(&blocked, "job_000000f1", &dep_status);
        assert!(eligible.is_empty());
    }

    #[test]
    fn missing_dependency_rows_count_as_terminal() {
        let blocked = vec![blocked_job("job_000000aa", &["job_000000f1", "job_gone0000"])];
        let dep_status = statuses(&[("job_000000f1", InstanceStatus::Completed)]);
        let eligible = eligible_instances(&blocked, "job_000000f1", &dep_status);
        assert_eq!(eligible.len(), 1);
    }
}
