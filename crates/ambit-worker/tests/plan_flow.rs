// Scenario-level checks over the pure planning pipeline: plan transform,
// trigger derivation, initial scheduling and duplicate suppression signals.

use chrono::{Duration, TimeZone, Utc};

use ambit_core::plan::{PlannedInstance, PlannedJobConfig};
use ambit_core::similarity::{titles_similar, DEFAULT_TITLE_SIMILARITY_THRESHOLD};
use ambit_core::types::{InstanceStatus, JobType, ModuleClass, TriggerConfig};
use ambit_worker::schedule::{initial_run_time, next_run_time};
use ambit_worker::sync::{derive_trigger, transform_plan};

fn job(task_key: &str, depends_on: &[&str], config: PlannedJobConfig) -> PlannedInstance {
    PlannedInstance {
        task_key: task_key.into(),
        instance_id: None,
        module_class: ModuleClass::Job,
        description: format!("{task_key} job"),
        status: InstanceStatus::Active,
        depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
        dependencies: Vec::new(),
        job_config: Some(config),
        is_existing: false,
        similar_match: false,
        existing_job_id: None,
    }
}

fn simple_config(title: &str) -> PlannedJobConfig {
    PlannedJobConfig {
        title: title.into(),
        payload: format!("{title} payload"),
        ..Default::default()
    }
}

#[test]
fn one_off_report_schedules_at_requested_time() {
    // A "send me a report at 9am tomorrow" style request
    let now = Utc.with_ymd_and_hms(2026, 3, 10, 14, 0, 0).unwrap();
    let config = PlannedJobConfig {
        scheduled_at: Some("2026-03-11T09:00:00-05:00".into()),
        related_entity_id: Some("user_1".into()),
        ..simple_config("Research the top 3 competitors")
    };

    let (job_type, trigger) = derive_trigger(&config, now).unwrap();
    assert_eq!(job_type, JobType::OneOff);

    let run_at = Utc.with_ymd_and_hms(2026, 3, 11, 14, 0, 0).unwrap();
    assert_eq!(trigger, TriggerConfig::OneOff { run_at });
    assert_eq!(initial_run_time(&trigger, false, now), Some(run_at));
    // One-off jobs never reschedule after the run
    assert_eq!(next_run_time(&trigger, run_at), None);
}

#[test]
fn dependent_batch_runs_in_topological_stages() {
    // fetch_data -> analyse -> notify
    let mut plan = vec![
        job("fetch_data", &[], simple_config("Fetch data")),
        job("analyse", &["fetch_data"], simple_config("Analyse data")),
        job("notify", &["analyse"], simple_config("Notify requester")),
    ];
    let key_to_id = transform_plan(&mut plan).unwrap();

    assert_eq!(plan[0].status, InstanceStatus::Active);
    assert_eq!(plan[1].status, InstanceStatus::Blocked);
    assert_eq!(plan[2].status, InstanceStatus::Blocked);

    // Dependencies point at allocated instance ids, not task keys
    assert_eq!(plan[1].dependencies, vec![key_to_id["fetch_data"].clone()]);
    assert_eq!(plan[2].dependencies, vec![key_to_id["analyse"].clone()]);

    // Blocked one-offs wait for the dependency resolver
    let now = Utc::now();
    let (_, trigger) = derive_trigger(plan[1].job_config.as_ref().unwrap(), now).unwrap();
    assert_eq!(initial_run_time(&trigger, true, now), None);
}

#[test]
fn plan_cycles_never_reach_persistence() {
    let mut plan = vec![
        job("a", &["b"], simple_config("A")),
        job("b", &["c"], simple_config("B")),
        job("c", &["a"], simple_config("C")),
    ];
    let err = transform_plan(&mut plan).unwrap_err().to_string();
    assert!(err.contains("Circular dependency"));
}

#[test]
fn followup_titles_collapse_to_one_job() {
    assert!(titles_similar(
        "Follow up with Alice",
        "Continue following up with Alice",
        DEFAULT_TITLE_SIMILARITY_THRESHOLD
    ));
    assert!(!titles_similar(
        "Follow up with Alice",
        "Quarterly budget review",
        DEFAULT_TITLE_SIMILARITY_THRESHOLD
    ));
}

#[test]
fn ongoing_probe_cadence_follows_interval() {
    let now = Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).unwrap();
    let config = PlannedJobConfig {
        interval_seconds: Some(86400),
        end_condition: Some("customer places order or explicitly declines".into()),
        related_entity_id: Some("user_alice".into()),
        ..simple_config("Daily sales follow-up")
    };

    let (job_type, trigger) = derive_trigger(&config, now).unwrap();
    assert_eq!(job_type, JobType::Ongoing);
    // First probe fires immediately, the next one a day later
    assert_eq!(initial_run_time(&trigger, false, now), Some(now));
    assert_eq!(next_run_time(&trigger, now), Some(now + Duration::days(1)));
}

#[test]
fn missed_scheduled_slot_recomputes_from_now() {
    let trigger = TriggerConfig::Scheduled {
        cron: None,
        interval_seconds: Some(3600),
    };
    // The process was down past the slot; initial scheduling computes from
    // the current instant, not the missed one
    let late_now = Utc.with_ymd_and_hms(2026, 3, 10, 23, 30, 0).unwrap();
    assert_eq!(
        initial_run_time(&trigger, false, late_now),
        Some(late_now + Duration::hours(1))
    );
}
