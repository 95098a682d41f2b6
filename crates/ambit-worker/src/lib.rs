// Execution substrate: module orchestration, job engine, completion poller

pub mod config;
pub mod decider;
pub mod engine;
pub mod factory;
pub mod mcp;
pub mod memory_client;
pub mod module_service;
pub mod modules;
pub mod poller;
pub mod prompts;
pub mod resolver;
pub mod runtime;
pub mod schedule;
pub mod sync;

pub use config::{
    InstancePollerConfig, JobEngineConfig, MemoryConfig, RuntimeConfig, SyncConfig,
};
pub use decider::{DecisionInputs, InstanceDecider};
pub use engine::JobEngine;
pub use factory::InstanceFactory;
pub use memory_client::{MemoryClient, MemoryEpisode};
pub use module_service::{LoadResult, ModuleService};
pub use modules::build_registry;
pub use poller::InstancePoller;
pub use resolver::DependencyResolver;
pub use runtime::{AgentRuntime, RunParams, TurnOutcome};
pub use sync::{InstanceSync, SyncOutcome};

use std::sync::Arc;

use ambit_core::llm::LlmClient;
use ambit_storage::Database;

/// Wire the whole substrate together from a database handle and an LLM
/// client. Returns the runtime plus the two background services, ready for
/// `start()`.
pub fn build_services(
    db: Database,
    llm: Arc<dyn LlmClient>,
) -> (AgentRuntime, Arc<JobEngine>, Arc<InstancePoller>) {
    let runtime_config = RuntimeConfig::from_env();
    let memory = MemoryClient::new(MemoryConfig::from_env());
    let registry = build_registry(db.clone(), llm.clone(), memory, runtime_config.clone());

    let factory = InstanceFactory::new(db.clone());
    let decider = InstanceDecider::new(llm.clone(), runtime_config.clone());
    let sync = InstanceSync::new(db.clone(), llm.clone(), SyncConfig::from_env());
    let module_service = ModuleService::new(
        db.clone(),
        factory.clone(),
        decider,
        sync,
        registry.clone(),
    );
    let runtime = AgentRuntime::new(
        db.clone(),
        llm,
        registry,
        module_service,
        factory,
        runtime_config,
    );

    let engine = Arc::new(JobEngine::new(
        db.clone(),
        runtime.clone(),
        JobEngineConfig::from_env(),
    ));
    let poller = Arc::new(InstancePoller::new(
        db.clone(),
        DependencyResolver::new(db),
        InstancePollerConfig::from_env(),
    ));

    (runtime, engine, poller)
}
