// Module implementations
//
// Each module is a stateless service implementing the Module trait; per-turn
// state arrives through the binding and the context bag. Tools are
// collocated with the module that owns them.

mod awareness;
mod basic_info;
pub(crate) mod chat;
mod job;
mod rag;
mod skill;
mod social;

pub use awareness::AwarenessModule;
pub use basic_info::BasicInfoModule;
pub use chat::ChatModule;
pub use job::JobModule;
pub use rag::RagModule;
pub use skill::SkillModule;
pub use social::SocialNetworkModule;

use std::sync::Arc;

use ambit_core::llm::LlmClient;
use ambit_core::module::ModuleRegistry;
use ambit_storage::Database;

use crate::config::RuntimeConfig;
use crate::memory_client::MemoryClient;

/// Build the standard registry with all seven modules
pub fn build_registry(
    db: Database,
    llm: Arc<dyn LlmClient>,
    memory: MemoryClient,
    config: RuntimeConfig,
) -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    registry.register(Arc::new(ChatModule::new(db.clone(), memory)));
    registry.register(Arc::new(JobModule::new(db.clone(), llm.clone(), config)));
    registry.register(Arc::new(AwarenessModule::new(db.clone())));
    registry.register(Arc::new(SocialNetworkModule::new(db.clone())));
    registry.register(Arc::new(BasicInfoModule::new(db.clone())));
    registry.register(Arc::new(RagModule::new(db)));
    registry.register(Arc::new(SkillModule::new()));
    registry
}
