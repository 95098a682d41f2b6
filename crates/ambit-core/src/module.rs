// Module capability contract
//
// A module is a pluggable capability bound to an agent. The runtime owns all
// stores and passes an instance binding into each hook; modules never own the
// runtime. Every module exposes the two hooks plus its tool set.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::ContextData;
use crate::error::Result;
use crate::tools::Tool;
use crate::types::{InstanceStatus, ModuleClass, ModuleInstance, ModuleType, WorkingSource};

/// Static metadata the planner sees for a module
#[derive(Debug, Clone)]
pub struct ModuleMeta {
    pub class: ModuleClass,
    pub module_type: ModuleType,
    pub description: &'static str,
    pub topic_hint: &'static str,
}

/// The instance a hook invocation is bound to
#[derive(Debug, Clone)]
pub struct ModuleBinding {
    pub instance: ModuleInstance,
    /// The turn's effective user (public instances carry no user of their own)
    pub user_id: String,
    pub narrative_id: Option<String>,
    pub working_source: WorkingSource,
}

/// Parameters for the post-event hook
#[derive(Debug, Clone)]
pub struct AfterEventParams {
    pub binding: ModuleBinding,
    pub input_content: String,
    pub final_output: String,
    pub event_id: String,
    pub ctx: ContextData,
    /// All instances that were loaded for the turn (JobModule inspects the
    /// active jobs targeting the current user)
    pub turn_instances: Vec<ModuleInstance>,
}

/// Returned by a post-event hook that wants to flip its controlling instance
#[derive(Debug, Clone)]
pub struct HookCallbackResult {
    pub instance_id: String,
    pub trigger_callback: bool,
    pub instance_status: InstanceStatus,
    pub output_data: Value,
    pub notification_message: Option<String>,
}

/// A pluggable capability bound to the agent
#[async_trait]
pub trait Module: Send + Sync {
    fn meta(&self) -> ModuleMeta;

    /// Module instruction text composed into the turn's system prompt
    fn instructions(&self, binding: &ModuleBinding) -> String;

    /// Tools this module contributes to the turn. The binding carries the
    /// turn identity (agent, user, narrative) tools need baked in.
    fn tools(&self, _binding: &ModuleBinding) -> Vec<Arc<dyn Tool>> {
        Vec::new()
    }

    /// Enrich the turn context. Receives a deep copy; returns it with
    /// additions. Must not mutate immutable fields (the merge restores them).
    async fn hook_data_gathering(
        &self,
        _binding: &ModuleBinding,
        ctx: ContextData,
    ) -> Result<ContextData> {
        Ok(ctx)
    }

    /// Observe the finished event. A `completed`/`failed` result flips the
    /// controlling instance and arms the completion poller.
    async fn hook_after_event_execution(
        &self,
        _params: &AfterEventParams,
    ) -> Result<Option<HookCallbackResult>> {
        Ok(None)
    }
}

/// Static map of module class -> module implementation
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: HashMap<ModuleClass, Arc<dyn Module>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
        }
    }

    pub fn register(&mut self, module: Arc<dyn Module>) {
        self.modules.insert(module.meta().class, module);
    }

    pub fn get(&self, class: ModuleClass) -> Option<&Arc<dyn Module>> {
        self.modules.get(&class)
    }

    pub fn has(&self, class: ModuleClass) -> bool {
        self.modules.contains_key(&class)
    }

    pub fn list(&self) -> Vec<&Arc<dyn Module>> {
        self.modules.values().collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Planner-facing metadata for the capability modules
    pub fn capability_info(&self) -> Vec<ModuleMeta> {
        let mut info: Vec<ModuleMeta> = self
            .modules
            .values()
            .map(|m| m.meta())
            .filter(|m| m.module_type == ModuleType::Capability)
            .collect();
        info.sort_by_key(|m| m.class.as_str());
        info
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let classes: Vec<_> = self.modules.keys().map(|c| c.as_str()).collect();
        f.debug_struct("ModuleRegistry")
            .field("modules", &classes)
            .finish()
    }
}
