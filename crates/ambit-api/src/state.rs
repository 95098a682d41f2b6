// Shared app state

use std::path::PathBuf;
use std::sync::Arc;

use ambit_core::llm::LlmClient;
use ambit_storage::Database;
use ambit_worker::{AgentRuntime, InstanceFactory};

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub runtime: AgentRuntime,
    pub factory: InstanceFactory,
    pub llm: Arc<dyn LlmClient>,
    pub admin_secret: Option<String>,
    pub base_working_path: PathBuf,
}
