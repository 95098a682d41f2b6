// RAG module: the agent's document knowledge base
//
// The file store itself is remote (a vector store service); this module
// surfaces its metadata to the turn and exposes a keyword lookup over the
// indexed keywords.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use ambit_core::context::ContextData;
use ambit_core::error::{CoreError, Result};
use ambit_core::module::{Module, ModuleBinding, ModuleMeta};
use ambit_core::tools::{Tool, ToolExecutionResult};
use ambit_core::types::{ModuleClass, ModuleType};
use ambit_storage::Database;

pub struct RagModule {
    db: Database,
}

impl RagModule {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Module for RagModule {
    fn meta(&self) -> ModuleMeta {
        ModuleMeta {
            class: ModuleClass::Rag,
            module_type: ModuleType::Capability,
            description: "Document knowledge base attached to the agent",
            topic_hint: "Agent documents and knowledge retrieval",
        }
    }

    fn instructions(&self, _binding: &ModuleBinding) -> String {
        "The agent has a document knowledge base. `rag_store_info` lists the indexed \
         files and their keywords; cite documents by name when you use them."
            .to_string()
    }

    fn tools(&self, binding: &ModuleBinding) -> Vec<Arc<dyn Tool>> {
        vec![Arc::new(RagStoreInfoTool {
            db: self.db.clone(),
            agent_id: binding.instance.agent_id.clone(),
        })]
    }

    async fn hook_data_gathering(
        &self,
        binding: &ModuleBinding,
        mut ctx: ContextData,
    ) -> Result<ContextData> {
        let store = self
            .db
            .get_rag_store(&binding.instance.agent_id)
            .await
            .map_err(|e| CoreError::storage(e.to_string()))?;
        if let Some(store) = store {
            if store.file_count > 0 {
                ctx.extra_data.insert(
                    "knowledge_base".into(),
                    json!({
                        "file_count": store.file_count,
                        "keywords": store.keywords,
                    }),
                );
            }
        }
        Ok(ctx)
    }
}

struct RagStoreInfoTool {
    db: Database,
    agent_id: String,
}

#[async_trait]
impl Tool for RagStoreInfoTool {
    fn name(&self) -> &str {
        "rag_store_info"
    }

    fn description(&self) -> &str {
        "List the knowledge base's files and indexed keywords."
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _arguments: Value) -> ToolExecutionResult {
        match self.db.get_rag_store(&self.agent_id).await {
            Ok(Some(store)) => ToolExecutionResult::success(json!({
                "store_name": store.store_name,
                "file_count": store.file_count,
                "uploaded_files": store.uploaded_files,
                "keywords": store.keywords,
            })),
            Ok(None) => ToolExecutionResult::success(json!({ "file_count": 0 })),
            Err(e) => ToolExecutionResult::internal_error(e.to_string()),
        }
    }
}
