// Core domain types and abstractions for the ambit runtime

pub mod context;
pub mod error;
pub mod ids;
pub mod llm;
pub mod module;
pub mod plan;
pub mod protocol;
pub mod similarity;
pub mod timefmt;
pub mod tools;
pub mod types;

pub use context::{ChatMessage, ContextData, MemoryTrack};
pub use error::{CoreError, Result};
pub use llm::{
    LlmCallConfig, LlmClient, LlmCompletionMetadata, LlmMessage, LlmResponse, LlmResponseStream,
    LlmRole, LlmStreamEvent,
};
pub use module::{
    AfterEventParams, HookCallbackResult, Module, ModuleBinding, ModuleMeta, ModuleRegistry,
};
pub use plan::{
    DirectTrigger, ExecutionPath, InstancePlan, JobInfo, PlannedInstance, PlannedJobConfig,
};
pub use protocol::{RunRequest, StreamMessage};
pub use tools::{Tool, ToolCall, ToolDefinition, ToolExecutionResult, ToolRegistry, ToolResult};
pub use types::*;
