// Closed domain enums and shared value types

mod event;
mod instance;
mod job;
mod narrative;

pub use event::*;
pub use instance::*;
pub use job::*;
pub use narrative::*;

use serde::{Deserialize, Serialize};

/// Trigger channel of an agent turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkingSource {
    /// User-facing WebSocket turn
    Chat,
    /// Background job execution
    Job,
    /// Agent-to-agent message
    A2a,
}

impl WorkingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkingSource::Chat => "chat",
            WorkingSource::Job => "job",
            WorkingSource::A2a => "a2a",
        }
    }
}

impl Default for WorkingSource {
    fn default() -> Self {
        WorkingSource::Chat
    }
}
