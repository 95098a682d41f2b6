// External memory service client
//
// Episodic memory lives in a vector+keyword service reached over HTTP.
// Writes push event turns; searches return episodes aggregated by narrative
// group. Callers treat every failure as a soft miss and fall back to the
// in-database JSON memory.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::config::MemoryConfig;

/// One recalled episode message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEpisode {
    pub narrative_id: String,
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub score: f32,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    narrative_id: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: f32,
}

#[derive(Clone)]
pub struct MemoryClient {
    client: reqwest::Client,
    config: MemoryConfig,
}

impl MemoryClient {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn memories_url(&self) -> String {
        format!("{}/api/v1/memories", self.config.base_url)
    }

    /// Push one finished turn. Best-effort: failures log and return false.
    pub async fn write_turn(
        &self,
        agent_id: &str,
        user_id: &str,
        narrative_id: &str,
        user_message: &str,
        agent_reply: &str,
    ) -> bool {
        let payload = json!({
            "agent_id": agent_id,
            "user_id": user_id,
            "narrative_id": narrative_id,
            "messages": [
                { "role": "user", "content": user_message },
                { "role": "assistant", "content": agent_reply },
            ],
        });

        match self
            .client
            .post(self.memories_url())
            .timeout(self.config.timeout)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                debug!(narrative_id = %narrative_id, "Memory write ok");
                true
            }
            Ok(response) => {
                warn!(status = %response.status(), "Memory write rejected");
                false
            }
            Err(e) => {
                warn!(error = %e, "Memory service unreachable on write");
                false
            }
        }
    }

    /// Search episodes relevant to a query, scoped to (agent, user).
    pub async fn search(
        &self,
        agent_id: &str,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryEpisode>> {
        let limit = limit.to_string();
        let response = self
            .client
            .get(format!("{}/search", self.memories_url()))
            .timeout(self.config.timeout)
            .query(&[
                ("agent_id", agent_id),
                ("user_id", user_id),
                ("query", query),
                ("limit", limit.as_str()),
            ])
            .send()
            .await
            .map_err(|e| anyhow!("memory service unreachable: {e}"))?;

        if !response.status().is_success() {
            return Err(anyhow!("memory search failed: {}", response.status()));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("bad memory search response: {e}"))?;

        Ok(body
            .results
            .into_iter()
            .map(|hit| MemoryEpisode {
                narrative_id: hit.narrative_id,
                role: hit.role,
                content: hit.content,
                score: hit.score,
            })
            .collect())
    }
}
