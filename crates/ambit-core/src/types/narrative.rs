// Narrative value types: the conversational container shared by instances

use serde::{Deserialize, Serialize};

/// Role of an actor inside a narrative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    /// The creator / owning user; holds modification rights
    User,
    /// The agent itself
    Agent,
    /// A user the narrative is about; can route messages in but cannot
    /// modify the narrative's jobs
    Participant,
}

/// One actor entry in `narrative_info.actors`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeActor {
    pub id: String,
    #[serde(rename = "type")]
    pub role: ActorRole,
}

/// The JSON payload stored on a narrative row
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NarrativeInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub current_summary: String,
    #[serde(default)]
    pub actors: Vec<NarrativeActor>,
}

impl NarrativeInfo {
    /// Build the initial info for a fresh (agent, user) narrative
    pub fn for_pair(agent_id: &str, user_id: &str) -> Self {
        Self {
            name: format!("{agent_id} / {user_id}"),
            description: String::new(),
            current_summary: String::new(),
            actors: vec![
                NarrativeActor {
                    id: user_id.to_string(),
                    role: ActorRole::User,
                },
                NarrativeActor {
                    id: agent_id.to_string(),
                    role: ActorRole::Agent,
                },
            ],
        }
    }

    pub fn has_actor(&self, id: &str) -> bool {
        self.actors.iter().any(|a| a.id == id)
    }

    /// Add `id` as a participant unless it already appears under any role
    pub fn add_participant(&mut self, id: &str) -> bool {
        if self.has_actor(id) {
            return false;
        }
        self.actors.push(NarrativeActor {
            id: id.to_string(),
            role: ActorRole::Participant,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_injection_is_idempotent() {
        let mut info = NarrativeInfo::for_pair("agent_1", "user_mgr");
        assert!(info.add_participant("user_alice"));
        assert!(!info.add_participant("user_alice"));
        // The creator never gets demoted to participant
        assert!(!info.add_participant("user_mgr"));
        assert_eq!(info.actors.len(), 3);
        assert_eq!(info.actors[2].role, ActorRole::Participant);
    }

    #[test]
    fn actors_serialize_with_type_key() {
        let info = NarrativeInfo::for_pair("agent_1", "user_1");
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["actors"][0]["type"], "user");
        assert_eq!(json["actors"][1]["type"], "agent");
    }
}
