use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::sync::lock;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRegistration {
    pub agent_id: String,
    pub agent_name: String,
    pub version: String,
    pub registered_at: String,
}

/// Agents live for the lifetime of the process; re-registering overwrites.
#[derive(Default)]
pub struct AgentRegistry {
    agents: Mutex<HashMap<String, AgentRegistration>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, agent_id: &str, agent_name: Option<&str>, version: Option<&str>) -> AgentRegistration {
        let registration = AgentRegistration {
            agent_id: agent_id.to_string(),
            agent_name: agent_name.unwrap_or(agent_id).to_string(),
            version: version.unwrap_or("unknown").to_string(),
            registered_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        };
        lock(&self.agents).insert(agent_id.to_string(), registration.clone());
        registration
    }

    pub fn count(&self) -> usize {
        lock(&self.agents).len()
    }

    /// Sorted by id.
    pub fn list(&self) -> Vec<AgentRegistration> {
        let mut agents: Vec<_> = lock(&self.agents).values().cloned().collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        agents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_overwrites_by_id() {
        let agents = AgentRegistry::new();
        agents.register("tracer", Some("Trace Bot"), Some("1.0"));
        let second = agents.register("tracer", None, Some("2.0"));

        assert_eq!(agents.count(), 1);
        assert_eq!(second.agent_name, "tracer");
        assert_eq!(agents.list()[0].version, "2.0");
    }

    #[test]
    fn test_registration_serializes_camel_case() {
        let agents = AgentRegistry::new();
        let reg = agents.register("a1", Some("Agent"), None);
        let json = serde_json::to_value(&reg).unwrap();
        assert_eq!(json["agentId"], "a1");
        assert_eq!(json["agentName"], "Agent");
        assert_eq!(json["version"], "unknown");
        assert!(json["registeredAt"].as_str().unwrap().ends_with('Z'));
    }
}
