//! Backend Manager (C3, §4.3): resolves an agent's configured backend key to
//! a driver instance, falling back to the deployment's configured default.

use std::collections::HashMap;
use std::sync::Arc;

use weave_core::model::Agent;
use weave_core::{Result, WeaveError};
use weave_providers::LlmProvider;

pub struct BackendManager {
    drivers: HashMap<String, Arc<dyn LlmProvider>>,
    default_key: String,
}

impl BackendManager {
    pub fn new(drivers: HashMap<String, Arc<dyn LlmProvider>>, default_key: impl Into<String>) -> Self {
        Self {
            drivers,
            default_key: default_key.into(),
        }
    }

    /// Each call returns an independent `Arc` clone — the driver owns its own
    /// transport, so concurrent turns never share connection state (§4.3).
    pub fn for_agent(&self, agent: &Agent) -> Result<Arc<dyn LlmProvider>> {
        self.drivers
            .get(&agent.backend_key)
            .or_else(|| self.drivers.get(&self.default_key))
            .cloned()
            .ok_or_else(|| {
                WeaveError::Config(format!(
                    "no backend registered for key '{}' and no default backend configured",
                    agent.backend_key
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_core::ids::AgentId;
    use weave_providers::fake::FakeBackend;

    fn agent(backend_key: &str) -> Agent {
        Agent {
            id: AgentId::from("a1"),
            display_name: "Agent".into(),
            instructions: "Be helpful.".into(),
            backend_key: backend_key.into(),
            model_overrides: Default::default(),
            tool_names: Vec::new(),
            memory_policy: None,
        }
    }

    #[test]
    fn falls_back_to_default_when_key_unregistered() {
        let mut drivers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        drivers.insert("default".into(), Arc::new(FakeBackend::new()));
        let manager = BackendManager::new(drivers, "default");

        let driver = manager.for_agent(&agent("unknown")).unwrap();
        assert_eq!(driver.name(), "fake");
    }

    #[test]
    fn errors_when_nothing_registered() {
        let manager = BackendManager::new(HashMap::new(), "default");
        assert!(manager.for_agent(&agent("anything")).is_err());
    }
}
