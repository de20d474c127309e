//! Tool Registry & Validator (C4, spec §4.4).
//!
//! Merges client-advertised, system, and user (agent-bound) tool schemas
//! into one list per conversation; sanitizes names; rejects duplicates;
//! and validates decoded tool-call arguments against the merged schemas
//! before C5/the client ever sees them.

use std::collections::HashMap;

use jsonschema::JSONSchema;
use tracing::warn;
use weave_core::model::{ToolDefinition as CoreToolDefinition, ToolKind};
use weave_providers::{ToolCall, ToolDefinition};

pub struct ToolRegistry {
    definitions: HashMap<String, CoreToolDefinition>,
}

impl ToolRegistry {
    /// Build the merged catalog for one conversation. Later sources win on
    /// name collision only after logging a warning — duplicates are a
    /// configuration bug, not a silent override (§4.4: "duplicate names are
    /// rejected").
    pub fn build(
        client_tools: Vec<CoreToolDefinition>,
        system_tools: Vec<CoreToolDefinition>,
        user_tools: Vec<CoreToolDefinition>,
    ) -> Self {
        let mut definitions: HashMap<String, CoreToolDefinition> = HashMap::new();

        for mut def in client_tools
            .into_iter()
            .chain(system_tools)
            .into_iter()
            .chain(user_tools)
        {
            def.name = CoreToolDefinition::sanitize_name(&def.name);
            if definitions.contains_key(&def.name) {
                warn!(tool = %def.name, "duplicate tool name across sources, keeping first registration");
                continue;
            }
            definitions.insert(def.name.clone(), def);
        }

        Self { definitions }
    }

    pub fn to_provider_definitions(&self) -> Vec<ToolDefinition> {
        self.definitions
            .values()
            .map(|d| ToolDefinition {
                name: d.name.clone(),
                description: d.description.clone(),
                input_schema: d.input_schema.clone(),
            })
            .collect()
    }

    pub fn kind_of(&self, name: &str) -> Option<ToolKind> {
        self.definitions.get(name).map(|d| d.kind)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Validate a decoded tool call's arguments against the registered
    /// schema. Unknown tool names and schema-validation failures are both
    /// filtered out here rather than failing the whole turn (§4.4, §8
    /// scenario 5 — "unknown tool filtering").
    pub fn validate(&self, calls: Vec<ToolCall>) -> Vec<ValidatedCall> {
        calls
            .into_iter()
            .filter_map(|call| {
                let Some(def) = self.definitions.get(&call.name) else {
                    warn!(tool = %call.name, "filtered unknown tool call");
                    return None;
                };

                if let Ok(compiled) = JSONSchema::compile(&def.input_schema) {
                    if let Err(errors) = compiled.validate(&call.arguments) {
                        let messages: Vec<String> = errors.map(|e| e.to_string()).collect();
                        warn!(tool = %call.name, errors = ?messages, "filtered tool call failing schema validation");
                        return None;
                    }
                }

                Some(ValidatedCall {
                    kind: def.kind,
                    call,
                })
            })
            .collect()
    }
}

pub struct ValidatedCall {
    pub kind: ToolKind,
    pub call: ToolCall,
}
