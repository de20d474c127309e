//! Translates between the persisted data model (`weave_core::model`) and
//! the driver-facing wire model (`weave_providers`). Kept as free functions
//! rather than `From` impls since neither type is local to this crate.

use weave_core::model::{Message as CoreMessage, Role as CoreRole, ToolCall as CoreToolCall};
use weave_providers::{Message as ProviderMessage, Role as ProviderRole, ToolCall as ProviderToolCall};

pub fn to_provider_role(role: CoreRole) -> ProviderRole {
    match role {
        CoreRole::System => ProviderRole::System,
        CoreRole::User => ProviderRole::User,
        CoreRole::Assistant => ProviderRole::Assistant,
        CoreRole::Tool => ProviderRole::Tool,
    }
}

pub fn core_tool_call_to_provider(call: &CoreToolCall) -> ProviderToolCall {
    ProviderToolCall {
        id: call.id.clone(),
        name: call.name.clone(),
        arguments: call.arguments.clone(),
    }
}

pub fn provider_tool_call_to_core(call: &ProviderToolCall) -> CoreToolCall {
    CoreToolCall {
        id: call.id.clone(),
        name: call.name.clone(),
        arguments: call.arguments.clone(),
    }
}

pub fn to_provider_message(message: &CoreMessage) -> ProviderMessage {
    ProviderMessage {
        role: to_provider_role(message.role),
        content: message.content.clone(),
        tool_calls: message.tool_calls.iter().map(core_tool_call_to_provider).collect(),
        tool_call_id: message.tool_call_id.clone(),
    }
}
