//! Conversation lifecycle endpoints (§6): create, append a user message
//! (enqueues a turn job), catch-up polling, client tool result submission,
//! and cancellation.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use weave_core::ids::{AgentId, ConversationId};
use weave_core::model::{Conversation, Message, Role, ToolDefinition};
use weave_core::WeaveError;

use crate::app::AppState;

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl ErrorBody {
    fn from(err: &WeaveError) -> (StatusCode, Json<ErrorBody>) {
        let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            Json(ErrorBody {
                error: err.code(),
                message: err.to_string(),
            }),
        )
    }
}

/// Cheap char-based estimate (matches `LlmProvider::count_tokens`'s default)
/// used before the agent's actual backend has been resolved for the turn.
fn estimate_tokens(content: &str) -> u32 {
    ((content.chars().count() as f32) / 4.0).ceil() as u32
}

fn not_found(id: &ConversationId) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            error: "NOT_FOUND",
            message: format!("conversation '{id}' not found"),
        }),
    )
}

#[derive(Deserialize)]
pub struct CreateConversationRequest {
    pub user_id: String,
    pub agent_id: String,
    #[serde(default)]
    pub max_turns: Option<u32>,
    /// Tool schemas the caller will execute itself (§4.4 client tools) —
    /// merged into the registry alongside this agent's server tools.
    #[serde(default)]
    pub client_tools: Vec<ToolDefinition>,
}

#[derive(Serialize)]
pub struct CreateConversationResponse {
    pub id: String,
}

const DEFAULT_MAX_TURNS: u32 = 50;

pub async fn create_conversation(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<CreateConversationResponse>), (StatusCode, Json<ErrorBody>)> {
    let agent_id = AgentId::from(req.agent_id);
    let agent = state.agents.get(&agent_id).map_err(|e| ErrorBody::from(&e))?;
    if agent.is_none() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: "NOT_FOUND",
                message: format!("agent '{agent_id}' not found"),
            }),
        ));
    }

    let mut conversation = Conversation::new(req.user_id, agent_id, req.max_turns.unwrap_or(DEFAULT_MAX_TURNS));
    conversation.client_tools = req.client_tools;
    state.conversations.insert(&conversation).map_err(|e| ErrorBody::from(&e))?;

    Ok((
        StatusCode::CREATED,
        Json(CreateConversationResponse { id: conversation.id.to_string() }),
    ))
}

#[derive(Deserialize)]
pub struct PostMessageRequest {
    pub content: String,
}

#[derive(Serialize)]
pub struct PostMessageResponse {
    pub position: u32,
}

pub async fn post_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<PostMessageRequest>,
) -> Result<Json<PostMessageResponse>, (StatusCode, Json<ErrorBody>)> {
    let conversation_id = ConversationId::from(id);
    let conversation = state
        .conversations
        .get(&conversation_id)
        .map_err(|e| ErrorBody::from(&e))?
        .ok_or_else(|| not_found(&conversation_id))?;

    if conversation.is_paused() {
        return Err((
            StatusCode::CONFLICT,
            Json(ErrorBody {
                error: "CONFLICT",
                message: "conversation is paused awaiting a client tool result".to_string(),
            }),
        ));
    }

    let position = state
        .conversations
        .messages(&conversation_id)
        .map_err(|e| ErrorBody::from(&e))?
        .len() as u32;

    let message = Message {
        id: weave_core::ids::MessageId::new(),
        conversation_id: conversation_id.clone(),
        position,
        role: Role::User,
        token_count: estimate_tokens(&req.content),
        content: req.content,
        tool_calls: Vec::new(),
        tool_call_id: None,
        tool_name: None,
        thinking: None,
        images: Vec::new(),
        created_at: chrono::Utc::now(),
    };
    state.conversations.append_message(&message).map_err(|e| ErrorBody::from(&e))?;

    state.spawn_turn(conversation_id);
    Ok(Json(PostMessageResponse { position }))
}

#[derive(Deserialize)]
pub struct MessagesQuery {
    pub after: Option<u32>,
}

pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Vec<Message>>, (StatusCode, Json<ErrorBody>)> {
    let conversation_id = ConversationId::from(id);
    let messages = state
        .conversations
        .messages_after(&conversation_id, query.after)
        .map_err(|e| ErrorBody::from(&e))?;
    Ok(Json(messages))
}

#[derive(Deserialize)]
pub struct ToolResultRequest {
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

pub async fn submit_tool_result(
    State(state): State<Arc<AppState>>,
    Path((id, tool_call_id)): Path<(String, String)>,
    Json(req): Json<ToolResultRequest>,
) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    let conversation_id = ConversationId::from(id);
    let mut conversation = state
        .conversations
        .get(&conversation_id)
        .map_err(|e| ErrorBody::from(&e))?
        .ok_or_else(|| not_found(&conversation_id))?;

    let pending = conversation.pending_tool_request.clone().ok_or_else(|| {
        (
            StatusCode::CONFLICT,
            Json(ErrorBody {
                error: "CONFLICT",
                message: "conversation has no pending client tool request".to_string(),
            }),
        )
    })?;

    if pending.tool_call.id != tool_call_id {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: "REQUEST_REJECTED",
                message: format!(
                    "pending tool call is '{}', not '{tool_call_id}'",
                    pending.tool_call.id
                ),
            }),
        ));
    }

    let position = state
        .conversations
        .messages(&conversation_id)
        .map_err(|e| ErrorBody::from(&e))?
        .len() as u32;

    let content = if req.is_error {
        format!("[error] {}", req.content)
    } else {
        req.content
    };

    let tool_message = Message {
        id: weave_core::ids::MessageId::new(),
        conversation_id: conversation_id.clone(),
        position,
        role: Role::Tool,
        token_count: estimate_tokens(&content),
        content,
        tool_calls: Vec::new(),
        tool_call_id: Some(pending.tool_call.id.clone()),
        tool_name: Some(pending.tool_call.name.clone()),
        thinking: None,
        images: Vec::new(),
        created_at: chrono::Utc::now(),
    };
    state.conversations.append_message(&tool_message).map_err(|e| ErrorBody::from(&e))?;

    conversation.resume();
    state.conversations.save(&conversation).map_err(|e| ErrorBody::from(&e))?;

    state.spawn_turn(conversation_id);
    Ok(StatusCode::ACCEPTED)
}

pub async fn cancel_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    let conversation_id = ConversationId::from(id);
    let mut conversation = state
        .conversations
        .get(&conversation_id)
        .map_err(|e| ErrorBody::from(&e))?
        .ok_or_else(|| not_found(&conversation_id))?;

    conversation.cancelled_at = Some(chrono::Utc::now());
    state.conversations.save(&conversation).map_err(|e| ErrorBody::from(&e))?;
    Ok(StatusCode::ACCEPTED)
}
