//! End-to-end turn-engine scenarios (§8): client-tool pause/resume,
//! cancellation, max-turns exhaustion, and unknown-tool filtering. These
//! drive `TurnEngine::run_turn` the way the gateway does, against a
//! `FakeBackend` instead of a live model.

use std::collections::HashMap;
use std::sync::Arc;

use rusqlite::Connection;

use weave_broadcast::ConversationBroadcaster;
use weave_core::ids::AgentId;
use weave_core::model::{Agent, Conversation, ConversationStatus, Message, Role, ToolDefinition, ToolKind};
use weave_core::WeaveError;
use weave_engine::{BackendManager, TodoBoard, TurnEngine, TurnEngineConfig};
use weave_providers::fake::FakeBackend;
use weave_providers::{LlmProvider, ToolCall as ProviderToolCall};
use weave_store::{AgentStore, ConversationStore, DocumentStore, RagStore, SummaryStore};

fn open_conn() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    weave_store::init_db(&conn).unwrap();
    conn
}

struct Fixture {
    engine: TurnEngine,
    conversations: Arc<ConversationStore>,
    agents: Arc<AgentStore>,
}

fn build_fixture(drivers: HashMap<String, Arc<dyn LlmProvider>>) -> Fixture {
    let conversations = Arc::new(ConversationStore::new(open_conn()));
    let agents = Arc::new(AgentStore::new(open_conn()));
    let backends = Arc::new(BackendManager::new(drivers, "default"));
    let broadcaster = Arc::new(ConversationBroadcaster::new());
    let summaries = Arc::new(SummaryStore::new(open_conn()));
    let rag = Arc::new(RagStore::new(open_conn()));
    let documents = Arc::new(DocumentStore::new(open_conn()));
    let todos = Arc::new(TodoBoard::new());

    let engine = TurnEngine::new(
        conversations.clone(),
        agents.clone(),
        backends,
        broadcaster,
        summaries,
        rag,
        documents,
        todos,
        TurnEngineConfig::default(),
    );
    Fixture { engine, conversations, agents }
}

fn seed_agent(agents: &AgentStore, tool_names: Vec<String>) -> Agent {
    let agent = Agent {
        id: AgentId::from("main"),
        display_name: "Helper".into(),
        instructions: "Be helpful.".into(),
        backend_key: "default".into(),
        model_overrides: HashMap::from([("model".to_string(), serde_json::json!("fake-1"))]),
        tool_names,
        memory_policy: None,
    };
    agents.insert(&agent).unwrap();
    agent
}

fn seed_conversation(conversations: &ConversationStore, agent: &Agent, max_turns: u32) -> Conversation {
    let mut conversation = Conversation::new("user-1", agent.id.clone(), max_turns);
    conversation.status = ConversationStatus::Active;
    conversations.insert(&conversation).unwrap();

    let user_message = Message {
        id: weave_core::ids::MessageId::new(),
        conversation_id: conversation.id.clone(),
        position: 0,
        role: Role::User,
        content: "Hello there".into(),
        tool_calls: Vec::new(),
        tool_call_id: None,
        tool_name: None,
        thinking: None,
        token_count: 4,
        images: Vec::new(),
        created_at: chrono::Utc::now(),
    };
    conversations.append_message(&user_message).unwrap();
    conversations.get(&conversation.id).unwrap().unwrap()
}

#[tokio::test]
async fn client_tool_pause_then_resume_completes() {
    let backend = FakeBackend::new().with_tool_calls_on_turn(
        1,
        vec![ProviderToolCall {
            id: "call_client_1".into(),
            name: "render_widget".into(),
            arguments: serde_json::json!({"kind": "chart"}),
        }],
    );
    let mut drivers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
    drivers.insert("default".into(), Arc::new(backend));
    let fixture = build_fixture(drivers);

    let agent = seed_agent(&fixture.agents, Vec::new());
    let mut conversation = seed_conversation(&fixture.conversations, &agent, 25);
    conversation.client_tools = vec![ToolDefinition {
        name: "render_widget".into(),
        description: "Renders a widget on the client.".into(),
        input_schema: serde_json::json!({"type": "object"}),
        kind: ToolKind::Client,
    }];
    fixture.conversations.save(&conversation).unwrap();

    fixture.engine.run_turn(conversation.id.clone()).await.unwrap();

    let paused = fixture.conversations.get(&conversation.id).unwrap().unwrap();
    assert_eq!(paused.status, ConversationStatus::Paused);
    assert!(paused.is_paused());
    let pending = paused.pending_tool_request.clone().expect("pending tool request");
    assert_eq!(pending.tool_call.id, "call_client_1");
    assert_eq!(pending.tool_call.name, "render_widget");

    // Client posts its tool result and the gateway resumes the conversation.
    let mut resumed = paused;
    let position = fixture.conversations.messages(&conversation.id).unwrap().len() as u32;
    let tool_message = Message {
        id: weave_core::ids::MessageId::new(),
        conversation_id: conversation.id.clone(),
        position,
        role: Role::Tool,
        content: "chart rendered".into(),
        tool_calls: Vec::new(),
        tool_call_id: Some("call_client_1".into()),
        tool_name: Some("render_widget".into()),
        thinking: None,
        token_count: 3,
        images: Vec::new(),
        created_at: chrono::Utc::now(),
    };
    fixture.conversations.append_message(&tool_message).unwrap();
    resumed.resume();
    fixture.conversations.save(&resumed).unwrap();

    fixture.engine.run_turn(conversation.id.clone()).await.unwrap();

    let done = fixture.conversations.get(&conversation.id).unwrap().unwrap();
    assert_eq!(done.status, ConversationStatus::Completed);
    assert_eq!(done.request_turn_count, 2);
}

#[tokio::test]
async fn remaining_tool_calls_survive_a_client_pause() {
    let backend = FakeBackend::new().with_tool_calls_on_turn(
        1,
        vec![
            ProviderToolCall {
                id: "call_client_1".into(),
                name: "render_widget".into(),
                arguments: serde_json::json!({"kind": "chart"}),
            },
            ProviderToolCall {
                id: "call_todo_1".into(),
                name: "todo_add".into(),
                arguments: serde_json::json!({"item": "buy milk", "priority": "low"}),
            },
        ],
    );
    let mut drivers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
    drivers.insert("default".into(), Arc::new(backend));
    let fixture = build_fixture(drivers);

    let agent = seed_agent(&fixture.agents, vec!["todo_add".to_string()]);
    let mut conversation = seed_conversation(&fixture.conversations, &agent, 25);
    conversation.client_tools = vec![ToolDefinition {
        name: "render_widget".into(),
        description: "Renders a widget on the client.".into(),
        input_schema: serde_json::json!({"type": "object"}),
        kind: ToolKind::Client,
    }];
    fixture.conversations.save(&conversation).unwrap();

    fixture.engine.run_turn(conversation.id.clone()).await.unwrap();

    let paused = fixture.conversations.get(&conversation.id).unwrap().unwrap();
    assert_eq!(paused.status, ConversationStatus::Paused);
    assert_eq!(
        paused.pending_tool_calls.len(),
        1,
        "todo_add was queued behind the client call, not dropped"
    );
    assert_eq!(paused.pending_tool_calls[0].tool_call.name, "todo_add");

    // Client posts its tool result; the gateway resumes the conversation.
    let mut resumed = paused;
    let position = fixture.conversations.messages(&conversation.id).unwrap().len() as u32;
    let tool_message = Message {
        id: weave_core::ids::MessageId::new(),
        conversation_id: conversation.id.clone(),
        position,
        role: Role::Tool,
        content: "chart rendered".into(),
        tool_calls: Vec::new(),
        tool_call_id: Some("call_client_1".into()),
        tool_name: Some("render_widget".into()),
        thinking: None,
        token_count: 3,
        images: Vec::new(),
        created_at: chrono::Utc::now(),
    };
    fixture.conversations.append_message(&tool_message).unwrap();
    resumed.resume();
    fixture.conversations.save(&resumed).unwrap();

    fixture.engine.run_turn(conversation.id.clone()).await.unwrap();

    let done = fixture.conversations.get(&conversation.id).unwrap().unwrap();
    assert_eq!(done.status, ConversationStatus::Completed);
    assert_eq!(done.request_turn_count, 2);
    assert!(done.pending_tool_calls.is_empty());

    let messages = fixture.conversations.messages(&conversation.id).unwrap();
    let todo_result = messages.iter().find(|m| m.tool_call_id.as_deref() == Some("call_todo_1"));
    assert!(todo_result.is_some(), "the queued todo_add call must be dispatched after resume");
}

#[tokio::test]
async fn cancelled_before_dispatch_stops_the_turn() {
    let mut drivers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
    drivers.insert("default".into(), Arc::new(FakeBackend::new()));
    let fixture = build_fixture(drivers);

    let agent = seed_agent(&fixture.agents, Vec::new());
    let mut conversation = seed_conversation(&fixture.conversations, &agent, 25);
    conversation.cancelled_at = Some(chrono::Utc::now());
    fixture.conversations.save(&conversation).unwrap();

    fixture.engine.run_turn(conversation.id.clone()).await.unwrap();

    let after = fixture.conversations.get(&conversation.id).unwrap().unwrap();
    assert_eq!(after.status, ConversationStatus::Cancelled);

    // Cancellation checkpoint #1 fires before the model is ever called, so
    // no assistant message gets appended.
    let messages = fixture.conversations.messages(&conversation.id).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::User);
}

#[tokio::test]
async fn max_turns_exhaustion_fails_without_calling_the_backend() {
    let mut drivers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
    drivers.insert("default".into(), Arc::new(FakeBackend::new()));
    let fixture = build_fixture(drivers);

    let agent = seed_agent(&fixture.agents, Vec::new());
    let mut conversation = seed_conversation(&fixture.conversations, &agent, 1);
    conversation.request_turn_count = 1;
    fixture.conversations.save(&conversation).unwrap();

    fixture.engine.run_turn(conversation.id.clone()).await.unwrap();

    let after = fixture.conversations.get(&conversation.id).unwrap().unwrap();
    assert_eq!(after.status, ConversationStatus::Failed);

    let messages = fixture.conversations.messages(&conversation.id).unwrap();
    assert_eq!(messages.len(), 1, "no assistant turn should have run");
}

#[tokio::test]
async fn unknown_tool_call_is_filtered_and_turn_still_completes() {
    let backend = FakeBackend::new().with_tool_calls_on_turn(
        1,
        vec![ProviderToolCall {
            id: "call_ghost".into(),
            name: "mystery_tool".into(),
            arguments: serde_json::json!({}),
        }],
    );
    let mut drivers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
    drivers.insert("default".into(), Arc::new(backend));
    let fixture = build_fixture(drivers);

    // "mystery_tool" is never in tool_names, builtin system tools, or
    // client_tools, so ToolRegistry::validate drops it.
    let agent = seed_agent(&fixture.agents, Vec::new());
    let conversation = seed_conversation(&fixture.conversations, &agent, 25);

    fixture.engine.run_turn(conversation.id.clone()).await.unwrap();

    let after = fixture.conversations.get(&conversation.id).unwrap().unwrap();
    assert_eq!(after.status, ConversationStatus::Completed);
    assert_eq!(after.request_turn_count, 1);

    let messages = fixture.conversations.messages(&conversation.id).unwrap();
    assert_eq!(messages.len(), 2);
    assert!(messages[1].tool_calls.is_empty());
}

#[tokio::test]
async fn second_concurrent_run_on_same_conversation_is_rejected() {
    let mut drivers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
    drivers.insert("default".into(), Arc::new(FakeBackend::new()));
    let fixture = build_fixture(drivers);

    let agent = seed_agent(&fixture.agents, Vec::new());
    let conversation = seed_conversation(&fixture.conversations, &agent, 25);

    let id = conversation.id.clone();
    let first = fixture.engine.run_turn(id.clone());
    let second = fixture.engine.run_turn(id.clone());
    let (first_result, second_result) = tokio::join!(first, second);

    // Exactly one of the two concurrent calls must be rejected with a
    // conflict; the other completes normally (§5 in-flight invariant).
    let results = [first_result, second_result];
    let conflicts = results.iter().filter(|r| matches!(r, Err(WeaveError::Conflict(_)))).count();
    let oks = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(conflicts, 1);
    assert_eq!(oks, 1);
}
