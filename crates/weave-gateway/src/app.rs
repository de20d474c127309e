use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use rusqlite::Connection;

use weave_broadcast::ConversationBroadcaster;
use weave_core::config::WeaveConfig;
use weave_engine::{BackendManager, TodoBoard, TurnEngine, TurnEngineConfig};
use weave_store::{AgentStore, ConversationStore, DocumentStore, RagStore, SummaryStore};

/// Central shared state — passed as `Arc<AppState>` to every Axum handler.
pub struct AppState {
    pub config: WeaveConfig,
    pub conversations: Arc<ConversationStore>,
    pub agents: Arc<AgentStore>,
    pub documents: Arc<DocumentStore>,
    pub rag: Arc<RagStore>,
    pub broadcaster: Arc<ConversationBroadcaster>,
    pub engine: Arc<TurnEngine>,
}

impl AppState {
    /// Opens one `rusqlite::Connection` per store against `config.database.path`
    /// (each store owns its connection behind its own `Mutex`, per this
    /// codebase's existing per-store locking convention) and wires the
    /// turn engine against them.
    pub fn new(config: WeaveConfig) -> anyhow::Result<Self> {
        let path = &config.database.path;
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let bootstrap = Connection::open(path)?;
        weave_store::init_db(&bootstrap)?;
        drop(bootstrap);

        let conversations = Arc::new(ConversationStore::new(Connection::open(path)?));
        let agents = Arc::new(AgentStore::new(Connection::open(path)?));
        let documents = Arc::new(DocumentStore::new(Connection::open(path)?));
        let rag = Arc::new(RagStore::new(Connection::open(path)?));
        let summaries = Arc::new(SummaryStore::new(Connection::open(path)?));

        let (drivers, default_key) = crate::backends::build_drivers(&config.backends)?;
        let backends = Arc::new(BackendManager::new(drivers, default_key));
        let broadcaster = Arc::new(ConversationBroadcaster::new());
        let todos: Arc<TodoBoard> = Arc::new(TodoBoard::new());

        let engine_config = TurnEngineConfig {
            turn_timeout: std::time::Duration::from_secs(config.turn.timeout_secs),
            output_reserve_tokens: config.turn.output_reserve_tokens,
            rag_enabled: config.rag.enabled,
            retrieval_top_k: config.rag.retrieval_top_k,
        };

        let engine = Arc::new(TurnEngine::new(
            conversations.clone(),
            agents.clone(),
            backends,
            broadcaster.clone(),
            summaries,
            rag.clone(),
            documents.clone(),
            todos,
            engine_config,
        ));

        Ok(Self {
            config,
            conversations,
            agents,
            documents,
            rag,
            broadcaster,
            engine,
        })
    }

    /// Spawns a turn job for a conversation, fire-and-forget (§5: job queue
    /// is in-process; `run_turn`'s own `in_flight` guard is the dedup layer).
    pub fn spawn_turn(self: &Arc<Self>, conversation_id: weave_core::ids::ConversationId) {
        let engine = self.engine.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.run_turn(conversation_id.clone()).await {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "turn job failed");
            }
        });
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/conversations",
            post(crate::http::conversations::create_conversation),
        )
        .route(
            "/conversations/{id}/messages",
            post(crate::http::conversations::post_message).get(crate::http::conversations::list_messages),
        )
        .route(
            "/conversations/{id}/stream",
            get(crate::http::stream::stream_conversation),
        )
        .route(
            "/conversations/{id}/tools/{tool_call_id}/result",
            post(crate::http::conversations::submit_tool_result),
        )
        .route(
            "/conversations/{id}/cancel",
            post(crate::http::conversations::cancel_conversation),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
