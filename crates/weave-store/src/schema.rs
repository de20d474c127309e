use rusqlite::Connection;
use weave_core::Result;

/// Creates every table in the persisted-state layout (§6). Safe to call on
/// every startup — idempotent via `IF NOT EXISTS`.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_agents_table(conn)?;
    create_conversations_table(conn)?;
    create_messages_table(conn)?;
    create_documents_table(conn)?;
    create_document_chunks_table(conn)?;
    create_message_embeddings_table(conn)?;
    create_embedding_cache_table(conn)?;
    create_conversation_summaries_table(conn)?;
    Ok(())
}

fn create_agents_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS agents (
            id               TEXT PRIMARY KEY,
            display_name     TEXT NOT NULL,
            instructions     TEXT NOT NULL,
            backend_key      TEXT NOT NULL,
            model_overrides  TEXT NOT NULL DEFAULT '{}',
            tool_names       TEXT NOT NULL DEFAULT '[]',
            memory_policy    TEXT
        );",
    )?;
    Ok(())
}

fn create_conversations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id                      TEXT PRIMARY KEY,
            user_id                 TEXT NOT NULL,
            agent_id                TEXT NOT NULL,
            status                  TEXT NOT NULL,
            turn_count              INTEGER NOT NULL DEFAULT 0,
            request_turn_count      INTEGER NOT NULL DEFAULT 0,
            max_turns               INTEGER NOT NULL,
            tokens_prompt           INTEGER NOT NULL DEFAULT 0,
            tokens_completion       INTEGER NOT NULL DEFAULT 0,
            pending_tool_request    TEXT,
            pending_tool_calls      TEXT NOT NULL DEFAULT '[]',
            waiting_for             TEXT,
            system_prompt_snapshot  TEXT,
            model_config_snapshot   TEXT,
            document_ids            TEXT NOT NULL DEFAULT '[]',
            client_tools            TEXT NOT NULL DEFAULT '[]',
            cancelled_at            TEXT,
            created_at              TEXT NOT NULL,
            updated_at              TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_user
            ON conversations(user_id, updated_at DESC);",
    )?;
    Ok(())
}

fn create_messages_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
            id               TEXT PRIMARY KEY,
            conversation_id  TEXT NOT NULL,
            position         INTEGER NOT NULL,
            role             TEXT NOT NULL,
            content          TEXT NOT NULL,
            tool_calls       TEXT NOT NULL DEFAULT '[]',
            tool_call_id     TEXT,
            tool_name        TEXT,
            thinking         TEXT,
            token_count      INTEGER NOT NULL DEFAULT 0,
            images           TEXT NOT NULL DEFAULT '[]',
            created_at       TEXT NOT NULL,
            UNIQUE(conversation_id, position)
        );
        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, position);",
    )?;
    Ok(())
}

fn create_documents_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS documents (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL,
            title       TEXT NOT NULL,
            mime_type   TEXT NOT NULL,
            status      TEXT NOT NULL,
            metadata    TEXT NOT NULL DEFAULT '{}',
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_documents_user ON documents(user_id);",
    )?;
    Ok(())
}

fn create_document_chunks_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS document_chunks (
            id                      TEXT PRIMARY KEY,
            document_id             TEXT NOT NULL,
            chunk_index             INTEGER NOT NULL,
            content                 TEXT NOT NULL,
            token_count             INTEGER NOT NULL,
            start_offset            INTEGER NOT NULL,
            end_offset              INTEGER NOT NULL,
            section_title           TEXT,
            embedding               BLOB,
            embedding_model         TEXT,
            embedding_generated_at  TEXT,
            sparse_vector           TEXT NOT NULL DEFAULT '{}',
            content_hash            TEXT NOT NULL,
            UNIQUE(document_id, chunk_index)
        );
        CREATE INDEX IF NOT EXISTS idx_chunks_document
            ON document_chunks(document_id, chunk_index);",
    )?;
    Ok(())
}

fn create_message_embeddings_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS message_embeddings (
            message_id       TEXT PRIMARY KEY,
            conversation_id  TEXT NOT NULL,
            embedding        BLOB NOT NULL,
            embedding_model  TEXT NOT NULL,
            sparse_vector    TEXT NOT NULL DEFAULT '{}',
            content_hash     TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_embeddings_conversation
            ON message_embeddings(conversation_id);",
    )?;
    Ok(())
}

fn create_embedding_cache_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS embedding_cache (
            content_hash     TEXT NOT NULL,
            embedding_model  TEXT NOT NULL,
            embedding        BLOB NOT NULL,
            created_at       TEXT NOT NULL,
            PRIMARY KEY (content_hash, embedding_model)
        );",
    )?;
    Ok(())
}

fn create_conversation_summaries_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversation_summaries (
            id                      TEXT PRIMARY KEY,
            conversation_id         TEXT NOT NULL,
            from_position           INTEGER NOT NULL,
            to_position              INTEGER NOT NULL,
            status                  TEXT NOT NULL,
            content                 TEXT NOT NULL DEFAULT '',
            token_count             INTEGER NOT NULL DEFAULT 0,
            original_token_count    INTEGER NOT NULL DEFAULT 0,
            summarized_message_ids  TEXT NOT NULL DEFAULT '[]',
            backend_used            TEXT,
            model_used              TEXT,
            created_at              TEXT NOT NULL,
            completed_at            TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_summaries_conversation
            ON conversation_summaries(conversation_id, from_position);",
    )?;
    Ok(())
}
