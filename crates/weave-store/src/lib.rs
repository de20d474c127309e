//! Persisted-state layout (§6): conversations, messages, RAG chunks and
//! embeddings, and conversation summaries, all behind a `rusqlite` connection.

pub mod agents;
pub mod conversations;
pub mod documents;
pub mod rag;
pub mod schema;
pub mod summaries;
pub mod vector;

pub use agents::AgentStore;
pub use conversations::ConversationStore;
pub use documents::DocumentStore;
pub use rag::RagStore;
pub use schema::init_db;
pub use summaries::SummaryStore;
pub use vector::{decode_vector, encode_vector};
