//! SQLite persistence for Parley.
//!
//! A thin repository over one SQLite connection holding users, their
//! conversations, the messages inside them and per-user memory documents. Multi-row writes (a new
//! conversation with its first exchange, an assistant reply together with the
//! conversation's last-message pointer) each run in a single transaction.

pub mod error;
pub mod models;
pub mod store;

pub use error::{Result, StoreError};
pub use models::{
    Conversation, ConversationSummary, ConversationUpdate, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
    MemoryRecord, Message, MessageCursor, MessagePage, MessageRole, NewConversation, Role, User,
};
pub use store::ConversationStore;
