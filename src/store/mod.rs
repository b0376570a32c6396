//! 存储层：领域记录、TaskStore 抽象与实现（内存 / SQLite）

pub mod memory;
pub mod sqlite;
pub mod traits;
pub mod types;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{StoreError, TaskStore};
pub use types::{ConversationRecord, NewPost, Post, PostType, RateCounter, ReplyTask, TaskStatus};
