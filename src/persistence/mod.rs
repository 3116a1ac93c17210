//! Persistence layer modules.

pub mod pool_manager;
pub mod query_repo;
pub mod schema;
pub mod store;
pub mod user_repo;

pub use pool_manager::{PoolKind, PoolManager};
pub use query_repo::QueryRepo;
pub use store::ConversationStore;
pub use user_repo::{UserLookup, UserRepo};

/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;
