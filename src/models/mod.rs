//! Domain model module declarations.

pub mod history;
pub mod user;
pub mod work_item;

pub use history::{HistoryEntry, QueryRecord};
pub use user::User;
pub use work_item::WorkItem;
