//! Queue draining and per-item execution.

pub mod dispatcher;
pub mod executor;
pub mod supervisor;

pub use dispatcher::{Collaborators, Dispatcher};
pub use executor::GenerationExecutor;
pub use supervisor::settle;
