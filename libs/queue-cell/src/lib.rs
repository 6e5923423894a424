pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{QueueOrdering, QueueState};
pub use services::projector::{compare_queue, project_queue, sort_queue, QueueProjectionService};
