pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::*;
pub use services::allocator::SlotAllocatorService;
pub use services::breaks::BreakService;
pub use services::scheduler::{
    schedule_walk_ins, Occupant, ScheduleOutcome, ScheduleRequest, SlotShift, WalkInCandidate,
};
