pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::*;
pub use services::capacity::{advance_split, session_capacities, SessionCapacity};
pub use services::delay::{doctor_delay_minutes, effective_session_start, BreakInterval};
pub use services::slots::{generate_day_slots, DaySlots, EffectiveSession, PhysicalSlot, SlotError};
