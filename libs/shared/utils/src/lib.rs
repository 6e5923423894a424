pub mod clock;
pub mod ids;

pub use clock::{Clock, ClockError, FixedClock, SystemClock};
pub use ids::sanitize_doc_id;
