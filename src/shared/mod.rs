pub mod ids;
pub mod logging;
pub mod time;

pub use ids::generate_id;
pub use logging::EventLog;
pub use time::{now_iso, now_millis};
