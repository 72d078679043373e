pub mod blacklist;
pub mod excursion;
pub mod position_monitor;

pub use blacklist::Blacklist;
pub use excursion::{Excursion, ExcursionTracker};
pub use position_monitor::PositionMonitor;
