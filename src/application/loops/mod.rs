pub mod dca;
pub mod pyramiding;
pub mod sniper;
pub mod sync;
pub mod time_exit;

pub use dca::DcaLoop;
pub use pyramiding::PyramidingLoop;
pub use sniper::SniperLoop;
pub use sync::PeriodicSyncLoop;
pub use time_exit::TimeExitLoop;
