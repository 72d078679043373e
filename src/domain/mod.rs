pub mod errors;
pub mod indicators;
pub mod ports;
pub mod sectors;
pub mod types;
