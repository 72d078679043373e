pub mod derivatives;
pub mod generator;

pub use derivatives::{DerivativesAssessment, DerivativesGate};
pub use generator::SignalGenerator;
