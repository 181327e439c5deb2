//! Flash memory interface drivers

pub mod engine;
pub mod nor;
pub mod timing;

pub use engine::{FlashEngine, FlashStatus, ReadProtection};
pub use nor::FlashRegion;
pub use timing::AccessControl;
