//! Command execution state and brick streaming

pub mod batch;
pub mod performer;

pub use batch::BatchStats;
pub use performer::CallPerformer;
