//! Types shared by the genoflow orchestrator and its tooling.

pub mod constants;
pub mod errors;

pub use errors::{GenoflowError, GenoflowResult};
