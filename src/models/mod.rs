//! Data models for the theatre allocation board.
//!
//! Field names serialize in camelCase to match the stored board data.

mod day;
mod person;
mod resource;
mod settings;
mod snapshot;

pub use day::*;
pub use person::*;
pub use resource::*;
pub use settings::*;
pub use snapshot::*;
