//! Entity types, one module per entity family.
//!
//! All persistent-identity entities derive `Serialize`/`Deserialize` so they
//! can cross the store boundary without a second wire representation.

pub mod assessment;
pub mod document;
pub mod dr;
pub mod execution;
pub mod scheduled;
pub mod source;
pub mod task;
pub mod trigger;
pub mod workflow_def;

pub use assessment::*;
pub use document::*;
pub use dr::*;
pub use execution::*;
pub use scheduled::*;
pub use source::*;
pub use task::*;
pub use trigger::*;
pub use workflow_def::*;
