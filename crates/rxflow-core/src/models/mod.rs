//! Domain models for the diagnostic workflow.

mod adherence;
mod audit;
mod follow_up;
mod intervention;
mod patient;
mod request;
mod result;
mod transition;
mod workspace;

pub use adherence::*;
pub use audit::*;
pub use follow_up::*;
pub use intervention::*;
pub use patient::*;
pub use request::*;
pub use result::*;
pub use transition::*;
pub use workspace::*;
