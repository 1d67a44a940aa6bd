//! Analytics and compliance export.

mod analytics;
mod compliance;

pub use analytics::*;
pub use compliance::*;
