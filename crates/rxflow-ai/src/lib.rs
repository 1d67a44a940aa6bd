//! Model adapter for AI-assisted clinical analysis.
//!
//! This crate turns an aggregated patient case into a prompt, hands it to a
//! [`ClinicalModel`], and parses the model's JSON reply into a validated
//! [`ClinicalAnalysis`]. The model itself is a black box; [`MockModel`] and
//! [`ScriptedModel`] stand in for it in development and tests.

pub mod extraction;
pub mod model;
pub mod prompts;

pub use extraction::*;
pub use model::*;
pub use prompts::*;
