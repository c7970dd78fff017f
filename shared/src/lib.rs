//! Fasting Coach Shared Library
//!
//! This crate contains the pure domain layer shared by the engine and any
//! host surface: entities, the metabolic phase classifier, timezone-safe
//! temporal arithmetic, the analytics reducer, and input validation.
//! Nothing here performs I/O.

pub mod analytics;
pub mod models;
pub mod phases;
pub mod temporal;
pub mod validation;

// Re-export commonly used items
pub use analytics::{FastingStats, WeekSummary};
pub use models::{
    CompletionStatus, ConfirmationContext, ConfirmationKind, DayOfWeek, DrinkPolicy,
    EarlyEndReason, EndTrigger, Plan, RegimeState, Session,
};
pub use phases::{phase_for_elapsed, phases_reached, FastingPhase};
