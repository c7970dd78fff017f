//! Fasting Coach Engine
//!
//! The stateful orchestration layer around the shared domain model:
//!
//! - `regime`: the state machine — pure [`regime::evaluate`] plus the
//!   serialized mutation operations of [`regime::RegimeEngine`]
//! - `recovery`: missed-start / missed-end / stale-session detection
//! - `store`: the persistence boundary (in-memory and PostgreSQL)
//! - `notify`: the notification delivery boundary
//! - `config`: hierarchical configuration
//!
//! Storage and notification delivery are collaborators behind traits; the
//! presentation layer observes state through watch channels and mutates only
//! through the engine's operations.

pub mod config;
pub mod error;
pub mod notify;
pub mod recovery;
pub mod regime;
pub mod store;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use regime::{evaluate, RegimeEngine};
