//! Storage boundary for plans and sessions
//!
//! The engine only ever talks to the [`RegimeStore`] trait. Persistence is
//! assumed eventually consistent: after any successful save the engine
//! re-evaluates from storage instead of trusting its in-memory copy.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use fasting_coach_shared::models::{Plan, Session};

pub use memory::MemoryStore;
pub use postgres::{create_pool, run_migrations, PgStore};

/// Data access contract consumed by the regime engine
#[async_trait]
pub trait RegimeStore: Send + Sync {
    /// The single active plan for a user, if any
    async fn load_active_plan(&self, user_id: Uuid) -> Result<Option<Plan>>;

    /// A plan by id, active or not
    async fn load_plan(&self, id: Uuid, user_id: Uuid) -> Result<Option<Plan>>;

    /// Insert or update a plan
    async fn save_plan(&self, plan: &Plan) -> Result<()>;

    /// The most recently started session for a user
    async fn load_latest_session(&self, user_id: Uuid) -> Result<Option<Session>>;

    /// A session by id
    async fn load_session(&self, id: Uuid, user_id: Uuid) -> Result<Option<Session>>;

    /// Sessions whose start falls in `[start, end)`, ascending by start.
    /// Callers derive the range from a local calendar day via the temporal
    /// layer; the store itself only sees UTC instants.
    async fn load_sessions(
        &self,
        user_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Session>>;

    /// The full session history, ascending by start
    async fn load_all_sessions(&self, user_id: Uuid) -> Result<Vec<Session>>;

    /// Insert or update a session
    async fn save_session(&self, session: &Session) -> Result<()>;

    /// Hard-delete a session. Returns whether a row was removed.
    async fn delete_session(&self, id: Uuid, user_id: Uuid) -> Result<bool>;
}
