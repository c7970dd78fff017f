//! In-memory store for tests and local development
//!
//! Same contract as the Postgres store, backed by RwLock'd maps. Clones on
//! the way in and out so callers never observe shared mutation.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use fasting_coach_shared::models::{Plan, Session};

use super::RegimeStore;

/// Map-backed [`RegimeStore`] implementation
#[derive(Default)]
pub struct MemoryStore {
    plans: RwLock<HashMap<Uuid, Plan>>,
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions, for test assertions
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl RegimeStore for MemoryStore {
    async fn load_active_plan(&self, user_id: Uuid) -> Result<Option<Plan>> {
        let plans = self.plans.read().await;
        Ok(plans
            .values()
            .find(|p| p.user_id == user_id && p.is_active)
            .cloned())
    }

    async fn load_plan(&self, id: Uuid, user_id: Uuid) -> Result<Option<Plan>> {
        let plans = self.plans.read().await;
        Ok(plans
            .get(&id)
            .filter(|p| p.user_id == user_id)
            .cloned())
    }

    async fn save_plan(&self, plan: &Plan) -> Result<()> {
        self.plans.write().await.insert(plan.id, plan.clone());
        Ok(())
    }

    async fn load_latest_session(&self, user_id: Uuid) -> Result<Option<Session>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .max_by_key(|s| (s.started_at, s.created_at))
            .cloned())
    }

    async fn load_session(&self, id: Uuid, user_id: Uuid) -> Result<Option<Session>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(&id)
            .filter(|s| s.user_id == user_id)
            .cloned())
    }

    async fn load_sessions(
        &self,
        user_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Session>> {
        let sessions = self.sessions.read().await;
        let mut out: Vec<Session> = sessions
            .values()
            .filter(|s| s.user_id == user_id && s.started_at >= start && s.started_at < end)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.started_at);
        Ok(out)
    }

    async fn load_all_sessions(&self, user_id: Uuid) -> Result<Vec<Session>> {
        let sessions = self.sessions.read().await;
        let mut out: Vec<Session> = sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.started_at);
        Ok(out)
    }

    async fn save_session(&self, session: &Session) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn delete_session(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        match sessions.get(&id) {
            Some(s) if s.user_id == user_id => {
                sessions.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
