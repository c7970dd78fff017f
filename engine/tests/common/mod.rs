//! Common test utilities for engine integration tests

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::America::New_York;
use chrono_tz::Tz;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

use fasting_coach_engine::config::EngineConfig;
use fasting_coach_engine::notify::RecordingNotifier;
use fasting_coach_engine::regime::RegimeEngine;
use fasting_coach_engine::store::{MemoryStore, RegimeStore};
use fasting_coach_shared::models::{DayOfWeek, Plan, Session};
use fasting_coach_shared::temporal::resolve_local;

pub const TZ: Tz = New_York;

/// Engine wired to an in-memory store and a recording notifier
pub struct TestRig {
    pub engine: Arc<RegimeEngine>,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub user_id: Uuid,
}

impl TestRig {
    pub fn new() -> Self {
        init_tracing();
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let user_id = Uuid::new_v4();
        let engine = Arc::new(
            RegimeEngine::new(
                user_id,
                store.clone(),
                notifier.clone(),
                &test_config(),
            )
            .expect("engine construction"),
        );
        Self {
            engine,
            store,
            notifier,
            user_id,
        }
    }

    /// The stored active plan, unwrapped for assertions
    pub async fn store_plan(&self) -> Plan {
        self.store
            .load_active_plan(self.user_id)
            .await
            .unwrap()
            .expect("active plan")
    }

    /// A stored plan by id, active or not
    pub async fn store_plan_by_id(&self, id: Uuid) -> Plan {
        self.store
            .load_plan(id, self.user_id)
            .await
            .unwrap()
            .expect("plan")
    }

    /// A stored session by id, if still present
    pub async fn store_session(&self, id: Uuid) -> Option<Session> {
        self.store.load_session(id, self.user_id).await.unwrap()
    }

    /// A second engine over the same store, as after a process restart
    pub fn restarted(&self) -> Arc<RegimeEngine> {
        Arc::new(
            RegimeEngine::new(
                self.user_id,
                self.store.clone(),
                self.notifier.clone(),
                &test_config(),
            )
            .expect("engine construction"),
        )
    }
}

pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.timezone = "America/New_York".to_string();
    config
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("fasting_coach_engine=debug")
        .with_test_writer()
        .try_init();
}

/// A wall-clock instant in the test timezone
pub fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    resolve_local(
        NaiveDate::from_ymd_opt(y, mo, d).unwrap(),
        NaiveTime::from_hms_opt(h, mi, 0).unwrap(),
        TZ,
    )
}

/// 16h fast, Mondays at 20:00
pub fn monday_plan(user_id: Uuid) -> Plan {
    let days: BTreeSet<DayOfWeek> = [DayOfWeek::Monday].into_iter().collect();
    Plan::new(
        user_id,
        "16:8",
        16.0,
        days,
        NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
    )
}

/// 16h fast, every evening at 20:00
pub fn daily_plan(user_id: Uuid) -> Plan {
    let days: BTreeSet<DayOfWeek> = [
        DayOfWeek::Monday,
        DayOfWeek::Tuesday,
        DayOfWeek::Wednesday,
        DayOfWeek::Thursday,
        DayOfWeek::Friday,
        DayOfWeek::Saturday,
        DayOfWeek::Sunday,
    ]
    .into_iter()
    .collect();
    Plan::new(
        user_id,
        "Daily 16:8",
        16.0,
        days,
        NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
    )
}
