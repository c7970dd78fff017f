//! PostgreSQL store
//!
//! Row records are kept separate from the domain entities; conversion
//! happens at this boundary so the rest of the engine never sees sqlx types.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use fasting_coach_shared::models::{
    CompletionStatus, DayOfWeek, DrinkPolicy, EarlyEndReason, Plan, Session,
};
use fasting_coach_shared::phases::FastingPhase;

use super::RegimeStore;

/// Create a PostgreSQL connection pool with production-ready settings
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let connect_options =
        PgConnectOptions::from_str(database_url)?.application_name("fasting-coach");

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .test_before_acquire(true)
        .connect_with(connect_options)
        .await?;

    info!(max_connections, "Database pool created");
    Ok(pool)
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations completed successfully");
    Ok(())
}

/// Plan row as stored
#[derive(Debug, Clone, sqlx::FromRow)]
struct PlanRecord {
    id: Uuid,
    user_id: Uuid,
    name: String,
    target_hours: f64,
    active_days: serde_json::Value,
    start_time: NaiveTime,
    drink_policy: String,
    reminder_enabled: bool,
    reminder_offset_minutes: i64,
    is_active: bool,
    snoozed_until: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PlanRecord> for Plan {
    type Error = anyhow::Error;

    fn try_from(record: PlanRecord) -> Result<Self> {
        let active_days: BTreeSet<DayOfWeek> = serde_json::from_value(record.active_days)
            .context("Invalid active_days payload")?;
        let drink_policy = record
            .drink_policy
            .parse::<DrinkPolicy>()
            .map_err(anyhow::Error::msg)?;
        Ok(Plan {
            id: record.id,
            user_id: record.user_id,
            name: record.name,
            target_hours: record.target_hours,
            active_days,
            start_time: record.start_time,
            drink_policy,
            reminder_enabled: record.reminder_enabled,
            reminder_offset_minutes: record.reminder_offset_minutes,
            is_active: record.is_active,
            snoozed_until: record.snoozed_until,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

/// Session row as stored
#[derive(Debug, Clone, sqlx::FromRow)]
struct SessionRecord {
    id: Uuid,
    user_id: Uuid,
    plan_id: Option<Uuid>,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    target_hours: f64,
    status: String,
    phases_reached: serde_json::Value,
    note: Option<String>,
    early_end_reason: Option<String>,
    manually_edited: bool,
    skipped: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<SessionRecord> for Session {
    type Error = anyhow::Error;

    fn try_from(record: SessionRecord) -> Result<Self> {
        let status = record
            .status
            .parse::<CompletionStatus>()
            .map_err(anyhow::Error::msg)?;
        let phases_reached: Vec<FastingPhase> = serde_json::from_value(record.phases_reached)
            .context("Invalid phases_reached payload")?;
        let early_end_reason = record
            .early_end_reason
            .as_deref()
            .map(EarlyEndReason::from_str)
            .transpose()
            .map_err(anyhow::Error::msg)?;
        Ok(Session {
            id: record.id,
            user_id: record.user_id,
            plan_id: record.plan_id,
            started_at: record.started_at,
            ended_at: record.ended_at,
            target_hours: record.target_hours,
            status,
            phases_reached,
            note: record.note,
            early_end_reason,
            manually_edited: record.manually_edited,
            skipped: record.skipped,
            created_at: record.created_at,
        })
    }
}

/// PostgreSQL-backed [`RegimeStore`]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Check database health
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

const PLAN_COLUMNS: &str = "id, user_id, name, target_hours, active_days, start_time, \
     drink_policy, reminder_enabled, reminder_offset_minutes, is_active, snoozed_until, \
     created_at, updated_at";

const SESSION_COLUMNS: &str = "id, user_id, plan_id, started_at, ended_at, target_hours, \
     status, phases_reached, note, early_end_reason, manually_edited, skipped, created_at";

#[async_trait]
impl RegimeStore for PgStore {
    async fn load_active_plan(&self, user_id: Uuid) -> Result<Option<Plan>> {
        let record = sqlx::query_as::<_, PlanRecord>(&format!(
            "SELECT {PLAN_COLUMNS} FROM fasting_plans WHERE user_id = $1 AND is_active ORDER BY updated_at DESC LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        record.map(Plan::try_from).transpose()
    }

    async fn load_plan(&self, id: Uuid, user_id: Uuid) -> Result<Option<Plan>> {
        let record = sqlx::query_as::<_, PlanRecord>(&format!(
            "SELECT {PLAN_COLUMNS} FROM fasting_plans WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        record.map(Plan::try_from).transpose()
    }

    async fn save_plan(&self, plan: &Plan) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO fasting_plans
                (id, user_id, name, target_hours, active_days, start_time, drink_policy,
                 reminder_enabled, reminder_offset_minutes, is_active, snoozed_until,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                target_hours = EXCLUDED.target_hours,
                active_days = EXCLUDED.active_days,
                start_time = EXCLUDED.start_time,
                drink_policy = EXCLUDED.drink_policy,
                reminder_enabled = EXCLUDED.reminder_enabled,
                reminder_offset_minutes = EXCLUDED.reminder_offset_minutes,
                is_active = EXCLUDED.is_active,
                snoozed_until = EXCLUDED.snoozed_until,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(plan.id)
        .bind(plan.user_id)
        .bind(&plan.name)
        .bind(plan.target_hours)
        .bind(serde_json::to_value(&plan.active_days)?)
        .bind(plan.start_time)
        .bind(plan.drink_policy.as_str())
        .bind(plan.reminder_enabled)
        .bind(plan.reminder_offset_minutes)
        .bind(plan.is_active)
        .bind(plan.snoozed_until)
        .bind(plan.created_at)
        .bind(plan.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_latest_session(&self, user_id: Uuid) -> Result<Option<Session>> {
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {SESSION_COLUMNS} FROM fasting_sessions WHERE user_id = $1 ORDER BY started_at DESC, created_at DESC LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        record.map(Session::try_from).transpose()
    }

    async fn load_session(&self, id: Uuid, user_id: Uuid) -> Result<Option<Session>> {
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {SESSION_COLUMNS} FROM fasting_sessions WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        record.map(Session::try_from).transpose()
    }

    async fn load_sessions(
        &self,
        user_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Session>> {
        let records = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {SESSION_COLUMNS} FROM fasting_sessions \
             WHERE user_id = $1 AND started_at >= $2 AND started_at < $3 \
             ORDER BY started_at ASC"
        ))
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        records.into_iter().map(Session::try_from).collect()
    }

    async fn load_all_sessions(&self, user_id: Uuid) -> Result<Vec<Session>> {
        let records = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {SESSION_COLUMNS} FROM fasting_sessions WHERE user_id = $1 ORDER BY started_at ASC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        records.into_iter().map(Session::try_from).collect()
    }

    async fn save_session(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO fasting_sessions
                (id, user_id, plan_id, started_at, ended_at, target_hours, status,
                 phases_reached, note, early_end_reason, manually_edited, skipped, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
                plan_id = EXCLUDED.plan_id,
                started_at = EXCLUDED.started_at,
                ended_at = EXCLUDED.ended_at,
                target_hours = EXCLUDED.target_hours,
                status = EXCLUDED.status,
                phases_reached = EXCLUDED.phases_reached,
                note = EXCLUDED.note,
                early_end_reason = EXCLUDED.early_end_reason,
                manually_edited = EXCLUDED.manually_edited,
                skipped = EXCLUDED.skipped
            "#,
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(session.plan_id)
        .bind(session.started_at)
        .bind(session.ended_at)
        .bind(session.target_hours)
        .bind(session.status.as_str())
        .bind(serde_json::to_value(&session.phases_reached)?)
        .bind(&session.note)
        .bind(session.early_end_reason.map(|r| r.as_str()))
        .bind(session.manually_edited)
        .bind(session.skipped)
        .bind(session.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_session(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM fasting_sessions WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fasting_coach_shared::models::EndTrigger;

    #[test]
    fn plan_record_round_trips_to_domain() {
        let days: BTreeSet<DayOfWeek> =
            [DayOfWeek::Monday, DayOfWeek::Thursday].into_iter().collect();
        let plan = Plan::new(
            Uuid::new_v4(),
            "16:8",
            16.0,
            days,
            NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
        );
        let record = PlanRecord {
            id: plan.id,
            user_id: plan.user_id,
            name: plan.name.clone(),
            target_hours: plan.target_hours,
            active_days: serde_json::to_value(&plan.active_days).unwrap(),
            start_time: plan.start_time,
            drink_policy: plan.drink_policy.as_str().to_string(),
            reminder_enabled: plan.reminder_enabled,
            reminder_offset_minutes: plan.reminder_offset_minutes,
            is_active: plan.is_active,
            snoozed_until: plan.snoozed_until,
            created_at: plan.created_at,
            updated_at: plan.updated_at,
        };
        let back = Plan::try_from(record).unwrap();
        assert_eq!(back, plan);
    }

    #[test]
    fn session_record_round_trips_to_domain() {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 20, 0, 0).unwrap();
        let mut session = Session::begin(Uuid::new_v4(), Some(Uuid::new_v4()), 16.0, start);
        session.early_end_reason = Some(EarlyEndReason::ScheduleConflict);
        session.finalize(
            start + chrono::Duration::hours(10),
            EndTrigger::User,
            0.25,
        );
        let record = SessionRecord {
            id: session.id,
            user_id: session.user_id,
            plan_id: session.plan_id,
            started_at: session.started_at,
            ended_at: session.ended_at,
            target_hours: session.target_hours,
            status: session.status.as_str().to_string(),
            phases_reached: serde_json::to_value(&session.phases_reached).unwrap(),
            note: session.note.clone(),
            early_end_reason: session.early_end_reason.map(|r| r.as_str().to_string()),
            manually_edited: session.manually_edited,
            skipped: session.skipped,
            created_at: session.created_at,
        };
        let back = Session::try_from(record).unwrap();
        assert_eq!(back, session);
    }

    #[test]
    fn unknown_status_string_is_rejected() {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 20, 0, 0).unwrap();
        let record = SessionRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            plan_id: None,
            started_at: start,
            ended_at: None,
            target_hours: 16.0,
            status: "paused".to_string(),
            phases_reached: serde_json::json!([]),
            note: None,
            early_end_reason: None,
            manually_edited: false,
            skipped: false,
            created_at: start,
        };
        assert!(Session::try_from(record).is_err());
    }
}
