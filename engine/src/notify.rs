//! Notification boundary
//!
//! The engine computes *when* a notification should logically fire; delivery
//! belongs entirely to the host platform behind the [`Notifier`] trait.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fasting_coach_shared::models::{Plan, RegimeState, Session};

/// What a scheduled notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// The next scheduled fast is about to begin
    FastStart,
    /// The fast's target end is `reminder_offset_minutes` away
    EndReminder,
}

/// Payload handed to the delivery collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub plan_id: Option<Uuid>,
}

/// Delivery contract. Implementations own all OS/platform specifics.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn schedule(&self, at: DateTime<Utc>, payload: NotificationPayload) -> Result<()>;

    /// Drop every pending notification for a plan
    async fn cancel_for_plan(&self, plan_id: Uuid) -> Result<()>;
}

/// When the end-of-fast reminder for an open session should fire.
///
/// `None` when reminders are off, the session is plan-less, or the reminder
/// instant has already passed.
pub fn end_reminder_at(
    plan: &Plan,
    session: &Session,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if !plan.reminder_enabled || session.plan_id != Some(plan.id) {
        return None;
    }
    let at = session.target_end() - Duration::minutes(plan.reminder_offset_minutes);
    (at > now).then_some(at)
}

/// When the next-start notification should fire, from the evaluated state
pub fn next_start_at(state: &RegimeState) -> Option<DateTime<Utc>> {
    match state {
        RegimeState::Eating {
            next_fast_starts_at,
        } => *next_fast_starts_at,
        _ => None,
    }
}

/// No-op notifier for hosts without a delivery channel
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn schedule(&self, _at: DateTime<Utc>, _payload: NotificationPayload) -> Result<()> {
        Ok(())
    }

    async fn cancel_for_plan(&self, _plan_id: Uuid) -> Result<()> {
        Ok(())
    }
}

/// Captures scheduled notifications for test assertions
#[derive(Default)]
pub struct RecordingNotifier {
    scheduled: std::sync::Mutex<Vec<(DateTime<Utc>, NotificationPayload)>>,
    cancelled: std::sync::Mutex<Vec<Uuid>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheduled(&self) -> Vec<(DateTime<Utc>, NotificationPayload)> {
        self.scheduled.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<Uuid> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn schedule(&self, at: DateTime<Utc>, payload: NotificationPayload) -> Result<()> {
        self.scheduled.lock().unwrap().push((at, payload));
        Ok(())
    }

    async fn cancel_for_plan(&self, plan_id: Uuid) -> Result<()> {
        self.cancelled.lock().unwrap().push(plan_id);
        Ok(())
    }
}
