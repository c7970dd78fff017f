//! Confirmation/recovery coordinator
//!
//! Detects the three ambiguity conditions — missed start, missed end, stale
//! session — and describes the decision the user must make instead of
//! mutating anything. Detection is a pure derived query over (plan, latest
//! session, now), so a pending condition survives process restarts without
//! any stored flag, and a dismissed prompt simply re-derives next time.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

use fasting_coach_shared::models::{
    ConfirmationContext, ConfirmationKind, Plan, Session,
};
use fasting_coach_shared::temporal;

use crate::config::RecoveryConfig;

/// How the user resolved a stale-session prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleResolution {
    /// The fast actually ended at this instant; classify it system-triggered
    EndedAt(DateTime<Utc>),
    /// The fast is genuinely still running; keep it open
    StillFasting,
}

/// Detect at most one pending condition, by precedence: stale session, then
/// missed end, then missed start.
///
/// Returns `None` when nothing needs the user's attention. Never mutates
/// state — resolution happens through the engine's confirm operations.
pub fn detect(
    plan: Option<&Plan>,
    latest: Option<&Session>,
    now: DateTime<Utc>,
    cfg: &RecoveryConfig,
    tz: Tz,
) -> Option<ConfirmationContext> {
    if let Some(session) = latest.filter(|s| s.is_open()) {
        let plan_for_session = plan.filter(|p| session.plan_id == Some(p.id));
        let name = plan_for_session.map(|p| p.name.clone());

        if now - session.started_at >= Duration::hours(cfg.stale_session_hours) {
            return Some(ConfirmationContext {
                kind: ConfirmationKind::StaleSession,
                plan_id: session.plan_id,
                plan_name: name,
                target_hours: session.target_hours,
                scheduled_at: session.target_end(),
                detected_at: now,
            });
        }

        if now - session.target_end() > Duration::minutes(cfg.missed_end_grace_minutes) {
            return Some(ConfirmationContext {
                kind: ConfirmationKind::MissedEnd,
                plan_id: session.plan_id,
                plan_name: name,
                target_hours: session.target_hours,
                scheduled_at: session.target_end(),
                detected_at: now,
            });
        }

        return None;
    }

    let plan = plan.filter(|p| p.is_active)?;

    // a pending snooze already defers the slot; prompt again once it passes
    if plan.snoozed_until.is_some_and(|su| su > now) {
        return None;
    }

    let slot = temporal::previous_scheduled_start(&plan.active_days, plan.start_time, now, tz)?;
    if now - slot > Duration::minutes(cfg.missed_start_window_minutes) {
        return None;
    }
    // the slot is covered if any session started at/after it, or a fast was
    // still running when it came around
    if latest.is_some_and(|s| {
        s.started_at >= slot || s.ended_at.is_some_and(|e| e >= slot)
    }) {
        return None;
    }

    Some(ConfirmationContext {
        kind: ConfirmationKind::MissedStart,
        plan_id: Some(plan.id),
        plan_name: Some(plan.name.clone()),
        target_hours: plan.target_hours,
        scheduled_at: slot,
        detected_at: now,
    })
}
