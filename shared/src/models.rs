//! Data models for the fasting regime engine
//!
//! Plans are the persisted recurring schedules, sessions the concrete fast
//! attempts. `RegimeState` and `ConfirmationContext` are derived values and
//! are never written to storage.

use chrono::{DateTime, Duration, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::phases::{phases_reached, FastingPhase};

/// Tolerance applied when classifying a finished fast against its target,
/// in hours. Within `target ± tolerance` counts as completed.
pub const DEFAULT_COMPLETION_TOLERANCE_HOURS: f64 = 0.25;

/// Day of the week a plan is active on.
///
/// Ordered Monday-first so day sets render in schedule order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    pub fn to_chrono(self) -> Weekday {
        match self {
            DayOfWeek::Monday => Weekday::Mon,
            DayOfWeek::Tuesday => Weekday::Tue,
            DayOfWeek::Wednesday => Weekday::Wed,
            DayOfWeek::Thursday => Weekday::Thu,
            DayOfWeek::Friday => Weekday::Fri,
            DayOfWeek::Saturday => Weekday::Sat,
            DayOfWeek::Sunday => Weekday::Sun,
        }
    }

    pub fn from_chrono(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Mon => DayOfWeek::Monday,
            Weekday::Tue => DayOfWeek::Tuesday,
            Weekday::Wed => DayOfWeek::Wednesday,
            Weekday::Thu => DayOfWeek::Thursday,
            Weekday::Fri => DayOfWeek::Friday,
            Weekday::Sat => DayOfWeek::Saturday,
            Weekday::Sun => DayOfWeek::Sunday,
        }
    }
}

/// What the user may drink during the fasting window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DrinkPolicy {
    /// Water only
    Strict,
    /// Water, black coffee and unsweetened tea
    #[default]
    Practical,
}

impl DrinkPolicy {
    pub fn description(&self) -> &'static str {
        match self {
            DrinkPolicy::Strict => "Water only",
            DrinkPolicy::Practical => "Water, black coffee and unsweetened tea",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DrinkPolicy::Strict => "strict",
            DrinkPolicy::Practical => "practical",
        }
    }
}

impl std::str::FromStr for DrinkPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(DrinkPolicy::Strict),
            "practical" => Ok(DrinkPolicy::Practical),
            other => Err(format!("Unknown drink policy: {}", other)),
        }
    }
}

// ============================================================================
// Plan
// ============================================================================

/// A recurring fasting regime.
///
/// At most one plan per user is active at a time. Superseded plans are
/// deactivated, never deleted, so historical sessions keep their attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Display name, e.g. "16:8 weekday fast"
    pub name: String,
    /// Target fast length in hours
    pub target_hours: f64,
    /// Weekdays the fast is scheduled on
    pub active_days: BTreeSet<DayOfWeek>,
    /// Preferred daily start, timezone-naive. Interpreted in the user's
    /// current local zone at evaluation time.
    pub start_time: NaiveTime,
    pub drink_policy: DrinkPolicy,
    pub reminder_enabled: bool,
    /// Minutes before the target end the reminder fires
    pub reminder_offset_minutes: i64,
    pub is_active: bool,
    /// Deferred next-start projection. Cleared when a session starts.
    /// Persisted so the eating-state projection survives restarts.
    pub snoozed_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    /// Create an active plan with default reminder and drink settings
    pub fn new(
        user_id: Uuid,
        name: impl Into<String>,
        target_hours: f64,
        active_days: BTreeSet<DayOfWeek>,
        start_time: NaiveTime,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: name.into(),
            target_hours,
            active_days,
            start_time,
            drink_policy: DrinkPolicy::default(),
            reminder_enabled: false,
            reminder_offset_minutes: 30,
            is_active: true,
            snoozed_until: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// Why a fast ended before its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarlyEndReason {
    FeltUnwell,
    ScheduleConflict,
    BrokeEarly,
    Other,
}

impl EarlyEndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EarlyEndReason::FeltUnwell => "felt_unwell",
            EarlyEndReason::ScheduleConflict => "schedule_conflict",
            EarlyEndReason::BrokeEarly => "broke_early",
            EarlyEndReason::Other => "other",
        }
    }
}

impl std::str::FromStr for EarlyEndReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "felt_unwell" => Ok(EarlyEndReason::FeltUnwell),
            "schedule_conflict" => Ok(EarlyEndReason::ScheduleConflict),
            "broke_early" => Ok(EarlyEndReason::BrokeEarly),
            "other" => Ok(EarlyEndReason::Other),
            other => Err(format!("Unknown early-end reason: {}", other)),
        }
    }
}

/// How a finalization was triggered. Drives the early-end vs. failed split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndTrigger {
    /// The user explicitly confirmed the end
    User,
    /// The recovery coordinator resolved an abandoned session
    System,
}

/// Completion classification of a finished (or skipped) session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    /// Still running, not yet finalized
    #[default]
    Active,
    /// Reached the target within tolerance
    Completed,
    /// Exceeded the target by more than the tolerance
    OverGoal,
    /// Ended before the target by explicit user action
    EarlyEnd,
    /// Ended before the target with no explicit confirmation
    Failed,
    /// The user declined to fast for the scheduled slot
    Skipped,
}

impl CompletionStatus {
    /// Classify a finished fast.
    ///
    /// Pure function of the actual and target durations plus how the end was
    /// triggered; recomputed at finalization and on manual edits, never
    /// mutated otherwise.
    pub fn classify(
        actual_hours: f64,
        target_hours: f64,
        trigger: EndTrigger,
        tolerance_hours: f64,
    ) -> Self {
        if actual_hours >= target_hours + tolerance_hours {
            CompletionStatus::OverGoal
        } else if actual_hours >= target_hours - tolerance_hours {
            CompletionStatus::Completed
        } else {
            match trigger {
                EndTrigger::User => CompletionStatus::EarlyEnd,
                EndTrigger::System => CompletionStatus::Failed,
            }
        }
    }

    /// Whether this status counts toward streaks and the completion rate
    pub fn is_goal_met(&self) -> bool {
        matches!(self, CompletionStatus::Completed | CompletionStatus::OverGoal)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionStatus::Active => "active",
            CompletionStatus::Completed => "completed",
            CompletionStatus::OverGoal => "over_goal",
            CompletionStatus::EarlyEnd => "early_end",
            CompletionStatus::Failed => "failed",
            CompletionStatus::Skipped => "skipped",
        }
    }
}

impl std::str::FromStr for CompletionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(CompletionStatus::Active),
            "completed" => Ok(CompletionStatus::Completed),
            "over_goal" => Ok(CompletionStatus::OverGoal),
            "early_end" => Ok(CompletionStatus::EarlyEnd),
            "failed" => Ok(CompletionStatus::Failed),
            "skipped" => Ok(CompletionStatus::Skipped),
            other => Err(format!("Unknown completion status: {}", other)),
        }
    }
}

/// One concrete fasting attempt.
///
/// Duration and progress are always derived from the timestamps, never
/// stored, so a process restart cannot leave them stale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    /// None for ad hoc fasts started outside any plan
    pub plan_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    /// None while the fast is still open
    pub ended_at: Option<DateTime<Utc>>,
    /// Copied from the plan at creation so later plan edits don't rewrite
    /// history
    pub target_hours: f64,
    pub status: CompletionStatus,
    /// Phases passed through, ascending, each appended at most once
    pub phases_reached: Vec<FastingPhase>,
    pub note: Option<String>,
    pub early_end_reason: Option<EarlyEndReason>,
    pub manually_edited: bool,
    pub skipped: bool,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Open a new fast starting at `started_at`
    pub fn begin(
        user_id: Uuid,
        plan_id: Option<Uuid>,
        target_hours: f64,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            plan_id,
            started_at,
            ended_at: None,
            target_hours,
            status: CompletionStatus::Active,
            phases_reached: Vec::new(),
            note: None,
            early_end_reason: None,
            manually_edited: false,
            skipped: false,
            created_at: Utc::now(),
        }
    }

    /// A placeholder for a declined scheduled slot, zero actual duration
    pub fn skipped_slot(
        user_id: Uuid,
        plan_id: Option<Uuid>,
        target_hours: f64,
        slot: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            plan_id,
            started_at: slot,
            ended_at: Some(slot),
            target_hours,
            status: CompletionStatus::Skipped,
            phases_reached: Vec::new(),
            note: None,
            early_end_reason: None,
            manually_edited: false,
            skipped: true,
            created_at: Utc::now(),
        }
    }

    /// Still running: no end timestamp and not a skipped placeholder
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none() && !self.skipped
    }

    /// Elapsed fast length in hours, using `now` while the fast is open
    pub fn actual_hours(&self, now: DateTime<Utc>) -> f64 {
        let end = self.ended_at.unwrap_or(now);
        (end - self.started_at).num_seconds() as f64 / 3600.0
    }

    /// Progress toward the target, clamped to [0, 1] for display
    pub fn progress_ratio(&self, now: DateTime<Utc>) -> f64 {
        if self.target_hours <= 0.0 {
            return 0.0;
        }
        (self.actual_hours(now) / self.target_hours).clamp(0.0, 1.0)
    }

    /// Instant the fast reaches its target
    pub fn target_end(&self) -> DateTime<Utc> {
        self.started_at + hours_duration(self.target_hours)
    }

    /// Zero duration with the record kept for calendar continuity
    pub fn is_cleared(&self) -> bool {
        !self.skipped && self.ended_at == Some(self.started_at)
    }

    /// Append every phase reached by the current elapsed time, each at most
    /// once, in ascending order
    pub fn sync_phases(&mut self, now: DateTime<Utc>) {
        for phase in phases_reached(self.actual_hours(now)) {
            if !self.phases_reached.contains(&phase) {
                self.phases_reached.push(phase);
            }
        }
    }

    /// Rebuild the phase trail from scratch after a timestamp edit
    pub fn rebuild_phases(&mut self, now: DateTime<Utc>) {
        self.phases_reached = phases_reached(self.actual_hours(now));
    }

    /// Close the session at `ended_at` and classify it
    pub fn finalize(
        &mut self,
        ended_at: DateTime<Utc>,
        trigger: EndTrigger,
        tolerance_hours: f64,
    ) {
        self.ended_at = Some(ended_at);
        self.status = CompletionStatus::classify(
            self.actual_hours(ended_at),
            self.target_hours,
            trigger,
            tolerance_hours,
        );
        self.sync_phases(ended_at);
    }

    /// Reset the duration to zero while keeping the record. Terminal.
    pub fn clear(&mut self) {
        self.ended_at = Some(self.started_at);
        if self.status == CompletionStatus::Active {
            self.status = CompletionStatus::EarlyEnd;
        }
        self.phases_reached.clear();
        self.manually_edited = true;
    }
}

/// Convert fractional hours to a chrono duration, rounded to whole seconds
pub fn hours_duration(hours: f64) -> Duration {
    Duration::seconds((hours * 3600.0).round() as i64)
}

// ============================================================================
// Derived regime state
// ============================================================================

/// The current logical regime state, always recomputed from the active plan,
/// the latest session and the current wall clock. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RegimeState {
    /// No active plan and no open session
    #[default]
    Inactive,
    /// A fast is open
    Fasting {
        started_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    },
    /// Between fasts; `next_fast_starts_at` reflects any snooze in effect
    Eating {
        next_fast_starts_at: Option<DateTime<Utc>>,
    },
}

impl RegimeState {
    pub fn is_fasting(&self) -> bool {
        matches!(self, RegimeState::Fasting { .. })
    }

    pub fn is_eating(&self) -> bool {
        matches!(self, RegimeState::Eating { .. })
    }
}

// ============================================================================
// Pending confirmation
// ============================================================================

/// Which ambiguity the user is being asked to resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationKind {
    /// The scheduled start passed without the fast being confirmed
    MissedStart,
    /// The target end passed without the fast being closed
    MissedEnd,
    /// The open session is old enough to indicate abandonment
    StaleSession,
}

/// Ephemeral description of a pending clock-in/clock-out decision.
///
/// Never persisted — the triggering condition is re-derivable from the plan,
/// the latest session and the wall clock, so it survives restarts without a
/// stored flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationContext {
    pub kind: ConfirmationKind,
    pub plan_id: Option<Uuid>,
    pub plan_name: Option<String>,
    pub target_hours: f64,
    /// The instant in question: the missed scheduled start, or the passed
    /// target end
    pub scheduled_at: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day_set(days: &[DayOfWeek]) -> BTreeSet<DayOfWeek> {
        days.iter().copied().collect()
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn classify_over_goal_beyond_tolerance() {
        // 17h actual against a 16h target is more than 0.25h over
        let status = CompletionStatus::classify(17.0, 16.0, EndTrigger::User, 0.25);
        assert_eq!(status, CompletionStatus::OverGoal);
    }

    #[test]
    fn classify_completed_within_tolerance() {
        let status = CompletionStatus::classify(16.1, 16.0, EndTrigger::User, 0.25);
        assert_eq!(status, CompletionStatus::Completed);
        let status = CompletionStatus::classify(15.8, 16.0, EndTrigger::User, 0.25);
        assert_eq!(status, CompletionStatus::Completed);
    }

    #[test]
    fn classify_early_end_vs_failed_by_trigger() {
        let user = CompletionStatus::classify(10.0, 16.0, EndTrigger::User, 0.25);
        assert_eq!(user, CompletionStatus::EarlyEnd);
        let system = CompletionStatus::classify(10.0, 16.0, EndTrigger::System, 0.25);
        assert_eq!(system, CompletionStatus::Failed);
    }

    #[test]
    fn actual_hours_uses_now_while_open() {
        let start = utc(2026, 3, 2, 20, 0);
        let session = Session::begin(Uuid::new_v4(), None, 16.0, start);
        assert!(session.is_open());
        let now = utc(2026, 3, 3, 8, 0);
        assert!((session.actual_hours(now) - 12.0).abs() < 1e-9);
        assert!((session.progress_ratio(now) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn finalize_sets_status_and_phase_trail() {
        let start = utc(2026, 3, 2, 20, 0);
        let mut session = Session::begin(Uuid::new_v4(), None, 16.0, start);
        session.finalize(utc(2026, 3, 3, 12, 0), EndTrigger::User, 0.25);
        assert_eq!(session.status, CompletionStatus::Completed);
        assert!(!session.is_open());
        // a 16h fast lands exactly on the autophagy band boundary
        assert_eq!(
            session.phases_reached.last(),
            Some(&FastingPhase::AutophagyPotential)
        );
    }

    #[test]
    fn sync_phases_appends_each_phase_once() {
        let start = utc(2026, 3, 2, 20, 0);
        let mut session = Session::begin(Uuid::new_v4(), None, 16.0, start);
        session.sync_phases(utc(2026, 3, 3, 1, 0)); // 5h
        session.sync_phases(utc(2026, 3, 3, 1, 30)); // still 5.5h
        assert_eq!(
            session.phases_reached,
            vec![FastingPhase::PostMeal, FastingPhase::FuelSwitching]
        );
    }

    #[test]
    fn skipped_slot_has_zero_duration() {
        let slot = utc(2026, 3, 2, 20, 0);
        let session = Session::skipped_slot(Uuid::new_v4(), None, 16.0, slot);
        assert_eq!(session.status, CompletionStatus::Skipped);
        assert!(!session.is_open());
        assert_eq!(session.actual_hours(utc(2026, 3, 3, 9, 0)), 0.0);
    }

    #[test]
    fn clear_zeroes_duration_but_keeps_record() {
        let start = utc(2026, 3, 2, 20, 0);
        let mut session = Session::begin(Uuid::new_v4(), None, 16.0, start);
        session.finalize(utc(2026, 3, 3, 12, 0), EndTrigger::User, 0.25);
        session.clear();
        assert!(session.is_cleared());
        assert_eq!(session.actual_hours(utc(2026, 3, 4, 0, 0)), 0.0);
        assert!(session.manually_edited);
    }

    #[test]
    fn plan_round_trips_through_serde() {
        let plan = Plan::new(
            Uuid::new_v4(),
            "16:8 weekday fast",
            16.0,
            day_set(&[DayOfWeek::Monday, DayOfWeek::Wednesday, DayOfWeek::Friday]),
            NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
        );
        let json = serde_json::to_string(&plan).unwrap();
        let back: Plan = serde_json::from_str(&json).unwrap();
        assert_eq!(plan, back);
    }

    #[test]
    fn session_round_trips_through_serde() {
        let mut session =
            Session::begin(Uuid::new_v4(), Some(Uuid::new_v4()), 18.0, utc(2026, 3, 2, 20, 0));
        session.note = Some("travel day".to_string());
        session.finalize(utc(2026, 3, 3, 10, 0), EndTrigger::User, 0.25);
        let json = serde_json::to_string(&session).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(session, back);
    }

    #[test]
    fn regime_state_serializes_with_tag() {
        let state = RegimeState::Fasting {
            started_at: utc(2026, 3, 2, 20, 0),
            ends_at: utc(2026, 3, 3, 12, 0),
        };
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"state\":\"fasting\""));
        let back: RegimeState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, back);
    }
}
