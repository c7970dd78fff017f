//! Regime state machine
//!
//! The central correctness property: the regime state is always a pure
//! function of persisted timestamps and the current wall clock, never of
//! counted ticks or cached flags. [`evaluate`] embodies that function;
//! [`RegimeEngine`] wraps it with the serialized mutation operations and the
//! observer plumbing.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use fasting_coach_shared::models::{
    CompletionStatus, ConfirmationContext, ConfirmationKind, EarlyEndReason, EndTrigger, Plan,
    RegimeState, Session,
};
use fasting_coach_shared::analytics::{self, FastingStats, WeekSummary};
use fasting_coach_shared::phases::phases_reached;
use fasting_coach_shared::{temporal, validation};

use crate::config::{EngineConfig, RecoveryConfig};
use crate::error::{EngineError, EngineResult};
use crate::notify::{self, NotificationKind, NotificationPayload, Notifier};
use crate::recovery::{self, StaleResolution};
use crate::store::RegimeStore;

/// Derive the current regime state.
///
/// Pure and side-effect free: no I/O, no clock access, deterministic for
/// identical inputs. Safe to call on every UI tick.
pub fn evaluate(
    plan: Option<&Plan>,
    latest: Option<&Session>,
    now: DateTime<Utc>,
    tz: Tz,
) -> RegimeState {
    if let Some(session) = latest.filter(|s| s.is_open()) {
        return RegimeState::Fasting {
            started_at: session.started_at,
            ends_at: session.target_end(),
        };
    }

    if let Some(plan) = plan.filter(|p| p.is_active) {
        // a snooze in effect overrides the schedule projection; a skipped
        // future slot pushes the projection past itself
        let next = match plan.snoozed_until.filter(|su| *su > now) {
            Some(snoozed) => Some(snoozed),
            None => {
                let anchor = latest
                    .filter(|s| s.skipped && s.started_at > now)
                    .map(|s| s.started_at)
                    .unwrap_or(now);
                temporal::next_scheduled_start(&plan.active_days, plan.start_time, anchor, tz)
            }
        };
        return RegimeState::Eating {
            next_fast_starts_at: next,
        };
    }

    RegimeState::Inactive
}

/// Stateful engine for one user's regime.
///
/// Writes are serialized by an internal lock: at most one mutation is in
/// flight per engine, while readers poll or subscribe freely. Published
/// state only advances after the corresponding save succeeded.
pub struct RegimeEngine {
    user_id: Uuid,
    tz: Tz,
    tolerance_hours: f64,
    recovery_cfg: RecoveryConfig,
    tick_interval_seconds: u64,
    store: Arc<dyn RegimeStore>,
    notifier: Arc<dyn Notifier>,
    state_tx: watch::Sender<RegimeState>,
    confirmation_tx: watch::Sender<Option<ConfirmationContext>>,
    write_lock: Mutex<()>,
    ticker: StdMutex<Option<JoinHandle<()>>>,
}

impl RegimeEngine {
    pub fn new(
        user_id: Uuid,
        store: Arc<dyn RegimeStore>,
        notifier: Arc<dyn Notifier>,
        config: &EngineConfig,
    ) -> EngineResult<Self> {
        let tz = config.tz()?;
        let (state_tx, _) = watch::channel(RegimeState::Inactive);
        let (confirmation_tx, _) = watch::channel(None);
        Ok(Self {
            user_id,
            tz,
            tolerance_hours: config.completion_tolerance_hours,
            recovery_cfg: config.recovery.clone(),
            tick_interval_seconds: config.tick.interval_seconds,
            store,
            notifier,
            state_tx,
            confirmation_tx,
            write_lock: Mutex::new(()),
            ticker: StdMutex::new(None),
        })
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// Last published regime state
    pub fn current_state(&self) -> RegimeState {
        self.state_tx.borrow().clone()
    }

    /// Subscribe to regime state changes. A value is pushed on every
    /// successful mutation and on every tick re-evaluation.
    pub fn subscribe_state(&self) -> watch::Receiver<RegimeState> {
        self.state_tx.subscribe()
    }

    pub fn pending_confirmation(&self) -> Option<ConfirmationContext> {
        self.confirmation_tx.borrow().clone()
    }

    pub fn subscribe_confirmation(&self) -> watch::Receiver<Option<ConfirmationContext>> {
        self.confirmation_tx.subscribe()
    }

    /// Re-evaluate against storage and publish. Read-only.
    pub async fn refresh(&self, now: DateTime<Utc>) -> EngineResult<RegimeState> {
        let (plan, latest) = self.load_context().await?;
        let state = evaluate(plan.as_ref(), latest.as_ref(), now, self.tz);
        self.state_tx.send_replace(state.clone());
        Ok(state)
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Start a fast under the active plan.
    ///
    /// With `from_scheduled`, a scheduled start that already passed becomes
    /// the session's (backdated) start instant.
    pub async fn start(&self, now: DateTime<Utc>, from_scheduled: bool) -> EngineResult<Session> {
        let _guard = self.write_lock.lock().await;
        let (plan, latest) = self.load_context().await?;
        if latest.as_ref().is_some_and(Session::is_open) {
            return Err(EngineError::AlreadyFasting);
        }
        let mut plan = plan.ok_or(EngineError::PlanInactive)?;

        let started_at = if from_scheduled {
            temporal::previous_scheduled_start(&plan.active_days, plan.start_time, now, self.tz)
                .unwrap_or(now)
        } else {
            now
        };

        let mut session = Session::begin(self.user_id, Some(plan.id), plan.target_hours, started_at);
        session.sync_phases(now);
        self.store.save_session(&session).await?;

        if plan.snoozed_until.is_some() {
            plan.snoozed_until = None;
            plan.updated_at = now;
            self.store.save_plan(&plan).await?;
        }

        info!(session_id = %session.id, %started_at, "Fast started");
        self.clear_confirmation();
        self.sync(now).await?;
        Ok(session)
    }

    /// Start a one-off fast outside any plan
    pub async fn start_ad_hoc(
        &self,
        now: DateTime<Utc>,
        target_hours: f64,
    ) -> EngineResult<Session> {
        validation::validate_target_hours(target_hours).map_err(EngineError::Validation)?;
        let _guard = self.write_lock.lock().await;
        let (_, latest) = self.load_context().await?;
        if latest.as_ref().is_some_and(Session::is_open) {
            return Err(EngineError::AlreadyFasting);
        }

        let session = Session::begin(self.user_id, None, target_hours, now);
        self.store.save_session(&session).await?;

        info!(session_id = %session.id, target_hours, "Ad hoc fast started");
        self.clear_confirmation();
        self.sync(now).await?;
        Ok(session)
    }

    /// Resolve a missed-start prompt by committing the chosen start instant
    pub async fn confirm_start(
        &self,
        context: &ConfirmationContext,
        chosen: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> EngineResult<Session> {
        if context.kind != ConfirmationKind::MissedStart {
            return Err(EngineError::Validation(
                "Confirmation is not about a start".to_string(),
            ));
        }
        validation::validate_not_future(chosen, now)
            .map_err(EngineError::InvalidTime)?;

        let _guard = self.write_lock.lock().await;
        let (plan, latest) = self.load_context().await?;
        if latest.as_ref().is_some_and(Session::is_open) {
            return Err(EngineError::AlreadyFasting);
        }

        let mut session =
            Session::begin(self.user_id, context.plan_id, context.target_hours, chosen);
        session.sync_phases(now);
        self.store.save_session(&session).await?;

        if let Some(mut plan) = plan.filter(|p| p.snoozed_until.is_some()) {
            plan.snoozed_until = None;
            plan.updated_at = now;
            self.store.save_plan(&plan).await?;
        }

        info!(session_id = %session.id, %chosen, "Backdated fast confirmed");
        self.clear_confirmation();
        self.sync(now).await?;
        Ok(session)
    }

    /// Resolve a missed-end prompt by committing the chosen end instant
    pub async fn confirm_end(
        &self,
        context: &ConfirmationContext,
        chosen: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> EngineResult<Session> {
        if context.kind != ConfirmationKind::MissedEnd {
            return Err(EngineError::Validation(
                "Confirmation is not about an end".to_string(),
            ));
        }
        let session = self
            .finalize_open(now, chosen, EndTrigger::User, None, None)
            .await?;
        self.clear_confirmation();
        Ok(session)
    }

    /// End the open fast at `now` or at an explicit earlier instant
    pub async fn end(
        &self,
        now: DateTime<Utc>,
        custom: Option<DateTime<Utc>>,
    ) -> EngineResult<Session> {
        self.finalize_open(now, custom.unwrap_or(now), EndTrigger::User, None, None)
            .await
    }

    /// End the open fast early with a reason and optional note
    pub async fn end_early(
        &self,
        now: DateTime<Utc>,
        reason: EarlyEndReason,
        note: Option<String>,
    ) -> EngineResult<Session> {
        self.finalize_open(now, now, EndTrigger::User, Some(reason), note)
            .await
    }

    /// Defer the next scheduled start to `until`. Repeated calls replace the
    /// projection — the latest value wins, equal values are no-ops.
    pub async fn snooze_until(
        &self,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> EngineResult<RegimeState> {
        if until <= now {
            return Err(EngineError::InvalidTime(
                "Snooze target must be in the future".to_string(),
            ));
        }
        let _guard = self.write_lock.lock().await;
        let (plan, latest) = self.load_context().await?;
        if latest.as_ref().is_some_and(Session::is_open) {
            return Err(EngineError::AlreadyFasting);
        }
        let mut plan = plan.ok_or(EngineError::PlanInactive)?;

        if plan.snoozed_until != Some(until) {
            plan.snoozed_until = Some(until);
            plan.updated_at = now;
            self.store.save_plan(&plan).await?;
            debug!(%until, "Next fast snoozed");
        }
        self.clear_confirmation();
        self.sync(now).await
    }

    /// Defer the next scheduled start by a number of minutes from now
    pub async fn snooze_for(
        &self,
        now: DateTime<Utc>,
        minutes: i64,
    ) -> EngineResult<RegimeState> {
        self.snooze_until(now, now + chrono::Duration::minutes(minutes))
            .await
    }

    /// Decline the current or next scheduled slot, keeping it in the
    /// calendar as a zero-duration placeholder
    pub async fn skip(&self, now: DateTime<Utc>) -> EngineResult<Session> {
        let _guard = self.write_lock.lock().await;
        let (plan, latest) = self.load_context().await?;

        // an open fast is skipped in place
        if let Some(mut session) = latest.filter(Session::is_open) {
            session.skipped = true;
            session.ended_at = Some(session.started_at);
            session.status = CompletionStatus::Skipped;
            session.phases_reached.clear();
            self.store.save_session(&session).await?;
            info!(session_id = %session.id, "Open fast skipped");
            self.clear_confirmation();
            self.sync(now).await?;
            return Ok(session);
        }

        let mut plan = plan.ok_or(EngineError::PlanInactive)?;
        let window = chrono::Duration::minutes(self.recovery_cfg.missed_start_window_minutes);
        let slot = temporal::previous_scheduled_start(
            &plan.active_days,
            plan.start_time,
            now,
            self.tz,
        )
        .filter(|s| now - *s <= window)
        .or_else(|| {
            temporal::next_scheduled_start(&plan.active_days, plan.start_time, now, self.tz)
        })
        .ok_or_else(|| {
            EngineError::Validation("Plan has no scheduled slot to skip".to_string())
        })?;

        let session =
            Session::skipped_slot(self.user_id, Some(plan.id), plan.target_hours, slot);
        self.store.save_session(&session).await?;

        if plan.snoozed_until.is_some() {
            plan.snoozed_until = None;
            plan.updated_at = now;
            self.store.save_plan(&plan).await?;
        }

        info!(session_id = %session.id, %slot, "Scheduled slot skipped");
        self.clear_confirmation();
        self.sync(now).await?;
        Ok(session)
    }

    /// Move the open fast's start. The published countdown reflects the new
    /// end instant immediately.
    pub async fn adjust_start_time(
        &self,
        now: DateTime<Utc>,
        new_start: DateTime<Utc>,
    ) -> EngineResult<Session> {
        self.edit_active_fast(now, Some(new_start), None).await
    }

    /// Edit the open fast's start and/or target
    pub async fn edit_active_fast(
        &self,
        now: DateTime<Utc>,
        new_start: Option<DateTime<Utc>>,
        new_target_hours: Option<f64>,
    ) -> EngineResult<Session> {
        if let Some(target) = new_target_hours {
            validation::validate_target_hours(target).map_err(EngineError::Validation)?;
        }
        if let Some(start) = new_start {
            validation::validate_not_future(start, now).map_err(EngineError::InvalidTime)?;
        }

        let _guard = self.write_lock.lock().await;
        let (_, latest) = self.load_context().await?;
        let mut session = latest
            .filter(Session::is_open)
            .ok_or(EngineError::NoActiveSession)?;

        if let Some(start) = new_start {
            session.started_at = start;
        }
        if let Some(target) = new_target_hours {
            session.target_hours = target;
        }
        session.manually_edited = true;
        session.rebuild_phases(now);
        self.store.save_session(&session).await?;

        info!(session_id = %session.id, "Active fast edited");
        self.sync(now).await?;
        Ok(session)
    }

    /// Reset a finalized session's duration to zero, keeping the record
    pub async fn clear_session(&self, now: DateTime<Utc>, id: Uuid) -> EngineResult<Session> {
        let _guard = self.write_lock.lock().await;
        let mut session = self
            .store
            .load_session(id, self.user_id)
            .await?
            .ok_or_else(|| EngineError::NotFound("Session not found".to_string()))?;
        session.clear();
        self.store.save_session(&session).await?;
        self.sync(now).await?;
        Ok(session)
    }

    /// Hard-delete a session by explicit user request
    pub async fn delete_session(&self, now: DateTime<Utc>, id: Uuid) -> EngineResult<()> {
        let _guard = self.write_lock.lock().await;
        let removed = self.store.delete_session(id, self.user_id).await?;
        if !removed {
            return Err(EngineError::NotFound("Session not found".to_string()));
        }
        self.sync(now).await?;
        Ok(())
    }

    /// Attach a note or early-end reason to an existing session
    pub async fn annotate_session(
        &self,
        id: Uuid,
        note: Option<String>,
        reason: Option<EarlyEndReason>,
    ) -> EngineResult<Session> {
        let _guard = self.write_lock.lock().await;
        let mut session = self
            .store
            .load_session(id, self.user_id)
            .await?
            .ok_or_else(|| EngineError::NotFound("Session not found".to_string()))?;
        if note.is_some() {
            session.note = note;
        }
        if reason.is_some() {
            session.early_end_reason = reason;
        }
        self.store.save_session(&session).await?;
        Ok(session)
    }

    /// Deactivate the plan and close any open fast. The plan is kept for
    /// historical attribution.
    pub async fn stop_regime(&self, now: DateTime<Utc>) -> EngineResult<RegimeState> {
        let _guard = self.write_lock.lock().await;
        let (plan, latest) = self.load_context().await?;

        if let Some(mut session) = latest.filter(Session::is_open) {
            session.finalize(now, EndTrigger::User, self.tolerance_hours);
            self.store.save_session(&session).await?;
        }

        if let Some(mut plan) = plan {
            plan.is_active = false;
            plan.snoozed_until = None;
            plan.updated_at = now;
            self.store.save_plan(&plan).await?;
            self.notifier.cancel_for_plan(plan.id).await.map_err(EngineError::Internal)?;
            info!(plan_id = %plan.id, "Regime stopped");
        }

        self.clear_confirmation();
        self.sync(now).await
    }

    /// Activate a plan, deactivating any previously active one
    pub async fn activate_plan(&self, now: DateTime<Utc>, mut plan: Plan) -> EngineResult<Plan> {
        Self::validate_plan(&plan)?;
        let _guard = self.write_lock.lock().await;

        if let Some(mut previous) = self.store.load_active_plan(self.user_id).await? {
            if previous.id != plan.id {
                previous.is_active = false;
                previous.snoozed_until = None;
                previous.updated_at = now;
                self.store.save_plan(&previous).await?;
                self.notifier
                    .cancel_for_plan(previous.id)
                    .await
                    .map_err(EngineError::Internal)?;
            }
        }

        plan.is_active = true;
        plan.updated_at = now;
        self.store.save_plan(&plan).await?;

        info!(plan_id = %plan.id, name = %plan.name, "Plan activated");
        self.sync(now).await?;
        Ok(plan)
    }

    /// Edit the active plan. Session targets already copied from it are
    /// untouched.
    pub async fn update_plan(&self, now: DateTime<Utc>, mut plan: Plan) -> EngineResult<Plan> {
        Self::validate_plan(&plan)?;
        let _guard = self.write_lock.lock().await;

        let stored = self
            .store
            .load_plan(plan.id, self.user_id)
            .await?
            .ok_or_else(|| EngineError::NotFound("Plan not found".to_string()))?;
        if !stored.is_active {
            return Err(EngineError::PlanInactive);
        }

        plan.is_active = true;
        plan.created_at = stored.created_at;
        plan.updated_at = now;
        self.store.save_plan(&plan).await?;

        info!(plan_id = %plan.id, "Plan updated");
        self.sync(now).await?;
        Ok(plan)
    }

    // ------------------------------------------------------------------
    // Analytics
    // ------------------------------------------------------------------

    /// Aggregate analytics over the full session history
    pub async fn stats(&self) -> EngineResult<FastingStats> {
        let sessions = self.store.load_all_sessions(self.user_id).await?;
        let weekly_target = self
            .store
            .load_active_plan(self.user_id)
            .await?
            .map(|p| p.active_days.len())
            .unwrap_or(1);
        Ok(analytics::build_stats(&sessions, weekly_target, self.tz))
    }

    /// Per-week roll-ups of the session history
    pub async fn week_summaries(&self) -> EngineResult<Vec<WeekSummary>> {
        let sessions = self.store.load_all_sessions(self.user_id).await?;
        Ok(analytics::weekly_summaries(&sessions, self.tz))
    }

    /// Sessions whose start falls on one local calendar day.
    ///
    /// The local day is mapped to a UTC range before it reaches the store,
    /// so entries logged near midnight stay on the intended day across
    /// timezone changes.
    pub async fn sessions_on_day(&self, day: chrono::NaiveDate) -> EngineResult<Vec<Session>> {
        let (start, end) = temporal::local_day_utc_range(day, self.tz);
        Ok(self.store.load_sessions(self.user_id, start, end).await?)
    }

    // ------------------------------------------------------------------
    // Recovery coordination
    // ------------------------------------------------------------------

    /// Run the missed-start / missed-end / stale detection and publish any
    /// resulting prompt. Called on app foreground, resume and notification
    /// taps.
    pub async fn run_recovery(
        &self,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<ConfirmationContext>> {
        let (plan, latest) = self.load_context().await?;
        let detected =
            recovery::detect(plan.as_ref(), latest.as_ref(), now, &self.recovery_cfg, self.tz);
        if let Some(context) = &detected {
            debug!(kind = ?context.kind, "Recovery condition detected");
        }
        self.confirmation_tx.send_replace(detected.clone());
        Ok(detected)
    }

    /// Drop the pending prompt without touching any entity. The condition
    /// will be re-detected on the next recovery run if still present.
    pub fn dismiss_confirmation(&self) {
        self.clear_confirmation();
    }

    /// Resolve a stale-session prompt
    pub async fn resolve_stale(
        &self,
        now: DateTime<Utc>,
        resolution: StaleResolution,
    ) -> EngineResult<Option<Session>> {
        match resolution {
            StaleResolution::StillFasting => {
                self.clear_confirmation();
                Ok(None)
            }
            StaleResolution::EndedAt(at) => {
                let session = self
                    .finalize_open(now, at, EndTrigger::System, None, None)
                    .await?;
                self.clear_confirmation();
                Ok(Some(session))
            }
        }
    }

    // ------------------------------------------------------------------
    // Ticker
    // ------------------------------------------------------------------

    /// Arm or disarm the periodic re-evaluation task.
    ///
    /// Armed on view visibility, the task immediately re-evaluates against
    /// the current wall clock (accounting for any suspended interval) and
    /// then ticks at the configured cadence. Disarmed when the view is
    /// hidden so nothing wakes up for an invisible countdown.
    pub fn set_visible(self: &Arc<Self>, visible: bool) {
        let mut ticker = self.ticker.lock().unwrap();
        if visible {
            if ticker.is_some() {
                return;
            }
            let engine = Arc::clone(self);
            let period = std::time::Duration::from_secs(self.tick_interval_seconds.max(1));
            *ticker = Some(tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                loop {
                    interval.tick().await;
                    let now = Utc::now();
                    if let Err(error) = engine.refresh(now).await {
                        warn!(%error, "Tick re-evaluation failed");
                    }
                    if let Err(error) = engine.track_phases(now).await {
                        warn!(%error, "Phase tracking failed");
                    }
                }
            }));
        } else if let Some(handle) = ticker.take() {
            handle.abort();
        }
    }

    /// Append any newly crossed phases to the open session and persist them
    pub async fn track_phases(&self, now: DateTime<Utc>) -> EngineResult<()> {
        let latest = self.store.load_latest_session(self.user_id).await?;
        let Some(probe) = latest.filter(|s| s.is_open()) else {
            return Ok(());
        };
        let reached = phases_reached(probe.actual_hours(now));
        if reached.len() <= probe.phases_reached.len() {
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;
        let Some(mut session) = self.store.load_session(probe.id, self.user_id).await? else {
            return Ok(());
        };
        if !session.is_open() {
            return Ok(());
        }
        session.sync_phases(now);
        self.store.save_session(&session).await?;
        debug!(
            session_id = %session.id,
            phase = ?session.phases_reached.last(),
            "Phase reached"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn load_context(&self) -> EngineResult<(Option<Plan>, Option<Session>)> {
        let plan = self.store.load_active_plan(self.user_id).await?;
        let latest = self.store.load_latest_session(self.user_id).await?;
        Ok((plan, latest))
    }

    /// Close the open session at `ended_at`, classify it, persist, then
    /// re-evaluate and resync notifications
    async fn finalize_open(
        &self,
        now: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        trigger: EndTrigger,
        reason: Option<EarlyEndReason>,
        note: Option<String>,
    ) -> EngineResult<Session> {
        validation::validate_not_future(ended_at, now).map_err(EngineError::InvalidTime)?;

        let _guard = self.write_lock.lock().await;
        let (_, latest) = self.load_context().await?;
        let mut session = latest
            .filter(Session::is_open)
            .ok_or(EngineError::NoActiveSession)?;

        validation::validate_session_bounds(session.started_at, ended_at)
            .map_err(EngineError::InvalidTime)?;

        session.finalize(ended_at, trigger, self.tolerance_hours);
        if reason.is_some() {
            session.early_end_reason = reason;
        }
        if note.is_some() {
            session.note = note;
        }
        self.store.save_session(&session).await?;

        info!(
            session_id = %session.id,
            status = session.status.as_str(),
            hours = session.actual_hours(now),
            "Fast ended"
        );
        self.sync(now).await?;
        Ok(session)
    }

    /// Re-evaluate, publish, and bring scheduled notifications in line with
    /// the new state. Used after every successful mutation.
    async fn sync(&self, now: DateTime<Utc>) -> EngineResult<RegimeState> {
        let (plan, latest) = self.load_context().await?;
        let state = evaluate(plan.as_ref(), latest.as_ref(), now, self.tz);
        self.state_tx.send_replace(state.clone());

        if let Some(plan) = plan.as_ref() {
            self.notifier
                .cancel_for_plan(plan.id)
                .await
                .map_err(EngineError::Internal)?;
            match latest.as_ref().filter(|s| s.is_open()) {
                Some(session) => {
                    if let Some(at) = notify::end_reminder_at(plan, session, now) {
                        self.notifier
                            .schedule(
                                at,
                                NotificationPayload {
                                    kind: NotificationKind::EndReminder,
                                    title: format!("{} ends soon", plan.name),
                                    body: format!(
                                        "Your {}h fast is almost done",
                                        plan.target_hours
                                    ),
                                    plan_id: Some(plan.id),
                                },
                            )
                            .await
                            .map_err(EngineError::Internal)?;
                    }
                }
                None => {
                    if let Some(at) = notify::next_start_at(&state) {
                        self.notifier
                            .schedule(
                                at,
                                NotificationPayload {
                                    kind: NotificationKind::FastStart,
                                    title: format!("Time to start {}", plan.name),
                                    body: format!("Your {}h fast begins now", plan.target_hours),
                                    plan_id: Some(plan.id),
                                },
                            )
                            .await
                            .map_err(EngineError::Internal)?;
                    }
                }
            }
        }

        Ok(state)
    }

    fn clear_confirmation(&self) {
        self.confirmation_tx.send_replace(None);
    }

    fn validate_plan(plan: &Plan) -> EngineResult<()> {
        validation::validate_plan_name(&plan.name).map_err(EngineError::Validation)?;
        validation::validate_target_hours(plan.target_hours).map_err(EngineError::Validation)?;
        validation::validate_active_days(&plan.active_days).map_err(EngineError::Validation)?;
        if plan.reminder_enabled {
            validation::validate_reminder_offset(plan.reminder_offset_minutes, plan.target_hours)
                .map_err(EngineError::Validation)?;
        }
        Ok(())
    }
}

impl Drop for RegimeEngine {
    fn drop(&mut self) {
        if let Some(handle) = self.ticker.lock().unwrap().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use chrono_tz::America::New_York;
    use fasting_coach_shared::models::DayOfWeek;
    use fasting_coach_shared::temporal::resolve_local;
    use std::collections::BTreeSet;

    const TZ: Tz = New_York;

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        resolve_local(
            NaiveDate::from_ymd_opt(y, mo, d).unwrap(),
            NaiveTime::from_hms_opt(h, mi, 0).unwrap(),
            TZ,
        )
    }

    fn monday_plan(user_id: Uuid) -> Plan {
        let days: BTreeSet<DayOfWeek> = [DayOfWeek::Monday].into_iter().collect();
        Plan::new(
            user_id,
            "16:8",
            16.0,
            days,
            NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
        )
    }

    #[test]
    fn evaluate_without_plan_or_session_is_inactive() {
        let now = local(2026, 3, 2, 12, 0);
        assert_eq!(evaluate(None, None, now, TZ), RegimeState::Inactive);
    }

    #[test]
    fn evaluate_open_session_is_fasting_with_target_end() {
        let user = Uuid::new_v4();
        let start = local(2026, 3, 2, 20, 0);
        let session = Session::begin(user, None, 16.0, start);
        let now = local(2026, 3, 3, 8, 0);
        let state = evaluate(None, Some(&session), now, TZ);
        assert_eq!(
            state,
            RegimeState::Fasting {
                started_at: start,
                ends_at: local(2026, 3, 3, 12, 0),
            }
        );
    }

    #[test]
    fn evaluate_is_deterministic() {
        let user = Uuid::new_v4();
        let plan = monday_plan(user);
        let now = local(2026, 3, 3, 9, 0);
        let first = evaluate(Some(&plan), None, now, TZ);
        let second = evaluate(Some(&plan), None, now, TZ);
        assert_eq!(first, second);
    }

    #[test]
    fn evaluate_projects_next_scheduled_start() {
        let user = Uuid::new_v4();
        let plan = monday_plan(user);
        // Tuesday morning: next slot is next Monday 20:00
        let now = local(2026, 3, 3, 9, 0);
        let state = evaluate(Some(&plan), None, now, TZ);
        assert_eq!(
            state,
            RegimeState::Eating {
                next_fast_starts_at: Some(local(2026, 3, 9, 20, 0)),
            }
        );
    }

    #[test]
    fn evaluate_prefers_snooze_projection_while_pending() {
        let user = Uuid::new_v4();
        let mut plan = monday_plan(user);
        let snoozed = local(2026, 3, 2, 21, 30);
        plan.snoozed_until = Some(snoozed);

        let before = local(2026, 3, 2, 20, 30);
        let state = evaluate(Some(&plan), None, before, TZ);
        assert_eq!(
            state,
            RegimeState::Eating {
                next_fast_starts_at: Some(snoozed),
            }
        );

        // once the snooze instant passes, the schedule projection returns
        let after = local(2026, 3, 2, 22, 0);
        let state = evaluate(Some(&plan), None, after, TZ);
        assert_eq!(
            state,
            RegimeState::Eating {
                next_fast_starts_at: Some(local(2026, 3, 9, 20, 0)),
            }
        );
    }

    #[test]
    fn evaluate_skips_past_a_skipped_future_slot() {
        let user = Uuid::new_v4();
        let plan = monday_plan(user);
        let slot = local(2026, 3, 9, 20, 0);
        let skipped = Session::skipped_slot(user, Some(plan.id), 16.0, slot);
        let now = local(2026, 3, 8, 12, 0);
        let state = evaluate(Some(&plan), Some(&skipped), now, TZ);
        assert_eq!(
            state,
            RegimeState::Eating {
                next_fast_starts_at: Some(local(2026, 3, 16, 20, 0)),
            }
        );
    }

    #[test]
    fn evaluate_inactive_plan_yields_inactive() {
        let user = Uuid::new_v4();
        let mut plan = monday_plan(user);
        plan.is_active = false;
        let now = local(2026, 3, 3, 9, 0);
        assert_eq!(evaluate(Some(&plan), None, now, TZ), RegimeState::Inactive);
    }

    #[test]
    fn evaluate_finished_session_falls_back_to_plan_projection() {
        let user = Uuid::new_v4();
        let plan = monday_plan(user);
        let mut session = Session::begin(user, Some(plan.id), 16.0, local(2026, 3, 2, 20, 0));
        session.finalize(local(2026, 3, 3, 12, 0), EndTrigger::User, 0.25);
        let now = local(2026, 3, 3, 13, 0);
        let state = evaluate(Some(&plan), Some(&session), now, TZ);
        assert!(state.is_eating());
    }
}
