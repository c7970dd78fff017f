//! Read-only analytics over the session history
//!
//! Pure reducers: nothing here is a source of truth, every aggregate is
//! recomputed on demand from the persisted sessions. Skipped and cleared
//! (zero-duration) sessions are calendar placeholders — they never break a
//! streak and never enter duration-based averages.

use chrono::{Datelike, Days, NaiveDate};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{DayOfWeek, Session};
use crate::phases::{phases_reached, FastingPhase, ALL_PHASES};
use crate::temporal::local_date;

/// Aggregate snapshot over a user's session history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FastingStats {
    /// Finalized sessions, including skipped placeholders
    pub total_attempts: usize,
    /// Sessions that met their goal (completed or over-goal)
    pub completed: usize,
    pub skipped: usize,
    /// Fasted hours across duration-countable sessions
    pub total_hours: f64,
    pub average_hours: Option<f64>,
    pub longest_fast_hours: f64,
    /// Goal-met share of non-skipped finalized sessions
    pub completion_rate: Option<f64>,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub current_weekly_streak: u32,
    pub best_weekly_streak: u32,
    /// Sessions having reached each phase, in band order
    pub phase_histogram: Vec<(FastingPhase, u32)>,
    pub most_consistent_weekday: Option<DayOfWeek>,
}

/// Per-week roll-up of the session history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekSummary {
    /// Monday of the local ISO week
    pub week_start: NaiveDate,
    pub attempts: usize,
    pub completed: usize,
    pub skipped: usize,
    pub total_hours: f64,
    pub average_hours: Option<f64>,
    pub longest_fast_hours: f64,
}

/// Build the full stats snapshot.
///
/// `weekly_target` is the plan's per-week attempt goal (its active-day
/// count); weeks meeting it extend the weekly streak.
pub fn build_stats(sessions: &[Session], weekly_target: usize, tz: Tz) -> FastingStats {
    let mut finalized: Vec<&Session> = sessions
        .iter()
        .filter(|s| s.ended_at.is_some() || s.skipped)
        .collect();
    finalized.sort_by_key(|s| s.started_at);

    let countable: Vec<&Session> = finalized
        .iter()
        .copied()
        .filter(|s| !is_placeholder(s))
        .collect();

    let total_hours: f64 = countable.iter().map(|s| finalized_hours(s)).sum();
    let average_hours = if countable.is_empty() {
        None
    } else {
        Some(total_hours / countable.len() as f64)
    };
    let longest_fast_hours = countable
        .iter()
        .map(|s| finalized_hours(s))
        .fold(0.0, f64::max);

    let weeks = weekly_summaries(sessions, tz);
    let (current_weekly_streak, best_weekly_streak) =
        weekly_streaks(&weeks, weekly_target.max(1));

    FastingStats {
        total_attempts: finalized.len(),
        completed: finalized.iter().filter(|s| s.status.is_goal_met()).count(),
        skipped: finalized.iter().filter(|s| s.skipped).count(),
        total_hours,
        average_hours,
        longest_fast_hours,
        completion_rate: completion_rate(&finalized),
        current_streak: current_streak(&finalized),
        longest_streak: longest_streak(&finalized),
        current_weekly_streak,
        best_weekly_streak,
        phase_histogram: phase_histogram(&countable),
        most_consistent_weekday: most_consistent_weekday(&finalized, tz),
    }
}

/// Per-week summaries, ascending by week start
pub fn weekly_summaries(sessions: &[Session], tz: Tz) -> Vec<WeekSummary> {
    let mut by_week: BTreeMap<NaiveDate, Vec<&Session>> = BTreeMap::new();
    for session in sessions {
        if session.ended_at.is_none() && !session.skipped {
            continue;
        }
        let week = iso_week_start(local_date(session.started_at, tz));
        by_week.entry(week).or_default().push(session);
    }

    by_week
        .into_iter()
        .map(|(week_start, members)| {
            let countable: Vec<&&Session> =
                members.iter().filter(|s| !is_placeholder(s)).collect();
            let total_hours: f64 = countable.iter().map(|s| finalized_hours(s)).sum();
            WeekSummary {
                week_start,
                attempts: members.len(),
                completed: members.iter().filter(|s| s.status.is_goal_met()).count(),
                skipped: members.iter().filter(|s| s.skipped).count(),
                total_hours,
                average_hours: if countable.is_empty() {
                    None
                } else {
                    Some(total_hours / countable.len() as f64)
                },
                longest_fast_hours: countable
                    .iter()
                    .map(|s| finalized_hours(s))
                    .fold(0.0, f64::max),
            }
        })
        .collect()
}

/// Consecutive goal-met run over the most recent sessions.
///
/// Walks most-recent-first, stepping over placeholders, stopping at the
/// first finalized session that missed its goal. Expects `finalized`
/// ascending by start time.
pub fn current_streak(finalized: &[&Session]) -> u32 {
    let mut streak = 0;
    for session in finalized.iter().rev() {
        if is_placeholder(session) {
            continue;
        }
        if session.status.is_goal_met() {
            streak += 1;
        } else {
            break;
        }
    }
    streak
}

/// Longest goal-met run anywhere in the history
pub fn longest_streak(finalized: &[&Session]) -> u32 {
    let mut longest = 0;
    let mut run = 0;
    for session in finalized {
        if is_placeholder(session) {
            continue;
        }
        if session.status.is_goal_met() {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    longest
}

/// Goal-met share of non-skipped finalized sessions, `None` when there are
/// none to rate
pub fn completion_rate(finalized: &[&Session]) -> Option<f64> {
    let rated: Vec<&&Session> = finalized.iter().filter(|s| !s.skipped).collect();
    if rated.is_empty() {
        return None;
    }
    let met = rated.iter().filter(|s| s.status.is_goal_met()).count();
    Some(met as f64 / rated.len() as f64)
}

fn weekly_streaks(weeks: &[WeekSummary], weekly_target: usize) -> (u32, u32) {
    let qualifying =
        |w: &WeekSummary| w.attempts.saturating_sub(w.skipped) >= weekly_target;

    let mut best = 0u32;
    let mut run = 0u32;
    let mut prev: Option<NaiveDate> = None;
    for week in weeks {
        let consecutive = prev
            .and_then(|p| p.checked_add_days(Days::new(7)))
            .map_or(true, |expected| expected == week.week_start);
        if qualifying(week) {
            run = if consecutive { run + 1 } else { 1 };
            best = best.max(run);
        } else {
            run = 0;
        }
        prev = Some(week.week_start);
    }

    let mut current = 0u32;
    let mut expected: Option<NaiveDate> = None;
    for week in weeks.iter().rev() {
        if let Some(e) = expected {
            if week.week_start != e {
                break;
            }
        }
        if !qualifying(week) {
            break;
        }
        current += 1;
        expected = week.week_start.checked_sub_days(Days::new(7));
    }

    (current, best)
}

fn phase_histogram(countable: &[&Session]) -> Vec<(FastingPhase, u32)> {
    let mut counts: BTreeMap<FastingPhase, u32> =
        ALL_PHASES.iter().map(|p| (*p, 0)).collect();
    for session in countable {
        let trail = if session.phases_reached.is_empty() {
            phases_reached(finalized_hours(session))
        } else {
            session.phases_reached.clone()
        };
        for phase in trail {
            *counts.entry(phase).or_insert(0) += 1;
        }
    }
    ALL_PHASES.iter().map(|p| (*p, counts[p])).collect()
}

fn most_consistent_weekday(finalized: &[&Session], tz: Tz) -> Option<DayOfWeek> {
    let mut counts: BTreeMap<DayOfWeek, u32> = BTreeMap::new();
    for session in finalized.iter().filter(|s| !s.skipped) {
        let day = DayOfWeek::from_chrono(local_date(session.started_at, tz).weekday());
        *counts.entry(day).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(day, _)| day)
}

fn is_placeholder(session: &Session) -> bool {
    session.skipped || session.is_cleared()
}

/// Actual hours of a finalized session; placeholders contribute zero
fn finalized_hours(session: &Session) -> f64 {
    session
        .ended_at
        .map(|end| (end - session.started_at).num_seconds() as f64 / 3600.0)
        .unwrap_or(0.0)
}

fn iso_week_start(date: NaiveDate) -> NaiveDate {
    let back = date.weekday().num_days_from_monday() as u64;
    date.checked_sub_days(Days::new(back)).unwrap_or(date)
}
