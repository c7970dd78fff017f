//! Timezone-safe calendar arithmetic
//!
//! Every "same day" / "add days" / "days between" question in the engine
//! goes through this module. The operations work on local calendar days in
//! an explicit IANA zone, never on raw 24-hour offsets, so they stay correct
//! across DST transitions. All functions take explicit instants — no system
//! clock access — keeping them pure and testable.

use chrono::{DateTime, Datelike, Days, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::collections::BTreeSet;

use crate::models::DayOfWeek;

/// The local calendar date an instant falls on in `tz`
pub fn local_date(instant: DateTime<Utc>, tz: Tz) -> NaiveDate {
    instant.with_timezone(&tz).date_naive()
}

/// Whether two instants fall on the same local calendar day
pub fn same_local_day(a: DateTime<Utc>, b: DateTime<Utc>, tz: Tz) -> bool {
    local_date(a, tz) == local_date(b, tz)
}

/// Midnight (start of local day) of the day `instant` falls on, as a UTC
/// instant
pub fn start_of_local_day(instant: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    resolve_local(local_date(instant, tz), NaiveTime::MIN, tz)
}

/// Add whole calendar days, preserving the local wall time.
///
/// Across a DST boundary this is not the same as adding `days * 24` hours;
/// the local time of day is kept and the UTC offset absorbs the shift.
pub fn add_local_days(instant: DateTime<Utc>, days: i64, tz: Tz) -> DateTime<Utc> {
    let local = instant.with_timezone(&tz);
    let date = local.date_naive();
    let shifted = if days >= 0 {
        date.checked_add_days(Days::new(days as u64))
    } else {
        date.checked_sub_days(Days::new(days.unsigned_abs()))
    }
    .unwrap_or(date);
    resolve_local(shifted, local.time(), tz)
}

/// Count of calendar-day boundaries crossed between two instants in `tz`.
///
/// Signed: negative when `b` is on an earlier local day than `a`.
pub fn local_days_between(a: DateTime<Utc>, b: DateTime<Utc>, tz: Tz) -> i64 {
    local_date(b, tz)
        .signed_duration_since(local_date(a, tz))
        .num_days()
}

/// The UTC instant range `[start, end)` covering one local calendar day.
///
/// This is the range a storage layer must query so entries logged near
/// midnight land on the intended day regardless of the zone's offset on
/// that date.
pub fn local_day_utc_range(day: NaiveDate, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = resolve_local(day, NaiveTime::MIN, tz);
    let next = day.checked_add_days(Days::new(1)).unwrap_or(day);
    let end = resolve_local(next, NaiveTime::MIN, tz);
    (start, end)
}

/// Map a local wall-clock date and time in `tz` to a UTC instant.
///
/// DST fold (the hour repeats): the earlier mapping wins. DST gap (the hour
/// does not exist): the wall time is shifted forward an hour into the first
/// valid instant.
pub fn resolve_local(date: NaiveDate, time: NaiveTime, tz: Tz) -> DateTime<Utc> {
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            let shifted = naive + Duration::hours(1);
            match tz.from_local_datetime(&shifted) {
                LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => {
                    dt.with_timezone(&Utc)
                }
                LocalResult::None => Utc.from_utc_datetime(&shifted),
            }
        }
    }
}

/// The first scheduled occurrence strictly after `after`.
///
/// Scans forward one week from the local day of `after`; `None` when the
/// day set is empty.
pub fn next_scheduled_start(
    days: &BTreeSet<DayOfWeek>,
    start_time: NaiveTime,
    after: DateTime<Utc>,
    tz: Tz,
) -> Option<DateTime<Utc>> {
    scheduled_occurrence(days, start_time, after, tz, 1).find(|c| *c > after)
}

/// The most recent scheduled occurrence at or before `before`.
pub fn previous_scheduled_start(
    days: &BTreeSet<DayOfWeek>,
    start_time: NaiveTime,
    before: DateTime<Utc>,
    tz: Tz,
) -> Option<DateTime<Utc>> {
    scheduled_occurrence(days, start_time, before, tz, -1).find(|c| *c <= before)
}

/// Candidate occurrences walking day-by-day from the anchor's local day,
/// forward (`direction = 1`) or backward (`direction = -1`), one full week.
fn scheduled_occurrence(
    days: &BTreeSet<DayOfWeek>,
    start_time: NaiveTime,
    anchor: DateTime<Utc>,
    tz: Tz,
    direction: i64,
) -> impl Iterator<Item = DateTime<Utc>> + '_ {
    let anchor_date = local_date(anchor, tz);
    let days = days.clone();
    (0..=7i64).filter_map(move |offset| {
        let delta = offset * direction;
        let date = if delta >= 0 {
            anchor_date.checked_add_days(Days::new(delta as u64))
        } else {
            anchor_date.checked_sub_days(Days::new(delta.unsigned_abs()))
        }?;
        if !days.contains(&DayOfWeek::from_chrono(date.weekday())) {
            return None;
        }
        Some(resolve_local(date, start_time, tz))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::New_York;
    use chrono_tz::Tz;

    const TZ: Tz = New_York;

    fn day_set(days: &[DayOfWeek]) -> BTreeSet<DayOfWeek> {
        days.iter().copied().collect()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        resolve_local(
            NaiveDate::from_ymd_opt(y, mo, d).unwrap(),
            time(h, mi),
            TZ,
        )
    }

    // US DST in 2026: spring forward Mar 8, fall back Nov 1.

    #[test]
    fn late_evening_entry_stays_on_its_day_across_spring_forward() {
        let before_transition = local(2026, 3, 7, 23, 0);
        assert_eq!(
            local_date(before_transition, TZ),
            NaiveDate::from_ymd_opt(2026, 3, 7).unwrap()
        );
        let after_transition = local(2026, 3, 8, 23, 0);
        assert_eq!(
            local_date(after_transition, TZ),
            NaiveDate::from_ymd_opt(2026, 3, 8).unwrap()
        );
        assert_eq!(local_days_between(before_transition, after_transition, TZ), 1);
    }

    #[test]
    fn add_local_days_preserves_wall_time_across_dst() {
        let evening = local(2026, 3, 7, 23, 0);
        let next = add_local_days(evening, 1, TZ);
        let next_local = next.with_timezone(&TZ);
        assert_eq!(next_local.time(), time(23, 0));
        // the spring-forward day is 23h long, so the raw gap is not 24h
        assert_eq!((next - evening).num_hours(), 23);
    }

    #[test]
    fn add_local_days_across_fall_back_spans_25_hours() {
        let evening = local(2026, 10, 31, 23, 0);
        let next = add_local_days(evening, 1, TZ);
        assert_eq!(next.with_timezone(&TZ).time(), time(23, 0));
        assert_eq!((next - evening).num_hours(), 25);
        assert_eq!(local_days_between(evening, next, TZ), 1);
    }

    #[test]
    fn day_range_shrinks_and_stretches_with_dst() {
        let (start, end) =
            local_day_utc_range(NaiveDate::from_ymd_opt(2026, 3, 8).unwrap(), TZ);
        assert_eq!((end - start).num_hours(), 23);
        let (start, end) =
            local_day_utc_range(NaiveDate::from_ymd_opt(2026, 11, 1).unwrap(), TZ);
        assert_eq!((end - start).num_hours(), 25);
    }

    #[test]
    fn gap_wall_time_resolves_forward() {
        // 02:30 does not exist on 2026-03-08 in New York
        let resolved = resolve_local(
            NaiveDate::from_ymd_opt(2026, 3, 8).unwrap(),
            time(2, 30),
            TZ,
        );
        assert_eq!(resolved.with_timezone(&TZ).time(), time(3, 30));
    }

    #[test]
    fn fold_wall_time_takes_earliest_mapping() {
        // 01:30 occurs twice on 2026-11-01; the EDT (earlier) instant wins
        let resolved = resolve_local(
            NaiveDate::from_ymd_opt(2026, 11, 1).unwrap(),
            time(1, 30),
            TZ,
        );
        let second = resolved + Duration::hours(1);
        assert_eq!(second.with_timezone(&TZ).time(), time(1, 30));
    }

    #[test]
    fn next_occurrence_skips_to_scheduled_weekday() {
        let days = day_set(&[DayOfWeek::Monday]);
        // Monday 2026-03-02 20:00; asking from Tuesday finds next Monday
        let tuesday = local(2026, 3, 3, 9, 0);
        let next = next_scheduled_start(&days, time(20, 0), tuesday, TZ).unwrap();
        assert_eq!(next, local(2026, 3, 9, 20, 0));
    }

    #[test]
    fn next_occurrence_is_strictly_after_anchor() {
        let days = day_set(&[DayOfWeek::Monday]);
        let at_start = local(2026, 3, 2, 20, 0);
        let next = next_scheduled_start(&days, time(20, 0), at_start, TZ).unwrap();
        assert_eq!(next, local(2026, 3, 9, 20, 0));
        // just before the slot, today's slot is still ahead
        let just_before = local(2026, 3, 2, 19, 59);
        let next = next_scheduled_start(&days, time(20, 0), just_before, TZ).unwrap();
        assert_eq!(next, local(2026, 3, 2, 20, 0));
    }

    #[test]
    fn previous_occurrence_finds_passed_slot() {
        let days = day_set(&[DayOfWeek::Monday]);
        let monday_evening = local(2026, 3, 2, 21, 30);
        let prev = previous_scheduled_start(&days, time(20, 0), monday_evening, TZ).unwrap();
        assert_eq!(prev, local(2026, 3, 2, 20, 0));
    }

    #[test]
    fn empty_day_set_yields_no_occurrence() {
        let days = BTreeSet::new();
        assert!(next_scheduled_start(&days, time(20, 0), local(2026, 3, 2, 9, 0), TZ).is_none());
        assert!(
            previous_scheduled_start(&days, time(20, 0), local(2026, 3, 2, 9, 0), TZ).is_none()
        );
    }

    #[test]
    fn daily_schedule_across_spring_forward_keeps_wall_time() {
        let days = day_set(&[
            DayOfWeek::Monday,
            DayOfWeek::Tuesday,
            DayOfWeek::Wednesday,
            DayOfWeek::Thursday,
            DayOfWeek::Friday,
            DayOfWeek::Saturday,
            DayOfWeek::Sunday,
        ]);
        let saturday_evening = local(2026, 3, 7, 21, 0);
        let next = next_scheduled_start(&days, time(20, 0), saturday_evening, TZ).unwrap();
        // Sunday is the transition day; the slot still lands at 20:00 local
        assert_eq!(next.with_timezone(&TZ).time(), time(20, 0));
        assert_eq!(
            local_date(next, TZ),
            NaiveDate::from_ymd_opt(2026, 3, 8).unwrap()
        );
    }
}
