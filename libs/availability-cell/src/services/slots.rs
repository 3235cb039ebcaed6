// libs/availability-cell/src/services/slots.rs
//
// Pure slot computation. No locks, no I/O: callers pass in the rules,
// exception blocks and reserved windows they already loaded, which keeps this
// safe to run against stale reads. Races are resolved by re-checking
// bookability under the creation lock at commit time.

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, TimeZone, Timelike, Utc};

use crate::models::{AvailabilityError, AvailabilityException, AvailabilityRule, SlotWindow};

pub const MIN_SLOT_DURATION_MINUTES: i64 = 15;
pub const MAX_SLOT_DURATION_MINUTES: i64 = 240;
pub const MAX_QUERY_RANGE_DAYS: i64 = 31;

/// Compute the ordered, deduplicated list of free windows for a provider over
/// `[range_start, range_end)`.
///
/// Rule times are local to the provider's availability timezone
/// (`utc_offset_minutes`); candidates are emitted in UTC. A candidate is
/// dropped when it falls outside the query range, overlaps an active
/// exception, or overlaps a reserved window.
pub fn build_slots(
    rules: &[AvailabilityRule],
    exceptions: &[AvailabilityException],
    reserved: &[SlotWindow],
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
    requested_slot_duration: Option<i64>,
    utc_offset_minutes: i32,
) -> Result<Vec<SlotWindow>, AvailabilityError> {
    if range_end <= range_start {
        return Err(AvailabilityError::InvalidRange(
            "range end must be after range start".to_string(),
        ));
    }

    if range_end - range_start > Duration::days(MAX_QUERY_RANGE_DAYS) {
        return Err(AvailabilityError::RangeTooLarge(MAX_QUERY_RANGE_DAYS));
    }

    if let Some(duration) = requested_slot_duration {
        if !(MIN_SLOT_DURATION_MINUTES..=MAX_SLOT_DURATION_MINUTES).contains(&duration) {
            return Err(AvailabilityError::InvalidSlotDuration {
                min: MIN_SLOT_DURATION_MINUTES,
                max: MAX_SLOT_DURATION_MINUTES,
            });
        }
    }

    let offset = Duration::minutes(utc_offset_minutes as i64);
    let mut slots: Vec<SlotWindow> = Vec::new();

    let mut day = (range_start + offset).date_naive();
    let last_day = (range_end + offset).date_naive();

    while day <= last_day {
        for rule in rules
            .iter()
            .filter(|r| r.active && r.day_of_week == day.weekday())
        {
            let slot_duration = requested_slot_duration.unwrap_or(rule.slot_duration_minutes);
            if !(MIN_SLOT_DURATION_MINUTES..=MAX_SLOT_DURATION_MINUTES).contains(&slot_duration) {
                continue;
            }
            if rule.end_time <= rule.start_time {
                continue;
            }

            let rule_start = local_to_utc(day.and_time(rule.start_time), utc_offset_minutes);
            let rule_end = local_to_utc(day.and_time(rule.end_time), utc_offset_minutes);
            if rule_end <= range_start || rule_start >= range_end {
                continue;
            }

            let step = Duration::minutes(slot_duration);
            let mut cursor = rule_start;
            while cursor + step <= rule_end {
                let candidate_end = cursor + step;

                let inside_range = cursor >= range_start && candidate_end <= range_end;
                let blocked = exceptions
                    .iter()
                    .any(|e| e.active && overlaps(cursor, candidate_end, e.starts_at, e.ends_at));
                let taken = reserved.iter().any(|w| w.overlaps(cursor, candidate_end));

                if inside_range && !blocked && !taken {
                    slots.push(SlotWindow::new(cursor, candidate_end));
                }

                cursor = candidate_end;
            }
        }

        day = match day.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }

    slots.sort_by_key(|s| (s.starts_at, s.ends_at));
    slots.dedup();
    Ok(slots)
}

/// Commit-time recheck used by the scheduling coordinator: the window must sit
/// inside an active rule for its local weekday and be clear of exceptions and
/// reserved windows.
pub fn window_is_bookable(
    rules: &[AvailabilityRule],
    exceptions: &[AvailabilityException],
    reserved: &[SlotWindow],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    utc_offset_minutes: i32,
) -> bool {
    if window_end <= window_start {
        return false;
    }

    let offset = Duration::minutes(utc_offset_minutes as i64);
    let local_start = window_start + offset;
    let local_end = window_end + offset;

    let fits_rule = rules.iter().any(|r| {
        r.active
            && r.day_of_week == local_start.date_naive().weekday()
            && local_start.date_naive() == local_end.date_naive()
            && r.start_time <= local_start.time()
            && r.end_time >= local_end.time()
    });
    if !fits_rule {
        return false;
    }

    let blocked = exceptions
        .iter()
        .any(|e| e.active && overlaps(window_start, window_end, e.starts_at, e.ends_at));
    if blocked {
        return false;
    }

    !reserved.iter().any(|w| w.overlaps(window_start, window_end))
}

fn overlaps(
    left_start: DateTime<Utc>,
    left_end: DateTime<Utc>,
    right_start: DateTime<Utc>,
    right_end: DateTime<Utc>,
) -> bool {
    left_start < right_end && left_end > right_start
}

fn local_to_utc(local: NaiveDateTime, utc_offset_minutes: i32) -> DateTime<Utc> {
    Utc.from_utc_datetime(&(local - Duration::minutes(utc_offset_minutes as i64)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Weekday};
    use uuid::Uuid;

    fn rule(day: Weekday, start: (u32, u32), end: (u32, u32), duration: i64) -> AvailabilityRule {
        AvailabilityRule {
            id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            day_of_week: day,
            start_time: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
            slot_duration_minutes: duration,
            active: true,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    fn exception(starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> AvailabilityException {
        AvailabilityException {
            id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            starts_at,
            ends_at,
            reason: None,
            active: true,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    // 2026-03-02 is a Monday.
    fn monday(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    #[test]
    fn walks_rule_window_in_slot_steps() {
        let rules = vec![rule(Weekday::Mon, (9, 0), (12, 0), 60)];
        let slots = build_slots(
            &rules,
            &[],
            &[],
            monday(0, 0),
            monday(23, 59),
            None,
            0,
        )
        .unwrap();

        assert_eq!(slots.len(), 3);
        assert_eq!(slots[0].starts_at, monday(9, 0));
        assert_eq!(slots[2].ends_at, monday(12, 0));
    }

    #[test]
    fn subtracts_exceptions_and_reservations() {
        let rules = vec![rule(Weekday::Mon, (9, 0), (12, 0), 60)];
        let blocks = vec![exception(monday(9, 0), monday(10, 0))];
        let reserved = vec![SlotWindow::new(monday(11, 0), monday(12, 0))];

        let slots = build_slots(
            &rules,
            &blocks,
            &reserved,
            monday(0, 0),
            monday(23, 59),
            None,
            0,
        )
        .unwrap();

        assert_eq!(slots, vec![SlotWindow::new(monday(10, 0), monday(11, 0))]);
    }

    #[test]
    fn converts_local_rule_times_using_offset() {
        // Rule says 09:00 local; at UTC-3 that is 12:00 UTC.
        let rules = vec![rule(Weekday::Mon, (9, 0), (10, 0), 60)];
        let slots = build_slots(
            &rules,
            &[],
            &[],
            monday(0, 0),
            Utc.with_ymd_and_hms(2026, 3, 3, 0, 0, 0).unwrap(),
            None,
            -180,
        )
        .unwrap();

        assert_eq!(slots, vec![SlotWindow::new(monday(12, 0), monday(13, 0))]);
    }

    #[test]
    fn slot_generation_is_deterministic() {
        let rules = vec![
            rule(Weekday::Mon, (9, 0), (12, 0), 30),
            rule(Weekday::Mon, (14, 0), (16, 0), 30),
        ];
        let first = build_slots(&rules, &[], &[], monday(0, 0), monday(23, 0), None, 0).unwrap();
        let second = build_slots(&rules, &[], &[], monday(0, 0), monday(23, 0), None, 0).unwrap();
        assert_eq!(first, second);
        assert!(first.windows(2).all(|w| w[0].starts_at <= w[1].starts_at));
    }

    #[test]
    fn rejects_invalid_ranges_and_durations() {
        let rules = vec![rule(Weekday::Mon, (9, 0), (12, 0), 30)];

        let inverted = build_slots(&rules, &[], &[], monday(10, 0), monday(9, 0), None, 0);
        assert!(matches!(inverted, Err(AvailabilityError::InvalidRange(_))));

        let too_long = build_slots(
            &rules,
            &[],
            &[],
            monday(0, 0),
            monday(0, 0) + Duration::days(40),
            None,
            0,
        );
        assert!(matches!(too_long, Err(AvailabilityError::RangeTooLarge(_))));

        let bad_duration = build_slots(
            &rules,
            &[],
            &[],
            monday(0, 0),
            monday(23, 0),
            Some(10),
            0,
        );
        assert!(matches!(
            bad_duration,
            Err(AvailabilityError::InvalidSlotDuration { .. })
        ));
    }

    #[test]
    fn bookable_window_must_sit_inside_a_rule() {
        let rules = vec![rule(Weekday::Mon, (9, 0), (12, 0), 30)];

        assert!(window_is_bookable(
            &rules,
            &[],
            &[],
            monday(9, 30),
            monday(10, 0),
            0
        ));
        assert!(!window_is_bookable(
            &rules,
            &[],
            &[],
            monday(11, 30),
            monday(12, 30),
            0
        ));
        assert!(!window_is_bookable(
            &rules,
            &[],
            &[SlotWindow::new(monday(9, 0), monday(10, 0))],
            monday(9, 30),
            monday(10, 0),
            0
        ));
    }
}
