//! Billing cycle calculations.
//!
//! Pure functions over dates: which cycle a moment falls in, when an
//! obligation falls due within a cycle, and whether it is due now.
//!
//! Due days beyond a month's length clamp to the month's last day, so an
//! obligation due on the 31st is due on 28/29 February and 30 April.

use chrono::{DateTime, Days, NaiveDate, TimeZone};
use serde::Serialize;

use crate::model::{Cycle, Obligation};

/// The cycle containing `now`, by its local calendar date.
pub fn current_cycle<Tz: TimeZone>(now: &DateTime<Tz>) -> Cycle {
    Cycle::of(&now.date_naive())
}

/// `due_day` clamped into `cycle`'s length.
pub fn clamp_due_day(due_day: u8, cycle: Cycle) -> u32 {
    u32::from(due_day).clamp(1, cycle.days_in_month())
}

/// The date an obligation falls due within `cycle`, or `None` if its due day
/// is invalid.
pub fn due_date(obligation: &Obligation, cycle: Cycle) -> Option<NaiveDate> {
    if !(1..=31).contains(&obligation.due_day) {
        return None;
    }
    cycle.date(clamp_due_day(obligation.due_day, cycle))
}

/// A due, unpaid instance of an obligation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DueOccurrence {
    pub cycle: Cycle,
    pub due_date: NaiveDate,
    /// Days from today to the due date (0 = today).
    pub days_until: u32,
}

/// The earliest unpaid occurrence falling within `[today, today + window_days]`.
///
/// With a zero window this is the exact-day check: the due day
/// (clamped) equals today, the obligation existed in this cycle, and this
/// cycle is not paid. A wider window may reach into the next cycle, in which
/// case that cycle's paid flag applies.
pub fn due_occurrence(
    obligation: &Obligation,
    today: NaiveDate,
    window_days: u32,
) -> Option<DueOccurrence> {
    let horizon = today.checked_add_days(Days::new(u64::from(window_days)))?;
    let last_cycle = Cycle::of(&horizon);

    let mut cycle = Cycle::of(&today);
    while cycle <= last_cycle {
        if let Some(date) = due_date(obligation, cycle) {
            if date >= today
                && date <= horizon
                && obligation.created_cycle <= cycle
                && !obligation.is_paid(cycle)
            {
                let days_until = u32::try_from((date - today).num_days()).unwrap_or(0);
                return Some(DueOccurrence {
                    cycle,
                    due_date: date,
                    days_until,
                });
            }
        }
        cycle = cycle.next();
    }
    None
}

/// Is the obligation due today and unpaid for the current cycle?
pub fn is_due<Tz: TimeZone>(obligation: &Obligation, now: &DateTime<Tz>) -> bool {
    due_occurrence(obligation, now.date_naive(), 0).is_some()
}

/// Due-soon variant of [`is_due`]: due within the next `window_days` days.
pub fn is_due_within<Tz: TimeZone>(obligation: &Obligation, now: &DateTime<Tz>, window_days: u32) -> bool {
    due_occurrence(obligation, now.date_naive(), window_days).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, FixedOffset, TimeZone, Utc};
    use proptest::prelude::*;

    fn cycle(y: i32, m: u32) -> Cycle {
        Cycle::new(y, m).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn obligation(due_day: u8) -> Obligation {
        Obligation::new("A", "Rent", due_day, cycle(2020, 1))
    }

    #[test]
    fn current_cycle_uses_local_date() {
        // 23:30 UTC on 31 March is already 1 April at UTC+2.
        let utc = Utc.with_ymd_and_hms(2024, 3, 31, 23, 30, 0).unwrap();
        assert_eq!(current_cycle(&utc), cycle(2024, 3));
        let local = utc.with_timezone(&FixedOffset::east_opt(2 * 3600).unwrap());
        assert_eq!(current_cycle(&local), cycle(2024, 4));
    }

    #[test]
    fn due_on_the_exact_day() {
        let ob = obligation(15);
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 9, 0, 0).unwrap();
        assert!(is_due(&ob, &now));
        let before = Utc.with_ymd_and_hms(2024, 3, 14, 23, 59, 0).unwrap();
        assert!(!is_due(&ob, &before));
    }

    #[test]
    fn due_day_31_clamps_to_month_end() {
        let ob = obligation(31);
        assert!(due_occurrence(&ob, date(2024, 2, 29), 0).is_some());
        assert!(due_occurrence(&ob, date(2024, 2, 28), 0).is_none());
        assert!(due_occurrence(&ob, date(2023, 2, 28), 0).is_some());
        assert!(due_occurrence(&ob, date(2024, 4, 30), 0).is_some());
        // Never rolls into the following month.
        assert!(due_occurrence(&ob, date(2024, 3, 1), 0).is_none());
        assert!(due_occurrence(&ob, date(2024, 5, 1), 0).is_none());
    }

    #[test]
    fn paid_cycle_is_not_due() {
        let mut ob = obligation(15);
        ob.set_paid(cycle(2024, 3), true);
        assert!(due_occurrence(&ob, date(2024, 3, 15), 0).is_none());
        assert!(due_occurrence(&ob, date(2024, 4, 15), 0).is_some());
    }

    #[test]
    fn not_due_before_created_cycle() {
        let ob = Obligation::new("A", "Rent", 15, cycle(2024, 4));
        assert!(due_occurrence(&ob, date(2024, 3, 15), 0).is_none());
        assert!(due_occurrence(&ob, date(2024, 4, 15), 0).is_some());
    }

    #[test]
    fn window_reaches_into_next_cycle() {
        let ob = obligation(1);
        let occ = due_occurrence(&ob, date(2024, 3, 30), 3).unwrap();
        assert_eq!(occ.cycle, cycle(2024, 4));
        assert_eq!(occ.due_date, date(2024, 4, 1));
        assert_eq!(occ.days_until, 2);
        assert!(due_occurrence(&ob, date(2024, 3, 30), 1).is_none());
    }

    #[test]
    fn window_skips_paid_current_cycle() {
        let mut ob = obligation(31);
        ob.set_paid(cycle(2024, 1), true);
        assert!(due_occurrence(&ob, date(2024, 1, 29), 3).is_none());
        let occ = due_occurrence(&ob, date(2024, 2, 27), 3).unwrap();
        assert_eq!(occ.due_date, date(2024, 2, 29));
    }

    #[test]
    fn invalid_due_day_is_never_due() {
        let ob = obligation(0);
        assert!(due_occurrence(&ob, date(2024, 3, 1), 31).is_none());
        let ob = obligation(40);
        assert!(due_occurrence(&ob, date(2024, 3, 31), 0).is_none());
    }

    proptest! {
        #[test]
        fn paid_is_never_due(due_day in 1u8..=31, year in 2000i32..2100, month in 1u32..=12, day_offset in 0u32..31) {
            let c = cycle(year, month);
            let day = 1 + day_offset % c.days_in_month();
            let today = date(year, month, day);
            let mut ob = obligation(due_day);
            ob.set_paid(c, true);
            prop_assert!(due_occurrence(&ob, today, 0).is_none());
        }

        #[test]
        fn exactly_one_due_day_per_cycle(due_day in 1u8..=31, year in 2000i32..2100, month in 1u32..=12) {
            let c = cycle(year, month);
            let ob = obligation(due_day);
            let due_days: Vec<u32> = (1..=c.days_in_month())
                .filter(|d| due_occurrence(&ob, date(year, month, *d), 0).is_some())
                .collect();
            prop_assert_eq!(due_days.len(), 1);
            prop_assert_eq!(due_days[0], u32::from(due_day).min(c.days_in_month()));
        }

        #[test]
        fn occurrence_stays_in_window(due_day in 1u8..=31, ordinal in 1u32..=365, window in 0u32..=10) {
            let today = NaiveDate::from_yo_opt(2023, ordinal).unwrap();
            let ob = obligation(due_day);
            if let Some(occ) = due_occurrence(&ob, today, window) {
                prop_assert!(occ.due_date >= today);
                prop_assert!(occ.days_until <= window);
                prop_assert_eq!(Cycle::of(&occ.due_date), occ.cycle);
                prop_assert!(occ.due_date.day() == u32::from(due_day) || occ.due_date.day() == occ.cycle.days_in_month());
            }
        }
    }
}
