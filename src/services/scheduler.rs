//! Wall-clock cycle scheduler.
//!
//! Computes the next fire instant per cycle kind and owns one timer per
//! kind. Timers are one-shot; the engine re-arms after each run. If the
//! host sleeps past a scheduled instant the cycle runs immediately on
//! wake.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use tracing::warn;

use crate::domain::models::config::{ScheduleSpec, Schedules};
use crate::domain::models::cycle::CycleKind;
use crate::domain::ports::clock::Clock;

/// Next fire instant strictly after `now` for a schedule.
///
/// Non-existent days (e.g. February 30th) round down to the last valid
/// day of the target month. Returns `None` only for out-of-range
/// schedule fields, which config validation rejects up front.
pub fn next_fire(kind: CycleKind, spec: ScheduleSpec, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match kind {
        CycleKind::Daily => {
            let candidate = at_time(now.date_naive(), spec)?;
            if candidate <= now {
                at_time(now.date_naive() + chrono::Duration::days(1), spec)
            } else {
                Some(candidate)
            }
        }
        CycleKind::Weekly => {
            let target = spec.day_of_week.unwrap_or(0) % 7;
            let today = now.weekday().num_days_from_sunday();
            let ahead = (target + 7 - today) % 7;
            let candidate = at_time(
                now.date_naive() + chrono::Duration::days(i64::from(ahead)),
                spec,
            )?;
            if candidate <= now {
                Some(candidate + chrono::Duration::days(7))
            } else {
                Some(candidate)
            }
        }
        CycleKind::Monthly => {
            let day = spec.day_of_month.unwrap_or(1).max(1);
            let candidate = at_time(clamped_date(now.year(), now.month(), day)?, spec)?;
            if candidate <= now {
                let (year, month) = if now.month() == 12 {
                    (now.year() + 1, 1)
                } else {
                    (now.year(), now.month() + 1)
                };
                at_time(clamped_date(year, month, day)?, spec)
            } else {
                Some(candidate)
            }
        }
        CycleKind::Manual => None,
    }
}

fn at_time(date: NaiveDate, spec: ScheduleSpec) -> Option<DateTime<Utc>> {
    date.and_hms_opt(spec.hour, spec.minute, 0)
        .map(|dt| dt.and_utc())
}

/// Day-of-month clamped to the last valid day of `month`.
fn clamped_date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    let last = last_day_of_month(year, month)?;
    NaiveDate::from_ymd_opt(year, month, day.min(last))
}

fn last_day_of_month(year: i32, month: u32) -> Option<u32> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    Some(
        NaiveDate::from_ymd_opt(next_year, next_month, 1)?
            .pred_opt()?
            .day(),
    )
}

/// Owns the per-kind timers that drive scheduled cycles.
pub struct CycleScheduler {
    clock: Arc<dyn Clock>,
    schedules: Schedules,
    timers: Mutex<HashMap<CycleKind, tokio::task::JoinHandle<()>>>,
}

impl CycleScheduler {
    pub fn new(clock: Arc<dyn Clock>, schedules: Schedules) -> Self {
        Self {
            clock,
            schedules,
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Next fire instant for a kind based on the current wall clock.
    pub fn next_fire_for(&self, kind: CycleKind) -> Option<DateTime<Utc>> {
        let spec = self.schedules.get(kind)?;
        next_fire(kind, spec, self.clock.now())
    }

    /// Arm a single one-shot timer for `kind`, replacing any existing
    /// one. The callback runs once at the fire instant; re-arming is the
    /// caller's responsibility.
    pub fn arm<F, Fut>(&self, kind: CycleKind, on_fire: F)
    where
        F: FnOnce(CycleKind) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some(fire_at) = self.next_fire_for(kind) else {
            warn!(kind = %kind, "No schedule for cycle kind, not arming timer");
            return;
        };

        let now = self.clock.now();
        let delay = (fire_at - now).to_std().unwrap_or(Duration::ZERO);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire(kind).await;
        });

        if let Ok(mut timers) = self.timers.lock() {
            if let Some(previous) = timers.insert(kind, handle) {
                previous.abort();
            }
        }
    }

    /// Cancel every armed timer.
    pub fn cancel_all(&self) {
        if let Ok(mut timers) = self.timers.lock() {
            for (_, handle) in timers.drain() {
                handle.abort();
            }
        }
    }

    /// Kinds with an armed timer.
    pub fn armed_kinds(&self) -> Vec<CycleKind> {
        self.timers
            .lock()
            .map(|timers| timers.keys().copied().collect())
            .unwrap_or_default()
    }
}

impl Drop for CycleScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn spec(hour: u32, minute: u32) -> ScheduleSpec {
        ScheduleSpec {
            hour,
            minute,
            day_of_week: None,
            day_of_month: None,
        }
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_daily_before_and_after_fire_time() {
        let s = spec(2, 0);
        // Before 02:00 fires today.
        let now = utc(2026, 3, 10, 1, 30, 0);
        assert_eq!(
            next_fire(CycleKind::Daily, s, now).unwrap(),
            utc(2026, 3, 10, 2, 0, 0)
        );
        // After 02:00 fires tomorrow.
        let now = utc(2026, 3, 10, 2, 30, 0);
        assert_eq!(
            next_fire(CycleKind::Daily, s, now).unwrap(),
            utc(2026, 3, 11, 2, 0, 0)
        );
    }

    #[test]
    fn test_daily_exact_instant_moves_to_next_day() {
        let s = spec(2, 0);
        let now = utc(2026, 3, 10, 2, 0, 0);
        assert_eq!(
            next_fire(CycleKind::Daily, s, now).unwrap(),
            utc(2026, 3, 11, 2, 0, 0)
        );
        // One second earlier still fires today.
        let now = utc(2026, 3, 10, 1, 59, 59);
        assert_eq!(
            next_fire(CycleKind::Daily, s, now).unwrap(),
            utc(2026, 3, 10, 2, 0, 0)
        );
    }

    #[test]
    fn test_weekly_next_sunday() {
        let s = ScheduleSpec {
            hour: 3,
            minute: 0,
            day_of_week: Some(0),
            day_of_month: None,
        };
        // 2026-03-10 is a Tuesday; next Sunday is 2026-03-15.
        let now = utc(2026, 3, 10, 12, 0, 0);
        assert_eq!(
            next_fire(CycleKind::Weekly, s, now).unwrap(),
            utc(2026, 3, 15, 3, 0, 0)
        );
    }

    #[test]
    fn test_weekly_same_day_past_time_adds_a_week() {
        let s = ScheduleSpec {
            hour: 3,
            minute: 0,
            day_of_week: Some(0),
            day_of_month: None,
        };
        // 2026-03-15 is a Sunday, already past 03:00.
        let now = utc(2026, 3, 15, 4, 0, 0);
        assert_eq!(
            next_fire(CycleKind::Weekly, s, now).unwrap(),
            utc(2026, 3, 22, 3, 0, 0)
        );
    }

    #[test]
    fn test_monthly_first_of_month() {
        let s = ScheduleSpec {
            hour: 4,
            minute: 0,
            day_of_week: None,
            day_of_month: Some(1),
        };
        let now = utc(2026, 3, 10, 0, 0, 0);
        assert_eq!(
            next_fire(CycleKind::Monthly, s, now).unwrap(),
            utc(2026, 4, 1, 4, 0, 0)
        );
    }

    #[test]
    fn test_monthly_nonexistent_day_rounds_down() {
        let s = ScheduleSpec {
            hour: 4,
            minute: 0,
            day_of_week: None,
            day_of_month: Some(30),
        };
        // February 2026 has 28 days.
        let now = utc(2026, 2, 1, 0, 0, 0);
        assert_eq!(
            next_fire(CycleKind::Monthly, s, now).unwrap(),
            utc(2026, 2, 28, 4, 0, 0)
        );
    }

    #[test]
    fn test_monthly_december_rolls_to_january() {
        let s = ScheduleSpec {
            hour: 4,
            minute: 0,
            day_of_week: None,
            day_of_month: Some(1),
        };
        let now = utc(2026, 12, 15, 0, 0, 0);
        assert_eq!(
            next_fire(CycleKind::Monthly, s, now).unwrap(),
            utc(2027, 1, 1, 4, 0, 0)
        );
    }

    #[test]
    fn test_manual_has_no_schedule() {
        assert!(next_fire(CycleKind::Manual, spec(0, 0), Utc::now()).is_none());
    }

    #[test]
    fn test_last_day_of_month() {
        assert_eq!(last_day_of_month(2026, 2), Some(28));
        assert_eq!(last_day_of_month(2028, 2), Some(29));
        assert_eq!(last_day_of_month(2026, 12), Some(31));
        assert_eq!(last_day_of_month(2026, 4), Some(30));
    }

    #[tokio::test]
    async fn test_scheduler_arms_and_cancels() {
        use crate::domain::ports::clock::SystemClock;

        let scheduler = CycleScheduler::new(Arc::new(SystemClock), Schedules::default());
        scheduler.arm(CycleKind::Daily, |_| async {});
        scheduler.arm(CycleKind::Weekly, |_| async {});
        assert_eq!(scheduler.armed_kinds().len(), 2);

        scheduler.cancel_all();
        assert!(scheduler.armed_kinds().is_empty());
    }

    #[test]
    fn test_next_fire_is_strictly_in_the_future() {
        use crate::domain::ports::clock::test_support::ManualClock;

        let clock = ManualClock::new(utc(2026, 3, 10, 2, 0, 1));
        for kind in CycleKind::scheduled() {
            let spec = Schedules::default().get(kind).unwrap();
            let fire_at = next_fire(kind, spec, clock.now()).unwrap();
            assert!(fire_at > clock.now(), "kind {kind}");
        }
    }
}
