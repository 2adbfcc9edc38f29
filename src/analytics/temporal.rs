//! Temporal activity patterns: hour/day histograms, trends, streaks.
//!
//! All bucketing happens on **local** dates and hours. Week buckets are
//! aligned to Sunday 00:00 local; the arithmetic runs on `NaiveDate`
//! (calendar days), never on timestamps, so a daylight-saving transition
//! can never shift a date into the wrong week bucket.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::analytics::ConversationSlice;

/// Number of trailing week and month buckets in the trend vectors.
pub const TREND_BUCKETS: usize = 12;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Streaks {
    /// Length of the run ending today or yesterday; 0 otherwise.
    pub current: u64,
    pub longest: u64,
    pub longest_period: Option<StreakPeriod>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimePatterns {
    pub hourly_activity: [u64; 24],
    /// Indexed by weekday, 0 = Sunday.
    pub daily_activity: [u64; 7],
    /// `[weekday][hour]`, 0 = Sunday.
    pub day_hour_matrix: [[u64; 24]; 7],
    /// Trailing calendar weeks ending at the scope end; oldest first.
    pub weekly_trend: Vec<u64>,
    /// Trailing calendar months ending at the scope end; oldest first.
    pub monthly_trend: Vec<u64>,
    pub streaks: Streaks,
    pub busiest_hour: Option<u32>,
    pub busiest_day: Option<u32>,
    pub total_active_days: u64,
}

impl TimePatterns {
    /// Fold per-conversation slices into one pattern set, with trend
    /// windows ending at `end` (the range end, or today).
    pub fn build<'a, I>(slices: I, end: NaiveDate) -> TimePatterns
    where
        I: IntoIterator<Item = &'a ConversationSlice>,
    {
        let mut out = TimePatterns {
            weekly_trend: vec![0; TREND_BUCKETS],
            monthly_trend: vec![0; TREND_BUCKETS],
            ..Default::default()
        };
        let mut date_counts: BTreeMap<NaiveDate, u64> = BTreeMap::new();

        for slice in slices {
            for h in 0..24 {
                out.hourly_activity[h] += slice.hour_counts[h];
            }
            for d in 0..7 {
                out.daily_activity[d] += slice.weekday_counts[d];
                for h in 0..24 {
                    out.day_hour_matrix[d][h] += slice.day_hour[d][h];
                }
            }
            for (date, count) in &slice.date_counts {
                *date_counts.entry(*date).or_insert(0) += count;
            }
        }

        let end_week = week_start(end);
        for (date, count) in &date_counts {
            let weeks_back = (end_week - week_start(*date)).num_days() / 7;
            if (0..TREND_BUCKETS as i64).contains(&weeks_back) {
                out.weekly_trend[TREND_BUCKETS - 1 - weeks_back as usize] += count;
            }
            let months_back = months_between(*date, end);
            if (0..TREND_BUCKETS as i64).contains(&months_back) {
                out.monthly_trend[TREND_BUCKETS - 1 - months_back as usize] += count;
            }
        }

        out.streaks = streaks(&date_counts, end);
        out.busiest_hour = argmax(&out.hourly_activity);
        out.busiest_day = argmax(&out.daily_activity);
        out.total_active_days = date_counts.len() as u64;
        out
    }
}

/// The Sunday on or before `date`.
fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_sunday() as i64)
}

fn months_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to.year() as i64 * 12 + to.month0() as i64) - (from.year() as i64 * 12 + from.month0() as i64)
}

fn argmax(counts: &[u64]) -> Option<u32> {
    let (best_idx, best) = counts
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))?;
    if *best == 0 { None } else { Some(best_idx as u32) }
}

/// Streaks over the set of unique active dates. `current` counts the run
/// ending at `today` or `today - 1`; an older run leaves it at zero.
fn streaks(date_counts: &BTreeMap<NaiveDate, u64>, today: NaiveDate) -> Streaks {
    let dates: Vec<NaiveDate> = date_counts.keys().copied().collect();
    if dates.is_empty() {
        return Streaks::default();
    }

    let mut longest = 1u64;
    let mut longest_start = dates[0];
    let mut longest_end = dates[0];
    let mut run_start = dates[0];
    let mut run_len = 1u64;

    for window in dates.windows(2) {
        if window[1] == window[0] + Duration::days(1) {
            run_len += 1;
        } else {
            run_start = window[1];
            run_len = 1;
        }
        if run_len > longest {
            longest = run_len;
            longest_start = run_start;
            longest_end = window[1];
        }
    }

    let last = *dates.last().unwrap_or(&today);
    let current = if last == today || last + Duration::days(1) == today {
        let mut len = 1u64;
        let mut cursor = last;
        let set: std::collections::BTreeSet<NaiveDate> = dates.iter().copied().collect();
        while set.contains(&(cursor - Duration::days(1))) {
            cursor -= Duration::days(1);
            len += 1;
        }
        len
    } else {
        0
    };

    Streaks {
        current,
        longest,
        longest_period: Some(StreakPeriod {
            start: longest_start,
            end: longest_end,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn slice_with_dates(dates: &[(NaiveDate, u64)]) -> ConversationSlice {
        let mut slice = ConversationSlice::default();
        for (d, n) in dates {
            slice.date_counts.insert(*d, *n);
        }
        slice
    }

    #[test]
    fn test_week_start_is_sunday() {
        // 2025-09-29 is a Monday; the preceding Sunday is the 28th.
        assert_eq!(week_start(date(2025, 9, 29)), date(2025, 9, 28));
        // A Sunday is its own week start.
        assert_eq!(week_start(date(2025, 9, 28)), date(2025, 9, 28));
    }

    #[test]
    fn test_hour_and_day_sums_agree() {
        let mut slice = ConversationSlice::default();
        slice.hour_counts[10] = 2;
        slice.hour_counts[14] = 1;
        slice.weekday_counts[1] = 3;
        slice.day_hour[1][10] = 2;
        slice.day_hour[1][14] = 1;

        let tp = TimePatterns::build([&slice], date(2025, 9, 29));
        let hourly: u64 = tp.hourly_activity.iter().sum();
        let daily: u64 = tp.daily_activity.iter().sum();
        let matrix: u64 = tp.day_hour_matrix.iter().flatten().sum();
        assert_eq!(hourly, 3);
        assert_eq!(hourly, daily);
        assert_eq!(hourly, matrix);
    }

    #[test]
    fn test_weekly_trend_buckets() {
        let end = date(2025, 9, 29); // Monday; week starts 9-28
        let slice = slice_with_dates(&[
            (date(2025, 9, 29), 4), // this week
            (date(2025, 9, 27), 2), // Saturday = previous week
            (date(2024, 1, 1), 9),  // far outside the window
        ]);
        let tp = TimePatterns::build([&slice], end);
        assert_eq!(tp.weekly_trend[11], 4);
        assert_eq!(tp.weekly_trend[10], 2);
        let total: u64 = tp.weekly_trend.iter().sum();
        assert_eq!(total, 6);
    }

    #[test]
    fn test_monthly_trend_buckets() {
        let end = date(2025, 9, 29);
        let slice = slice_with_dates(&[
            (date(2025, 9, 1), 5),
            (date(2025, 8, 31), 3),
            (date(2024, 9, 30), 7), // 12 months back, outside the window
        ]);
        let tp = TimePatterns::build([&slice], end);
        assert_eq!(tp.monthly_trend[11], 5);
        assert_eq!(tp.monthly_trend[10], 3);
        let total: u64 = tp.monthly_trend.iter().sum();
        assert_eq!(total, 8);
    }

    #[test]
    fn test_streak_longest_period_length_matches() {
        let slice = slice_with_dates(&[
            (date(2025, 9, 1), 1),
            (date(2025, 9, 2), 1),
            (date(2025, 9, 3), 1),
            (date(2025, 9, 10), 1),
        ]);
        let tp = TimePatterns::build([&slice], date(2025, 9, 29));
        assert_eq!(tp.streaks.longest, 3);
        let period = tp.streaks.longest_period.unwrap();
        assert_eq!((period.end - period.start).num_days() + 1, 3);
        // Last activity long before today: no current streak.
        assert_eq!(tp.streaks.current, 0);
        assert!(tp.streaks.current <= tp.streaks.longest);
    }

    #[test]
    fn test_streak_current_ends_today_or_yesterday() {
        let today = date(2025, 9, 29);
        let slice = slice_with_dates(&[
            (date(2025, 9, 27), 1),
            (date(2025, 9, 28), 1),
        ]);
        let tp = TimePatterns::build([&slice], today);
        assert_eq!(tp.streaks.current, 2);

        let slice = slice_with_dates(&[(today, 1)]);
        let tp = TimePatterns::build([&slice], today);
        assert_eq!(tp.streaks.current, 1);
    }

    #[test]
    fn test_busiest_null_when_empty() {
        let none: [&ConversationSlice; 0] = [];
        let tp = TimePatterns::build(none, date(2025, 9, 29));
        assert_eq!(tp.busiest_hour, None);
        assert_eq!(tp.busiest_day, None);
        assert_eq!(tp.total_active_days, 0);
        assert_eq!(tp.streaks, Streaks::default());
    }

    #[test]
    fn test_busiest_hour_argmax() {
        let mut slice = ConversationSlice::default();
        slice.hour_counts[10] = 1;
        slice.hour_counts[14] = 1;
        let tp = TimePatterns::build([&slice], date(2025, 9, 29));
        assert!(matches!(tp.busiest_hour, Some(10) | Some(14)));
    }
}
