//! Productivity metrics: usage rates, session classification, weekend
//! share.

use serde::{Deserialize, Serialize};

use crate::analytics::ConversationSlice;

/// A session counts as deep work at or above this duration.
const DEEP_WORK_MS: u64 = 30 * 60 * 1000;
/// A session counts as a quick question at or below this duration
/// (and above zero — unknown durations are classified as neither).
const QUICK_QUESTION_MS: u64 = 5 * 60 * 1000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductivityMetrics {
    pub conversations_per_week: f64,
    /// Messages per active day (days with at least one message).
    pub messages_per_day: f64,
    pub tools_per_conversation: f64,
    pub deep_work_sessions: u64,
    pub quick_questions: u64,
    /// Share of daily activity landing on Saturday or Sunday.
    pub weekend_activity: f64,
}

impl ProductivityMetrics {
    pub fn build<'a, I>(slices: I) -> ProductivityMetrics
    where
        I: IntoIterator<Item = &'a ConversationSlice>,
    {
        let mut out = ProductivityMetrics::default();
        let mut conversations = 0u64;
        let mut messages = 0u64;
        let mut tools = 0u64;
        let mut daily = [0u64; 7];
        let mut active_dates = std::collections::BTreeSet::new();
        let mut first: Option<chrono::NaiveDate> = None;
        let mut last: Option<chrono::NaiveDate> = None;

        for slice in slices {
            conversations += 1;
            messages += slice.message_count;
            tools += slice.tool_total;
            for d in 0..7 {
                daily[d] += slice.weekday_counts[d];
            }
            for date in slice.date_counts.keys() {
                active_dates.insert(*date);
                first = Some(first.map_or(*date, |f| f.min(*date)));
                last = Some(last.map_or(*date, |l| l.max(*date)));
            }
            if slice.duration_ms >= DEEP_WORK_MS {
                out.deep_work_sessions += 1;
            } else if slice.duration_ms > 0 && slice.duration_ms <= QUICK_QUESTION_MS {
                out.quick_questions += 1;
            }
        }

        let weeks = match (first, last) {
            (Some(first), Some(last)) => (((last - first).num_days() / 7) + 1).max(1) as f64,
            _ => 1.0,
        };
        out.conversations_per_week = conversations as f64 / weeks;
        out.messages_per_day = if active_dates.is_empty() {
            0.0
        } else {
            messages as f64 / active_dates.len() as f64
        };
        out.tools_per_conversation = if conversations == 0 {
            0.0
        } else {
            tools as f64 / conversations as f64
        };
        let total_daily: u64 = daily.iter().sum();
        out.weekend_activity = if total_daily == 0 {
            0.0
        } else {
            (daily[0] + daily[6]) as f64 / total_daily as f64
        };
        out
    }
}
