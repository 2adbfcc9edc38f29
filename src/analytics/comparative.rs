//! Comparative metrics: week-over-week and month-over-month deltas plus a
//! short linear forecast.

use serde::{Deserialize, Serialize};

use crate::analytics::temporal::TimePatterns;

/// Change-percent band treated as flat.
const STABLE_BAND_PERCENT: f64 = 5.0;
/// At most this many trailing points feed the forecast.
const FORECAST_POINTS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

impl Default for Trend {
    fn default() -> Self {
        Trend::Stable
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendDelta {
    pub current: u64,
    pub previous: u64,
    pub change: i64,
    pub change_percent: f64,
    pub trend: Trend,
}

impl TrendDelta {
    fn between(previous: u64, current: u64) -> TrendDelta {
        let change = current as i64 - previous as i64;
        let change_percent = if previous == 0 {
            if current == 0 { 0.0 } else { 100.0 }
        } else {
            change as f64 * 100.0 / previous as f64
        };
        let trend = if change_percent >= STABLE_BAND_PERCENT {
            Trend::Increasing
        } else if change_percent <= -STABLE_BAND_PERCENT {
            Trend::Decreasing
        } else {
            Trend::Stable
        };
        TrendDelta {
            current,
            previous,
            change,
            change_percent,
            trend,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparative {
    pub week_over_week: TrendDelta,
    pub month_over_month: TrendDelta,
    /// Least-squares projection of the next weekly count over the last few
    /// points; clamped at zero.
    pub forecast_next_week: f64,
}

impl Comparative {
    pub fn build(time: &TimePatterns) -> Comparative {
        let wow = delta_from_trend(&time.weekly_trend);
        let mom = delta_from_trend(&time.monthly_trend);
        Comparative {
            week_over_week: wow,
            month_over_month: mom,
            forecast_next_week: forecast(&time.weekly_trend),
        }
    }
}

fn delta_from_trend(trend: &[u64]) -> TrendDelta {
    let current = trend.last().copied().unwrap_or(0);
    let previous = trend
        .len()
        .checked_sub(2)
        .and_then(|i| trend.get(i))
        .copied()
        .unwrap_or(0);
    TrendDelta::between(previous, current)
}

/// Linear least-squares fit over the last `FORECAST_POINTS` values,
/// evaluated one step past the end. Never negative.
fn forecast(trend: &[u64]) -> f64 {
    let tail: Vec<f64> = trend
        .iter()
        .skip(trend.len().saturating_sub(FORECAST_POINTS))
        .map(|v| *v as f64)
        .collect();
    let n = tail.len();
    if n == 0 {
        return 0.0;
    }
    if n == 1 {
        return tail[0];
    }

    let xs: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let x_mean = xs.iter().sum::<f64>() / n as f64;
    let y_mean = tail.iter().sum::<f64>() / n as f64;
    let denom: f64 = xs.iter().map(|x| (x - x_mean).powi(2)).sum();
    let slope = if denom == 0.0 {
        0.0
    } else {
        xs.iter()
            .zip(tail.iter())
            .map(|(x, y)| (x - x_mean) * (y - y_mean))
            .sum::<f64>()
            / denom
    };
    let intercept = y_mean - slope * x_mean;
    (slope * n as f64 + intercept).max(0.0)
}
