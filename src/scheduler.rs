//! Adaptive refresh scheduling.
//!
//! Each podcast carries an `update_interval` between one hour and fourteen
//! days. After a successful parse the interval is recomputed from the
//! publication cadence of the feed's recent episodes; after a failed or no-op
//! check it grows by ten percent so unresponsive feeds are polled less often.
//!
//! ```
//! use chrono::{TimeDelta, TimeZone, Utc};
//! use podcrawl::scheduler::{calculate_update_interval, SchedulerSettings};
//!
//! let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
//! let weekly: Vec<_> = (0..6).map(|w| now - TimeDelta::weeks(w)).collect();
//!
//! let interval = calculate_update_interval(&weekly, now, &SchedulerSettings::default());
//! assert_eq!(interval, TimeDelta::weeks(1));
//! ```

use chrono::{DateTime, TimeDelta, Utc};

use crate::storage::{Database, DueWindow, Podcast};

/// Shortest allowed polling interval.
pub const MIN_UPDATE_INTERVAL_SECS: i64 = 60 * 60;
/// Longest allowed polling interval; also the dormancy threshold.
pub const MAX_UPDATE_INTERVAL_SECS: i64 = 14 * 24 * 60 * 60;

/// Tunables for interval calculation and due selection.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    pub min_interval: TimeDelta,
    pub max_interval: TimeDelta,
    /// Subscribed or promoted podcasts are re-checked at least this often.
    pub recent_check: TimeDelta,
    /// Only episodes published within this window feed the calculation.
    pub lookback: TimeDelta,
    pub max_samples: usize,
    /// Gaps with a z-score magnitude above this are discarded.
    pub outlier_zscore: f64,
    pub increment_factor: f64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            min_interval: TimeDelta::seconds(MIN_UPDATE_INTERVAL_SECS),
            max_interval: TimeDelta::seconds(MAX_UPDATE_INTERVAL_SECS),
            recent_check: TimeDelta::hours(1),
            lookback: TimeDelta::days(90),
            max_samples: 100,
            outlier_zscore: 1.96,
            increment_factor: 1.1,
        }
    }
}

impl SchedulerSettings {
    fn clamp(&self, interval: TimeDelta) -> TimeDelta {
        interval.clamp(self.min_interval, self.max_interval)
    }
}

/// Active podcasts that should be fetched now, highest priority first.
pub async fn podcasts_due_for_refresh(
    db: &Database,
    settings: &SchedulerSettings,
    now: DateTime<Utc>,
    limit: i64,
) -> anyhow::Result<Vec<Podcast>> {
    let window = DueWindow::new(now.timestamp(), settings.recent_check, settings.max_interval);
    db.podcasts_due(window, limit).await
}

/// Polling interval from a podcast's episode publication dates.
///
/// Dormant feeds (latest date older than the maximum interval) get the
/// maximum. Fewer than two recent dates get the minimum. Otherwise the result
/// is the median gap between consecutive episodes after discarding outliers,
/// clamped to the allowed range.
pub fn calculate_update_interval(
    pub_dates: &[DateTime<Utc>],
    now: DateTime<Utc>,
    settings: &SchedulerSettings,
) -> TimeDelta {
    let Some(latest) = pub_dates.iter().max() else {
        return settings.min_interval;
    };

    if now - *latest > settings.max_interval {
        return settings.max_interval;
    }

    let since = now - settings.lookback;
    let mut recent: Vec<DateTime<Utc>> = pub_dates.iter().copied().filter(|d| *d >= since).collect();
    recent.sort_unstable_by(|a, b| b.cmp(a));
    recent.truncate(settings.max_samples);

    if recent.len() < 2 {
        return settings.min_interval;
    }

    let gaps: Vec<f64> = recent
        .windows(2)
        .map(|pair| (pair[0] - pair[1]).num_seconds() as f64)
        .collect();

    let kept = reject_outliers(&gaps, settings.outlier_zscore);
    let interval = median(&kept).unwrap_or(0.0);

    settings.clamp(TimeDelta::seconds(interval.round() as i64))
}

/// Grow an interval after a failed or no-op check.
pub fn increment_update_interval(current: TimeDelta, settings: &SchedulerSettings) -> TimeDelta {
    settings.clamp(scale(current, settings.increment_factor))
}

/// Keep growing `interval` until `pub_date + interval` lies in the future
/// (or the maximum is reached), then clamp.
///
/// Without a known `pub_date` the interval is only clamped.
pub fn reschedule(
    pub_date: Option<DateTime<Utc>>,
    interval: TimeDelta,
    now: DateTime<Utc>,
    settings: &SchedulerSettings,
) -> TimeDelta {
    let mut interval = settings.clamp(interval);
    let Some(pub_date) = pub_date else {
        return interval;
    };

    while now > pub_date + interval && interval < settings.max_interval {
        let next = scale(interval, settings.increment_factor);
        if next <= interval {
            break;
        }
        interval = next;
    }

    settings.clamp(interval)
}

fn scale(interval: TimeDelta, factor: f64) -> TimeDelta {
    TimeDelta::seconds((interval.num_seconds() as f64 * factor).round() as i64)
}

fn reject_outliers(samples: &[f64], threshold: f64) -> Vec<f64> {
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    if std_dev == 0.0 || !std_dev.is_finite() {
        return samples.to_vec();
    }

    let kept: Vec<f64> = samples
        .iter()
        .copied()
        .filter(|s| ((s - mean) / std_dev).abs() <= threshold)
        .collect();

    if kept.is_empty() {
        samples.to_vec()
    } else {
        kept
    }
}

fn median(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}
