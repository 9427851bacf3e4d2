//! Wind gust reporting.
//!
//! A gust shows up in one archive record, but uploads happen every poll.
//! [`GustTracker`] holds a qualifying gust for a fixed wall-clock window so
//! that it is reported on every upload in that window rather than once.

use std::time::Duration;

use crate::station::WeatherSample;

/// Minimum excess, in mph, of the interval's peak wind over the ten-minute
/// average for the peak to count as a gust.
pub const GUST_MPH_MIN: f64 = 7.0;

/// How long a gust keeps being reported after it is observed.
pub const GUST_UPDATE_PERIOD: Duration = Duration::from_secs(10 * 60);

/// A reportable gust.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Gust {
    /// Speed in mph.
    pub speed: f64,
    /// Direction in degrees, if known.
    pub direction: Option<u16>,
}

/// Tracks the most recent gust and how many more polls should report it.
///
/// `None` is the "no gust to report" value.
#[derive(Debug, Default)]
pub struct GustTracker {
    value: Option<Gust>,
    remaining_ticks: u32,
}

impl GustTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of polls at `poll_interval` that cover [`GUST_UPDATE_PERIOD`],
    /// rounded up.
    pub fn window_ticks(poll_interval: Duration) -> u32 {
        let period = GUST_UPDATE_PERIOD.as_millis();
        let interval = poll_interval.as_millis().max(1);
        period.div_ceil(interval).try_into().unwrap_or(u32::MAX)
    }

    /// Polls remaining before the current gust expires.
    pub fn remaining_ticks(&self) -> u32 {
        self.remaining_ticks
    }

    /// Update with the latest sample and get the gust to report, if any.
    ///
    /// A new gust is only recognized when the sample carries an archive
    /// record; otherwise the current gust just ages by one tick.
    pub fn get(&mut self, sample: &WeatherSample, poll_interval: Duration) -> Option<Gust> {
        if let Some(archive) = &sample.archive {
            let threshold = sample.wind_speed_10min + GUST_MPH_MIN;
            if archive.wind_hi >= threshold {
                self.value = Some(Gust {
                    speed: archive.wind_hi,
                    direction: archive.wind_hi_dir,
                });
                self.remaining_ticks = Self::window_ticks(poll_interval);
            } else {
                self.value = None;
            }
        }

        if self.remaining_ticks > 0 {
            self.remaining_ticks -= 1;
        } else {
            self.value = None;
        }

        match &self.value {
            Some(g) => tracing::debug!(
                "wind gust of {} mph from {}",
                g.speed,
                g.direction.map_or_else(|| "NA".to_string(), |d| d.to_string())
            ),
            None => tracing::debug!("wind gust of NA mph from NA"),
        }
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::ArchiveSummary;
    use chrono::Utc;
    use proptest::prelude::*;

    const MINUTE: Duration = Duration::from_secs(60);

    fn sample(wind_speed_10min: f64, archive: Option<(f64, u16)>) -> WeatherSample {
        WeatherSample {
            timestamp: Utc::now(),
            temperature: 72.0,
            pressure: 29.92,
            dew_point: Some(55.0),
            humidity: Some(50),
            rain_rate: 0.0,
            rain_day: 0.0,
            wind_speed_10min,
            wind_dir: 180,
            archive: archive.map(|(wind_hi, dir)| ArchiveSummary {
                wind_hi,
                wind_hi_dir: Some(dir),
            }),
        }
    }

    fn gust(speed: f64, direction: u16) -> Option<Gust> {
        Some(Gust {
            speed,
            direction: Some(direction),
        })
    }

    #[test]
    fn reports_for_the_whole_window() {
        let mut tracker = GustTracker::new();
        assert_eq!(tracker.get(&sample(5.0, Some((15.0, 270))), MINUTE), gust(15.0, 270));
        assert_eq!(tracker.remaining_ticks(), 9);

        for expected_remaining in (0..9).rev() {
            assert_eq!(tracker.get(&sample(5.0, None), MINUTE), gust(15.0, 270));
            assert_eq!(tracker.remaining_ticks(), expected_remaining);
        }

        assert_eq!(tracker.get(&sample(5.0, None), MINUTE), None);
        assert_eq!(tracker.remaining_ticks(), 0);
    }

    #[test]
    fn threshold_is_inclusive() {
        let mut tracker = GustTracker::new();
        assert_eq!(tracker.get(&sample(5.0, Some((12.0, 90))), MINUTE), gust(12.0, 90));
    }

    #[test]
    fn below_threshold_clears_current_gust() {
        let mut tracker = GustTracker::new();
        tracker.get(&sample(5.0, Some((20.0, 90))), MINUTE);
        assert_eq!(tracker.get(&sample(5.0, Some((11.9, 90))), MINUTE), None);
    }

    #[test]
    fn never_fabricates_without_archive() {
        let mut tracker = GustTracker::new();
        for _ in 0..20 {
            assert_eq!(tracker.get(&sample(0.0, None), MINUTE), None);
            assert_eq!(tracker.remaining_ticks(), 0);
        }
    }

    #[test]
    fn newer_gust_restarts_window() {
        let mut tracker = GustTracker::new();
        tracker.get(&sample(5.0, Some((15.0, 270))), MINUTE);
        tracker.get(&sample(5.0, None), MINUTE);
        assert_eq!(tracker.get(&sample(5.0, Some((25.0, 0))), MINUTE), gust(25.0, 0));
        assert_eq!(tracker.remaining_ticks(), 9);
    }

    #[test]
    fn long_interval_reports_once() {
        let mut tracker = GustTracker::new();
        let interval = Duration::from_secs(900);
        assert_eq!(GustTracker::window_ticks(interval), 1);
        assert_eq!(tracker.get(&sample(5.0, Some((15.0, 270))), interval), gust(15.0, 270));
        assert_eq!(tracker.get(&sample(5.0, None), interval), None);
    }

    proptest! {
        #[test]
        fn window_covers_update_period(secs in 1u64..=7200) {
            let ticks = GustTracker::window_ticks(Duration::from_secs(secs));
            prop_assert_eq!(u64::from(ticks), 600u64.div_ceil(secs));
        }

        #[test]
        fn counter_decrements_monotonically(secs in 1u64..=900) {
            let interval = Duration::from_secs(secs);
            let mut tracker = GustTracker::new();
            tracker.get(&sample(5.0, Some((15.0, 270))), interval);
            let mut last = tracker.remaining_ticks();
            prop_assert_eq!(last + 1, GustTracker::window_ticks(interval));
            while last > 0 {
                tracker.get(&sample(5.0, None), interval);
                prop_assert_eq!(tracker.remaining_ticks(), last - 1);
                last = tracker.remaining_ticks();
            }
        }
    }
}
