//! The poll, validate, upload cycle, and the loop that drives it.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::{
    gust::GustTracker,
    publisher::{Publisher, UploadPayload},
    settings::Credentials,
    shutdown::Shutdown,
    station::Station,
};

/// Outside temperatures above this (°F) mean a broken or disconnected sensor.
pub const TEMP_OUT_MAX: f64 = 200.0;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Why a cycle was abandoned. None of these stop the loop.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("Out of range temperature value: {0:.1}, check sensors")]
    Sensor(f64),
    #[error("station read failed: {0}")]
    Driver(#[source] BoxError),
    #[error("upload failed: {0}")]
    Publish(#[source] BoxError),
}

/// Read one sample, validate it, and upload it.
pub fn run_cycle<S, P>(
    station: &mut S,
    publisher: &mut P,
    gust: &mut GustTracker,
    poll_interval: Duration,
    credentials: &Credentials,
) -> Result<(), CycleError>
where
    S: Station,
    P: Publisher,
{
    let sample = station
        .parse()
        .map_err(|e| CycleError::Driver(Box::new(e)))?;

    if sample.temperature > TEMP_OUT_MAX {
        return Err(CycleError::Sensor(sample.temperature));
    }

    let gust = gust.get(&sample, poll_interval);

    publisher.set(UploadPayload {
        pressure: sample.pressure,
        dewpoint: sample.dew_point,
        humidity: sample.humidity,
        tempf: sample.temperature,
        rainin: sample.rain_rate,
        rainday: sample.rain_day,
        dateutc: sample.timestamp,
        windspeed: sample.wind_speed_10min,
        winddir: sample.wind_dir,
        windgust: gust.map(|g| g.speed),
        windgustdir: gust.and_then(|g| g.direction),
    });

    publisher
        .publish(&credentials.id, &credentials.password)
        .map_err(|e| CycleError::Publish(Box::new(e)))
}

/// Time from `now` until the next wall-clock multiple of `interval`.
///
/// Exactly on a boundary, that is a whole interval away.
pub fn until_next_tick(now: DateTime<Utc>, interval: Duration) -> Duration {
    let interval_ms = interval.as_millis().max(1);
    // Pre-1970 clocks are not a concern; clamp rather than wrap.
    let now_ms = u128::try_from(now.timestamp_millis()).unwrap_or(0);
    let remaining = interval_ms - now_ms % interval_ms;
    Duration::from_millis(remaining.try_into().unwrap_or(u64::MAX))
}

/// Counters reported when the loop exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub cycles: u64,
    pub failures: u64,
}

/// Poll and upload at every aligned tick until shutdown is requested.
///
/// Cycle failures are logged and otherwise ignored; the next tick is the retry.
pub fn run<S, P>(
    shutdown: &Shutdown,
    station: &mut S,
    publisher: &mut P,
    gust: &mut GustTracker,
    poll_interval: Duration,
    credentials: &Credentials,
) -> RunStats
where
    S: Station,
    P: Publisher,
{
    let mut stats = RunStats::default();
    while !shutdown.is_triggered() {
        let pause = until_next_tick(Utc::now(), poll_interval);
        tracing::info!("sleep {:.1}s", pause.as_secs_f64());
        if shutdown.sleep(pause) {
            break;
        }

        stats.cycles += 1;
        if let Err(e) = run_cycle(station, publisher, gust, poll_interval, credentials) {
            stats.failures += 1;
            tracing::error!("{}", e);
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::{ArchiveSummary, WeatherSample};
    use chrono::TimeZone;
    use std::collections::VecDeque;

    #[derive(Debug, thiserror::Error)]
    #[error("fake fault: {0}")]
    struct FakeFault(&'static str);

    /// Station that replays a script of samples and faults.
    struct ScriptedStation {
        script: VecDeque<Result<WeatherSample, FakeFault>>,
    }

    impl Station for ScriptedStation {
        type Error = FakeFault;

        fn parse(&mut self) -> Result<WeatherSample, FakeFault> {
            self.script
                .pop_front()
                .unwrap_or(Err(FakeFault("script exhausted")))
        }
    }

    /// Publisher that records what it was asked to publish.
    #[derive(Default)]
    struct RecordingPublisher {
        staged: Option<UploadPayload>,
        published: Vec<(String, UploadPayload)>,
        fail_with: Option<&'static str>,
        stop_after: Option<(usize, Shutdown)>,
    }

    impl Publisher for RecordingPublisher {
        type Error = FakeFault;

        fn set(&mut self, payload: UploadPayload) {
            self.staged = Some(payload);
        }

        fn publish(&mut self, id: &str, _password: &str) -> Result<(), FakeFault> {
            if let Some(msg) = self.fail_with {
                return Err(FakeFault(msg));
            }
            let payload = self.staged.take().ok_or(FakeFault("nothing staged"))?;
            self.published.push((id.to_string(), payload));
            if let Some((n, shutdown)) = &self.stop_after {
                if self.published.len() >= *n {
                    shutdown.trigger();
                }
            }
            Ok(())
        }
    }

    const MINUTE: Duration = Duration::from_secs(60);

    fn creds() -> Credentials {
        Credentials {
            id: "KXXYYY1".to_string(),
            password: "secret".to_string(),
        }
    }

    fn sample(temperature: f64, archive: Option<(f64, u16)>) -> WeatherSample {
        WeatherSample {
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            temperature,
            pressure: 29.92,
            dew_point: Some(57.4),
            humidity: Some(60),
            rain_rate: 0.0,
            rain_day: 0.1,
            wind_speed_10min: 5.0,
            wind_dir: 200,
            archive: archive.map(|(wind_hi, dir)| ArchiveSummary {
                wind_hi,
                wind_hi_dir: Some(dir),
            }),
        }
    }

    fn station(script: Vec<Result<WeatherSample, FakeFault>>) -> ScriptedStation {
        ScriptedStation {
            script: script.into(),
        }
    }

    #[test]
    fn cycle_maps_sample_to_payload() {
        let mut st = station(vec![Ok(sample(72.0, Some((15.0, 270))))]);
        let mut publisher = RecordingPublisher::default();
        let mut gust = GustTracker::new();

        run_cycle(&mut st, &mut publisher, &mut gust, MINUTE, &creds()).expect("cycle ok");

        let (id, payload) = &publisher.published[0];
        assert_eq!(id, "KXXYYY1");
        assert_eq!(payload.tempf, 72.0);
        assert_eq!(payload.pressure, 29.92);
        assert_eq!(payload.dewpoint, Some(57.4));
        assert_eq!(payload.humidity, Some(60));
        assert_eq!(payload.rainday, 0.1);
        assert_eq!(payload.windspeed, 5.0);
        assert_eq!(payload.winddir, 200);
        assert_eq!(payload.windgust, Some(15.0));
        assert_eq!(payload.windgustdir, Some(270));
        assert_eq!(gust.remaining_ticks(), 9);
    }

    #[test]
    fn missing_humidity_is_not_uploaded() {
        let mut s = sample(72.0, None);
        s.humidity = None;
        s.dew_point = None;
        let mut st = station(vec![Ok(s)]);
        let mut publisher = RecordingPublisher::default();
        let mut gust = GustTracker::new();

        run_cycle(&mut st, &mut publisher, &mut gust, MINUTE, &creds()).expect("cycle ok");

        let (_, payload) = &publisher.published[0];
        assert_eq!(payload.humidity, None);
        assert!(payload.fields().iter().all(|(name, _)| *name != "humidity"));
    }

    #[test]
    fn temperature_ceiling_is_inclusive() {
        let mut st = station(vec![Ok(sample(200.0, None)), Ok(sample(200.1, None))]);
        let mut publisher = RecordingPublisher::default();
        let mut gust = GustTracker::new();

        run_cycle(&mut st, &mut publisher, &mut gust, MINUTE, &creds()).expect("200 passes");
        let err = run_cycle(&mut st, &mut publisher, &mut gust, MINUTE, &creds())
            .expect_err("200.1 is a sensor fault");
        assert!(matches!(err, CycleError::Sensor(t) if t == 200.1));
        assert_eq!(err.to_string(), "Out of range temperature value: 200.1, check sensors");
        assert_eq!(publisher.published.len(), 1);
    }

    #[test]
    fn sensor_fault_does_not_age_gust() {
        let mut st = station(vec![
            Ok(sample(72.0, Some((15.0, 270)))),
            Ok(sample(3276.7, None)),
        ]);
        let mut publisher = RecordingPublisher::default();
        let mut gust = GustTracker::new();
        run_cycle(&mut st, &mut publisher, &mut gust, MINUTE, &creds()).unwrap();
        run_cycle(&mut st, &mut publisher, &mut gust, MINUTE, &creds()).unwrap_err();
        assert_eq!(gust.remaining_ticks(), 9);
    }

    #[test]
    fn faults_are_classified() {
        let mut st = station(vec![Err(FakeFault("no wakeup")), Ok(sample(72.0, None))]);
        let mut publisher = RecordingPublisher {
            fail_with: Some("503"),
            ..Default::default()
        };
        let mut gust = GustTracker::new();

        let driver = run_cycle(&mut st, &mut publisher, &mut gust, MINUTE, &creds()).unwrap_err();
        assert!(matches!(driver, CycleError::Driver(_)));
        let publish = run_cycle(&mut st, &mut publisher, &mut gust, MINUTE, &creds()).unwrap_err();
        assert!(matches!(publish, CycleError::Publish(_)));
        assert_eq!(publish.to_string(), "upload failed: fake fault: 503");
    }

    #[test]
    fn gust_reported_through_window_then_cleared() {
        let mut script = vec![Ok(sample(72.0, Some((15.0, 270))))];
        script.extend((0..10).map(|_| Ok(sample(72.0, None))));
        let mut st = station(script);
        let mut publisher = RecordingPublisher::default();
        let mut gust = GustTracker::new();

        for _ in 0..11 {
            run_cycle(&mut st, &mut publisher, &mut gust, MINUTE, &creds()).unwrap();
        }
        let gusts: Vec<_> = publisher
            .published
            .iter()
            .map(|(_, p)| (p.windgust, p.windgustdir))
            .collect();
        assert!(gusts[..10].iter().all(|g| *g == (Some(15.0), Some(270))));
        assert_eq!(gusts[10], (None, None));
    }

    #[test]
    fn ticks_align_to_wall_clock() {
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 15).unwrap();
        assert_eq!(until_next_tick(t, MINUTE), Duration::from_secs(45));

        let on_boundary = Utc.with_ymd_and_hms(2024, 6, 1, 12, 1, 0).unwrap();
        assert_eq!(until_next_tick(on_boundary, MINUTE), MINUTE);

        let t = Utc.timestamp_millis_opt(1_717_243_299_250).unwrap();
        assert_eq!(
            until_next_tick(t, Duration::from_secs(300)),
            Duration::from_millis(300_000 - 99_250)
        );
    }

    #[test]
    fn loop_survives_driver_fault() {
        let shutdown = Shutdown::new();
        let mut st = station(vec![Err(FakeFault("serial timeout")), Ok(sample(72.0, None))]);
        let mut publisher = RecordingPublisher {
            stop_after: Some((1, shutdown.clone())),
            ..Default::default()
        };
        let mut gust = GustTracker::new();

        let stats = run(
            &shutdown,
            &mut st,
            &mut publisher,
            &mut gust,
            Duration::from_millis(10),
            &creds(),
        );

        assert_eq!(stats, RunStats { cycles: 2, failures: 1 });
        assert_eq!(publisher.published.len(), 1);
    }

    #[test]
    fn loop_exits_promptly_when_already_shut_down() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let mut st = station(vec![]);
        let mut publisher = RecordingPublisher::default();
        let stats = run(
            &shutdown,
            &mut st,
            &mut publisher,
            &mut GustTracker::new(),
            MINUTE,
            &creds(),
        );
        assert_eq!(stats, RunStats::default());
    }
}
