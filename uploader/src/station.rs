//! Types for surfacing weather station data to the update loop.

use chrono::{DateTime, Utc};

/// One poll's worth of weather data, in the station's native (US) units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WeatherSample {
    /// Time at which the data in this sample was acquired.
    pub timestamp: DateTime<Utc>,

    /// Outside temperature, °F.
    pub temperature: f64,

    /// Barometric pressure, inHg.
    pub pressure: f64,

    /// Outside dew point, °F. Absent when the humidity sensor reports no data.
    pub dew_point: Option<f64>,

    /// Outside relative humidity as a percentage.
    pub humidity: Option<u8>,

    /// Rain rate, inches per hour.
    pub rain_rate: f64,

    /// Rain since local midnight, inches.
    pub rain_day: f64,

    /// Ten-minute average wind speed, mph.
    pub wind_speed_10min: f64,

    /// Wind direction, degrees.
    pub wind_dir: u16,

    /// Present when the station closed an archive interval since the last poll.
    pub archive: Option<ArchiveSummary>,
}

/// Peak wind over a completed archive interval.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ArchiveSummary {
    /// Highest wind speed, mph.
    pub wind_hi: f64,

    /// Direction of the highest wind speed, degrees.
    /// Absent when the station saw no wind.
    pub wind_hi_dir: Option<u16>,
}

/// A weather station that can be polled for a fresh sample.
pub trait Station {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Perform one read cycle.
    fn parse(&mut self) -> Result<WeatherSample, Self::Error>;
}

impl From<vantage::Reading> for WeatherSample {
    fn from(r: vantage::Reading) -> Self {
        WeatherSample {
            timestamp: r.timestamp,
            temperature: r.current.temp_out,
            pressure: r.current.barometer,
            dew_point: r.dew_point,
            humidity: r.current.hum_out,
            rain_rate: r.current.rain_rate,
            rain_day: r.current.rain_day,
            wind_speed_10min: r.current.wind_speed_10min,
            wind_dir: r.current.wind_dir,
            archive: r.archive.map(|a| ArchiveSummary {
                wind_hi: a.wind_hi,
                wind_hi_dir: a.wind_hi_dir,
            }),
        }
    }
}

impl<T> Station for vantage::VantagePro<T>
where
    T: vantage::Transport,
{
    type Error = vantage::Error;

    fn parse(&mut self) -> Result<WeatherSample, vantage::Error> {
        let reading = vantage::VantagePro::parse(self)?;
        tracing::debug!("station reading:\n{}", reading);
        Ok(reading.into())
    }
}
