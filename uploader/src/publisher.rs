//! Upload of weather data to a PWS aggregation service.

use chrono::{DateTime, Utc};

/// Weather Underground's PWS upload endpoint.
pub const WUNDERGROUND_URL: &str =
    "https://weatherstation.wunderground.com/weatherstation/updateweatherstation.php";

/// Identifies this uploader to the service.
const SOFTWARE_TYPE: &str = concat!("vpro-to-wu/", env!("CARGO_PKG_VERSION"));

/// Format of `dateutc` expected by the service.
const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The values uploaded for one poll.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadPayload {
    /// Barometric pressure, inHg.
    pub pressure: f64,
    /// Dew point, °F.
    pub dewpoint: Option<f64>,
    /// Relative humidity, percent.
    pub humidity: Option<u8>,
    /// Outside temperature, °F.
    pub tempf: f64,
    /// Rain rate, inches per hour.
    pub rainin: f64,
    /// Rain since local midnight, inches.
    pub rainday: f64,
    /// Time of observation.
    pub dateutc: DateTime<Utc>,
    /// Wind speed, mph.
    pub windspeed: f64,
    /// Wind direction, degrees.
    pub winddir: u16,
    /// Recent gust speed, mph.
    pub windgust: Option<f64>,
    /// Recent gust direction, degrees.
    pub windgustdir: Option<u16>,
}

impl UploadPayload {
    /// The named fields in upload order. Absent values are left out.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![("pressure", format!("{:.3}", self.pressure))];
        if let Some(dewpoint) = self.dewpoint {
            fields.push(("dewpoint", format!("{:.1}", dewpoint)));
        }
        if let Some(humidity) = self.humidity {
            fields.push(("humidity", humidity.to_string()));
        }
        fields.extend([
            ("tempf", format!("{:.1}", self.tempf)),
            ("rainin", format!("{:.2}", self.rainin)),
            ("rainday", format!("{:.2}", self.rainday)),
            ("dateutc", self.dateutc.format(DATE_FORMAT).to_string()),
            ("windspeed", format!("{:.0}", self.windspeed)),
            ("winddir", self.winddir.to_string()),
        ]);
        if let Some(gust) = self.windgust {
            fields.push(("windgust", format!("{:.0}", gust)));
        }
        if let Some(dir) = self.windgustdir {
            fields.push(("windgustdir", dir.to_string()));
        }
        fields
    }
}

/// A service that weather data can be published to.
pub trait Publisher {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Stage the payload for the next [`publish`](Publisher::publish).
    fn set(&mut self, payload: UploadPayload);

    /// Transmit the staged payload.
    fn publish(&mut self, id: &str, password: &str) -> Result<(), Self::Error>;
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upload rejected: {0}")]
    Rejected(String),
    #[error("nothing staged to publish")]
    NothingStaged,
}

/// Publisher for the Weather Underground PWS protocol.
pub struct Wunderground {
    client: reqwest::blocking::Client,
    endpoint: String,
    staged: Option<UploadPayload>,
}

impl Wunderground {
    /// Create a publisher targeting `endpoint`.
    ///
    /// Requests have no timeout: a stalled upload holds the loop until the
    /// connection fails.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, PublishError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(None::<std::time::Duration>)
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            staged: None,
        })
    }

    /// Query parameters for an upload, in the service's vocabulary.
    fn query(id: &str, password: &str, payload: &UploadPayload) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("ID", id.to_string()),
            ("PASSWORD", password.to_string()),
        ];
        query.extend(
            payload
                .fields()
                .into_iter()
                .map(|(name, value)| (wire_name(name), value)),
        );
        query.push(("action", "updateraw".to_string()));
        query.push(("softwaretype", SOFTWARE_TYPE.to_string()));
        query
    }
}

/// Map a payload field name to the service's parameter name.
fn wire_name(field: &'static str) -> &'static str {
    match field {
        "pressure" => "baromin",
        "dewpoint" => "dewptf",
        "rainday" => "dailyrainin",
        "windspeed" => "windspeedmph",
        "windgust" => "windgustmph",
        other => other,
    }
}

impl Publisher for Wunderground {
    type Error = PublishError;

    fn set(&mut self, payload: UploadPayload) {
        self.staged = Some(payload);
    }

    fn publish(&mut self, id: &str, password: &str) -> Result<(), PublishError> {
        let payload = self.staged.take().ok_or(PublishError::NothingStaged)?;
        let query = Self::query(id, password, &payload);
        tracing::debug!(
            "publishing to {}: {:?}",
            self.endpoint,
            &query[2..] // Skip credentials.
        );

        let body = self
            .client
            .get(&self.endpoint)
            .query(&query)
            .send()?
            .error_for_status()?
            .text()?;

        match body.trim() {
            "success" => {
                tracing::info!("published observation at {}", payload.dateutc);
                Ok(())
            }
            other => Err(PublishError::Rejected(other.to_string())),
        }
    }
}
