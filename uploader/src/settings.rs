//! Runtime configuration.

use std::time::Duration;

use crate::publisher::WUNDERGROUND_URL;

/// Station identity on the upload service.
#[derive(Clone)]
pub struct Credentials {
    pub id: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("id", &self.id)
            .field("password", &"***")
            .finish()
    }
}

/// Everything the uploader needs to run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub credentials: Credentials,
    /// Serial device of the station console.
    pub tty: String,
    /// Time between polls; polls are aligned to multiples of this.
    pub update_delay: Duration,
    /// Console archive interval, in minutes.
    pub archive_interval: u16,
    /// Upload endpoint.
    pub endpoint: String,
    /// Verbose logging.
    pub debug: bool,
    /// No console logging.
    pub quiet: bool,
}

impl Settings {
    /// Settings with defaults for everything but the credentials.
    pub fn new(id: impl Into<String>, password: impl Into<String>) -> Self {
        Settings {
            credentials: Credentials {
                id: id.into(),
                password: password.into(),
            },
            tty: "/dev/ttyS0".to_string(),
            update_delay: Duration::from_secs(60),
            archive_interval: 10,
            endpoint: WUNDERGROUND_URL.to_string(),
            debug: false,
            quiet: false,
        }
    }

    /// Settings for the station driver.
    pub fn station(&self) -> vantage::Settings {
        let mut s = vantage::Settings::default();
        s.archive_period = self.archive_interval;
        s
    }
}
