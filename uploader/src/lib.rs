//! Weather station uploader.
//!
//! Periodically reads a Davis Vantage Pro console and uploads the readings to
//! the Weather Underground personal weather station service.
//!
//! Each poll is aligned to a wall-clock multiple of the update delay. A poll
//! reads one sample from the [`station::Station`], rejects implausible
//! temperatures, folds the latest archive record into a [`gust::GustTracker`],
//! and hands the result to a [`publisher::Publisher`]. Failures are logged and
//! the next tick serves as the retry.

pub mod gust;
pub mod logging;
pub mod publisher;
pub mod settings;
pub mod shutdown;
pub mod station;
pub mod update;

pub use settings::Settings;
