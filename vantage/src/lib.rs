//! Driver for the Davis Vantage Pro and Vantage Pro2 weather station consoles.
//!
//! The console speaks a line-oriented command protocol over a serial link,
//! with binary responses protected by a CRC-16. This crate covers the pieces
//! needed for periodic reporting: waking the console, reading current
//! conditions (`LOOP`), setting the archive interval (`SETPER`), reading the
//! console clock (`GETTIME`), and downloading new archive records (`DMPAFT`).
//!
//! The driver works over any [`Transport`]: a `Read + Write` stream that can
//! also discard unread input. With the `serial` feature (on by default),
//! [`VantagePro::open`] opens a serial device.

use std::time::Instant;

use chrono::{DateTime, Duration, Utc};

mod packet;
mod serial;

pub use packet::{dew_point, ArchiveRecord, ArchiveStamp, LoopPacket};
pub use serial::{DavisCrc, InvalidCrc, Transport};

use packet::{ARCHIVE_PAGE_LEN, LOOP_LEN, TIME_LEN};
use serial::{SerialComm, ACK, ESC, NAK};

/// An error in communicating with the console.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("in Vantage Pro serial I/O: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "serial")]
    #[error("opening serial port: {0}")]
    Open(#[from] serialport::Error),
    #[error("console did not wake up after {0} attempts")]
    NoWakeup(u8),
    #[error("console did not acknowledge {0} (got {1:#04x})")]
    NoAck(&'static str, u8),
    #[error("in Vantage Pro CRC computation: {0}")]
    Crc(#[from] InvalidCrc),
    #[error("malformed {0} response from console")]
    Malformed(&'static str),
    #[error("invalid argument for Vantage Pro setup: {0}")]
    InvalidArgument(&'static str),
    #[error("console clock reports an invalid time")]
    InvalidTime,
}

/// Settings when starting to use a Vantage console.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Settings {
    /// Archive interval in minutes; the console accepts
    /// 1, 5, 10, 15, 30, 60 or 120.
    pub archive_period: u16,
    /// Serial baud rate. Consoles ship configured for 19200.
    pub baud_rate: u32,
    /// How many times to try waking the console before giving up.
    pub wakeup_attempts: u8,
    /// Serial read timeout; also the wait between wake-up attempts.
    pub timeout: std::time::Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            archive_period: 10,
            baud_rate: 19200,
            wakeup_attempts: 3,
            timeout: std::time::Duration::from_millis(1200),
        }
    }
}

const ARCHIVE_PERIODS: [u16; 7] = [1, 5, 10, 15, 30, 60, 120];

/// Reads of a DMPAFT page before the download is abandoned.
const PAGE_ATTEMPTS: u8 = 3;

/// Handle to a Vantage Pro console.
pub struct VantagePro<T> {
    comm: SerialComm<T>,
    settings: Settings,
    /// Stamp of the newest archive record seen so far.
    cursor: ArchiveStamp,
    /// When the cursor last moved or was compared with the console clock.
    /// `None` forces a comparison on the next poll without a new record.
    cursor_checked: Option<Instant>,
}

#[cfg(feature = "serial")]
impl VantagePro<Box<dyn serialport::SerialPort>> {
    /// Open the console on a serial device and configure it as specified.
    pub fn open(path: &str, settings: Settings) -> Result<Self, Error> {
        let port = serialport::new(path, settings.baud_rate)
            .timeout(settings.timeout)
            .open()?;
        tracing::info!("opened {} at {} baud", path, settings.baud_rate);
        Self::new(port, settings)
    }
}

impl<T> VantagePro<T>
where
    T: Transport,
{
    /// Attach to a console on the given transport and configure it as specified.
    ///
    /// Sets the archive interval and positions the archive cursor one interval
    /// before the console's current time, so that the first [`parse`] reports
    /// at most the most recent record.
    ///
    /// [`parse`]: VantagePro::parse
    pub fn new(port: T, settings: Settings) -> Result<Self, Error> {
        if !ARCHIVE_PERIODS.contains(&settings.archive_period) {
            return Err(Error::InvalidArgument(
                "archive period must be one of 1, 5, 10, 15, 30, 60 or 120 minutes",
            ));
        }
        if settings.wakeup_attempts == 0 {
            return Err(Error::InvalidArgument("at least one wake-up attempt is needed"));
        }

        let mut s = VantagePro {
            comm: SerialComm::new(port),
            settings,
            cursor: ArchiveStamp::EPOCH,
            cursor_checked: None,
        };

        s.comm.wakeup(s.settings.wakeup_attempts)?;
        s.run_command(Command::SetArchivePeriod(s.settings.archive_period))?;
        let now = s.console_time()?;
        s.cursor = ArchiveStamp::from_datetime(now - s.archive_period());
        s.cursor_checked = Some(Instant::now());
        tracing::debug!("console time {now}, archive cursor {:?}", s.cursor);

        Ok(s)
    }

    /// Perform one read cycle: current conditions, plus the newest archive
    /// record if one was written since the last call.
    pub fn parse(&mut self) -> Result<Reading, Error> {
        self.comm.wakeup(self.settings.wakeup_attempts)?;
        let current = self.read_loop()?;
        let timestamp = Utc::now();
        let archive = self.read_new_archive()?;

        Ok(Reading {
            timestamp,
            dew_point: current.hum_out.map(|h| dew_point(current.temp_out, h)),
            current,
            archive,
        })
    }

    /// Read the console clock (console-local time).
    pub fn console_time(&mut self) -> Result<chrono::NaiveDateTime, Error> {
        const GET_TIME: Command = Command::GetTime();
        let mut data = [0u8; GET_TIME.data_bytes()];
        self.run_command(GET_TIME)?;
        self.comm.read_checked(&mut data)?;
        packet::decode_time(&data)
    }

    fn read_loop(&mut self) -> Result<LoopPacket, Error> {
        const LOOP: Command = Command::Loop(1);
        let mut data = [0u8; LOOP.data_bytes()];
        self.run_command(LOOP)?;
        self.comm.read_checked(&mut data)?;
        LoopPacket::decode(&data)
    }

    /// Download archive records newer than the cursor and return the newest.
    ///
    /// Once the console has accepted DMPAFT, any failure cancels the download
    /// with ESC, so that the console is idle again for the next poll.
    fn read_new_archive(&mut self) -> Result<Option<ArchiveRecord>, Error> {
        self.run_command(Command::DownloadAfter())?;
        let newest = match self.download_after_cursor() {
            Ok(newest) => newest,
            Err(e) => {
                if let Err(esc) = self.comm.send_byte(ESC) {
                    tracing::debug!("could not cancel DMPAFT: {esc}");
                }
                return Err(e);
            }
        };

        match newest {
            Some(record) => {
                tracing::debug!("new archive record at {:?}", record.stamp);
                self.cursor = record.stamp;
                self.cursor_checked = Some(Instant::now());
            }
            None => self.check_cursor()?,
        }
        Ok(newest)
    }

    fn download_after_cursor(&mut self) -> Result<Option<ArchiveRecord>, Error> {
        self.comm.send_checked("DMPAFT", &self.cursor.to_bytes())?;

        let mut header = [0u8; 4];
        self.comm.read_checked(&mut header)?;
        let pages = u16::from_le_bytes([header[0], header[1]]);
        let first = u16::from_le_bytes([header[2], header[3]]) as usize;
        if first >= packet::RECORDS_PER_PAGE {
            return Err(Error::Malformed("DMPAFT"));
        }
        self.comm.send_byte(ACK)?;
        tracing::trace!("DMPAFT: {pages} page(s), first record {first}");

        let mut newest: Option<ArchiveRecord> = None;
        for page_index in 0..pages {
            let mut page = [0u8; ARCHIVE_PAGE_LEN];
            self.read_page(&mut page)?;
            self.comm.send_byte(ACK)?;

            let skip = if page_index == 0 { first } else { 0 };
            for record in packet::page_records(&page, skip) {
                // The archive is a ring; the tail of the last page may hold
                // records from before the cursor.
                if record.stamp <= self.cursor {
                    continue;
                }
                if newest.map_or(true, |n| record.stamp > n.stamp) {
                    newest = Some(record);
                }
            }
        }
        Ok(newest)
    }

    /// Read one DMPAFT page, asking the console to resend it while it fails
    /// its CRC.
    fn read_page(&mut self, page: &mut [u8; ARCHIVE_PAGE_LEN]) -> Result<(), Error> {
        let mut attempt = 1;
        loop {
            match self.comm.read_checked(page) {
                Err(Error::Crc(e)) if attempt < PAGE_ATTEMPTS => {
                    tracing::debug!("DMPAFT page failed its CRC ({e}), requesting resend");
                    self.comm.send_byte(NAK)?;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Re-anchor the cursor if the console clock has fallen behind it.
    ///
    /// Archive stamps are console-local time, so the clock going back (the
    /// end of daylight saving time, or a manual correction) makes every new
    /// record look older than the cursor. This is only checked once no record
    /// has arrived for two archive periods.
    fn check_cursor(&mut self) -> Result<(), Error> {
        let quiet_for = self.archive_period() * 2;
        let due = self.cursor_checked.map_or(true, |t| {
            Duration::from_std(t.elapsed()).map_or(true, |elapsed| elapsed >= quiet_for)
        });
        if !due {
            return Ok(());
        }

        let now = self.console_time()?;
        self.cursor_checked = Some(Instant::now());
        if ArchiveStamp::from_datetime(now) < self.cursor {
            let cursor = ArchiveStamp::from_datetime(now - self.archive_period());
            tracing::warn!(
                "console clock {now} is behind the archive cursor {:?}; resetting it to {:?}",
                self.cursor,
                cursor
            );
            self.cursor = cursor;
        }
        Ok(())
    }

    fn archive_period(&self) -> Duration {
        Duration::minutes(i64::from(self.settings.archive_period))
    }

    /// Run a command, without getting any data back.
    fn run_command(&mut self, cmd: Command) -> Result<(), Error> {
        self.comm.command(cmd.name(), &cmd.line())
    }
}

/// One read cycle's worth of data from the console.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Reading {
    /// Host time at which current conditions were read.
    pub timestamp: DateTime<Utc>,
    /// Current conditions.
    pub current: LoopPacket,
    /// Outside dew point in °F, derived from `current`.
    /// Absent when the humidity sensor reports no data.
    pub dew_point: Option<f64>,
    /// The newest archive record written since the previous read, if any.
    pub archive: Option<ArchiveRecord>,
}

impl core::fmt::Display for Reading {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let c = &self.current;
        writeln!(f, "T: {:.1} °F (in {:.1} °F)", c.temp_out, c.temp_in)?;
        match c.hum_out {
            Some(h) => writeln!(f, "RH: {}% (in {}%)", h, c.hum_in)?,
            None => writeln!(f, "RH: --% (in {}%)", c.hum_in)?,
        }
        if let Some(dp) = self.dew_point {
            writeln!(f, "DP: {:.1} °F", dp)?;
        }
        writeln!(f, "P: {:.3} inHg", c.barometer)?;
        writeln!(
            f,
            "Wind: {:.0} mph avg {:.0} mph from {}°",
            c.wind_speed, c.wind_speed_10min, c.wind_dir
        )?;
        write!(f, "Rain: {:.2} in/h, {:.2} in today", c.rain_rate, c.rain_day)?;
        if let Some(a) = &self.archive {
            write!(f, "\nArchive: gust {:.0} mph", a.wind_hi)?;
            if let Some(dir) = a.wind_hi_dir {
                write!(f, " from {}°", dir)?;
            }
        }
        Ok(())
    }
}

enum Command {
    /// Send the given number of LOOP packets.
    Loop(u16),

    /// Set the archive interval, in minutes.
    SetArchivePeriod(u16),

    /// Read the console clock.
    GetTime(),

    /// Download archive records after a given stamp.
    DownloadAfter(),
}

impl Command {
    /// Keyword for this command, as used in error messages.
    fn name(&self) -> &'static str {
        match self {
            Command::Loop(_) => "LOOP",
            Command::SetArchivePeriod(_) => "SETPER",
            Command::GetTime() => "GETTIME",
            Command::DownloadAfter() => "DMPAFT",
        }
    }

    /// The full command line, including its terminating line feed.
    fn line(&self) -> String {
        match self {
            Command::Loop(count) => format!("LOOP {count}\n"),
            Command::SetArchivePeriod(minutes) => format!("SETPER {minutes}\n"),
            _ => format!("{}\n", self.name()),
        }
    }

    /// Number of bytes that should be read for this command, excluding CRCs.
    const fn data_bytes(&self) -> usize {
        match self {
            Command::Loop(_) => LOOP_LEN,
            Command::GetTime() => TIME_LEN,
            _ => 0,
        }
    }
}
