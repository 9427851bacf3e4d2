//! Decoding of the console's binary packets.
//!
//! All multi-byte values are little-endian on the wire; only the trailing CRCs
//! are big-endian (and are stripped before anything here sees the data).

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::Error;

/// Length of a LOOP packet, excluding the CRC.
pub const LOOP_LEN: usize = 97;
/// Length of one archive record (revision B).
pub const ARCHIVE_RECORD_LEN: usize = 52;
/// Records per DMPAFT page.
pub const RECORDS_PER_PAGE: usize = 5;
/// Length of one DMPAFT page, excluding the CRC:
/// a sequence byte, five records, and four unused bytes.
pub const ARCHIVE_PAGE_LEN: usize = 1 + RECORDS_PER_PAGE * ARCHIVE_RECORD_LEN + 4;
/// Length of the GETTIME response, excluding the CRC.
pub const TIME_LEN: usize = 6;

/// Reported for an outside temperature when no sensor is attached.
const DASHED_TEMPERATURE: i16 = 0x7FFF;
/// Reported for a humidity when no sensor is attached.
const DASHED_HUMIDITY: u8 = 0xFF;
/// Rain collector "clicks" are 0.01 inch each.
const INCHES_PER_CLICK: f64 = 0.01;
/// Direction codes in archive records are sixteenths of a circle.
const DEGREES_PER_DIRECTION_CODE: f64 = 22.5;

fn u16_at(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn i16_at(data: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([data[offset], data[offset + 1]])
}

/// Current conditions, as reported by a LOOP packet.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LoopPacket {
    /// Barometric pressure in inches of mercury.
    pub barometer: f64,
    /// Inside temperature in degrees Fahrenheit.
    pub temp_in: f64,
    /// Inside relative humidity, percent.
    pub hum_in: u8,
    /// Outside temperature in degrees Fahrenheit.
    /// A dashed (missing) sensor reads as 3276.7.
    pub temp_out: f64,
    /// Instantaneous wind speed, mph.
    pub wind_speed: f64,
    /// Ten-minute average wind speed, mph.
    pub wind_speed_10min: f64,
    /// Wind direction in degrees, 1 to 360; 0 when calm.
    pub wind_dir: u16,
    /// Outside relative humidity, percent; `None` when the sensor reports no data.
    pub hum_out: Option<u8>,
    /// Rain rate in inches per hour.
    pub rain_rate: f64,
    /// Rain since midnight, in inches.
    pub rain_day: f64,
}

impl LoopPacket {
    /// Decode a LOOP packet whose CRC has already been checked.
    pub fn decode(data: &[u8; LOOP_LEN]) -> Result<Self, Error> {
        if &data[0..3] != b"LOO" {
            return Err(Error::Malformed("LOOP"));
        }
        if data[95] != b'\n' || data[96] != b'\r' {
            return Err(Error::Malformed("LOOP"));
        }

        let temp_out = i16_at(data, 12);
        if temp_out == DASHED_TEMPERATURE {
            tracing::debug!("outside temperature sensor reports no data");
        }

        Ok(LoopPacket {
            barometer: u16_at(data, 7) as f64 / 1000.0,
            temp_in: i16_at(data, 9) as f64 / 10.0,
            hum_in: data[11],
            temp_out: temp_out as f64 / 10.0,
            wind_speed: data[14] as f64,
            wind_speed_10min: data[15] as f64,
            wind_dir: u16_at(data, 16),
            hum_out: humidity(data[33]),
            rain_rate: u16_at(data, 41) as f64 * INCHES_PER_CLICK,
            rain_day: u16_at(data, 50) as f64 * INCHES_PER_CLICK,
        })
    }
}

/// The console's archive timestamp: packed date and hundreds-of-hours time.
///
/// Ordering follows chronological order of the console's local clock. When
/// that clock goes back, as at the end of daylight saving time, stamps
/// written afterwards compare as older than the ones before it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ArchiveStamp {
    /// `day + month * 32 + (year - 2000) * 512`
    pub date: u16,
    /// `hour * 100 + minute`
    pub time: u16,
}

impl ArchiveStamp {
    /// A stamp older than any record, i.e. "download everything".
    pub const EPOCH: ArchiveStamp = ArchiveStamp { date: 0, time: 0 };

    /// Pack a (console-local) time into a stamp.
    ///
    /// Years before 2000 cannot be represented and map to [`ArchiveStamp::EPOCH`].
    pub fn from_datetime(t: NaiveDateTime) -> Self {
        if t.year() < 2000 {
            return Self::EPOCH;
        }
        ArchiveStamp {
            date: (t.day() + t.month() * 32 + (t.year() as u32 - 2000) * 512) as u16,
            time: (t.hour() * 100 + t.minute()) as u16,
        }
    }

    /// Unpack into a (console-local) time, if the fields are valid.
    pub fn to_datetime(self) -> Option<NaiveDateTime> {
        let day = (self.date & 0x1F) as u32;
        let month = ((self.date >> 5) & 0x0F) as u32;
        let year = 2000 + (self.date >> 9) as i32;
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        let time = NaiveTime::from_hms_opt((self.time / 100) as u32, (self.time % 100) as u32, 0)?;
        Some(NaiveDateTime::new(date, time))
    }

    /// Wire form sent with DMPAFT (without CRC).
    pub fn to_bytes(self) -> [u8; 4] {
        let [d0, d1] = self.date.to_le_bytes();
        let [t0, t1] = self.time.to_le_bytes();
        [d0, d1, t0, t1]
    }
}

/// One archive record: a summary of the interval that ended at `stamp`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ArchiveRecord {
    pub stamp: ArchiveStamp,
    /// Average outside temperature over the interval, °F.
    pub temp_out: f64,
    /// Highest outside temperature over the interval, °F.
    pub temp_out_hi: f64,
    /// Lowest outside temperature over the interval, °F.
    pub temp_out_lo: f64,
    /// Rain over the interval, inches.
    pub rain: f64,
    /// Barometer at the end of the interval, inHg.
    pub barometer: f64,
    /// Outside humidity, percent, if the sensor reported any.
    pub hum_out: Option<u8>,
    /// Average wind speed, mph.
    pub wind_avg: f64,
    /// Highest wind speed, mph.
    pub wind_hi: f64,
    /// Direction of the highest wind speed in degrees, if there was any wind.
    pub wind_hi_dir: Option<u16>,
}

impl ArchiveRecord {
    /// Decode one 52-byte record. Returns `None` for an unused (erased) slot.
    pub fn decode(data: &[u8]) -> Option<Self> {
        debug_assert_eq!(data.len(), ARCHIVE_RECORD_LEN);
        let stamp = ArchiveStamp {
            date: u16_at(data, 0),
            time: u16_at(data, 2),
        };
        if stamp.date == 0xFFFF || stamp.time == 0xFFFF {
            return None;
        }
        let wind_hi_dir = match data[26] {
            code @ 0..=15 => Some((code as f64 * DEGREES_PER_DIRECTION_CODE).round() as u16),
            _ => None,
        };
        Some(ArchiveRecord {
            stamp,
            temp_out: i16_at(data, 4) as f64 / 10.0,
            temp_out_hi: i16_at(data, 6) as f64 / 10.0,
            temp_out_lo: i16_at(data, 8) as f64 / 10.0,
            rain: u16_at(data, 10) as f64 * INCHES_PER_CLICK,
            barometer: u16_at(data, 14) as f64 / 1000.0,
            hum_out: humidity(data[23]),
            wind_avg: data[24] as f64,
            wind_hi: data[25] as f64,
            wind_hi_dir,
        })
    }
}

fn humidity(raw: u8) -> Option<u8> {
    (raw != DASHED_HUMIDITY).then_some(raw)
}

/// Iterate the used records of a DMPAFT page, starting at `first` (the
/// console's index of the first requested record; only nonzero on the first
/// page).
pub fn page_records(
    page: &[u8; ARCHIVE_PAGE_LEN],
    first: usize,
) -> impl Iterator<Item = ArchiveRecord> + '_ {
    page[1..1 + RECORDS_PER_PAGE * ARCHIVE_RECORD_LEN]
        .chunks_exact(ARCHIVE_RECORD_LEN)
        .skip(first)
        .filter_map(ArchiveRecord::decode)
}

/// Decode the GETTIME response: seconds, minutes, hours, day, month, year - 1900.
pub fn decode_time(data: &[u8; TIME_LEN]) -> Result<NaiveDateTime, Error> {
    let [sec, min, hour, day, month, year] = *data;
    NaiveDate::from_ymd_opt(1900 + year as i32, month as u32, day as u32)
        .and_then(|d| d.and_hms_opt(hour as u32, min as u32, sec as u32))
        .ok_or(Error::InvalidTime)
}

/// Outside dew point in °F from temperature (°F) and relative humidity (%),
/// via the Magnus approximation.
pub fn dew_point(temp_f: f64, humidity: u8) -> f64 {
    const A: f64 = 17.27;
    const B: f64 = 237.7;
    let temp_c = (temp_f - 32.0) * 5.0 / 9.0;
    // ln(0) diverges; a 1% floor keeps the result finite.
    let rh = f64::from(humidity.clamp(1, 100)) / 100.0;
    let gamma = (A * temp_c) / (B + temp_c) + rh.ln();
    let dew_c = (B * gamma) / (A - gamma);
    dew_c * 9.0 / 5.0 + 32.0
}
