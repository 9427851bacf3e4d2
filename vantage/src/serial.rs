//! Helper module for serial communication with the Vantage console.

use crate::Error;
use crc_any::CRCu16;
use std::fmt::Display;
use std::io::{ErrorKind, Read, Write};

/// Acknowledgement byte sent by the console after an accepted command.
pub(crate) const ACK: u8 = 0x06;
/// Sent by the console when a CRC check on our data failed; sent by us to
/// request a resend.
pub(crate) const NAK: u8 = 0x21;
/// Cancels an archive download in progress.
pub(crate) const ESC: u8 = 0x1B;

/// Response to a wake-up line feed.
const WAKE_RESPONSE: [u8; 2] = *b"\n\r";

/// A byte stream to the console.
///
/// Beyond plain I/O, the link must be able to discard input that arrived but
/// was never read, so that a late reply cannot be taken for the answer to a
/// later request.
pub trait Transport: Read + Write {
    /// Drop everything received but not yet read.
    fn clear_input(&mut self) -> std::io::Result<()>;
}

#[cfg(feature = "serial")]
impl Transport for Box<dyn serialport::SerialPort> {
    fn clear_input(&mut self) -> std::io::Result<()> {
        serialport::SerialPort::clear(&**self, serialport::ClearBuffer::Input)
            .map_err(std::io::Error::from)
    }
}

/// Wrapper for the console's communication mechanism, including CRC-16 checking.
pub(crate) struct SerialComm<T> {
    port: T,
    crc: DavisCrc,
}

impl<T> SerialComm<T>
where
    T: Transport,
{
    pub fn new(port: T) -> Self {
        SerialComm {
            port,
            crc: DavisCrc::new(),
        }
    }

    /// Wake the console out of its low-power mode.
    ///
    /// The console answers a bare line feed with `\n\r` once it is listening.
    /// Timeouts and garbage both count as a failed attempt. Pending input is
    /// discarded before every attempt and after success: a reply that missed
    /// its timeout must not answer the next request.
    pub fn wakeup(&mut self, attempts: u8) -> Result<(), Error> {
        for attempt in 1..=attempts {
            self.port.clear_input()?;
            self.port.write_all(b"\n")?;
            self.port.flush()?;
            let mut response = [0u8; 2];
            match self.port.read_exact(&mut response) {
                Ok(()) if response == WAKE_RESPONSE => {
                    tracing::trace!("console awake after {attempt} attempt(s)");
                    self.port.clear_input()?;
                    return Ok(());
                }
                Ok(()) => tracing::debug!("unexpected wake-up response {:x?}", response),
                Err(e) if is_timeout(&e) => tracing::debug!("no wake-up response"),
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::NoWakeup(attempts))
    }

    /// Send a command line and wait for the console to acknowledge it.
    pub fn command(&mut self, name: &'static str, line: &str) -> Result<(), Error> {
        tracing::trace!("sending {:?}", line);
        self.port.write_all(line.as_bytes())?;
        self.port.flush()?;
        self.expect_ack(name)
    }

    /// Send a block of binary data with its CRC appended, and wait for an ACK.
    pub fn send_checked(&mut self, name: &'static str, data: &[u8]) -> Result<(), Error> {
        let crc = self.crc.checksum(data).to_be_bytes();
        self.port.write_all(data)?;
        self.port.write_all(&crc)?;
        self.port.flush()?;
        self.expect_ack(name)
    }

    /// Send a single control byte, e.g. to acknowledge a page of archive data.
    /// Nothing is read back.
    pub fn send_byte(&mut self, byte: u8) -> Result<(), Error> {
        self.port.write_all(&[byte])?;
        self.port.flush()?;
        Ok(())
    }

    /// Read `data.len()` bytes followed by a CRC, and validate the CRC.
    pub fn read_checked(&mut self, data: &mut [u8]) -> Result<(), Error> {
        self.port.read_exact(data)?;
        let mut crc = [0u8; 2];
        self.port.read_exact(&mut crc)?;
        self.crc.check(data, u16::from_be_bytes(crc))?;
        Ok(())
    }

    fn expect_ack(&mut self, name: &'static str) -> Result<(), Error> {
        let mut response = [0u8; 1];
        self.port.read_exact(&mut response)?;
        match response[0] {
            ACK => Ok(()),
            NAK => {
                tracing::debug!("{name}: console reported a CRC failure on our data");
                Err(Error::NoAck(name, NAK))
            }
            other => Err(Error::NoAck(name, other)),
        }
    }

    #[cfg(test)]
    pub fn port(&self) -> &T {
        &self.port
    }

    #[cfg(test)]
    pub fn port_mut(&mut self) -> &mut T {
        &mut self.port
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock)
}

/// CRC computer for the Vantage serial protocol: CRC-16/XMODEM,
/// transmitted most-significant byte first.
pub struct DavisCrc(CRCu16);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InvalidCrc {
    computed: u16,
    received: u16,
}

impl Display for InvalidCrc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "received: {:#06x} computed: {:#06x}",
            self.received, self.computed
        )
    }
}

impl std::error::Error for InvalidCrc {}

impl Default for DavisCrc {
    fn default() -> Self {
        Self::new()
    }
}

impl DavisCrc {
    /// Create a CRC computer for the console's check.
    pub fn new() -> Self {
        DavisCrc(CRCu16::create_crc(
            /*poly=*/ 0x1021, /*bits=*/ 16, /*initial=*/ 0x0000, /*final_xor=*/ 0,
            /*reflect=*/ false,
        ))
    }

    /// Compute the CRC of a block.
    pub fn checksum(&mut self, data: &[u8]) -> u16 {
        let DavisCrc(ref mut crc) = self;
        crc.reset();
        crc.digest(data);
        crc.get_crc()
    }

    /// Validate a received CRC against the block it covers.
    pub fn check(&mut self, data: &[u8], received: u16) -> Result<(), InvalidCrc> {
        let computed = self.checksum(data);
        if computed != received {
            Err(InvalidCrc { computed, received })
        } else {
            Ok(())
        }
    }
}
