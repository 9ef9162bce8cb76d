//! Pairing codes: short base-32 tokens that carry the address and port of a
//! control server, plus an optional security salt.
//!
//! The code is a big-endian base-32 number whose least significant bits hold
//! the first field. Fields are variable width, so a reader pulls bits from the
//! tail of the string as it needs them.

use std::{fmt, net::Ipv4Addr, str::FromStr};

/// Port used when the code carries no explicit one.
pub const DEFAULT_PORT: u16 = 48875;

const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
const BITS_PER_DIGIT: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedCodeError {
    #[error("pairing code is empty")]
    Empty,
    #[error("invalid character {0:?} in pairing code")]
    InvalidCharacter(char),
    #[error("pairing code uses a reserved format")]
    ReservedSignal,
    #[error("pairing code checksum field is {0:#06x}, expected zero")]
    NonZeroTrailer(u16),
    #[error("pairing code has trailing data")]
    TrailingData,
}

#[derive(Debug, thiserror::Error)]
pub enum AddressParseError {
    #[error("invalid address: {0}")]
    Address(#[from] std::net::AddrParseError),
    #[error("invalid port: {0}")]
    Port(#[from] std::num::ParseIntError),
}

/// Where to find a control server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionDescriptor {
    pub host: Ipv4Addr,
    pub port: u16,
    /// Opaque to the client; passed through as decoded.
    pub security_salt: Option<u8>,
}

impl ConnectionDescriptor {
    pub fn new(host: Ipv4Addr, port: u16) -> Self {
        Self {
            host,
            port,
            security_salt: None,
        }
    }

    pub fn with_security_salt(mut self, salt: u8) -> Self {
        self.security_salt = Some(salt);
        self
    }

    /// Base URL for every request made to this server.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Shortest standard pairing code for this descriptor.
    pub fn pairing_code(&self) -> String {
        encode(self)
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ConnectionDescriptor {
    type Err = AddressParseError;

    /// Accepts `a.b.c.d` or `a.b.c.d:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = match s.split_once(':') {
            Some((host, port)) => (host, port.parse()?),
            None => (s, DEFAULT_PORT),
        };
        Ok(Self::new(host.parse()?, port))
    }
}

fn digit_value(c: char) -> Option<u32> {
    let upper = c.to_ascii_uppercase();
    ALPHABET
        .iter()
        .position(|&symbol| char::from(symbol) == upper)
        .map(|index| index as u32)
}

/// Pulls fixed-width fields off the tail of a code.
struct BitReader<'a> {
    digits: std::iter::Rev<std::str::Chars<'a>>,
    accumulator: u32,
    available: u32,
}

impl<'a> BitReader<'a> {
    fn new(code: &'a str) -> Self {
        Self {
            digits: code.chars().rev(),
            accumulator: 0,
            available: 0,
        }
    }

    /// Read the next `bits` (at most 16) bits. Past the first character the
    /// reader yields zeros.
    fn read(&mut self, bits: u32) -> Result<u32, MalformedCodeError> {
        while self.available < bits {
            let Some(c) = self.digits.next() else {
                break;
            };
            let value = digit_value(c).ok_or(MalformedCodeError::InvalidCharacter(c))?;
            self.accumulator |= value << self.available;
            self.available += BITS_PER_DIGIT;
        }

        let value = self.accumulator & ((1 << bits) - 1);
        self.accumulator >>= bits;
        self.available = self.available.saturating_sub(bits);
        Ok(value)
    }

    fn read_u8(&mut self, bits: u32) -> Result<u8, MalformedCodeError> {
        Ok(self.read(bits)? as u8)
    }

    /// True when every bit not yet consumed is zero.
    fn is_exhausted(self) -> Result<bool, MalformedCodeError> {
        if self.accumulator != 0 {
            return Ok(false);
        }
        for c in self.digits {
            let value = digit_value(c).ok_or(MalformedCodeError::InvalidCharacter(c))?;
            if value != 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Decode a pairing code.
pub fn decode(code: &str) -> Result<ConnectionDescriptor, MalformedCodeError> {
    let code = code.trim();
    if code.is_empty() {
        return Err(MalformedCodeError::Empty);
    }

    let mut reader = BitReader::new(code);

    let signal = reader.read(2)?;
    if signal & 1 != 0 {
        return Err(MalformedCodeError::ReservedSignal);
    }
    let security_salt = if signal & 2 != 0 {
        Some(reader.read_u8(8)?)
    } else {
        None
    };

    let host = match reader.read(2)? {
        0 => {
            let c = match reader.read(2)? {
                3 => reader.read_u8(8)?,
                shortcut => shortcut as u8,
            };
            let d = reader.read_u8(8)?;
            Ipv4Addr::new(192, 168, c, d)
        }
        1 => {
            let d = reader.read_u8(8)?;
            let c = reader.read_u8(8)?;
            let b = reader.read_u8(4)? + 16;
            Ipv4Addr::new(172, b, c, d)
        }
        2 => {
            let d = reader.read_u8(8)?;
            let c = reader.read_u8(8)?;
            let b = reader.read_u8(8)?;
            Ipv4Addr::new(10, b, c, d)
        }
        _ => {
            let d = reader.read_u8(8)?;
            let c = reader.read_u8(8)?;
            let b = reader.read_u8(8)?;
            let a = reader.read_u8(8)?;
            Ipv4Addr::new(a, b, c, d)
        }
    };

    let port = if reader.read(1)? == 1 {
        reader.read(16)? as u16
    } else {
        DEFAULT_PORT
    };

    let trailer = reader.read(16)? as u16;
    if trailer != 0 {
        return Err(MalformedCodeError::NonZeroTrailer(trailer));
    }
    if !reader.is_exhausted()? {
        return Err(MalformedCodeError::TrailingData);
    }

    Ok(ConnectionDescriptor {
        host,
        port,
        security_salt,
    })
}

/// Packs fields from the least significant bit upwards.
#[derive(Default)]
struct BitWriter {
    value: u128,
    position: u32,
}

impl BitWriter {
    fn write(&mut self, value: u32, bits: u32) {
        let mask = (1u128 << bits) - 1;
        self.value |= (u128::from(value) & mask) << self.position;
        self.position += bits;
    }

    fn finish(self) -> String {
        let mut value = self.value;
        if value == 0 {
            return "0".into();
        }

        let mut out = Vec::new();
        while value > 0 {
            out.push(ALPHABET[(value % 32) as usize]);
            value /= 32;
        }
        out.reverse();
        String::from_utf8_lossy(&out).into_owned()
    }
}

/// Encode a descriptor using the shortest address form available.
pub fn encode(descriptor: &ConnectionDescriptor) -> String {
    let mut writer = BitWriter::default();
    let [a, b, c, d] = descriptor.host.octets();

    match descriptor.security_salt {
        Some(salt) => {
            writer.write(0b10, 2);
            writer.write(salt.into(), 8);
        }
        None => writer.write(0, 2),
    }

    match (a, b) {
        (192, 168) => {
            writer.write(0, 2);
            if c <= 2 {
                writer.write(c.into(), 2);
            } else {
                writer.write(3, 2);
                writer.write(c.into(), 8);
            }
            writer.write(d.into(), 8);
        }
        (172, 16..=31) => {
            writer.write(1, 2);
            writer.write(d.into(), 8);
            writer.write(c.into(), 8);
            writer.write((b - 16).into(), 4);
        }
        (10, _) => {
            writer.write(2, 2);
            writer.write(d.into(), 8);
            writer.write(c.into(), 8);
            writer.write(b.into(), 8);
        }
        _ => {
            writer.write(3, 2);
            writer.write(d.into(), 8);
            writer.write(c.into(), 8);
            writer.write(b.into(), 8);
            writer.write(a.into(), 8);
        }
    }

    if descriptor.port != DEFAULT_PORT {
        writer.write(1, 1);
        writer.write(descriptor.port.into(), 16);
    }

    writer.finish()
}
