use std::{fmt, str::FromStr, time::Duration};

use clap::{Parser, Subcommand};
use ucremote_core::{ConnectionDescriptor, MalformedCodeError, pairing};

#[derive(Parser)]
#[command(name = "ucremote", about = "Universal Control remote client", long_about = None)]
pub struct Args {
    /// Pairing code shown by the device
    #[arg(long, env = "UCREMOTE_CODE", global = true)]
    pub code: Option<PairingCode>,

    /// Server address as a.b.c.d or a.b.c.d:port; takes precedence over --code
    #[arg(long, env = "UCREMOTE_ADDRESS", global = true)]
    pub address: Option<ConnectionDescriptor>,

    /// Pause before re-reading the event stream after a failed poll
    #[arg(long, default_value_t = 1000, global = true)]
    pub retry_delay_ms: u64,

    /// Entries per page when browsing a source
    #[arg(long, default_value_t = 10, global = true)]
    pub page_size: usize,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the server a pairing code points at
    Decode {
        #[arg(value_name = "CODE")]
        token: PairingCode,
    },
    /// Make the pairing code for a server address
    Encode {
        #[arg(value_name = "ADDRESS")]
        server: ConnectionDescriptor,
        /// Security salt as a hex byte
        #[arg(long, value_parser = parse_salt)]
        salt: Option<u8>,
    },
    /// Follow the device, printing a JSON line whenever something changes
    Watch,
    /// List the device's sources
    Sources,
    /// List part of a source's content
    Browse {
        source: String,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// Defaults to the page size
        #[arg(long)]
        count: Option<usize>,
    },
    /// Switch to a live source, or list a browsable one
    Select { source: String },
    /// Play a piece of content from a source
    Tune { source: String, content: String },
    /// Set the output volume, a fraction between 0 and 1
    Volume { fraction: f32 },
}

/// A server location given as a pairing code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingCode(pub ConnectionDescriptor);

impl FromStr for PairingCode {
    type Err = MalformedCodeError;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        pairing::decode(code).map(Self)
    }
}

impl fmt::Display for PairingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.pairing_code())
    }
}

fn parse_salt(salt: &str) -> Result<u8, std::num::ParseIntError> {
    let digits = salt
        .strip_prefix("0x")
        .or_else(|| salt.strip_prefix("0X"))
        .unwrap_or(salt);
    u8::from_str_radix(digits, 16)
}

impl Args {
    /// The server to talk to, from `--address` or else `--code`.
    pub fn server(&self) -> anyhow::Result<ConnectionDescriptor> {
        match (self.address, self.code) {
            (Some(address), _) => Ok(address),
            (None, Some(PairingCode(descriptor))) => Ok(descriptor),
            (None, None) => anyhow::bail!("no server given: pass --code or --address"),
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use ucremote_core::DEFAULT_PORT;

    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("ucremote").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_parse_pairing_code() {
        let code = PairingCode::from_str("G0").unwrap();
        assert_eq!(code.0.host, Ipv4Addr::new(192, 168, 0, 8));
        assert_eq!(code.0.port, DEFAULT_PORT);
        assert_eq!(code.to_string(), "G0");
    }

    #[test]
    fn test_parse_pairing_code_invalid() {
        assert!(PairingCode::from_str("G!").is_err());
        assert!(PairingCode::from_str("").is_err());
    }

    #[test]
    fn test_parse_salt() {
        assert_eq!(parse_salt("2a").unwrap(), 0x2a);
        assert_eq!(parse_salt("0xFF").unwrap(), 0xff);
        assert!(parse_salt("100").is_err());
    }

    #[test]
    fn test_address_takes_precedence() {
        let args = parse(&["--code", "G0", "--address", "10.0.0.5:8080", "sources"]);
        let server = args.server().unwrap();
        assert_eq!(server.host, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(server.port, 8080);
    }

    #[test]
    fn test_code_alone() {
        let args = parse(&["watch", "--code", "4G"]);
        assert_eq!(args.server().unwrap().host, Ipv4Addr::new(192, 168, 1, 2));
        assert!(matches!(args.command, Command::Watch));
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["--address", "10.0.0.5", "sources"]);
        assert_eq!(args.retry_delay(), Duration::from_secs(1));
        assert_eq!(args.page_size, 10);
        assert_eq!(args.server().unwrap().port, DEFAULT_PORT);
    }

    #[test]
    fn test_browse_arguments() {
        let args = parse(&["browse", "iplayer", "--offset", "20", "--count", "5"]);
        let Command::Browse {
            source,
            offset,
            count,
        } = args.command
        else {
            panic!("expected browse");
        };
        assert_eq!(source, "iplayer");
        assert_eq!(offset, 20);
        assert_eq!(count, Some(5));
    }

    #[test]
    fn test_encode_with_salt() {
        let args = parse(&["encode", "192.168.0.8", "--salt", "0x01"]);
        let Command::Encode { server, salt } = args.command else {
            panic!("expected encode");
        };
        assert_eq!(server.host, Ipv4Addr::new(192, 168, 0, 8));
        assert_eq!(salt, Some(1));
    }

    #[test]
    fn test_decode_takes_positional_code() {
        let args = parse(&["decode", "g0"]);
        let Command::Decode { token } = args.command else {
            panic!("expected decode");
        };
        assert_eq!(token.0.host, Ipv4Addr::new(192, 168, 0, 8));
    }

    #[test]
    fn test_invalid_address_is_rejected() {
        let result = Args::try_parse_from(["ucremote", "--address", "nowhere", "sources"]);
        assert!(result.is_err());
    }
}
