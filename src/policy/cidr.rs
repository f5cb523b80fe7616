//! CIDR range annotation values

use std::fmt;

use ipnet::{AddrParseError, IpNet};

/// A validated CIDR range as written in the namespace annotation
///
/// The literal text (surrounding whitespace trimmed) is kept for injection;
/// the parsed network is only used for validation and inspection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CidrRange {
    literal: String,
    network: IpNet,
}

impl CidrRange {
    /// Parse an `addr/prefix` string (IPv4 or IPv6)
    pub fn parse(value: &str) -> Result<Self, AddrParseError> {
        let literal = value.trim();
        let network: IpNet = literal.parse()?;
        Ok(Self {
            literal: literal.to_string(),
            network,
        })
    }

    /// The annotation value as written, without surrounding whitespace
    pub fn as_str(&self) -> &str {
        &self.literal
    }

    /// The parsed network
    pub fn network(&self) -> IpNet {
        self.network
    }
}

impl fmt::Display for CidrRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.literal)
    }
}
