//! Endpoint address parsing shared by the config loader, the CLI and the engine.
//!
//! These types stay dependency-light so they can be reused by CLI tools,
//! services, and tests without dragging in heavyweight parsing crates.

use std::{
    error::Error,
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    str::FromStr,
};

const MAX_HOSTNAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Host component of an [`EndpointAddress`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Host {
    /// IPv4 or IPv6 literal.
    Ip(IpAddr),
    /// DNS name, resolved when the address is bound or dialed.
    Name(String),
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Ip(ip) => write!(f, "{ip}"),
            Host::Name(name) => f.write_str(name),
        }
    }
}

/// A validated `host:port` pair used for local listen, jump and target addresses.
///
/// Construction goes through [`parse_endpoint`] (or `str::parse`), so every
/// value in circulation has a well-formed host and a numeric port. Values are
/// immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EndpointAddress {
    host: Host,
    port: u16,
}

impl EndpointAddress {
    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Host rendered without IPv6 brackets, suitable for `(host, port)` socket APIs
    /// and for the `host_to_connect` field of a `direct-tcpip` request.
    pub fn host_string(&self) -> String {
        self.host.to_string()
    }

    /// Socket address when the host is an IP literal; `None` for DNS names.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self.host {
            Host::Ip(ip) => Some(SocketAddr::new(ip, self.port)),
            Host::Name(_) => None,
        }
    }
}

impl From<SocketAddr> for EndpointAddress {
    fn from(addr: SocketAddr) -> Self {
        Self {
            host: Host::Ip(addr.ip()),
            port: addr.port(),
        }
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.host {
            Host::Ip(IpAddr::V6(ip)) => write!(f, "[{ip}]:{}", self.port),
            _ => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

impl FromStr for EndpointAddress {
    type Err = InvalidAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_endpoint(s)
    }
}

/// Why an address string was rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddressErrorKind {
    /// The input was empty or only whitespace.
    Empty,
    /// No `:port` suffix was present.
    MissingPort,
    /// Host portion was empty.
    EmptyHost,
    /// Host is neither an IP literal nor a valid DNS name.
    InvalidHost(String),
    /// Port was not a decimal number in `0..=65535`.
    InvalidPort(String),
    /// An IPv6 literal was given without brackets, e.g. `::1:22`.
    UnbracketedIpv6,
    /// A `[` was opened but never closed.
    UnterminatedBracket,
}

/// Error returned when text does not describe a well-formed `host:port` pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidAddressError {
    /// The rejected input, verbatim.
    pub input: String,
    pub kind: AddressErrorKind,
}

impl fmt::Display for InvalidAddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid address {:?}: ", self.input)?;
        match &self.kind {
            AddressErrorKind::Empty => write!(f, "address must not be empty"),
            AddressErrorKind::MissingPort => write!(f, "missing :port suffix"),
            AddressErrorKind::EmptyHost => write!(f, "host is missing"),
            AddressErrorKind::InvalidHost(h) => write!(f, "invalid host {h:?}"),
            AddressErrorKind::InvalidPort(p) => write!(f, "port must be a number between 0-65535, got {p:?}"),
            AddressErrorKind::UnbracketedIpv6 => write!(f, "IPv6 literals must be wrapped in brackets"),
            AddressErrorKind::UnterminatedBracket => write!(f, "unterminated '[' in host"),
        }
    }
}

impl Error for InvalidAddressError {}

/// Parse `host:port` into an [`EndpointAddress`].
///
/// * IPv6 literals must be wrapped in brackets, e.g. `[fe80::1]:2222`.
/// * Hostnames must be RFC 1123 names; the final label may not be all digits,
///   which keeps malformed dotted quads like `10.0.0.300` from slipping through
///   as names.
/// * Surrounding whitespace is ignored.
pub fn parse_endpoint(input: &str) -> Result<EndpointAddress, InvalidAddressError> {
    let fail = |kind| InvalidAddressError {
        input: input.to_string(),
        kind,
    };
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(fail(AddressErrorKind::Empty));
    }

    let (host, port) = if let Some(rest) = trimmed.strip_prefix('[') {
        let (inside, after) = rest
            .split_once(']')
            .ok_or_else(|| fail(AddressErrorKind::UnterminatedBracket))?;
        let port = after.strip_prefix(':').ok_or_else(|| fail(AddressErrorKind::MissingPort))?;
        let ip = inside
            .parse::<Ipv6Addr>()
            .map_err(|_| fail(AddressErrorKind::InvalidHost(inside.to_string())))?;
        (Host::Ip(IpAddr::V6(ip)), port)
    } else {
        let (host, port) = trimmed.rsplit_once(':').ok_or_else(|| fail(AddressErrorKind::MissingPort))?;
        if host.contains(':') {
            return Err(fail(AddressErrorKind::UnbracketedIpv6));
        }
        (parse_host(host).map_err(fail)?, port)
    };

    let port = parse_port(port).map_err(fail)?;
    Ok(EndpointAddress { host, port })
}

fn parse_port(value: &str) -> Result<u16, AddressErrorKind> {
    if value.is_empty() {
        return Err(AddressErrorKind::MissingPort);
    }
    if !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AddressErrorKind::InvalidPort(value.to_string()));
    }
    value
        .parse::<u16>()
        .map_err(|_| AddressErrorKind::InvalidPort(value.to_string()))
}

fn parse_host(value: &str) -> Result<Host, AddressErrorKind> {
    if value.is_empty() {
        return Err(AddressErrorKind::EmptyHost);
    }
    if let Ok(ip) = value.parse::<Ipv4Addr>() {
        return Ok(Host::Ip(IpAddr::V4(ip)));
    }
    if is_valid_hostname(value) {
        Ok(Host::Name(value.to_string()))
    } else {
        Err(AddressErrorKind::InvalidHost(value.to_string()))
    }
}

fn is_valid_hostname(name: &str) -> bool {
    if name.len() > MAX_HOSTNAME_LEN {
        return false;
    }
    let labels: Vec<&str> = name.split('.').collect();
    let valid_labels = labels.iter().all(|label| {
        !label.is_empty()
            && label.len() <= MAX_LABEL_LEN
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    });
    let numeric_tail = labels
        .last()
        .is_some_and(|label| label.bytes().all(|b| b.is_ascii_digit()));
    valid_labels && !numeric_tail
}

#[cfg(test)]
#[path = "net_tests.rs"]
mod tests;
