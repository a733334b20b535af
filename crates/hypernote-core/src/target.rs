//! Join targets: where to reach a host.
//!
//! Accepted forms:
//! - `host` (default port)
//! - `host:port`
//! - `ws://host:port` with an optional trailing `/`
//! - `[ipv6]:port`

use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 4747;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("Join target is empty")]
    Empty,

    #[error("Unsupported scheme: {0} (only ws:// is supported)")]
    UnsupportedScheme(String),

    #[error("Unexpected character {0:?} in join target")]
    UnexpectedCharacter(char),

    #[error("Invalid host: {0}")]
    InvalidHost(String),

    #[error("Invalid port: {0}")]
    InvalidPort(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JoinTarget {
    /// Hostname, IPv4 or IPv6 address (without brackets)
    pub host: String,
    pub port: u16,
}

impl JoinTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn parse(input: &str) -> Result<Self, TargetError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(TargetError::Empty);
        }

        let authority = match input.split_once("://") {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("ws") => {
                rest.strip_suffix('/').unwrap_or(rest)
            }
            Some((scheme, _)) => return Err(TargetError::UnsupportedScheme(scheme.to_string())),
            None => input,
        };
        if authority.is_empty() {
            return Err(TargetError::Empty);
        }
        if let Some(c) = authority
            .chars()
            .find(|c| matches!(c, '/' | '?' | '#' | '@' | '\\') || c.is_whitespace())
        {
            return Err(TargetError::UnexpectedCharacter(c));
        }

        let (host, port) = match authority.strip_prefix('[') {
            Some(bracketed) => split_ipv6(bracketed)?,
            None => split_host(authority)?,
        };
        let port = match port {
            Some(port) => parse_port(port)?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    pub fn to_ws_url(&self) -> String {
        format!("ws://{self}")
    }
}

impl fmt::Display for JoinTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for JoinTarget {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// `addr]` or `addr]:port`, opening bracket already stripped.
fn split_ipv6(bracketed: &str) -> Result<(&str, Option<&str>), TargetError> {
    let (addr, tail) = bracketed
        .split_once(']')
        .ok_or_else(|| TargetError::InvalidHost(format!("[{bracketed}")))?;
    if addr.parse::<Ipv6Addr>().is_err() {
        return Err(TargetError::InvalidHost(addr.to_string()));
    }
    match tail {
        "" => Ok((addr, None)),
        _ => match tail.strip_prefix(':') {
            Some(port) => Ok((addr, Some(port))),
            None => Err(TargetError::InvalidHost(format!("[{bracketed}"))),
        },
    }
}

fn split_host(authority: &str) -> Result<(&str, Option<&str>), TargetError> {
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (authority, None),
    };
    if !is_valid_hostname(host) {
        return Err(TargetError::InvalidHost(host.to_string()));
    }
    Ok((host, port))
}

// Dot separated labels of ASCII alphanumerics and inner hyphens
fn is_valid_hostname(host: &str) -> bool {
    !host.is_empty()
        && host.len() <= 253
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
        })
}

fn parse_port(port: &str) -> Result<u16, TargetError> {
    let invalid = || TargetError::InvalidPort(port.to_string());
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(invalid()),
        Ok(port) => Ok(port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(input: &str) -> (String, u16) {
        let target = JoinTarget::parse(input).unwrap();
        (target.host, target.port)
    }

    #[test]
    fn test_accepted_forms() {
        assert_eq!(ok("laptop.local"), ("laptop.local".to_string(), DEFAULT_PORT));
        assert_eq!(ok("192.168.1.20:9000"), ("192.168.1.20".to_string(), 9000));
        assert_eq!(ok("ws://desk:4800"), ("desk".to_string(), 4800));
        assert_eq!(ok("WS://desk:4800/"), ("desk".to_string(), 4800));
        assert_eq!(ok("  desk  "), ("desk".to_string(), DEFAULT_PORT));
        assert_eq!(ok("[::1]:5000"), ("::1".to_string(), 5000));
        assert_eq!(ok("[fe80::1]"), ("fe80::1".to_string(), DEFAULT_PORT));
    }

    #[test]
    fn test_rejected_forms() {
        assert_eq!(JoinTarget::parse(""), Err(TargetError::Empty));
        assert_eq!(JoinTarget::parse("ws://"), Err(TargetError::Empty));
        assert_eq!(
            JoinTarget::parse("wss://desk"),
            Err(TargetError::UnsupportedScheme("wss".to_string()))
        );
        assert!(matches!(
            JoinTarget::parse("http://desk"),
            Err(TargetError::UnsupportedScheme(_))
        ));
        assert_eq!(
            JoinTarget::parse("ws://desk:1/path"),
            Err(TargetError::UnexpectedCharacter('/'))
        );
        assert_eq!(
            JoinTarget::parse("desk?x=1"),
            Err(TargetError::UnexpectedCharacter('?'))
        );
        assert_eq!(
            JoinTarget::parse("user@desk"),
            Err(TargetError::UnexpectedCharacter('@'))
        );
        assert_eq!(
            JoinTarget::parse("my desk"),
            Err(TargetError::UnexpectedCharacter(' '))
        );
    }

    #[test]
    fn test_rejected_hosts() {
        for input in ["-desk", "desk_1", "a..b", "::1", "[::1", "[nothex]:1", "[::1]x", ":4747"] {
            assert!(
                matches!(JoinTarget::parse(input), Err(TargetError::InvalidHost(_))),
                "{input}"
            );
        }
    }

    #[test]
    fn test_rejected_ports() {
        for input in ["desk:0", "desk:65536", "desk:http", "desk:", "desk:+80"] {
            assert!(
                matches!(JoinTarget::parse(input), Err(TargetError::InvalidPort(_))),
                "{input}"
            );
        }
        assert_eq!(ok("desk:65535").1, 65535);
    }

    #[test]
    fn test_ws_url() {
        assert_eq!(
            JoinTarget::parse("desk").unwrap().to_ws_url(),
            "ws://desk:4747"
        );
        assert_eq!(
            JoinTarget::parse("[::1]:9").unwrap().to_ws_url(),
            "ws://[::1]:9"
        );
        let parsed: JoinTarget = "10.0.0.2:1234".parse().unwrap();
        assert_eq!(parsed, JoinTarget::new("10.0.0.2", 1234));
    }
}
