//! Pod-template annotations consumed by the Sidecar Planner, and the port
//! identifier grammar used by several of them.

use serde::{Deserialize, Serialize};

pub const ANNOTATION_PREFIX: &str = "siphon.dev";

pub const INJECT_SERVICE_NAME: &str = "siphon.dev/inject-service-name";
pub const INJECT_SERVICE_PORTS: &str = "siphon.dev/inject-service-ports";
/// Deprecated singular form, still honored when `INJECT_SERVICE_PORTS` is
/// absent. See the Open Questions resolution in SPEC_FULL.md §4.4.
pub const INJECT_SERVICE_PORT: &str = "siphon.dev/inject-service-port";
pub const INJECT_CONTAINER_PORTS: &str = "siphon.dev/inject-container-ports";
pub const IGNORED_VOLUME_MOUNTS: &str = "siphon.dev/ignored-volume-mounts";
pub const SERVICE_NAME_ANNOTATION: &str = "siphon.dev/inject-service-name";

/// Transport protocol of a port identifier. Only TCP and UDP are
/// meaningful for Kubernetes service ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortProtocol {
    Tcp,
    Udp,
}

impl Default for PortProtocol {
    fn default() -> Self {
        PortProtocol::Tcp
    }
}

impl std::str::FromStr for PortProtocol {
    type Err = PortIdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "" | "TCP" => Ok(PortProtocol::Tcp),
            "UDP" => Ok(PortProtocol::Udp),
            other => Err(PortIdentifierError::UnknownProtocol(other.to_string())),
        }
    }
}

/// One `[PROTO/]NAME` or `[PROTO/]NUMBER` identifier from a
/// comma-separated annotation value, e.g. `TCP/http`, `8080`, `UDP/53`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortIdentifier {
    pub protocol: PortProtocol,
    pub selector: PortSelector,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSelector {
    Name(String),
    Number(u16),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortIdentifierError {
    #[error("unknown protocol `{0}` in port identifier")]
    UnknownProtocol(String),
    #[error("empty port identifier")]
    Empty,
}

impl std::str::FromStr for PortIdentifier {
    type Err = PortIdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(PortIdentifierError::Empty);
        }

        let (proto_part, rest) = match s.split_once('/') {
            Some((proto, rest)) => (proto, rest),
            None => ("", s),
        };
        let protocol: PortProtocol = proto_part.parse()?;
        let selector = match rest.parse::<u16>() {
            Ok(number) => PortSelector::Number(number),
            Err(_) => PortSelector::Name(rest.to_string()),
        };

        Ok(PortIdentifier { protocol, selector })
    }
}

/// Parses a comma-separated list of port identifiers, e.g.
/// `"TCP/http,8080,UDP/53"`. Empty segments (from trailing commas or
/// repeated separators) are skipped.
pub fn parse_identifier_list(value: &str) -> Result<Vec<PortIdentifier>, PortIdentifierError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_number_as_tcp() {
        let id: PortIdentifier = "8080".parse().unwrap();
        assert_eq!(id.protocol, PortProtocol::Tcp);
        assert_eq!(id.selector, PortSelector::Number(8080));
    }

    #[test]
    fn parses_protocol_qualified_name() {
        let id: PortIdentifier = "TCP/http".parse().unwrap();
        assert_eq!(id.protocol, PortProtocol::Tcp);
        assert_eq!(id.selector, PortSelector::Name("http".into()));
    }

    #[test]
    fn protocol_is_case_insensitive() {
        let id: PortIdentifier = "udp/53".parse().unwrap();
        assert_eq!(id.protocol, PortProtocol::Udp);
        assert_eq!(id.selector, PortSelector::Number(53));
    }

    #[test]
    fn rejects_unknown_protocol() {
        assert!(matches!(
            "SCTP/80".parse::<PortIdentifier>(),
            Err(PortIdentifierError::UnknownProtocol(_))
        ));
    }

    #[test]
    fn parses_list_skipping_empty_segments() {
        let list = parse_identifier_list("TCP/http, 8080 ,,UDP/53").unwrap();
        assert_eq!(list.len(), 3);
    }
}
