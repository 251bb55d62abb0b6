use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::annotations::PortProtocol;

/// A cluster service, as seen by the Workload Resolver and Port Matcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub uid: String,
    pub namespace: String,
    pub selector: BTreeMap<String, String>,
    pub ports: Vec<ServicePort>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    pub name: Option<String>,
    pub port: u16,
    pub protocol: PortProtocol,
    pub target_port: TargetPort,
    pub app_protocol: Option<String>,
}

/// A service port's `targetPort`, either numeric or symbolic. `Number(0)`
/// is a valid wire value meaning "default to the service's own `port`",
/// per the Port Matcher contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetPort {
    Number(u16),
    Name(String),
}

impl ServicePort {
    /// Resolves the effective numeric target port, applying the
    /// `N == 0` -> service `port` default. Returns `None` for a symbolic
    /// target port.
    pub fn numeric_target(&self) -> Option<u16> {
        match &self.target_port {
            TargetPort::Number(0) => Some(self.port),
            TargetPort::Number(n) => Some(*n),
            TargetPort::Name(_) => None,
        }
    }

    pub fn target_is_numeric(&self) -> bool {
        matches!(self.target_port, TargetPort::Number(_))
    }
}

/// Strategy used to derive an `appProtocol` when a service port does not
/// declare one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AppProtocolStrategy {
    #[default]
    None,
    Http,
    Http2,
    PortName,
}

impl AppProtocolStrategy {
    /// Derives an `appProtocol` string for `port`, or `None` if the
    /// strategy yields nothing (including the `None` strategy itself).
    pub fn infer(&self, port: &ServicePort) -> Option<String> {
        if let Some(explicit) = &port.app_protocol {
            return Some(explicit.clone());
        }

        match self {
            AppProtocolStrategy::None => None,
            AppProtocolStrategy::Http => Some("http".to_string()),
            AppProtocolStrategy::Http2 => Some("http2".to_string()),
            AppProtocolStrategy::PortName => {
                let name = port.name.as_deref()?;
                let prefix = name.split('-').next().unwrap_or(name).to_lowercase();
                match prefix.as_str() {
                    "http" | "https" | "grpc" | "http2" => Some(prefix),
                    "h2c" => Some("http2".to_string()),
                    "tls" | "h2" => Some("https".to_string()),
                    _ => None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str) -> ServicePort {
        ServicePort {
            name: Some(name.to_string()),
            port: 80,
            protocol: PortProtocol::Tcp,
            target_port: TargetPort::Number(8080),
            app_protocol: None,
        }
    }

    #[test]
    fn http_strategy_is_always_http() {
        assert_eq!(
            AppProtocolStrategy::Http.infer(&port("anything")),
            Some("http".into())
        );
    }

    #[test]
    fn port_name_strategy_maps_known_prefixes() {
        assert_eq!(
            AppProtocolStrategy::PortName.infer(&port("grpc-internal")),
            Some("grpc".into())
        );
        assert_eq!(
            AppProtocolStrategy::PortName.infer(&port("h2c")),
            Some("http2".into())
        );
        assert_eq!(
            AppProtocolStrategy::PortName.infer(&port("tls-web")),
            Some("https".into())
        );
        assert_eq!(AppProtocolStrategy::PortName.infer(&port("metrics")), None);
    }

    #[test]
    fn explicit_app_protocol_wins_over_strategy() {
        let mut p = port("http-web");
        p.app_protocol = Some("custom".into());
        assert_eq!(AppProtocolStrategy::Http.infer(&p), Some("custom".into()));
    }

    #[test]
    fn numeric_target_defaults_to_service_port_when_zero() {
        let mut p = port("http");
        p.target_port = TargetPort::Number(0);
        assert_eq!(p.numeric_target(), Some(80));
    }
}
