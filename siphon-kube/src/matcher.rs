//! Port Matcher: a pure function mapping a service port to a container
//! port within a pod template. No I/O, per SPEC_FULL.md §4.2.

use siphon_protocol::container::Container;
use siphon_protocol::service::ServicePort;

/// Result of matching a service port against a container list.
///
/// `portIndex = -1` (`PortMatch::ZeroPortFallback`) represents the
/// documented fallback onto a container that declares no ports at all;
/// it is only ever produced for numeric target ports (see the Open
/// Questions resolution in SPEC_FULL.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortMatch<'a> {
    Found {
        container: &'a Container,
        container_index: usize,
        port_index: usize,
    },
    ZeroPortFallback {
        container: &'a Container,
        container_index: usize,
    },
    NoMatch,
}

/// Matches `service_port` against `containers`, in declaration order.
///
/// - Symbolic `targetPort`: first container whose port list has a port
///   named `service_port`'s target name.
/// - Numeric `targetPort` (service `port` when the target is `0`): first
///   container with a matching `containerPort`; failing that, the first
///   container declaring zero ports at all (`port_index = -1`
///   equivalent); failing that, no match.
pub fn match_port<'a>(service_port: &ServicePort, containers: &'a [Container]) -> PortMatch<'a> {
    match service_port.target_port_name() {
        Some(name) => containers
            .iter()
            .enumerate()
            .find_map(|(container_index, container)| {
                container
                    .ports
                    .iter()
                    .position(|p| p.name.as_deref() == Some(name))
                    .map(|port_index| PortMatch::Found {
                        container,
                        container_index,
                        port_index,
                    })
            })
            .unwrap_or(PortMatch::NoMatch),
        None => {
            let Some(target) = service_port.numeric_target() else {
                return PortMatch::NoMatch;
            };

            let direct = containers
                .iter()
                .enumerate()
                .find_map(|(container_index, container)| {
                    container
                        .ports
                        .iter()
                        .position(|p| p.number == target)
                        .map(|port_index| PortMatch::Found {
                            container,
                            container_index,
                            port_index,
                        })
                });

            direct.unwrap_or_else(|| {
                containers
                    .iter()
                    .enumerate()
                    .find(|(_, container)| container.ports.is_empty())
                    .map(|(container_index, container)| PortMatch::ZeroPortFallback {
                        container,
                        container_index,
                    })
                    .unwrap_or(PortMatch::NoMatch)
            })
        }
    }
}

/// Small helper extension kept local to the matcher: the service port
/// grammar in `siphon_protocol::service` exposes `numeric_target`, but
/// symbolic names need their own accessor since `numeric_target` returns
/// `None` for them without telling us the name.
trait TargetPortName {
    fn target_port_name(&self) -> Option<&str>;
}

impl TargetPortName for ServicePort {
    fn target_port_name(&self) -> Option<&str> {
        match &self.target_port {
            siphon_protocol::service::TargetPort::Name(name) => Some(name.as_str()),
            siphon_protocol::service::TargetPort::Number(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siphon_protocol::annotations::PortProtocol;
    use siphon_protocol::container::ContainerPort;
    use siphon_protocol::service::TargetPort;

    fn numeric_port(target: u16, service_port: u16) -> ServicePort {
        ServicePort {
            name: None,
            port: service_port,
            protocol: PortProtocol::Tcp,
            target_port: TargetPort::Number(target),
            app_protocol: None,
        }
    }

    fn symbolic_port(name: &str) -> ServicePort {
        ServicePort {
            name: None,
            port: 80,
            protocol: PortProtocol::Tcp,
            target_port: TargetPort::Name(name.to_string()),
            app_protocol: None,
        }
    }

    #[test]
    fn matches_numeric_port_on_first_container() {
        let containers = vec![Container::new("web").with_port(ContainerPort::new(8080))];
        let result = match_port(&numeric_port(8080, 80), &containers);
        assert!(matches!(
            result,
            PortMatch::Found {
                container_index: 0,
                port_index: 0,
                ..
            }
        ));
    }

    #[test]
    fn matches_symbolic_port_by_name() {
        let containers = vec![
            Container::new("sidecar").with_port(ContainerPort::new(9000)),
            Container::new("web").with_port(ContainerPort::named("http", 80)),
        ];
        let result = match_port(&symbolic_port("http"), &containers);
        assert!(matches!(
            result,
            PortMatch::Found {
                container_index: 1,
                port_index: 0,
                ..
            }
        ));
    }

    #[test]
    fn falls_back_to_zero_port_container_for_numeric_target() {
        let containers = vec![
            Container::new("has-ports").with_port(ContainerPort::new(3000)),
            Container::new("bare"),
        ];
        let result = match_port(&numeric_port(8080, 80), &containers);
        assert!(matches!(
            result,
            PortMatch::ZeroPortFallback {
                container_index: 1,
                ..
            }
        ));
    }

    #[test]
    fn symbolic_port_does_not_use_zero_port_fallback() {
        let containers = vec![Container::new("bare")];
        let result = match_port(&symbolic_port("http"), &containers);
        assert_eq!(result, PortMatch::NoMatch);
    }

    #[test]
    fn numeric_target_defaults_to_service_port_when_zero() {
        let containers = vec![Container::new("web").with_port(ContainerPort::new(80))];
        let result = match_port(&numeric_port(0, 80), &containers);
        assert!(matches!(result, PortMatch::Found { .. }));
    }

    #[test]
    fn no_match_when_nothing_fits() {
        let containers = vec![Container::new("web").with_port(ContainerPort::new(3000))];
        let result = match_port(&numeric_port(8080, 80), &containers);
        assert_eq!(result, PortMatch::NoMatch);
    }
}
