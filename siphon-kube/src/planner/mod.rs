//! Sidecar Planner: computes the sidecar injection plan for a workload,
//! per SPEC_FULL.md §4.3.

pub mod agent_ports;

use std::collections::BTreeMap;

use siphon_protocol::annotations::{
    parse_identifier_list, PortIdentifier, PortSelector, INJECT_CONTAINER_PORTS,
    INJECT_SERVICE_PORT, INJECT_SERVICE_PORTS,
};
use siphon_protocol::base26::{env_prefix, synthetic_port_name};
use siphon_protocol::container::ContainerPort;
use siphon_protocol::intercept::{InterceptPoint, ServiceCoordinates};
use siphon_protocol::plan::{ContainerPlan, ReplacePolicy, SidecarPlan};
use siphon_protocol::service::{AppProtocolStrategy, Service, ServicePort};
use siphon_protocol::{Error as ProtoError, Workload};

use crate::error::{Error, Result};
use crate::matcher::{match_port, PortMatch};
use crate::mesh::is_mesh_sidecar;

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub agent_container_name: String,
    pub agent_image: String,
    pub agent_port_base: u16,
    pub manager_address: String,
    pub mount_point_prefix: String,
    pub app_protocol_strategy: AppProtocolStrategy,
    /// Volume mount names/paths never propagated into the agent, in
    /// addition to whatever the `ignored-volume-mounts` annotation adds.
    pub ignored_mounts: Vec<String>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        PlannerConfig {
            agent_container_name: "siphon-agent".to_string(),
            agent_image: "ghcr.io/siphon-dev/agent:latest".to_string(),
            agent_port_base: 60000,
            manager_address: "siphon-manager.siphon".to_string(),
            mount_point_prefix: "/siphon".to_string(),
            app_protocol_strategy: AppProtocolStrategy::None,
            ignored_mounts: Vec::new(),
        }
    }
}

struct SelectedServicePort<'s> {
    service: &'s Service,
    port: &'s ServicePort,
}

fn protocol_matches(identifier: &PortIdentifier, port_protocol: siphon_protocol::annotations::PortProtocol) -> bool {
    identifier.protocol == port_protocol
}

fn service_port_matches(identifier: &PortIdentifier, port: &ServicePort) -> bool {
    if !protocol_matches(identifier, port.protocol) {
        return false;
    }
    match &identifier.selector {
        PortSelector::Name(name) => port.name.as_deref() == Some(name.as_str()),
        PortSelector::Number(number) => port.port == *number,
    }
}

fn container_port_matches(identifier: &PortIdentifier, port: &ContainerPort) -> bool {
    if !protocol_matches(identifier, port.protocol) {
        return false;
    }
    match &identifier.selector {
        PortSelector::Name(name) => port.name.as_deref() == Some(name.as_str()),
        PortSelector::Number(number) => port.number == *number,
    }
}

/// Resolves the effective `inject-service-ports` identifier list: the
/// plural annotation wins whenever present; the deprecated singular form
/// is honored only in its absence (see the Open Questions resolution in
/// SPEC_FULL.md §4.4). Returns `None` when neither annotation is set,
/// meaning "every service port is eligible".
fn effective_service_port_filter(
    annotations: &BTreeMap<String, String>,
) -> Result<Option<Vec<PortIdentifier>>> {
    if let Some(plural) = annotations.get(INJECT_SERVICE_PORTS) {
        if annotations.contains_key(INJECT_SERVICE_PORT) {
            tracing::warn!(
                "both {INJECT_SERVICE_PORTS} and deprecated {INJECT_SERVICE_PORT} are set; \
                 the deprecated singular annotation is ignored"
            );
        }
        return Ok(Some(parse_identifier_list(plural).map_err(|e| {
            Error::invalid_state("workload annotations", e.to_string())
        })?));
    }

    if let Some(singular) = annotations.get(INJECT_SERVICE_PORT) {
        tracing::warn!("{INJECT_SERVICE_PORT} is deprecated; use {INJECT_SERVICE_PORTS} instead");
        return Ok(Some(parse_identifier_list(singular).map_err(|e| {
            Error::invalid_state("workload annotations", e.to_string())
        })?));
    }

    Ok(None)
}

fn first_non_mesh_non_agent_container<'w>(
    workload: &'w Workload,
    agent_container_name: &str,
) -> Option<(usize, &'w siphon_protocol::container::Container)> {
    workload
        .containers
        .iter()
        .enumerate()
        .filter(|(_, c)| c.name != agent_container_name)
        .find(|(_, c)| !is_mesh_sidecar(&c.name))
        .or_else(|| {
            workload
                .containers
                .iter()
                .enumerate()
                .find(|(_, c)| c.name != agent_container_name)
        })
}

/// Deterministic core of the Sidecar Planner. Does no I/O: `services`
/// must already have been discovered via the Workload Resolver. Same
/// inputs always produce the same plan modulo agent-port values, which
/// are ephemeral and reallocated every invocation.
pub fn plan(
    workload: &Workload,
    services: &[Service],
    existing_plan: Option<&SidecarPlan>,
    config: &PlannerConfig,
) -> Result<SidecarPlan> {
    // Step 1: collision check.
    for container in &workload.containers {
        if container.name == config.agent_container_name {
            continue;
        }
        if let Some(port) = container
            .ports
            .iter()
            .find(|p| p.number == config.agent_port_base)
        {
            return Err(Error::Protocol(ProtoError::AgentPortCollision {
                container: container.name.clone(),
                port: port.number,
            }));
        }
    }

    // Step 3: service-port filter.
    let filter = effective_service_port_filter(&workload.annotations)?;

    let mut selected_ports: Vec<SelectedServicePort<'_>> = Vec::new();
    for service in services {
        for port in &service.ports {
            let included = match &filter {
                None => true,
                Some(identifiers) => identifiers.iter().any(|id| service_port_matches(id, port)),
            };
            if included {
                selected_ports.push(SelectedServicePort { service, port });
            }
        }
    }

    let mut allocator = agent_ports::AgentPortAllocator::new(config.agent_port_base);
    // Ordered list of (container_name, InterceptPoint), in the order
    // containers are first touched -- this fixes env-prefix ordering.
    let mut ordered_points: Vec<(String, InterceptPoint)> = Vec::new();

    // Step 4: per-service-port loop.
    for selected in &selected_ports {
        let matched = match_port(selected.port, &workload.containers);
        let (container, container_index, port_index) = match matched {
            PortMatch::Found {
                container,
                container_index,
                port_index,
            } => (container, container_index, Some(port_index)),
            PortMatch::ZeroPortFallback {
                container,
                container_index,
            } => (container, container_index, None),
            PortMatch::NoMatch => continue,
        };
        let _ = container_index;

        if container.name == config.agent_container_name {
            continue;
        }

        let container_port_number = port_index
            .and_then(|idx| container.ports.get(idx))
            .map(|p| p.number)
            .unwrap_or_else(|| selected.port.numeric_target().unwrap_or(selected.port.port));
        let container_port_name = port_index.and_then(|idx| container.ports[idx].name.clone());

        let agent_port = allocator.allocate_for(container_port_number);

        let point = InterceptPoint {
            service: Some(ServiceCoordinates {
                name: selected.service.name.clone(),
                uid: selected.service.uid.clone(),
                port_name: selected.port.name.clone(),
                port: selected.port.port,
            }),
            container_name: container.name.clone(),
            container_port_name,
            container_port: container_port_number,
            agent_port,
            protocol: selected.port.protocol,
            app_protocol: config.app_protocol_strategy.infer(selected.port),
            target_port_is_numeric: selected.port.target_is_numeric(),
        };

        ordered_points.push((container.name.clone(), point));
    }

    // Step 5: service-less intercepts.
    if let Some(raw) = workload.annotations.get(INJECT_CONTAINER_PORTS) {
        let identifiers = parse_identifier_list(raw)
            .map_err(|e| Error::invalid_state("workload annotations", e.to_string()))?;
        let mut synthetic_ordinal = 0usize;

        for identifier in &identifiers {
            let existing_match = workload
                .containers
                .iter()
                .filter(|c| c.name != config.agent_container_name)
                .find_map(|c| {
                    c.ports
                        .iter()
                        .find(|p| container_port_matches(identifier, p))
                        .map(|p| (c, p.number, p.name.clone()))
                });

            let (container_name, container_port_number, container_port_name) =
                if let Some((c, number, name)) = existing_match {
                    (c.name.clone(), number, name)
                } else {
                    match &identifier.selector {
                        PortSelector::Number(number) => {
                            let Some((_, container)) =
                                first_non_mesh_non_agent_container(workload, &config.agent_container_name)
                            else {
                                return Err(Error::Protocol(ProtoError::NoMatchingContainerPort {
                                    identifier: format!("{:?}", identifier.selector),
                                }));
                            };
                            let synthetic_name = synthetic_port_name(synthetic_ordinal);
                            synthetic_ordinal += 1;
                            (container.name.clone(), *number, Some(synthetic_name))
                        }
                        PortSelector::Name(name) => {
                            return Err(Error::Protocol(ProtoError::NoMatchingContainerPort {
                                identifier: name.clone(),
                            }));
                        }
                    }
                };

            // Dedup: skip if a service-bound point already targets this
            // exact container port.
            let already_covered = ordered_points.iter().any(|(name, point)| {
                name == &container_name && point.container_port == container_port_number
            });
            if already_covered {
                continue;
            }

            let agent_port = allocator.allocate_for(container_port_number);
            let point = InterceptPoint {
                service: None,
                container_name: container_name.clone(),
                container_port_name,
                container_port: container_port_number,
                agent_port,
                protocol: identifier.protocol,
                app_protocol: None,
                target_port_is_numeric: true,
            };
            ordered_points.push((container_name, point));
        }
    }

    // Step 6: per-container aggregation, preserving first-appearance
    // order so env prefixes are stable across identical inputs.
    let mut container_order: Vec<String> = Vec::new();
    let mut grouped: BTreeMap<String, Vec<InterceptPoint>> = BTreeMap::new();
    for (name, point) in ordered_points {
        if !container_order.contains(&name) {
            container_order.push(name.clone());
        }
        grouped.entry(name).or_default().push(point);
    }

    let mut containers = Vec::new();
    for (ordinal, name) in container_order.iter().enumerate() {
        let points = grouped.remove(name).unwrap_or_default();
        let source_container = workload.container(name);

        let ignored: Vec<&str> = config
            .ignored_mounts
            .iter()
            .map(String::as_str)
            .chain(
                workload
                    .annotations
                    .get(siphon_protocol::annotations::IGNORED_VOLUME_MOUNTS)
                    .into_iter()
                    .flat_map(|v| v.split(',').map(str::trim)),
            )
            .collect();

        let mounts = source_container
            .map(|c| {
                c.volume_mount_paths
                    .iter()
                    .filter(|m| !ignored.contains(&m.name.as_str()) && !ignored.contains(&m.mount_path.as_str()))
                    .map(|m| m.mount_path.clone())
                    .collect()
            })
            .unwrap_or_default();

        let replace_policy = existing_plan
            .and_then(|plan| plan.container(name))
            .map(|c| c.replace_policy)
            .unwrap_or(ReplacePolicy::Sidecar);

        containers.push(ContainerPlan {
            name: name.clone(),
            env_prefix: env_prefix(ordinal),
            mount_point: format!("{}/{}", config.mount_point_prefix, name),
            mounts,
            intercept_points: points,
            replace_policy,
        });
    }

    // Step 7: must produce work.
    if containers.iter().all(|c| c.intercept_points.is_empty()) {
        return Err(Error::Protocol(ProtoError::NoInterceptableService {
            workload: workload.reference.to_string(),
        }));
    }

    Ok(SidecarPlan {
        agent_image: config.agent_image.clone(),
        workload: workload.reference.clone(),
        workload_kind: workload.kind,
        manager_address: config.manager_address.clone(),
        containers,
        resources: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use siphon_protocol::annotations::PortProtocol;
    use siphon_protocol::container::Container;
    use siphon_protocol::service::TargetPort;
    use siphon_protocol::{WorkloadKind, WorkloadRef};
    use std::collections::BTreeMap;

    fn workload(containers: Vec<Container>, annotations: BTreeMap<String, String>) -> Workload {
        Workload {
            reference: WorkloadRef {
                name: "web".into(),
                namespace: "default".into(),
            },
            kind: WorkloadKind::Deployment,
            generation: 1,
            containers,
            pod_labels: BTreeMap::new(),
            annotations,
        }
    }

    fn service_with_port(target: TargetPort, port: u16) -> Service {
        Service {
            name: "web".into(),
            uid: "uid-1".into(),
            namespace: "default".into(),
            selector: BTreeMap::from([("app".to_string(), "web".to_string())]),
            ports: vec![ServicePort {
                name: None,
                port,
                protocol: PortProtocol::Tcp,
                target_port: target,
                app_protocol: None,
            }],
        }
    }

    #[test]
    fn simple_numeric_port_scenario() {
        let w = workload(
            vec![Container::new("web").with_port(ContainerPort::new(8080))],
            BTreeMap::new(),
        );
        let services = vec![service_with_port(TargetPort::Number(8080), 80)];
        let config = PlannerConfig::default();

        let result = plan(&w, &services, None, &config).unwrap();
        assert_eq!(result.containers.len(), 1);
        let c = &result.containers[0];
        assert_eq!(c.env_prefix, "A_");
        assert_eq!(c.mount_point, "/siphon/web");
        assert_eq!(c.intercept_points.len(), 1);
        assert_eq!(c.intercept_points[0].container_port, 8080);
        assert_eq!(c.intercept_points[0].agent_port, config.agent_port_base);
    }

    #[test]
    fn symbolic_port_scenario() {
        let w = workload(
            vec![Container::new("web").with_port(ContainerPort::named("http", 80))],
            BTreeMap::new(),
        );
        let services = vec![service_with_port(TargetPort::Name("http".into()), 80)];
        let config = PlannerConfig::default();

        let result = plan(&w, &services, None, &config).unwrap();
        assert!(!result.containers[0].intercept_points[0].target_port_is_numeric);
    }

    #[test]
    fn missing_container_port_falls_back_to_zero_port_container() {
        let w = workload(vec![Container::new("web")], BTreeMap::new());
        let services = vec![service_with_port(TargetPort::Number(8080), 8080)];
        let config = PlannerConfig::default();

        let result = plan(&w, &services, None, &config).unwrap();
        assert_eq!(result.containers[0].intercept_points[0].container_port, 8080);
    }

    #[test]
    fn two_intercepts_on_same_target_share_one_agent_port() {
        let w = workload(
            vec![Container::new("web").with_port(ContainerPort::new(8080))],
            BTreeMap::new(),
        );
        let mut service = service_with_port(TargetPort::Number(8080), 80);
        service.ports.push(ServicePort {
            name: None,
            port: 81,
            protocol: PortProtocol::Tcp,
            target_port: TargetPort::Number(8080),
            app_protocol: None,
        });
        let config = PlannerConfig::default();

        let result = plan(&w, &[service], None, &config).unwrap();
        let points = &result.containers[0].intercept_points;
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].agent_port, points[1].agent_port);
    }

    #[test]
    fn port_collision_fails() {
        let config = PlannerConfig::default();
        let w = workload(
            vec![Container::new("web").with_port(ContainerPort::new(config.agent_port_base))],
            BTreeMap::new(),
        );
        let services = vec![service_with_port(TargetPort::Number(8080), 8080)];

        let err = plan(&w, &services, None, &config).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtoError::AgentPortCollision { .. })
        ));
    }

    #[test]
    fn upgrade_preserves_replace_policy() {
        let w = workload(
            vec![Container::new("web").with_port(ContainerPort::new(8080))],
            BTreeMap::new(),
        );
        let services = vec![service_with_port(TargetPort::Number(8080), 80)];
        let config = PlannerConfig::default();

        let first = plan(&w, &services, None, &config).unwrap();
        let mut mutated = first.clone();
        mutated.containers[0].replace_policy = ReplacePolicy::ReplaceContainer;

        let second = plan(&w, &services, Some(&mutated), &config).unwrap();
        assert_eq!(second.containers[0].replace_policy, ReplacePolicy::ReplaceContainer);
    }

    #[test]
    fn no_interceptable_service_fails_when_nothing_matches() {
        let w = workload(vec![Container::new("web")], BTreeMap::new());
        let services = vec![service_with_port(TargetPort::Name("http".into()), 80)];
        let config = PlannerConfig::default();

        let err = plan(&w, &services, None, &config).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtoError::NoInterceptableService { .. })
        ));
    }

    #[test]
    fn service_port_annotation_filter_restricts_selection() {
        let mut annotations = BTreeMap::new();
        annotations.insert(
            siphon_protocol::annotations::INJECT_SERVICE_PORTS.to_string(),
            "81".to_string(),
        );
        let w = workload(
            vec![Container::new("web")
                .with_port(ContainerPort::new(8080))
                .with_port(ContainerPort::new(9090))],
            annotations,
        );
        let mut service = service_with_port(TargetPort::Number(8080), 80);
        service.ports.push(ServicePort {
            name: None,
            port: 81,
            protocol: PortProtocol::Tcp,
            target_port: TargetPort::Number(9090),
            app_protocol: None,
        });
        let config = PlannerConfig::default();

        let result = plan(&w, &[service], None, &config).unwrap();
        let points = &result.containers[0].intercept_points;
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].container_port, 9090);
    }

    #[test]
    fn deprecated_singular_annotation_is_ignored_when_plural_present() {
        let mut annotations = BTreeMap::new();
        annotations.insert(
            siphon_protocol::annotations::INJECT_SERVICE_PORTS.to_string(),
            "80".to_string(),
        );
        annotations.insert(
            siphon_protocol::annotations::INJECT_SERVICE_PORT.to_string(),
            "81".to_string(),
        );
        let filter = effective_service_port_filter(&annotations).unwrap().unwrap();
        assert_eq!(filter.len(), 1);
        assert_eq!(filter[0].selector, PortSelector::Number(80));
    }

    #[test]
    fn container_ports_annotation_creates_service_less_intercept() {
        let mut annotations = BTreeMap::new();
        annotations.insert(
            siphon_protocol::annotations::INJECT_CONTAINER_PORTS.to_string(),
            "9999".to_string(),
        );
        let w = workload(vec![Container::new("web")], annotations);
        let config = PlannerConfig::default();

        let result = plan(&w, &[], None, &config).unwrap();
        let points = &result.containers[0].intercept_points;
        assert_eq!(points.len(), 1);
        assert!(points[0].service.is_none());
        assert_eq!(points[0].container_port, 9999);
    }

    #[test]
    fn ignored_volume_mounts_are_filtered_out() {
        let mut annotations = BTreeMap::new();
        annotations.insert(
            siphon_protocol::annotations::IGNORED_VOLUME_MOUNTS.to_string(),
            "secrets".to_string(),
        );
        let container = Container::new("web")
            .with_port(ContainerPort::new(8080))
            .with_mount("secrets", "/var/run/secrets")
            .with_mount("data", "/var/data");
        let w = workload(vec![container], annotations);
        let services = vec![service_with_port(TargetPort::Number(8080), 80)];
        let config = PlannerConfig::default();

        let result = plan(&w, &services, None, &config).unwrap();
        assert_eq!(result.containers[0].mounts, vec!["/var/data".to_string()]);
    }

    #[test]
    fn mesh_sidecar_is_not_chosen_for_service_less_fallback() {
        let mut annotations = BTreeMap::new();
        annotations.insert(
            siphon_protocol::annotations::INJECT_CONTAINER_PORTS.to_string(),
            "9999".to_string(),
        );
        let w = workload(
            vec![Container::new("istio-proxy"), Container::new("web")],
            annotations,
        );
        let config = PlannerConfig::default();

        let result = plan(&w, &[], None, &config).unwrap();
        assert_eq!(result.containers[0].name, "web");
    }
}
