//! Workload Resolver: owner-chain traversal and service discovery for a
//! pod, per SPEC_FULL.md §4.1.

pub mod cache;

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{Pod, Service as K8sService};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Api, Client, ResourceExt};

use siphon_protocol::annotations::SERVICE_NAME_ANNOTATION;
use siphon_protocol::container::{Container, ContainerPort, VolumeMount};
use siphon_protocol::service::{Service, ServicePort, TargetPort};
use siphon_protocol::{Error as ProtoError, Workload, WorkloadKind, WorkloadRef};

use crate::error::{Error, Result};

/// Controller kinds the resolver knows how to both recognize as a
/// terminal [`Workload`] *and* fetch in order to keep climbing the owner
/// chain. Closed by construction -- dispatch is a match, never a dynamic
/// downcast, per the §9 redesign note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControllerKind {
    Deployment,
    ReplicaSet,
    StatefulSet,
}

impl ControllerKind {
    fn from_owner_ref(owner: &OwnerReference) -> Option<Self> {
        match owner.kind.as_str() {
            "Deployment" => Some(ControllerKind::Deployment),
            "ReplicaSet" => Some(ControllerKind::ReplicaSet),
            "StatefulSet" => Some(ControllerKind::StatefulSet),
            _ => None,
        }
    }

    fn as_workload_kind(&self) -> WorkloadKind {
        match self {
            ControllerKind::Deployment => WorkloadKind::Deployment,
            ControllerKind::ReplicaSet => WorkloadKind::ReplicaSet,
            ControllerKind::StatefulSet => WorkloadKind::StatefulSet,
        }
    }
}

fn controller_owner(owners: &[OwnerReference]) -> Option<&OwnerReference> {
    owners.iter().find(|o| o.controller.unwrap_or(false))
}

/// A fetched node in the owner chain: enough to keep walking (its own
/// owner references) and, if the walk stops here, enough to build a
/// [`Workload`].
struct ChainNode {
    kind: ControllerKind,
    reference: WorkloadRef,
    generation: i64,
    owner_references: Vec<OwnerReference>,
    containers: Vec<Container>,
    pod_labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
}

fn container_ports(containers: &[k8s_openapi::api::core::v1::Container]) -> Vec<Container> {
    containers
        .iter()
        .map(|c| {
            let ports = c
                .ports
                .as_ref()
                .map(|ports| {
                    ports
                        .iter()
                        .map(|p| ContainerPort {
                            name: p.name.clone(),
                            number: p.container_port as u16,
                            protocol: match p.protocol.as_deref() {
                                Some("UDP") => siphon_protocol::annotations::PortProtocol::Udp,
                                _ => siphon_protocol::annotations::PortProtocol::Tcp,
                            },
                        })
                        .collect()
                })
                .unwrap_or_default();
            let mounts = c
                .volume_mounts
                .as_ref()
                .map(|mounts| {
                    mounts
                        .iter()
                        .map(|m| VolumeMount {
                            name: m.name.clone(),
                            mount_path: m.mount_path.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default();
            Container {
                name: c.name.clone(),
                ports,
                volume_mount_paths: mounts,
            }
        })
        .collect()
}

async fn fetch_node(client: &Client, kind: ControllerKind, name: &str, namespace: &str) -> Result<ChainNode> {
    match kind {
        ControllerKind::Deployment => {
            let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
            let d = api.get(name).await.map_err(Error::KubeApi)?;
            let spec = d
                .spec
                .as_ref()
                .ok_or_else(|| Error::missing_field(format!("Deployment/{name}"), ".spec"))?;
            let template = spec
                .template
                .spec
                .as_ref()
                .ok_or_else(|| Error::missing_field(format!("Deployment/{name}"), ".spec.template.spec"))?;
            Ok(ChainNode {
                kind,
                reference: WorkloadRef {
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                },
                generation: d.metadata.generation.unwrap_or_default(),
                owner_references: d.metadata.owner_references.clone().unwrap_or_default(),
                containers: container_ports(&template.containers),
                pod_labels: spec
                    .template
                    .metadata
                    .labels
                    .clone()
                    .unwrap_or_default()
                    .into_iter()
                    .collect(),
                annotations: spec
                    .template
                    .metadata
                    .annotations
                    .clone()
                    .unwrap_or_default()
                    .into_iter()
                    .collect(),
            })
        }
        ControllerKind::ReplicaSet => {
            let api: Api<ReplicaSet> = Api::namespaced(client.clone(), namespace);
            let rs = api.get(name).await.map_err(Error::KubeApi)?;
            let spec = rs
                .spec
                .as_ref()
                .ok_or_else(|| Error::missing_field(format!("ReplicaSet/{name}"), ".spec"))?;
            let template = spec
                .template
                .as_ref()
                .and_then(|t| t.spec.as_ref())
                .ok_or_else(|| Error::missing_field(format!("ReplicaSet/{name}"), ".spec.template.spec"))?;
            Ok(ChainNode {
                kind,
                reference: WorkloadRef {
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                },
                generation: rs.metadata.generation.unwrap_or_default(),
                owner_references: rs.metadata.owner_references.clone().unwrap_or_default(),
                containers: container_ports(&template.containers),
                pod_labels: spec
                    .template
                    .as_ref()
                    .and_then(|t| t.metadata.labels.clone())
                    .unwrap_or_default()
                    .into_iter()
                    .collect(),
                annotations: spec
                    .template
                    .as_ref()
                    .and_then(|t| t.metadata.annotations.clone())
                    .unwrap_or_default()
                    .into_iter()
                    .collect(),
            })
        }
        ControllerKind::StatefulSet => {
            let api: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
            let ss = api.get(name).await.map_err(Error::KubeApi)?;
            let spec = ss
                .spec
                .as_ref()
                .ok_or_else(|| Error::missing_field(format!("StatefulSet/{name}"), ".spec"))?;
            let template = spec
                .template
                .spec
                .as_ref()
                .ok_or_else(|| Error::missing_field(format!("StatefulSet/{name}"), ".spec.template.spec"))?;
            Ok(ChainNode {
                kind,
                reference: WorkloadRef {
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                },
                generation: ss.metadata.generation.unwrap_or_default(),
                owner_references: ss.metadata.owner_references.clone().unwrap_or_default(),
                containers: container_ports(&template.containers),
                pod_labels: spec
                    .template
                    .metadata
                    .labels
                    .clone()
                    .unwrap_or_default()
                    .into_iter()
                    .collect(),
                annotations: spec
                    .template
                    .metadata
                    .annotations
                    .clone()
                    .unwrap_or_default()
                    .into_iter()
                    .collect(),
            })
        }
    }
}

/// Walks `pod`'s owner references up to the top-most controller, per
/// SPEC_FULL.md §4.1. Fails with [`ProtoError::NoOwnerWorkload`] if the
/// walk terminates on an object that isn't a recognized workload kind, or
/// if the pod has no controller owner at all.
///
/// Cycles are not guarded against: Kubernetes ownership graphs cannot
/// contain them by construction, and the walk is bounded by the API
/// tree's depth in practice.
pub async fn find_owner_workload(client: &Client, pod: &Pod) -> Result<Workload> {
    let namespace = pod.namespace().ok_or_else(|| {
        Error::Protocol(ProtoError::NoOwnerWorkload {
            object: pod.name_any(),
        })
    })?;

    let owners = pod.metadata.owner_references.clone().unwrap_or_default();
    let mut current_owner = controller_owner(&owners).cloned();
    let mut last_node: Option<ChainNode> = None;

    loop {
        let Some(owner) = current_owner.take() else {
            break;
        };
        let Some(kind) = ControllerKind::from_owner_ref(&owner) else {
            // An owner of a kind we don't know how to fetch ends the walk
            // here; whether it resolves to success depends on whether we
            // already have a recognized node from a previous hop.
            break;
        };
        let node = fetch_node(client, kind, &owner.name, &namespace).await?;
        current_owner = controller_owner(&node.owner_references).cloned();
        last_node = Some(node);
    }

    let node = last_node.ok_or_else(|| {
        Error::Protocol(ProtoError::NoOwnerWorkload {
            object: format!("{namespace}/{}", pod.name_any()),
        })
    })?;

    Ok(Workload {
        reference: node.reference,
        kind: node.kind.as_workload_kind(),
        generation: node.generation,
        containers: node.containers,
        pod_labels: node.pod_labels,
        annotations: node.annotations,
    })
}

fn to_service(svc: K8sService) -> Option<Service> {
    let spec = svc.spec?;
    let meta = svc.metadata;
    let ports = spec
        .ports
        .unwrap_or_default()
        .into_iter()
        .map(|p| ServicePort {
            name: p.name,
            port: p.port as u16,
            protocol: match p.protocol.as_deref() {
                Some("UDP") => siphon_protocol::annotations::PortProtocol::Udp,
                _ => siphon_protocol::annotations::PortProtocol::Tcp,
            },
            target_port: match p.target_port {
                Some(k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(n)) => {
                    TargetPort::Number(n as u16)
                }
                Some(k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::String(s)) => {
                    TargetPort::Name(s)
                }
                None => TargetPort::Number(0),
            },
            app_protocol: p.app_protocol,
        })
        .collect();

    Some(Service {
        name: meta.name.unwrap_or_default(),
        uid: meta.uid.unwrap_or_default(),
        namespace: meta.namespace.unwrap_or_default(),
        selector: spec.selector.unwrap_or_default().into_iter().collect(),
        ports,
    })
}

/// Resolves the service(s) that select `pod`, per §4.1's service
/// discovery procedure: honor the `inject-service-name` annotation when
/// present, otherwise match by label selector.
pub async fn discover_services(client: &Client, pod: &Pod) -> Result<Vec<Service>> {
    let namespace = pod.namespace().unwrap_or_default();
    let api: Api<K8sService> = Api::namespaced(client.clone(), &namespace);

    if let Some(name) = pod
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(SERVICE_NAME_ANNOTATION))
    {
        let svc = api.get(name).await.map_err(|err| match err {
            kube::Error::Api(api_err) if api_err.code == 404 => {
                Error::Protocol(ProtoError::AnnotatedServiceNotFound {
                    pod: pod.name_any(),
                    service: name.clone(),
                })
            }
            other => Error::KubeApi(other),
        })?;
        return Ok(to_service(svc).into_iter().collect());
    }

    let pod_labels = pod.metadata.labels.clone().unwrap_or_default();
    let all = api.list(&Default::default()).await.map_err(Error::KubeApi)?;

    let matching: Vec<Service> = all
        .items
        .into_iter()
        .filter_map(to_service)
        .filter(|svc| !svc.selector.is_empty() && selector_matches(&svc.selector, &pod_labels))
        .collect();

    if matching.is_empty() {
        return Err(Error::Protocol(ProtoError::NoMatchingService {
            pod: pod.name_any(),
            namespace,
        }));
    }

    Ok(matching)
}

fn selector_matches(
    selector: &BTreeMap<String, String>,
    labels: &std::collections::BTreeMap<String, String>,
) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.get(k).map(|actual| actual == v).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn selector_matches_subset_of_labels() {
        let selector = labels(&[("app", "web")]);
        let pod_labels = labels(&[("app", "web"), ("env", "prod")]);
        assert!(selector_matches(&selector, &pod_labels));
    }

    #[test]
    fn selector_does_not_match_missing_label() {
        let selector = labels(&[("app", "web"), ("tier", "backend")]);
        let pod_labels = labels(&[("app", "web")]);
        assert!(!selector_matches(&selector, &pod_labels));
    }

    #[test]
    fn controller_owner_picks_the_flagged_reference() {
        let owners = vec![
            OwnerReference {
                controller: Some(false),
                kind: "ReplicaSet".into(),
                name: "not-controller".into(),
                api_version: "apps/v1".into(),
                uid: "1".into(),
                ..Default::default()
            },
            OwnerReference {
                controller: Some(true),
                kind: "Deployment".into(),
                name: "the-controller".into(),
                api_version: "apps/v1".into(),
                uid: "2".into(),
                ..Default::default()
            },
        ];
        let owner = controller_owner(&owners).unwrap();
        assert_eq!(owner.name, "the-controller");
    }
}
