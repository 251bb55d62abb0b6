use serde::{Deserialize, Serialize};

use crate::container::Container;

/// A controller owning a set of identical pods. Ownership chains are
/// walked by the Workload Resolver until one of these kinds is reached;
/// dispatch on the kind is a closed match, never a dynamic downcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadKind {
    Deployment,
    ReplicaSet,
    StatefulSet,
}

impl WorkloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::ReplicaSet => "ReplicaSet",
            WorkloadKind::StatefulSet => "StatefulSet",
        }
    }
}

/// Stable reference to a workload, used as a cache key and in log/error
/// context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadRef {
    pub name: String,
    pub namespace: String,
}

impl std::fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A resolved workload: its identity, its pod template's containers (the
/// only part of the template the planner cares about), and the owner
/// chain depth it was found at (informational only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub reference: WorkloadRef,
    pub kind: WorkloadKind,
    pub generation: i64,
    pub containers: Vec<Container>,
    pub pod_labels: std::collections::BTreeMap<String, String>,
    pub annotations: std::collections::BTreeMap<String, String>,
}

impl Workload {
    pub fn container(&self, name: &str) -> Option<&Container> {
        self.containers.iter().find(|c| c.name == name)
    }
}
