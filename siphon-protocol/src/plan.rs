use serde::{Deserialize, Serialize};

use crate::intercept::InterceptPoint;
use crate::workload::{WorkloadKind, WorkloadRef};

/// How an intercepted container's traffic is handled once the agent is in
/// place: either it runs alongside the original container (mirroring) or
/// the original container's image is swapped out (stealing by
/// replacement). Carried forward across replans so an already-running
/// intercept's mode is never clobbered (§4.3 upgrade semantics).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ReplacePolicy {
    #[default]
    Sidecar,
    ReplaceContainer,
}

/// Per-container entry in a [`SidecarPlan`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerPlan {
    pub name: String,
    pub env_prefix: String,
    pub mount_point: String,
    pub mounts: Vec<String>,
    pub intercept_points: Vec<InterceptPoint>,
    pub replace_policy: ReplacePolicy,
}

/// Full sidecar injection recipe for one workload, immutable once emitted.
/// Recomputed whenever the workload's pod template changes; see the
/// upgrade semantics in §4.3.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarPlan {
    pub agent_image: String,
    pub workload: WorkloadRef,
    pub workload_kind: WorkloadKind,
    pub manager_address: String,
    pub containers: Vec<ContainerPlan>,
    pub resources: Option<ResourceRequirements>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    pub cpu_request_millis: u32,
    pub memory_request_mebibytes: u32,
}

impl SidecarPlan {
    /// All intercept points across every container, in plan order. Used
    /// by the §8 injectivity property check.
    pub fn all_intercept_points(&self) -> impl Iterator<Item = &InterceptPoint> {
        self.containers.iter().flat_map(|c| &c.intercept_points)
    }

    pub fn container(&self, name: &str) -> Option<&ContainerPlan> {
        self.containers.iter().find(|c| c.name == name)
    }
}
