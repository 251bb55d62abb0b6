//! Service-mesh sidecar awareness: containers injected by a mesh
//! shouldn't be picked as the planner's fallback target, mirroring this
//! corpus's own mesh skip-list (used there to choose which container to
//! hook into by default).

use std::collections::HashSet;
use std::sync::LazyLock;

pub static MESH_SIDECAR_NAMES: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    HashSet::from([
        "istio-proxy",
        "istio-init",
        "linkerd-proxy",
        "linkerd-init",
        "kuma-sidecar",
        "kuma-init",
        "vault-agent",
        "vault-agent-init",
        "queue-proxy",
    ])
});

pub fn is_mesh_sidecar(container_name: &str) -> bool {
    MESH_SIDECAR_NAMES.contains(container_name)
}
