//! Named timeouts and defaults for one Orchestrator invocation, per
//! SPEC_FULL.md §5. Kept as plain `Duration` fields on a small struct
//! rather than a generic config-loading crate, mirroring how the pack's
//! control-plane binaries size their own timeout tables: a handful of
//! named constants with a `Default` that matches the specified values.

use std::time::Duration;

/// Timeouts and tunables for one [`crate::orchestrator::Orchestrator`]
/// run. All fields have spec-mandated defaults; callers override only
/// what a particular invocation needs (e.g. a slower cluster's agent
/// install timeout).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Wall-clock budget for an intercept to reach `ACTIVE` after
    /// `CreateIntercept`, covering agent install if one is needed.
    pub intercept_timeout: Duration,
    /// Budget for the agent sidecar to report ready after injection,
    /// folded into `intercept_timeout` but tracked separately so a slow
    /// image pull can be distinguished from a stuck reconcile loop.
    pub agent_install_timeout: Duration,
    /// Budget to establish the initial cluster connection (kubeconfig
    /// load, API server reachability) before attempting anything else.
    pub cluster_connect_timeout: Duration,
    /// Budget to dial the Session Manager's gRPC endpoint.
    pub traffic_manager_connect_timeout: Duration,
    /// Budget for any single unary RPC to the Session Manager once
    /// connected.
    pub traffic_manager_api_timeout: Duration,
    /// Budget for one `kube::Api::patch` apply of the sidecar plan.
    pub apply_timeout: Duration,
    /// How often `remain` is called to keep the client session alive.
    pub keepalive_interval: Duration,
    /// Prefix for generated SFTP mount directories.
    pub mount_prefix: &'static str,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            intercept_timeout: Duration::from_secs(30),
            agent_install_timeout: Duration::from_secs(120),
            cluster_connect_timeout: Duration::from_secs(10),
            traffic_manager_connect_timeout: Duration::from_secs(10),
            traffic_manager_api_timeout: Duration::from_secs(10),
            apply_timeout: Duration::from_secs(15),
            keepalive_interval: Duration::from_secs(5),
            mount_prefix: "siphonfs-",
        }
    }
}
