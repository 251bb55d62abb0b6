use std::fmt;

use serde::{Deserialize, Serialize};

/// Error kinds that can originate in more than one crate and therefore need
/// a shared, serializable representation (they cross the Session Manager's
/// RPC boundary and are also returned directly from `siphon-kube`).
///
/// Crate-local errors (e.g. I/O failures wrapping a `kube::Error`) stay in
/// their own crate's `thiserror` enum and are not duplicated here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum Error {
    #[error("owner chain for {object} terminated without reaching a supported workload")]
    NoOwnerWorkload { object: String },

    #[error("pod {pod} in namespace {namespace} has labels but no service selects it")]
    NoMatchingService { pod: String, namespace: String },

    #[error("service {service} named by annotation on {pod} does not exist")]
    AnnotatedServiceNotFound { pod: String, service: String },

    #[error("port identifier {identifier} matched no container port")]
    NoMatchingContainerPort { identifier: String },

    #[error("container {container} already exposes the reserved agent port {port}")]
    AgentPortCollision { container: String, port: u16 },

    #[error("no service/port pair on {workload} could be turned into an intercept")]
    NoInterceptableService { workload: String },

    #[error("multiple incompatible agents observed for {workload}")]
    AmbiguousMatch { workload: String },

    #[error("an intercept named {name} already exists for this client")]
    AlreadyExists { name: String },

    #[error("another intercept on this client already targets {host}:{port}")]
    LocalTargetInUse { host: String, port: u16 },

    #[error("mount point {path} is held by intercept {held_by}")]
    MountPointBusy { path: String, held_by: String },

    #[error("intercept {name} did not reach ACTIVE before the timeout")]
    FailedToEstablish { name: String },

    #[error("traffic manager error: {message}")]
    TrafficManagerError { message: String },
}

impl Error {
    /// Whether this error reflects a user-correctable mistake (bad spec, name
    /// collision, ...) as opposed to an internal/infra failure. The
    /// Orchestrator uses this to decide how an error is presented, per the
    /// propagation policy in the error handling design.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::NoOwnerWorkload { .. }
                | Error::NoMatchingService { .. }
                | Error::AnnotatedServiceNotFound { .. }
                | Error::NoMatchingContainerPort { .. }
                | Error::AgentPortCollision { .. }
                | Error::NoInterceptableService { .. }
                | Error::AlreadyExists { .. }
                | Error::LocalTargetInUse { .. }
                | Error::MountPointBusy { .. }
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Sink that errors are recorded to before being categorized and surfaced,
/// per the Orchestrator's propagation policy. Telemetry itself is an
/// explicit non-goal; this trait is the seam the core talks to, with a
/// no-op default standing in for the real collector.
pub trait TelemetrySink: fmt::Debug + Send + Sync {
    fn record_error(&self, context: &str, error: &dyn std::error::Error);
}

/// Default sink used when no real telemetry collector is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetrySink;

impl TelemetrySink for NoopTelemetrySink {
    fn record_error(&self, _context: &str, _error: &dyn std::error::Error) {}
}
