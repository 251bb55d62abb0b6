//! Shared data model for the siphon intercept control plane.
//!
//! Every type in this crate is transport-agnostic: the Session Manager's
//! gRPC surface and the Sidecar Planner's Kubernetes-facing types both
//! serialize through these structs without depending on `kube` or `tonic`
//! directly. That keeps the core state machines testable in isolation.

pub mod annotations;
pub mod base26;
pub mod container;
pub mod error;
pub mod intercept;
pub mod plan;
pub mod service;
pub mod session;
pub mod watch;
pub mod workload;

pub use container::ContainerPort;
pub use error::{Error, Result};
pub use intercept::{Disposition, Intercept, InterceptPoint, InterceptSpec, Mechanism};
pub use plan::{ContainerPlan, ReplacePolicy, SidecarPlan};
pub use service::{Service, ServicePort};
pub use session::{Session, SessionId, SessionKind};
pub use workload::{Workload, WorkloadKind, WorkloadRef};
