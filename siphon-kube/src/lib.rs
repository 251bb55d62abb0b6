//! Kubernetes-facing half of the control plane: the Workload Resolver,
//! Port Matcher, and Sidecar Planner. No gRPC, no CLI -- just a library
//! the Session Manager and any future admission webhook can share.

pub mod error;
pub mod matcher;
pub mod mesh;
pub mod planner;
pub mod resolver;

pub use error::{Error, Result};
pub use matcher::{match_port, PortMatch};
pub use planner::{plan, PlannerConfig};
pub use resolver::{discover_services, find_owner_workload};
