use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::annotations::PortProtocol;
use crate::session::SessionId;

/// A named traffic-capture strategy the agent supports, e.g. raw TCP or
/// HTTP with a header filter. Opaque beyond its name and args for the
/// purposes of the control plane; the agent interprets the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mechanism {
    pub name: String,
    pub args: Vec<String>,
}

impl Mechanism {
    pub fn new(name: impl Into<String>) -> Self {
        Mechanism {
            name: name.into(),
            args: Vec::new(),
        }
    }
}

/// Triple binding a service port to a container port to an agent port,
/// produced by the Sidecar Planner and consumed by the Session Manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterceptPoint {
    pub service: Option<ServiceCoordinates>,
    pub container_name: String,
    pub container_port_name: Option<String>,
    pub container_port: u16,
    pub agent_port: u16,
    pub protocol: PortProtocol,
    pub app_protocol: Option<String>,
    pub target_port_is_numeric: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCoordinates {
    pub name: String,
    pub uid: String,
    pub port_name: Option<String>,
    pub port: u16,
}

/// A user's intercept request, immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterceptSpec {
    pub name: String,
    pub agent_name: String,
    pub namespace: String,
    pub service_name: Option<String>,
    pub service_port_id: Option<String>,
    pub mechanism: Mechanism,
    pub local_port: u16,
    pub local_address: IpAddr,
    pub replace: bool,
}

impl InterceptSpec {
    /// Whether this spec targets no agent: local-only intercepts are
    /// recognized by an empty `agent_name`, and transition straight to
    /// `ACTIVE` without participating in the agent watch stream.
    pub fn is_local_only(&self) -> bool {
        self.agent_name.is_empty()
    }
}

/// `Intercept`'s lifecycle states, per §4.4. Terminal error branches are
/// distinct variants rather than an `Option<Error>` bolted onto `WAITING`,
/// so the transition table (see `siphon-manager::intercept`) can match
/// exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Disposition {
    Waiting,
    Active,
    Removed,
    NoAgent,
    NoMechanism,
    AgentError,
    NoClient,
}

impl Disposition {
    /// Whether this disposition is final: no further transition is valid.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Disposition::Removed
                | Disposition::NoAgent
                | Disposition::NoMechanism
                | Disposition::AgentError
                | Disposition::NoClient
        )
    }
}

/// Live intercept state, owned by the Session Manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intercept {
    pub id: String,
    pub spec: InterceptSpec,
    pub client_session: SessionId,
    pub agent_session: Option<SessionId>,
    pub disposition: Disposition,
    pub message: Option<String>,
    pub pod_ip: Option<IpAddr>,
    pub sftp_port: Option<u16>,
    pub ftp_port: Option<u16>,
    pub environment: BTreeMap<String, String>,
    pub client_mount_point: Option<String>,
    pub extra_ports: Vec<u16>,
}

impl Intercept {
    pub fn new(id: impl Into<String>, spec: InterceptSpec, client_session: SessionId) -> Self {
        let disposition = if spec.is_local_only() {
            Disposition::Active
        } else {
            Disposition::Waiting
        };
        Intercept {
            id: id.into(),
            spec,
            client_session,
            agent_session: None,
            disposition,
            message: None,
            pod_ip: None,
            sftp_port: None,
            ftp_port: None,
            environment: BTreeMap::new(),
            client_mount_point: None,
            extra_ports: Vec::new(),
        }
    }
}
