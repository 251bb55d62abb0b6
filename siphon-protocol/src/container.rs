use serde::{Deserialize, Serialize};

use crate::annotations::PortProtocol;

/// One port declared by a single container, as read off the pod template.
/// Pure input to the [`crate::service::ServicePort`] matcher; carries no
/// behavior of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerPort {
    pub name: Option<String>,
    pub number: u16,
    pub protocol: PortProtocol,
}

impl ContainerPort {
    pub fn new(number: u16) -> Self {
        ContainerPort {
            name: None,
            number,
            protocol: PortProtocol::Tcp,
        }
    }

    pub fn named(name: impl Into<String>, number: u16) -> Self {
        ContainerPort {
            name: Some(name.into()),
            number,
            protocol: PortProtocol::Tcp,
        }
    }
}

/// Minimal read-only container view the Port Matcher and Sidecar Planner
/// operate over. Real pod templates carry much more (image, env, probes);
/// only what matters for matching and planning is modeled here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    pub ports: Vec<ContainerPort>,
    pub volume_mount_paths: Vec<VolumeMount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
}

impl Container {
    pub fn new(name: impl Into<String>) -> Self {
        Container {
            name: name.into(),
            ports: Vec::new(),
            volume_mount_paths: Vec::new(),
        }
    }

    pub fn with_port(mut self, port: ContainerPort) -> Self {
        self.ports.push(port);
        self
    }

    pub fn with_mount(mut self, name: impl Into<String>, mount_path: impl Into<String>) -> Self {
        self.volume_mount_paths.push(VolumeMount {
            name: name.into(),
            mount_path: mount_path.into(),
        });
        self
    }
}
