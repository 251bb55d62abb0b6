//! Thin tonic adapter between `siphon.manager.v1` wire messages and the
//! domain types in `siphon_protocol`/`crate::core`. Translation only --
//! no lifecycle logic lives here.

use std::net::IpAddr;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use tokio_stream::Stream;
use tonic::{Request, Response, Status};

use siphon_protocol::intercept::{Disposition, Intercept, InterceptSpec, Mechanism};
use siphon_protocol::session::{AgentInfo, ClientInfo};
use siphon_protocol::SessionId;

use crate::core::Manager;

pub mod proto {
    tonic::include_proto!("siphon.manager.v1");

    /// Encoded `FileDescriptorSet` for `siphon.manager.v1`, registered with
    /// `tonic-reflection` so `grpcurl`/`grpcui` can introspect the service
    /// without a bundled `.proto` file.
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("session_descriptor");
}

use proto::session_manager_server::SessionManager as SessionManagerRpc;
use proto::{
    AgentEntry, AgentSnapshot, ArriveAsAgentRequest, ArriveAsClientRequest, CreateInterceptRequest,
    Empty, InterceptEntry, InterceptSnapshot, RemoveInterceptRequest, SessionInfo, SessionRef,
};

pub struct SessionManagerService {
    manager: Arc<Manager>,
}

impl SessionManagerService {
    pub fn new(manager: Arc<Manager>) -> Self {
        SessionManagerService { manager }
    }

    pub fn into_server(self) -> proto::session_manager_server::SessionManagerServer<Self> {
        proto::session_manager_server::SessionManagerServer::new(self)
    }
}

fn session_id(raw: &str) -> Result<SessionId, Status> {
    SessionId::from_str(raw).map_err(|err| Status::invalid_argument(err.to_string()))
}

fn proto_disposition(disposition: Disposition) -> i32 {
    let wire = match disposition {
        Disposition::Waiting => proto::Disposition::Waiting,
        Disposition::Active => proto::Disposition::Active,
        Disposition::Removed => proto::Disposition::Removed,
        Disposition::NoAgent => proto::Disposition::NoAgent,
        Disposition::NoMechanism => proto::Disposition::NoMechanism,
        Disposition::AgentError => proto::Disposition::AgentError,
        Disposition::NoClient => proto::Disposition::NoClient,
    };
    wire as i32
}

fn proto_spec(spec: &InterceptSpec) -> proto::InterceptSpec {
    proto::InterceptSpec {
        name: spec.name.clone(),
        agent_name: spec.agent_name.clone(),
        namespace: spec.namespace.clone(),
        service_name: spec.service_name.clone(),
        service_port_id: spec.service_port_id.clone(),
        mechanism: Some(proto::Mechanism {
            name: spec.mechanism.name.clone(),
            args: spec.mechanism.args.clone(),
        }),
        local_port: spec.local_port as u32,
        local_address: spec.local_address.to_string(),
        replace: spec.replace,
    }
}

fn proto_intercept(intercept: &Intercept) -> InterceptEntry {
    InterceptEntry {
        id: intercept.id.clone(),
        spec: Some(proto_spec(&intercept.spec)),
        client_session: intercept.client_session.to_string(),
        agent_session: intercept.agent_session.as_ref().map(SessionId::to_string),
        disposition: proto_disposition(intercept.disposition),
        message: intercept.message.clone(),
        pod_ip: intercept.pod_ip.map(|ip| ip.to_string()),
        sftp_port: intercept.sftp_port.map(u32::from),
        ftp_port: intercept.ftp_port.map(u32::from),
        environment: intercept.environment.clone().into_iter().collect(),
        client_mount_point: intercept.client_mount_point.clone(),
        extra_ports: intercept.extra_ports.iter().map(|p| *p as u32).collect(),
    }
}

fn spec_from_proto(spec: proto::InterceptSpec) -> Result<InterceptSpec, Status> {
    let mechanism = spec.mechanism.ok_or_else(|| Status::invalid_argument("missing mechanism"))?;
    let local_address: IpAddr = spec
        .local_address
        .parse()
        .map_err(|_| Status::invalid_argument("local_address is not a valid IP address"))?;
    Ok(InterceptSpec {
        name: spec.name,
        agent_name: spec.agent_name,
        namespace: spec.namespace,
        service_name: spec.service_name,
        service_port_id: spec.service_port_id,
        mechanism: Mechanism {
            name: mechanism.name,
            args: mechanism.args,
        },
        local_port: spec
            .local_port
            .try_into()
            .map_err(|_| Status::invalid_argument("local_port out of range"))?,
        local_address,
        replace: spec.replace,
    })
}

fn map_protocol_error(err: crate::error::Error) -> Status {
    use siphon_protocol::Error as ProtoError;
    match err {
        crate::error::Error::Protocol(proto_err) => match proto_err {
            ProtoError::AlreadyExists { .. } | ProtoError::LocalTargetInUse { .. } => {
                Status::already_exists(proto_err.to_string())
            }
            other if other.is_user_error() => Status::invalid_argument(other.to_string()),
            other => Status::internal(other.to_string()),
        },
        crate::error::Error::UnknownSession(id) => {
            Status::not_found(format!("unknown session {id}"))
        }
        crate::error::Error::UnknownIntercept(name) => {
            Status::not_found(format!("unknown intercept {name}"))
        }
    }
}

type WatchStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send + 'static>>;

/// Drops a [`Subscription`] out of its [`Manager`] watch set when the
/// gRPC stream it backs is cancelled or finishes, so a disconnected
/// client doesn't leak a permanently-pending subscriber.
enum WatchKind {
    Agents,
    Intercepts,
}

struct AutoUnsubscribe {
    manager: Arc<Manager>,
    subscription: crate::core::watch::Subscription,
    kind: WatchKind,
}

impl Drop for AutoUnsubscribe {
    fn drop(&mut self) {
        match self.kind {
            WatchKind::Agents => self.manager.unsubscribe_agents(&self.subscription),
            WatchKind::Intercepts => self.manager.unsubscribe_intercepts(&self.subscription),
        }
    }
}

#[tonic::async_trait]
impl SessionManagerRpc for SessionManagerService {
    async fn arrive_as_client(
        &self,
        request: Request<ArriveAsClientRequest>,
    ) -> Result<Response<SessionInfo>, Status> {
        let info = request
            .into_inner()
            .info
            .ok_or_else(|| Status::invalid_argument("missing client info"))?;
        let id = self
            .manager
            .arrive_as_client(ClientInfo {
                user: info.user,
                hostname: info.hostname,
            })
            .await;
        Ok(Response::new(SessionInfo { session_id: id.to_string() }))
    }

    async fn arrive_as_agent(
        &self,
        request: Request<ArriveAsAgentRequest>,
    ) -> Result<Response<SessionInfo>, Status> {
        let info = request
            .into_inner()
            .info
            .ok_or_else(|| Status::invalid_argument("missing agent info"))?;
        let version = info
            .version
            .parse()
            .map_err(|_| Status::invalid_argument("agent version is not valid semver"))?;
        let id = self
            .manager
            .arrive_as_agent(AgentInfo {
                name: info.name,
                namespace: info.namespace,
                product: info.product,
                version,
                mechanisms: info.mechanisms,
            })
            .await;
        Ok(Response::new(SessionInfo { session_id: id.to_string() }))
    }

    async fn remain(&self, request: Request<SessionRef>) -> Result<Response<Empty>, Status> {
        let id = session_id(&request.into_inner().session_id)?;
        if self.manager.remain(&id).await {
            Ok(Response::new(Empty {}))
        } else {
            Err(Status::not_found(format!("unknown session {id}")))
        }
    }

    async fn depart(&self, request: Request<SessionRef>) -> Result<Response<Empty>, Status> {
        let id = session_id(&request.into_inner().session_id)?;
        self.manager.depart(&id).await;
        Ok(Response::new(Empty {}))
    }

    type WatchAgentsStream = WatchStream<AgentSnapshot>;

    async fn watch_agents(
        &self,
        request: Request<SessionRef>,
    ) -> Result<Response<Self::WatchAgentsStream>, Status> {
        let _id = session_id(&request.into_inner().session_id)?;
        let manager = Arc::clone(&self.manager);
        let guard = AutoUnsubscribe {
            subscription: manager.subscribe_agents(),
            manager: Arc::clone(&manager),
            kind: WatchKind::Agents,
        };

        let stream = async_stream::try_stream! {
            let _guard = guard;
            loop {
                let agents = manager.agent_snapshot().await;
                yield AgentSnapshot {
                    revision: manager.agent_revision(),
                    agents: agents
                        .into_iter()
                        .map(|(id, info)| AgentEntry {
                            session_id: id.to_string(),
                            info: Some(proto::AgentInfo {
                                name: info.name,
                                namespace: info.namespace,
                                product: info.product,
                                version: info.version.to_string(),
                                mechanisms: info.mechanisms,
                            }),
                        })
                        .collect(),
                    end: false,
                };
                _guard.subscription.notified().await;
            }
        };
        Ok(Response::new(Box::pin(stream) as Self::WatchAgentsStream))
    }

    type WatchInterceptsStream = WatchStream<InterceptSnapshot>;

    async fn watch_intercepts(
        &self,
        request: Request<SessionRef>,
    ) -> Result<Response<Self::WatchInterceptsStream>, Status> {
        let _id = session_id(&request.into_inner().session_id)?;
        let manager = Arc::clone(&self.manager);
        let guard = AutoUnsubscribe {
            subscription: manager.subscribe_intercepts(),
            manager: Arc::clone(&manager),
            kind: WatchKind::Intercepts,
        };

        let stream = async_stream::try_stream! {
            let _guard = guard;
            loop {
                let intercepts = manager.intercept_snapshot().await;
                yield InterceptSnapshot {
                    revision: manager.intercept_revision(),
                    intercepts: intercepts.iter().map(proto_intercept).collect(),
                    end: false,
                };
                _guard.subscription.notified().await;
            }
        };
        Ok(Response::new(Box::pin(stream) as Self::WatchInterceptsStream))
    }

    async fn create_intercept(
        &self,
        request: Request<CreateInterceptRequest>,
    ) -> Result<Response<InterceptEntry>, Status> {
        let request = request.into_inner();
        let client = session_id(&request.session_id)?;
        let spec = spec_from_proto(
            request.spec.ok_or_else(|| Status::invalid_argument("missing intercept spec"))?,
        )?;
        let intercept = self
            .manager
            .create_intercept(&client, spec)
            .await
            .map_err(map_protocol_error)?;
        Ok(Response::new(proto_intercept(&intercept)))
    }

    async fn remove_intercept(
        &self,
        request: Request<RemoveInterceptRequest>,
    ) -> Result<Response<Empty>, Status> {
        let request = request.into_inner();
        let client = session_id(&request.session_id)?;
        self.manager
            .remove_intercept(&client, &request.name)
            .await
            .map_err(map_protocol_error)?;
        Ok(Response::new(Empty {}))
    }
}
