//! Thin gRPC client wrapper around `siphon_manager::grpc::proto`'s
//! generated `SessionManagerClient`, converting wire messages back into
//! `siphon_protocol` domain types -- the inverse of the conversions
//! `siphon_manager::grpc` applies on the server side, kept here rather
//! than shared since each direction only needs half the mapping.

use std::net::IpAddr;
use std::str::FromStr;

use tokio_stream::{Stream, StreamExt};
use tonic::transport::Channel;

use siphon_manager::grpc::proto::{self, session_manager_client::SessionManagerClient};
use siphon_protocol::intercept::{Disposition, Intercept, InterceptSpec, Mechanism};
use siphon_protocol::session::{AgentInfo, ClientInfo};
use siphon_protocol::SessionId;

use crate::error::{Error, Result};

fn disposition_from_proto(wire: i32) -> Disposition {
    match proto::Disposition::try_from(wire).unwrap_or(proto::Disposition::Waiting) {
        proto::Disposition::Active => Disposition::Active,
        proto::Disposition::Removed => Disposition::Removed,
        proto::Disposition::NoAgent => Disposition::NoAgent,
        proto::Disposition::NoMechanism => Disposition::NoMechanism,
        proto::Disposition::AgentError => Disposition::AgentError,
        proto::Disposition::NoClient => Disposition::NoClient,
        proto::Disposition::Waiting | proto::Disposition::Unspecified => Disposition::Waiting,
    }
}

fn spec_to_proto(spec: &InterceptSpec) -> proto::InterceptSpec {
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

fn intercept_from_proto(entry: proto::InterceptEntry) -> Result<Intercept> {
    let spec = entry.spec.ok_or(Error::Protocol(siphon_protocol::Error::TrafficManagerError {
        message: "create_intercept response missing spec".to_string(),
    }))?;
    let mechanism = spec.mechanism.ok_or(Error::Protocol(siphon_protocol::Error::TrafficManagerError {
        message: "intercept spec missing mechanism".to_string(),
    }))?;
    let local_address: IpAddr = spec
        .local_address
        .parse()
        .map_err(|_| Error::Protocol(siphon_protocol::Error::TrafficManagerError {
            message: "intercept spec carries an invalid local_address".to_string(),
        }))?;

    let client_session = SessionId::from_str(&entry.client_session)
        .map_err(|err| Error::Protocol(siphon_protocol::Error::TrafficManagerError { message: err.to_string() }))?;
    let agent_session = entry
        .agent_session
        .map(|raw| SessionId::from_str(&raw))
        .transpose()
        .map_err(|err| Error::Protocol(siphon_protocol::Error::TrafficManagerError { message: err.to_string() }))?;

    Ok(Intercept {
        id: entry.id,
        spec: InterceptSpec {
            name: spec.name,
            agent_name: spec.agent_name,
            namespace: spec.namespace,
            service_name: spec.service_name,
            service_port_id: spec.service_port_id,
            mechanism: Mechanism { name: mechanism.name, args: mechanism.args },
            local_port: spec.local_port as u16,
            local_address,
            replace: spec.replace,
        },
        client_session,
        agent_session,
        disposition: disposition_from_proto(entry.disposition),
        message: entry.message,
        pod_ip: entry.pod_ip.and_then(|raw| raw.parse().ok()),
        sftp_port: entry.sftp_port.map(|p| p as u16),
        ftp_port: entry.ftp_port.map(|p| p as u16),
        environment: entry.environment.into_iter().collect(),
        client_mount_point: entry.client_mount_point,
        extra_ports: entry.extra_ports.into_iter().map(|p| p as u16).collect(),
    })
}

/// Connected client to one Session Manager, speaking `siphon.manager.v1`
/// over a `tonic` channel. Domain-typed in and out; callers never see a
/// protobuf message.
#[derive(Clone)]
pub struct ManagerClient {
    inner: SessionManagerClient<Channel>,
}

impl ManagerClient {
    /// Connects to `endpoint` (e.g. `http://traffic-manager.siphon:8080`).
    pub async fn connect(endpoint: String) -> Result<Self> {
        let inner = SessionManagerClient::connect(endpoint).await?;
        Ok(ManagerClient { inner })
    }

    pub async fn arrive_as_client(&mut self, info: ClientInfo) -> Result<SessionId> {
        let response = self
            .inner
            .arrive_as_client(proto::ArriveAsClientRequest {
                info: Some(proto::ClientInfo { user: info.user, hostname: info.hostname }),
            })
            .await?;
        parse_session_id(&response.into_inner().session_id)
    }

    pub async fn arrive_as_agent(&mut self, info: AgentInfo) -> Result<SessionId> {
        let response = self
            .inner
            .arrive_as_agent(proto::ArriveAsAgentRequest {
                info: Some(proto::AgentInfo {
                    name: info.name,
                    namespace: info.namespace,
                    product: info.product,
                    version: info.version.to_string(),
                    mechanisms: info.mechanisms,
                }),
            })
            .await?;
        parse_session_id(&response.into_inner().session_id)
    }

    pub async fn remain(&mut self, session: &SessionId) -> Result<()> {
        self.inner
            .remain(proto::SessionRef { session_id: session.to_string() })
            .await?;
        Ok(())
    }

    pub async fn depart(&mut self, session: &SessionId) -> Result<()> {
        self.inner
            .depart(proto::SessionRef { session_id: session.to_string() })
            .await?;
        Ok(())
    }

    pub async fn create_intercept(&mut self, session: &SessionId, spec: &InterceptSpec) -> Result<Intercept> {
        let response = self
            .inner
            .create_intercept(proto::CreateInterceptRequest {
                session_id: session.to_string(),
                spec: Some(spec_to_proto(spec)),
            })
            .await?;
        intercept_from_proto(response.into_inner())
    }

    pub async fn remove_intercept(&mut self, session: &SessionId, name: &str) -> Result<()> {
        self.inner
            .remove_intercept(proto::RemoveInterceptRequest {
                session_id: session.to_string(),
                name: name.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Subscribes to the intercept watch stream, yielding the decoded
    /// [`Intercept`] matching `name` out of each snapshot as it arrives.
    /// Per §4.5 phase 3, the Orchestrator polls this until the intercept
    /// reaches a terminal disposition.
    pub async fn watch_intercept(
        &mut self,
        session: &SessionId,
        name: &str,
    ) -> Result<impl Stream<Item = Result<Intercept>> + '_> {
        let name = name.to_string();
        let response = self
            .inner
            .watch_intercepts(proto::SessionRef { session_id: session.to_string() })
            .await?;
        let stream = response.into_inner();
        Ok(stream.map(move |snapshot| {
            let snapshot = snapshot?;
            snapshot
                .intercepts
                .into_iter()
                .find(|entry| entry_matches(entry, &name))
                .map(intercept_from_proto)
                .unwrap_or(Err(Error::WatchStreamEnded))
        }))
    }
}

fn entry_matches(entry: &proto::InterceptEntry, name: &str) -> bool {
    entry.spec.as_ref().map(|spec| spec.name == name).unwrap_or(false)
}

fn parse_session_id(raw: &str) -> Result<SessionId> {
    SessionId::from_str(raw)
        .map_err(|err| Error::Protocol(siphon_protocol::Error::TrafficManagerError { message: err.to_string() }))
}
