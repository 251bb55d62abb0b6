//! The Intercept Orchestrator: drives one intercept through the phases
//! in SPEC_FULL.md §4.5 -- Prepare, Create, wait for `ACTIVE`, start
//! forwards/SFTP, run-or-retain, and Leave -- all suspension points
//! taking a [`CancellationToken`] derived from the invocation's root
//! scope (§5).

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use siphon_protocol::intercept::{Disposition, Intercept, InterceptSpec, Mechanism};
use siphon_protocol::session::ClientInfo;
use siphon_protocol::SessionId;

use crate::client::ManagerClient;
use crate::config::OrchestratorConfig;
use crate::envfile;
use crate::error::{Error, Result};
use crate::forward::PortForward;
use crate::mount::{MountRegistry, OwnedMountClaim};
use crate::portspec::{self, PortSpec};
use crate::sftp::SftpMount;

/// Inputs needed to start one intercept, already parsed/validated by the
/// caller (e.g. a CLI front-end) from user-facing flags.
pub struct InterceptRequest {
    pub name: String,
    pub agent_name: String,
    pub namespace: String,
    pub service_name: Option<String>,
    pub port_spec: String,
    pub mechanism: Mechanism,
    pub replace: bool,
    /// Whether the Orchestrator itself is running inside a container,
    /// affecting the default `CONTAINER` segment of `port_spec` (see
    /// [`crate::portspec::parse`]).
    pub running_in_container: bool,
    /// `Some` to spawn and supervise a subprocess with the intercept's
    /// environment injected; `None` to "retain" -- emit env files and
    /// return without owning a child process.
    pub run: Option<RunCommand>,
}

pub struct RunCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// One running intercept: its port forwards, optional SFTP mount, and
/// (if requested) supervised subprocess, plus the handles needed to tear
/// all of it down cleanly.
pub struct ActiveIntercept {
    pub name: String,
    pub intercept_id: String,
    pub disposition: Disposition,
    pub environment: BTreeMap<String, String>,
    forwards: Vec<PortForward>,
    sftp: Option<SftpMount>,
    mount_claim: Option<OwnedMountClaim>,
    child: Option<tokio::process::Child>,
    cancel: CancellationToken,
}

impl ActiveIntercept {
    pub fn mount_path(&self) -> Option<&std::path::Path> {
        self.mount_claim.as_ref().map(OwnedMountClaim::path)
    }

    /// Waits for a supervised subprocess to exit, if one was started.
    /// Returns `Ok(None)` for a "retained" (no subprocess) intercept.
    pub async fn wait(&mut self) -> Result<Option<std::process::ExitStatus>> {
        match &mut self.child {
            Some(child) => Ok(Some(child.wait().await.map_err(Error::Subprocess)?)),
            None => Ok(None),
        }
    }
}

/// Drives the full lifecycle of zero or more concurrent intercepts
/// against one Session Manager connection.
pub struct Orchestrator {
    client: ManagerClient,
    session: SessionId,
    mounts: Arc<MountRegistry>,
    config: OrchestratorConfig,
    root_cancel: CancellationToken,
    keepalive: tokio::task::JoinHandle<()>,
}

impl Orchestrator {
    /// Connects to the Session Manager at `endpoint`, registers as a
    /// client session, and starts the background keepalive loop that
    /// calls `Remain` on [`OrchestratorConfig::keepalive_interval`].
    pub async fn connect(endpoint: String, client_info: ClientInfo, config: OrchestratorConfig) -> Result<Self> {
        let connect_fut = ManagerClient::connect(endpoint);
        let mut client = tokio::time::timeout(config.traffic_manager_connect_timeout, connect_fut)
            .await
            .map_err(|_| Error::FailedToEstablish { name: "traffic-manager-connect".to_string() })??;

        let session = tokio::time::timeout(
            config.traffic_manager_api_timeout,
            client.arrive_as_client(client_info),
        )
        .await
        .map_err(|_| Error::FailedToEstablish { name: "arrive-as-client".to_string() })??;

        let root_cancel = CancellationToken::new();
        let keepalive = spawn_keepalive(client.clone(), session.clone(), config.keepalive_interval, root_cancel.child_token());

        Ok(Orchestrator {
            client,
            session,
            mounts: Arc::new(MountRegistry::new()),
            config,
            root_cancel,
            keepalive,
        })
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Runs phases 1-5 of one intercept: parse the port spec, create it,
    /// wait for `ACTIVE` (or a terminal error disposition), start its
    /// port forwards and SFTP mount, then either spawn the requested
    /// subprocess or just return with the environment ready to read.
    pub async fn start(&mut self, request: InterceptRequest) -> Result<ActiveIntercept> {
        let spec = build_spec(&request)?;

        let created = tokio::time::timeout(
            self.config.traffic_manager_api_timeout,
            self.client.create_intercept(&self.session, &spec),
        )
        .await
        .map_err(|_| Error::FailedToEstablish { name: spec.name.clone() })??;

        let active = self.wait_until_active(&spec.name, created).await?;

        let forward_cancel = self.root_cancel.child_token();
        let mut forwards = Vec::with_capacity(active.extra_ports.len() + 1);
        if let Some(pod_ip) = active.pod_ip {
            forwards.push(PortForward::start(spec.local_port, pod_ip, &forward_cancel).await?);
            for port in &active.extra_ports {
                forwards.push(PortForward::start(*port, pod_ip, &forward_cancel).await?);
            }
        }

        let (sftp, mount_claim) = self.start_sftp_mount(&spec.name, &active).await?;

        let child = match request.run {
            Some(run) => Some(self.spawn_subprocess(run, &active.environment)?),
            None => None,
        };

        Ok(ActiveIntercept {
            name: spec.name,
            intercept_id: active.id,
            disposition: active.disposition,
            environment: active.environment,
            forwards,
            sftp,
            mount_claim,
            child,
            cancel: forward_cancel,
        })
    }

    /// Polls the intercept watch stream until `name` reaches a terminal
    /// disposition, bounded by [`OrchestratorConfig::intercept_timeout`].
    /// `ACTIVE` resolves successfully; every other terminal disposition
    /// becomes a [`siphon_protocol::Error::FailedToEstablish`].
    async fn wait_until_active(&mut self, name: &str, initial: Intercept) -> Result<Intercept> {
        if initial.disposition == Disposition::Active {
            return Ok(initial);
        }
        if initial.disposition.is_terminal() {
            return Err(failed_to_establish(name, &initial));
        }

        let mut stream = Box::pin(self.client.watch_intercept(&self.session, name).await?);
        let deadline = tokio::time::sleep(self.config.intercept_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => return Err(Error::FailedToEstablish { name: name.to_string() }),
                next = stream.next() => {
                    let intercept = next.ok_or(Error::WatchStreamEnded)??;
                    if intercept.disposition == Disposition::Active {
                        return Ok(intercept);
                    }
                    if intercept.disposition.is_terminal() {
                        return Err(failed_to_establish(name, &intercept));
                    }
                }
            }
        }
    }

    async fn start_sftp_mount(&self, name: &str, intercept: &Intercept) -> Result<(Option<SftpMount>, Option<OwnedMountClaim>)> {
        let (Some(pod_ip), Some(sftp_port)) = (intercept.pod_ip, intercept.sftp_port) else {
            return Ok((None, None));
        };

        let dir = crate::mount::create_mount_directory()?;
        let path = dir_to_claim_path(&dir);
        let claim = self.mounts.reserve_arc(path, name)?;
        // `dir` would otherwise delete the directory on drop; the claim
        // now owns its lifetime via the registry entry, but we still
        // need the directory itself to outlive this function, so leak
        // its handle into the claim's path rather than the TempDir.
        let _ = dir.keep();

        let mount = SftpMount::connect(pod_ip, sftp_port, &intercept.spec.agent_name, 5).await?;
        info!(intercept = name, path = %claim.path().display(), "sftp mount established");
        Ok((Some(mount), Some(claim)))
    }

    fn spawn_subprocess(&self, run: RunCommand, environment: &BTreeMap<String, String>) -> Result<tokio::process::Child> {
        // Resolve the program against `PATH` up front so a typo surfaces as
        // a clear "program not found" error instead of an opaque spawn
        // failure from the OS.
        let program = which::which(&run.program).unwrap_or_else(|_| PathBuf::from(&run.program));
        let mut command = tokio::process::Command::new(program);
        command
            .args(&run.args)
            .envs(environment)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        command.spawn().map_err(Error::Subprocess)
    }

    /// Tears down one intercept: stops its forwards, closes its SFTP
    /// session, releases its mount claim, and removes it from the
    /// Session Manager.
    pub async fn leave(&mut self, mut intercept: ActiveIntercept) -> Result<()> {
        intercept.cancel.cancel();
        for forward in intercept.forwards {
            forward.stop().await;
        }
        if let Some(sftp) = intercept.sftp {
            if let Err(err) = sftp.close().await {
                warn!(%err, intercept = intercept.name, "sftp session did not close cleanly");
            }
        }
        drop(intercept.mount_claim);
        self.client.remove_intercept(&self.session, &intercept.name).await
    }

    /// Departs the Session Manager and stops the keepalive loop. Any
    /// still-running intercepts should be left with [`Orchestrator::
    /// leave`] first.
    pub async fn shutdown(mut self) {
        self.root_cancel.cancel();
        let _ = self.keepalive.await;
        let _ = self.client.depart(&self.session).await;
    }
}

fn build_spec(request: &InterceptRequest) -> Result<InterceptSpec> {
    let PortSpec { local_port, service_port_id, .. } =
        portspec::parse(&request.port_spec, request.running_in_container)?;

    Ok(InterceptSpec {
        name: request.name.clone(),
        agent_name: request.agent_name.clone(),
        namespace: request.namespace.clone(),
        service_name: request.service_name.clone(),
        service_port_id,
        mechanism: request.mechanism.clone(),
        local_port,
        local_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        replace: request.replace,
    })
}

fn dir_to_claim_path(dir: &tempfile::TempDir) -> PathBuf {
    #[cfg(not(target_os = "windows"))]
    {
        crate::mount::platform_mount_path(dir)
    }
    #[cfg(target_os = "windows")]
    {
        let _ = dir;
        crate::mount::first_free_drive_letter().unwrap_or_else(|_| dir.path().to_path_buf())
    }
}

fn failed_to_establish(name: &str, intercept: &Intercept) -> Error {
    warn!(
        intercept = name,
        disposition = ?intercept.disposition,
        message = ?intercept.message,
        "intercept reached a non-active terminal disposition"
    );
    Error::FailedToEstablish { name: name.to_string() }
}

fn spawn_keepalive(
    mut client: ManagerClient,
    session: SessionId,
    interval: std::time::Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = client.remain(&session).await {
                        warn!(%err, "keepalive remain() failed");
                    }
                }
            }
        }
    })
}

/// Renders the environment of an [`ActiveIntercept`] to disk in either
/// the dotenv or JSON shape, per §4.5's env-file emission step.
pub fn write_environment(intercept: &ActiveIntercept, path: &std::path::Path, json: bool) -> Result<()> {
    let rendered = if json {
        envfile::render_json(&intercept.environment)?
    } else {
        envfile::render_dotenv(&intercept.environment)
    };
    std::fs::write(path, rendered).map_err(Error::Io)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(port_spec: &str) -> InterceptRequest {
        InterceptRequest {
            name: "db".to_string(),
            agent_name: "web-agent".to_string(),
            namespace: "default".to_string(),
            service_name: Some("web".to_string()),
            port_spec: port_spec.to_string(),
            mechanism: Mechanism::new("tcp"),
            replace: false,
            running_in_container: false,
            run: None,
        }
    }

    #[test]
    fn build_spec_carries_the_request_fields_and_parsed_port() {
        let spec = build_spec(&request("8080:9090:web-port")).unwrap();
        assert_eq!(spec.name, "db");
        assert_eq!(spec.agent_name, "web-agent");
        assert_eq!(spec.local_port, 8080);
        assert_eq!(spec.service_port_id.as_deref(), Some("web-port"));
        assert_eq!(spec.local_address, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(!spec.replace);
    }

    #[test]
    fn build_spec_rejects_an_invalid_port_spec() {
        assert!(build_spec(&request("not-a-port")).is_err());
    }
}
