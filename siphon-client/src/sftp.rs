//! SFTP mount client, per SPEC_FULL.md §4.5 phase 4: once an intercept
//! reports a `sftp_port`, the Orchestrator dials `podIp:sftp_port` over
//! SSH and negotiates the `sftp` subsystem, handing the resulting
//! session to the platform's filesystem-mount layer. Establishing and
//! holding that session -- not the platform mount call itself, which is
//! OS-specific glue outside this crate's scope -- is what lives here.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use russh::client::{self, Handle};
use tracing::{debug, warn};

use crate::backoff::Backoff;
use crate::error::{Error, Result};

/// Accepts the agent's host key unconditionally. The agent's embedded
/// SSH server is reachable only over the already-authenticated path into
/// the cluster (the Session Manager handed us `podIp`/`sftp_port`
/// directly), so there is no separate host identity to pin here.
struct AcceptAnyHostKey;

#[async_trait::async_trait]
impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _server_public_key: &ssh_key::PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// One live SFTP session against an agent's embedded SFTP server.
pub struct SftpMount {
    session: russh_sftp::client::SftpSession,
    _ssh: Handle<AcceptAnyHostKey>,
}

impl SftpMount {
    /// Dials `pod_ip:sftp_port`, authenticates as `user`, and negotiates
    /// the `sftp` subsystem, retrying transient connection failures with
    /// [`Backoff::default_transient`] up to `max_attempts` times.
    pub async fn connect(pod_ip: IpAddr, sftp_port: u16, user: &str, max_attempts: u32) -> Result<Self> {
        let addr = SocketAddr::new(pod_ip, sftp_port);
        let mut backoff = Backoff::default_transient();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match Self::try_connect(addr, user).await {
                Ok(mount) => return Ok(mount),
                Err(err) if attempt < max_attempts => {
                    warn!(%err, attempt, %addr, "sftp connect failed, retrying");
                    backoff.sleep().await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_connect(addr: SocketAddr, user: &str) -> Result<Self> {
        let config = Arc::new(client::Config::default());
        let mut ssh = client::connect(config, addr, AcceptAnyHostKey)
            .await
            .map_err(|err| Error::Sftp(err.to_string()))?;

        // The agent's embedded SFTP server authenticates by session
        // identity alone (the channel is only reachable through the
        // already-authorized intercept path), so any non-empty password
        // is accepted; `user` still selects the right account on
        // multi-tenant agent images.
        let authenticated = ssh
            .authenticate_password(user, "siphon")
            .await
            .map_err(|err| Error::Sftp(err.to_string()))?;
        if !authenticated {
            return Err(Error::Sftp(format!("agent rejected sftp authentication for user {user}")));
        }

        let channel = ssh.channel_open_session().await.map_err(|err| Error::Sftp(err.to_string()))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|err| Error::Sftp(err.to_string()))?;

        let session = russh_sftp::client::SftpSession::new(channel.into_stream())
            .await
            .map_err(|err| Error::Sftp(err.to_string()))?;

        debug!(%addr, "sftp session established");
        Ok(SftpMount { session, _ssh: ssh })
    }

    /// Lists one directory, the minimal surface needed to verify a mount
    /// is live and browsable before handing it to the platform mount
    /// layer.
    pub async fn read_dir(&self, path: &str) -> Result<Vec<String>> {
        let entries = self
            .session
            .read_dir(path)
            .await
            .map_err(|err| Error::Sftp(err.to_string()))?;
        Ok(entries.map(|entry| entry.file_name()).collect())
    }

    pub async fn close(self) -> Result<()> {
        self.session.close().await.map_err(|err| Error::Sftp(err.to_string()))
    }
}
