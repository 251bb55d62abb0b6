/// Errors raised while driving one intercept's lifecycle from the client
/// side, as distinct from the Session Manager's own [`siphon_protocol::
/// Error`] variants (which this crate also surfaces, wrapped, since most
/// `TrafficManagerError`s originate on the other end of the gRPC call).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Protocol(#[from] siphon_protocol::Error),

    #[error("traffic manager call failed: {0}")]
    TrafficManager(#[from] tonic::Status),

    #[error("could not reach the traffic manager: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("intercept {name} did not reach ACTIVE before the timeout")]
    FailedToEstablish { name: String },

    #[error("port spec `{0}` is not a valid LOCAL[:CONTAINER][:SVC_PORT_ID] identifier")]
    InvalidPortSpec(String),

    #[error("mount point {path} is held by intercept {held_by}")]
    MountPointBusy { path: String, held_by: String },

    #[error("failed to create mount directory: {0}")]
    MountSetup(#[source] std::io::Error),

    #[error("sftp session failed: {0}")]
    Sftp(String),

    #[error("could not encode environment as JSON: {0}")]
    EnvFileEncode(#[from] serde_json::Error),

    #[error("subprocess error: {0}")]
    Subprocess(#[source] std::io::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("the watch stream ended before the intercept reached a terminal state")]
    WatchStreamEnded,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether this error reflects a user-correctable mistake as opposed
    /// to an internal/infra failure, mirroring [`siphon_protocol::Error::
    /// is_user_error`] for the errors this crate adds on top. Used by the
    /// propagation policy (§7) to decide how an error is categorized
    /// before being surfaced to the CLI.
    pub fn is_user_error(&self) -> bool {
        match self {
            Error::Protocol(err) => err.is_user_error(),
            Error::InvalidPortSpec(_) | Error::MountPointBusy { .. } => true,
            _ => false,
        }
    }
}
