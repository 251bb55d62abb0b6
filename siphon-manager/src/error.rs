/// Errors raised by the session manager's core logic, as distinct from
/// transport-level failures the gRPC adapter wraps separately.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Protocol(#[from] siphon_protocol::Error),

    #[error("session {0} is not known to this manager")]
    UnknownSession(siphon_protocol::SessionId),

    #[error("no intercept named {0} on this client")]
    UnknownIntercept(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
