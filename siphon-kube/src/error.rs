/// Errors raised while talking to the Kubernetes API, as distinct from
/// the domain-level [`siphon_protocol::Error`] variants (`NoOwnerWorkload`
/// and friends), which this crate also returns directly since the
/// resolver and planner are their primary source.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Protocol(#[from] siphon_protocol::Error),

    #[error("kubernetes API error: {0}")]
    KubeApi(#[from] kube::Error),

    #[error("{resource} is missing required field `{field}`")]
    MissingField {
        resource: String,
        field: &'static str,
    },

    #[error("{resource} is in an invalid state: {reason}")]
    InvalidState { resource: String, reason: String },

    /// A prior failed lookup for this cache key, replayed without
    /// re-issuing the underlying request. Carries the original error's
    /// message since the source errors (e.g. `kube::Error`) aren't
    /// `Clone`.
    #[error("{0} (cached failure)")]
    Cached(std::sync::Arc<String>),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn missing_field(resource: impl Into<String>, field: &'static str) -> Self {
        Error::MissingField {
            resource: resource.into(),
            field,
        }
    }

    pub fn invalid_state(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidState {
            resource: resource.into(),
            reason: reason.into(),
        }
    }
}
