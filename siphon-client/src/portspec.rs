//! Port-spec parsing for the Orchestrator's "Prepare" phase
//! (SPEC_FULL.md §4.5 phase 1): `LOCAL[:CONTAINER][:SVC_PORT_ID]`.

use crate::error::{Error, Result};

/// A parsed `LOCAL[:CONTAINER][:SVC_PORT_ID]` port spec.
///
/// - `local_port` is always present: the port the Orchestrator listens on
///   at `127.0.0.1`.
/// - `container_port_id` selects which of the workload's container ports
///   to intercept, when a workload exposes more than one; absent, it
///   defaults to `local_port` itself when the local process is **not**
///   containerized (the common case: `siphon run -- app` on a bare
///   workstation intercepting port 8080 almost always means "the remote
///   process's port 8080").
/// - `service_port_id` narrows which service port the spec resolves
///   against when a workload is selected by more than one service; it is
///   forwarded to the Session Manager as `InterceptSpec::service_port_id`
///   verbatim and never interpreted client-side.
///
/// When the local process **is** containerized (`running_in_container =
/// true`), the implicit `container_port_id = local_port` default is
/// suppressed: a containerized process's own port numbering has no
/// necessary relationship to the remote workload's, so an explicit
/// `CONTAINER` segment is required whenever the two differ and the
/// Orchestrator refuses to guess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    pub local_port: u16,
    pub container_port_id: Option<String>,
    pub service_port_id: Option<String>,
}

pub fn parse(spec: &str, running_in_container: bool) -> Result<PortSpec> {
    let parts: Vec<&str> = spec.split(':').collect();
    if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(Error::InvalidPortSpec(spec.to_string()));
    }

    let local_port: u16 = parts[0]
        .parse()
        .map_err(|_| Error::InvalidPortSpec(spec.to_string()))?;

    let container_port_id = match parts.get(1) {
        Some(raw) => Some(raw.to_string()),
        None if running_in_container => None,
        None => Some(local_port.to_string()),
    };

    let service_port_id = parts.get(2).map(|s| s.to_string());

    Ok(PortSpec {
        local_port,
        container_port_id,
        service_port_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_local_port_defaults_container_port_to_itself() {
        let spec = parse("8080", false).unwrap();
        assert_eq!(spec.local_port, 8080);
        assert_eq!(spec.container_port_id.as_deref(), Some("8080"));
        assert_eq!(spec.service_port_id, None);
    }

    #[test]
    fn bare_local_port_leaves_container_port_unset_when_containerized() {
        let spec = parse("8080", true).unwrap();
        assert_eq!(spec.container_port_id, None);
    }

    #[test]
    fn local_and_container_port_both_set() {
        let spec = parse("8080:http", false).unwrap();
        assert_eq!(spec.local_port, 8080);
        assert_eq!(spec.container_port_id.as_deref(), Some("http"));
    }

    #[test]
    fn all_three_segments() {
        let spec = parse("8080:9090:web-service-port", true).unwrap();
        assert_eq!(spec.local_port, 8080);
        assert_eq!(spec.container_port_id.as_deref(), Some("9090"));
        assert_eq!(spec.service_port_id.as_deref(), Some("web-service-port"));
    }

    #[test]
    fn rejects_non_numeric_local_port() {
        assert!(parse("http", false).is_err());
    }

    #[test]
    fn rejects_too_many_segments() {
        assert!(parse("8080:9090:web:extra", false).is_err());
    }

    #[test]
    fn rejects_empty_segments() {
        assert!(parse("8080::web", false).is_err());
    }
}
