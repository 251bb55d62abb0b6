//! Intercept lifecycle, per SPEC_FULL.md §4.4 "Intercept lifecycle" and
//! the §9 redesign note calling for an explicit transition table with
//! guard predicates rather than ad hoc state mutation scattered through
//! request handlers.

use std::collections::HashMap;

use siphon_protocol::intercept::{Disposition, Intercept, InterceptSpec};
use siphon_protocol::session::AgentInfo;
use siphon_protocol::{Error as ProtoError, SessionId};

use crate::core::compat::agents_compatible;
use crate::error::{Error, Result};

/// Keyed by `{client_session}/{spec.name}`: uniqueness is scoped to one
/// client, matching the `AlreadyExists` guard in §4.4.
pub type InterceptKey = String;

fn key_for(client: &SessionId, name: &str) -> InterceptKey {
    format!("{client}/{name}")
}

#[derive(Default)]
pub struct InterceptTable {
    entries: HashMap<InterceptKey, Intercept>,
}

impl InterceptTable {
    pub fn new() -> Self {
        InterceptTable::default()
    }

    pub fn get(&self, client: &SessionId, name: &str) -> Option<&Intercept> {
        self.entries.get(&key_for(client, name))
    }

    pub fn all(&self) -> impl Iterator<Item = &Intercept> {
        self.entries.values()
    }

    /// Validates and inserts a new intercept. Local-only specs (no
    /// agent) transition straight to `ACTIVE`; everything else starts
    /// `WAITING` and awaits the next [`InterceptTable::reconcile`] pass.
    pub fn create(&mut self, client: SessionId, spec: InterceptSpec) -> Result<Intercept> {
        let key = key_for(&client, &spec.name);
        if self.entries.contains_key(&key) {
            return Err(Error::Protocol(ProtoError::AlreadyExists {
                name: spec.name.clone(),
            }));
        }

        let collides = self.entries.values().any(|existing| {
            existing.client_session == client
                && !existing.disposition.is_terminal()
                && existing.spec.local_address == spec.local_address
                && existing.spec.local_port == spec.local_port
        });
        if collides {
            return Err(Error::Protocol(ProtoError::LocalTargetInUse {
                host: spec.local_address.to_string(),
                port: spec.local_port,
            }));
        }

        let intercept = Intercept::new(key.clone(), spec, client);
        self.entries.insert(key, intercept.clone());
        Ok(intercept)
    }

    /// Explicit removal by the owning client. A no-op transition for an
    /// already-terminal intercept is still an error: removing something
    /// that doesn't exist from this client's perspective should read
    /// back as `UnknownIntercept`, not silently succeed twice.
    pub fn remove(&mut self, client: &SessionId, name: &str) -> Result<()> {
        let key = key_for(client, name);
        match self.entries.get_mut(&key) {
            Some(intercept) => {
                intercept.disposition = Disposition::Removed;
                Ok(())
            }
            None => Err(Error::UnknownIntercept(name.to_string())),
        }
    }

    /// Implicit removal: every non-terminal intercept owned by a
    /// departed client observes `NO_CLIENT` so any agent-side watcher
    /// sees why the intercept is going away before it is purged.
    pub fn on_client_departed(&mut self, client: &SessionId) {
        for intercept in self.entries.values_mut() {
            if &intercept.client_session == client && !intercept.disposition.is_terminal() {
                intercept.disposition = Disposition::NoClient;
            }
        }
    }

    /// An agent whose session just departed can no longer service any
    /// intercept it was actively handling.
    pub fn on_agent_departed(&mut self, agent: &SessionId) {
        for intercept in self.entries.values_mut() {
            if intercept.agent_session.as_ref() == Some(agent)
                && intercept.disposition == Disposition::Active
            {
                intercept.disposition = Disposition::AgentError;
                intercept.agent_session = None;
            }
        }
    }

    /// Removes every intercept that reached a terminal disposition,
    /// matching "the entry is purged after one snapshot broadcasts the
    /// terminal state" -- callers broadcast first, then call this.
    pub fn purge_terminal(&mut self) {
        self.entries.retain(|_, i| !i.disposition.is_terminal());
    }

    /// Re-evaluates every `WAITING` intercept against the current agent
    /// set, per §4.4 "Agent readiness". Returns whether anything
    /// changed, so callers know whether to broadcast.
    pub fn reconcile(&mut self, agents: &[(SessionId, AgentInfo)]) -> bool {
        let mut changed = false;
        for intercept in self.entries.values_mut() {
            if intercept.disposition != Disposition::Waiting {
                continue;
            }

            let matching: Vec<&(SessionId, AgentInfo)> = agents
                .iter()
                .filter(|(_, info)| {
                    info.name == intercept.spec.agent_name && info.namespace == intercept.spec.namespace
                })
                .collect();

            if matching.is_empty() {
                continue;
            }

            let infos: Vec<&AgentInfo> = matching.iter().map(|(_, info)| info).collect();
            if !agents_compatible(&infos) {
                intercept.message = Some(format!(
                    "multiple incompatible agents named {} are present; waiting for a consistent set",
                    intercept.spec.agent_name
                ));
                continue;
            }

            let Some((session, info)) = matching
                .iter()
                .find(|(_, info)| info.mechanisms.iter().any(|m| m == &intercept.spec.mechanism.name))
            else {
                intercept.disposition = Disposition::NoMechanism;
                intercept.message = Some(format!(
                    "no agent named {} advertises mechanism {}",
                    intercept.spec.agent_name, intercept.spec.mechanism.name
                ));
                changed = true;
                continue;
            };
            let _ = info;

            intercept.agent_session = Some(session.clone());
            intercept.disposition = Disposition::Active;
            intercept.message = None;
            changed = true;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siphon_protocol::intercept::Mechanism;
    use std::net::{IpAddr, Ipv4Addr};

    fn spec(name: &str, agent_name: &str) -> InterceptSpec {
        InterceptSpec {
            name: name.to_string(),
            agent_name: agent_name.to_string(),
            namespace: "default".to_string(),
            service_name: None,
            service_port_id: None,
            mechanism: Mechanism::new("tcp"),
            local_port: 8080,
            local_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            replace: false,
        }
    }

    fn agent_info(name: &str, version: &str, mechanisms: &[&str]) -> AgentInfo {
        AgentInfo {
            name: name.to_string(),
            namespace: "default".to_string(),
            product: "siphon".to_string(),
            version: version.parse().unwrap(),
            mechanisms: mechanisms.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn local_only_spec_starts_active() {
        let mut table = InterceptTable::new();
        let client = SessionId::new(siphon_protocol::SessionKind::Client, 0);
        let intercept = table.create(client, spec("db", "")).unwrap();
        assert_eq!(intercept.disposition, Disposition::Active);
    }

    #[test]
    fn duplicate_name_on_same_client_fails() {
        let mut table = InterceptTable::new();
        let client = SessionId::new(siphon_protocol::SessionKind::Client, 0);
        table.create(client.clone(), spec("db", "web-agent")).unwrap();
        let err = table.create(client, spec("db", "web-agent")).unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtoError::AlreadyExists { .. })));
    }

    #[test]
    fn reusing_local_target_fails() {
        let mut table = InterceptTable::new();
        let client = SessionId::new(siphon_protocol::SessionKind::Client, 0);
        table.create(client.clone(), spec("db", "web-agent")).unwrap();
        let err = table.create(client, spec("cache", "web-agent")).unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtoError::LocalTargetInUse { .. })));
    }

    #[test]
    fn reconcile_promotes_waiting_intercept_with_compatible_agent() {
        let mut table = InterceptTable::new();
        let client = SessionId::new(siphon_protocol::SessionKind::Client, 0);
        table.create(client, spec("db", "web-agent")).unwrap();

        let agent_session = SessionId::new(siphon_protocol::SessionKind::Agent, 0);
        let agents = vec![(agent_session.clone(), agent_info("web-agent", "1.0.0", &["tcp"]))];
        let changed = table.reconcile(&agents);

        assert!(changed);
        let intercept = table.get(&SessionId::new(siphon_protocol::SessionKind::Client, 0), "db").unwrap();
        assert_eq!(intercept.disposition, Disposition::Active);
        assert_eq!(intercept.agent_session, Some(agent_session));
    }

    #[test]
    fn reconcile_reports_no_mechanism_when_agent_lacks_it() {
        let mut table = InterceptTable::new();
        let client = SessionId::new(siphon_protocol::SessionKind::Client, 0);
        table.create(client.clone(), spec("db", "web-agent")).unwrap();

        let agents = vec![(
            SessionId::new(siphon_protocol::SessionKind::Agent, 0),
            agent_info("web-agent", "1.0.0", &["udp"]),
        )];
        table.reconcile(&agents);

        let intercept = table.get(&client, "db").unwrap();
        assert_eq!(intercept.disposition, Disposition::NoMechanism);
    }

    #[test]
    fn reconcile_stays_waiting_for_incompatible_agent_set() {
        let mut table = InterceptTable::new();
        let client = SessionId::new(siphon_protocol::SessionKind::Client, 0);
        table.create(client.clone(), spec("db", "web-agent")).unwrap();

        let agents = vec![
            (
                SessionId::new(siphon_protocol::SessionKind::Agent, 0),
                agent_info("web-agent", "1.0.0", &["tcp"]),
            ),
            (
                SessionId::new(siphon_protocol::SessionKind::Agent, 1),
                agent_info("web-agent", "2.0.0", &["tcp"]),
            ),
        ];
        let changed = table.reconcile(&agents);

        assert!(!changed);
        let intercept = table.get(&client, "db").unwrap();
        assert_eq!(intercept.disposition, Disposition::Waiting);
        assert!(intercept.message.is_some());
    }

    #[test]
    fn agent_departure_demotes_active_intercept() {
        let mut table = InterceptTable::new();
        let client = SessionId::new(siphon_protocol::SessionKind::Client, 0);
        table.create(client.clone(), spec("db", "web-agent")).unwrap();
        let agent_session = SessionId::new(siphon_protocol::SessionKind::Agent, 0);
        table.reconcile(&[(agent_session.clone(), agent_info("web-agent", "1.0.0", &["tcp"]))]);

        table.on_agent_departed(&agent_session);

        let intercept = table.get(&client, "db").unwrap();
        assert_eq!(intercept.disposition, Disposition::AgentError);
    }

    #[test]
    fn client_departure_marks_no_client_without_purging() {
        let mut table = InterceptTable::new();
        let client = SessionId::new(siphon_protocol::SessionKind::Client, 0);
        table.create(client.clone(), spec("db", "")).unwrap();

        table.on_client_departed(&client);

        let intercept = table.get(&client, "db").unwrap();
        assert_eq!(intercept.disposition, Disposition::NoClient);
    }

    #[test]
    fn purge_terminal_drops_only_finished_intercepts() {
        let mut table = InterceptTable::new();
        let client = SessionId::new(siphon_protocol::SessionKind::Client, 0);
        table.create(client.clone(), spec("active-one", "")).unwrap();
        table.create(client.clone(), spec("db", "web-agent")).unwrap();
        table.remove(&client, "db").unwrap();

        table.purge_terminal();

        assert!(table.get(&client, "db").is_none());
        assert!(table.get(&client, "active-one").is_some());
    }
}
