//! The session manager's core: presence tables, watch fan-out, and
//! intercept lifecycle, with no gRPC dependency (see `siphon_manager::
//! grpc` for the thin adapter). SPEC_FULL.md §4.4 and §6 describe the
//! surface this module implements.

pub mod compat;
pub mod intercept;
pub mod sessions;
pub mod watch;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use siphon_protocol::error::TelemetrySink;
use siphon_protocol::intercept::{Intercept, InterceptSpec};
use siphon_protocol::session::{AgentInfo, ClientInfo, SessionKind};
use siphon_protocol::{NoopTelemetrySink, SessionId};
use tokio_util::sync::CancellationToken;

use self::intercept::InterceptTable;
use self::sessions::SessionTable;
use self::watch::{Subscription, WatchSet};
use crate::error::{Error, Result};

struct ManagerState {
    clients: SessionTable<ClientInfo>,
    agents: SessionTable<AgentInfo>,
    intercepts: InterceptTable,
}

/// Session manager core. Cheap to construct, meant to be wrapped in an
/// `Arc` and shared across the gRPC service's request handlers and the
/// background sweeper task.
pub struct Manager {
    state: Mutex<ManagerState>,
    agent_watch: WatchSet,
    intercept_watch: WatchSet,
    telemetry: Arc<dyn TelemetrySink>,
}

impl Default for Manager {
    fn default() -> Self {
        Manager::new(Arc::new(NoopTelemetrySink))
    }
}

impl Manager {
    pub fn new(telemetry: Arc<dyn TelemetrySink>) -> Self {
        Manager {
            state: Mutex::new(ManagerState {
                clients: SessionTable::new(SessionKind::Client),
                agents: SessionTable::new(SessionKind::Agent),
                intercepts: InterceptTable::new(),
            }),
            agent_watch: WatchSet::new(),
            intercept_watch: WatchSet::new(),
            telemetry,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManagerState> {
        self.state.lock().expect("session manager lock poisoned")
    }

    pub async fn arrive_as_client(&self, info: ClientInfo) -> SessionId {
        self.lock().clients.arrive(info)
    }

    pub async fn arrive_as_agent(&self, info: AgentInfo) -> SessionId {
        let id = {
            let mut state = self.lock();
            state.agents.arrive(info)
        };
        self.reconcile().await;
        id
    }

    /// Refreshes presence for either kind of session. Returns `false` if
    /// unknown to either table.
    pub async fn remain(&self, id: &SessionId) -> bool {
        let mut state = self.lock();
        match id.kind() {
            SessionKind::Client => state.clients.mark(id),
            SessionKind::Agent => state.agents.mark(id),
        }
    }

    pub async fn depart(&self, id: &SessionId) {
        let mut state = self.lock();
        match id.kind() {
            SessionKind::Client => {
                if state.clients.depart(id).is_some() {
                    state.intercepts.on_client_departed(id);
                    drop(state);
                    self.intercept_watch.notify_all();
                }
            }
            SessionKind::Agent => {
                if state.agents.depart(id).is_some() {
                    state.intercepts.on_agent_departed(id);
                    drop(state);
                    self.agent_watch.notify_all();
                    self.intercept_watch.notify_all();
                }
            }
        }
    }

    pub async fn create_intercept(&self, client: &SessionId, spec: InterceptSpec) -> Result<Intercept> {
        let mut state = self.lock();
        if !state.clients.contains(client) {
            return Err(Error::UnknownSession(client.clone()));
        }
        let is_local_only = spec.is_local_only();
        let intercept = state.intercepts.create(client.clone(), spec).map_err(|err| {
            self.telemetry.record_error("create_intercept", &err);
            err
        })?;
        drop(state);

        // Local-only intercepts need no agent to service them; everyone
        // else waits on the watch stream agents subscribe to.
        if !is_local_only {
            self.intercept_watch.notify_all();
        }
        Ok(intercept)
    }

    pub async fn remove_intercept(&self, client: &SessionId, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.intercepts.remove(client, name).map_err(|err| {
            self.telemetry.record_error("remove_intercept", &err);
            err
        })?;
        drop(state);
        self.intercept_watch.notify_all();
        Ok(())
    }

    pub async fn agent_snapshot(&self) -> Vec<(SessionId, AgentInfo)> {
        let state = self.lock();
        state.agents.iter().map(|(id, info)| (id.clone(), info.clone())).collect()
    }

    pub async fn intercept_snapshot(&self) -> Vec<Intercept> {
        let state = self.lock();
        state.intercepts.all().cloned().collect()
    }

    pub fn agent_revision(&self) -> u64 {
        self.agent_watch.current_revision()
    }

    pub fn intercept_revision(&self) -> u64 {
        self.intercept_watch.current_revision()
    }

    pub fn subscribe_agents(&self) -> Subscription {
        self.agent_watch.subscribe()
    }

    pub fn subscribe_intercepts(&self) -> Subscription {
        self.intercept_watch.subscribe()
    }

    pub fn unsubscribe_agents(&self, subscription: &Subscription) {
        self.agent_watch.unsubscribe(subscription);
    }

    pub fn unsubscribe_intercepts(&self, subscription: &Subscription) {
        self.intercept_watch.unsubscribe(subscription);
    }

    /// Re-evaluates every `WAITING` intercept against the current agent
    /// set. Called whenever the agent set changes; also safe to call
    /// speculatively (e.g. from the sweeper) since it is a no-op when
    /// nothing is waiting.
    pub async fn reconcile(&self) -> bool {
        let mut state = self.lock();
        let agents: Vec<(SessionId, AgentInfo)> =
            state.agents.iter().map(|(id, info)| (id.clone(), info.clone())).collect();
        let changed = state.intercepts.reconcile(&agents);
        drop(state);
        if changed {
            self.intercept_watch.notify_all();
        }
        changed
    }

    /// Runs session expiry and terminal-intercept purging on `interval`
    /// until `cancel` fires, per §4.4's "periodic sweeper" and the
    /// purge-after-one-broadcast rule in the lifecycle contract.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        session_expiry: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => manager.sweep_once(session_expiry).await,
                }
            }
        })
    }

    async fn sweep_once(&self, session_expiry: Duration) {
        let expiry_millis = session_expiry.as_millis() as u64;
        let (expired_clients, expired_agents) = {
            let mut state = self.lock();
            let clients = state.clients.sweep_expired(expiry_millis);
            let agents = state.agents.sweep_expired(expiry_millis);
            for client in &clients {
                state.intercepts.on_client_departed(client);
            }
            for agent in &agents {
                state.intercepts.on_agent_departed(agent);
            }
            state.intercepts.purge_terminal();
            (clients, agents)
        };

        if !expired_clients.is_empty() {
            self.intercept_watch.notify_all();
            tracing::info!(count = expired_clients.len(), "expired client sessions swept");
        }
        if !expired_agents.is_empty() {
            self.agent_watch.notify_all();
            self.intercept_watch.notify_all();
            tracing::info!(count = expired_agents.len(), "expired agent sessions swept");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siphon_protocol::intercept::{Disposition, Mechanism};
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

    #[tokio::test]
    async fn creating_intercept_requires_known_client() {
        let manager = Manager::default();
        let unknown = SessionId::new(SessionKind::Client, 99);
        let err = manager.create_intercept(&unknown, spec("db", "")).await.unwrap_err();
        assert!(matches!(err, Error::UnknownSession(_)));
    }

    #[tokio::test]
    async fn full_lifecycle_promotes_and_tears_down() {
        let manager = Manager::default();
        let client = manager.arrive_as_client(ClientInfo {
            user: "ada".into(),
            hostname: "ada-laptop".into(),
        }).await;

        let intercept = manager.create_intercept(&client, spec("db", "web-agent")).await.unwrap();
        assert_eq!(intercept.disposition, Disposition::Waiting);

        manager.arrive_as_agent(AgentInfo {
            name: "web-agent".into(),
            namespace: "default".into(),
            product: "siphon".into(),
            version: "1.0.0".parse().unwrap(),
            mechanisms: vec!["tcp".into()],
        }).await;

        let snapshot = manager.intercept_snapshot().await;
        assert_eq!(snapshot[0].disposition, Disposition::Active);

        manager.remove_intercept(&client, "db").await.unwrap();
        let snapshot = manager.intercept_snapshot().await;
        assert_eq!(snapshot[0].disposition, Disposition::Removed);
    }

    #[tokio::test]
    async fn departing_client_marks_intercepts_no_client() {
        let manager = Manager::default();
        let client = manager.arrive_as_client(ClientInfo {
            user: "ada".into(),
            hostname: "ada-laptop".into(),
        }).await;
        manager.create_intercept(&client, spec("local", "")).await.unwrap();

        manager.depart(&client).await;

        let snapshot = manager.intercept_snapshot().await;
        assert_eq!(snapshot[0].disposition, Disposition::NoClient);
    }

    #[tokio::test]
    async fn remain_refreshes_presence_and_rejects_unknown() {
        let manager = Manager::default();
        let client = manager.arrive_as_client(ClientInfo {
            user: "ada".into(),
            hostname: "ada-laptop".into(),
        }).await;
        assert!(manager.remain(&client).await);
        assert!(!manager.remain(&SessionId::new(SessionKind::Client, 99)).await);
    }
}
