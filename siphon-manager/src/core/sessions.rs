//! Presence tracking for clients and agents, per SPEC_FULL.md §4.4
//! "Sessions".

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use siphon_protocol::session::{Session, SessionKind};
use siphon_protocol::SessionId;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64
}

/// Arrival/presence table for one kind of participant (clients or
/// agents live in separate tables so their `n` counters are
/// independent, matching the `C<n>`/`A<n>` id scheme).
pub struct SessionTable<Info> {
    kind: SessionKind,
    next_ordinal: u64,
    sessions: HashMap<SessionId, (Session, Info)>,
}

impl<Info: Clone> SessionTable<Info> {
    pub fn new(kind: SessionKind) -> Self {
        SessionTable {
            kind,
            next_ordinal: 0,
            sessions: HashMap::new(),
        }
    }

    /// Registers a new presence record, stamping `arrivedAt = lastMarkedAt
    /// = now()`.
    pub fn arrive(&mut self, info: Info) -> SessionId {
        let id = SessionId::new(self.kind, self.next_ordinal);
        self.next_ordinal += 1;
        let now = now_millis();
        let session = Session {
            id: id.clone(),
            kind: self.kind,
            arrived_at_millis: now,
            last_marked_at_millis: now,
        };
        self.sessions.insert(id.clone(), (session, info));
        id
    }

    /// Refreshes `lastMarkedAt`. Returns `false` if `id` is not present.
    pub fn mark(&mut self, id: &SessionId) -> bool {
        match self.sessions.get_mut(id) {
            Some((session, _)) => {
                session.last_marked_at_millis = now_millis();
                true
            }
            None => false,
        }
    }

    /// Removes the session, returning its info if it was present.
    pub fn depart(&mut self, id: &SessionId) -> Option<Info> {
        self.sessions.remove(id).map(|(_, info)| info)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn get(&self, id: &SessionId) -> Option<&Info> {
        self.sessions.get(id).map(|(_, info)| info)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SessionId, &Info)> {
        self.sessions.iter().map(|(id, (_, info))| (id, info))
    }

    /// Removes and returns the ids of every session whose `lastMarkedAt`
    /// is older than `expiry_millis`, for the periodic sweeper.
    pub fn sweep_expired(&mut self, expiry_millis: u64) -> Vec<SessionId> {
        let now = now_millis();
        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, (session, _))| now.saturating_sub(session.last_marked_at_millis) > expiry_millis)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.sessions.remove(id);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrive_assigns_monotonic_kind_prefixed_ids() {
        let mut table = SessionTable::new(SessionKind::Client);
        let a = table.arrive(());
        let b = table.arrive(());
        assert_eq!(a.as_str(), "C0");
        assert_eq!(b.as_str(), "C1");
    }

    #[test]
    fn mark_returns_false_for_unknown_session() {
        let mut table: SessionTable<()> = SessionTable::new(SessionKind::Agent);
        assert!(!table.mark(&SessionId::new(SessionKind::Agent, 9)));
    }

    #[test]
    fn depart_removes_the_session() {
        let mut table = SessionTable::new(SessionKind::Client);
        let id = table.arrive(());
        assert!(table.depart(&id).is_some());
        assert!(!table.contains(&id));
    }
}
