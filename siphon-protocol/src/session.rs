use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of a Session Manager participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionKind {
    Client,
    Agent,
}

impl SessionKind {
    fn prefix(&self) -> char {
        match self {
            SessionKind::Client => 'C',
            SessionKind::Agent => 'A',
        }
    }
}

/// A session id of the form `C<n>` (clients) or `A<n>` (agents), `n`
/// monotonic per-kind. The prefix lets a log line or error message name a
/// session's kind without an extra lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("`{0}` is not a valid session id")]
pub struct InvalidSessionId(String);

impl SessionId {
    pub fn new(kind: SessionKind, n: u64) -> Self {
        SessionId(format!("{}{}", kind.prefix(), n))
    }

    pub fn kind(&self) -> SessionKind {
        if self.0.starts_with('A') {
            SessionKind::Agent
        } else {
            SessionKind::Client
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for SessionId {
    type Err = InvalidSessionId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ok = match s.as_bytes().first() {
            Some(b'C') | Some(b'A') => s[1..].chars().all(|c| c.is_ascii_digit()) && s.len() > 1,
            _ => false,
        };
        if ok {
            Ok(SessionId(s.to_string()))
        } else {
            Err(InvalidSessionId(s.to_string()))
        }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Presence record for one connected client or agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub kind: SessionKind,
    pub arrived_at_millis: u64,
    pub last_marked_at_millis: u64,
}

/// Information an agent reports on arrival: its identity and the
/// mechanisms it supports, used by the compatibility check in §4.4.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
    pub namespace: String,
    pub product: String,
    pub version: semver::Version,
    pub mechanisms: Vec<String>,
}

/// Information a client reports on arrival.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub user: String,
    pub hostname: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_kind_prefix() {
        assert_eq!(SessionId::new(SessionKind::Client, 3).as_str(), "C3");
        assert_eq!(SessionId::new(SessionKind::Agent, 12).as_str(), "A12");
    }

    #[test]
    fn kind_round_trips_through_parsing() {
        let id: SessionId = "A7".parse().unwrap();
        assert_eq!(id.kind(), SessionKind::Agent);
        let id: SessionId = "C7".parse().unwrap();
        assert_eq!(id.kind(), SessionKind::Client);
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!("X7".parse::<SessionId>().is_err());
        assert!("C".parse::<SessionId>().is_err());
        assert!("Cabc".parse::<SessionId>().is_err());
    }
}
