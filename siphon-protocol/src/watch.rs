use serde::{Deserialize, Serialize};

/// Explicit sum-typed watch event, per the §9 redesign note ("model
/// explicit Start/Update/End events rather than bare slices"). The
/// Session Manager's watch streams still carry full snapshots (not
/// deltas) inside `Update`; this type only makes the stream's lifecycle
/// explicit instead of inferring it from a closed channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchEvent<T> {
    /// The subscriber has attached; `snapshot` is the current state at
    /// subscription time.
    Start { snapshot: T },
    /// State has changed; `snapshot` is the new full state.
    Update { snapshot: T },
    /// The watch will not yield further events (session departed, or the
    /// manager is shutting down).
    End,
}

impl<T> WatchEvent<T> {
    pub fn snapshot(&self) -> Option<&T> {
        match self {
            WatchEvent::Start { snapshot } | WatchEvent::Update { snapshot } => Some(snapshot),
            WatchEvent::End => None,
        }
    }
}
