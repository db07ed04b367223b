//! Live presence set for one platform.
//!
//! Adapter event loops write joins and leaves as they arrive; the orchestrator and the
//! snapshot publisher read from other tasks. Periodic reconciliation against a full
//! platform snapshot repairs whatever missed events left behind.

use crate::platform::Platform;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

/// One present user as reported by a platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    /// Stable platform identifier
    pub user_id: String,
    /// Display name at the time of the event
    pub name: String,
    /// Ephemeral connection id, when the platform has one
    pub session_id: Option<String>,
}

impl PresenceEntry {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Users added and removed by a reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl ReconcileDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Point-in-time copy of the presence set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceSnapshot {
    /// User id to display name, ordered by id
    pub users: BTreeMap<String, String>,
}

impl PresenceSnapshot {
    pub fn ids(&self) -> Vec<String> {
        self.users.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[derive(Debug, Default)]
struct PresenceState {
    /// user id -> display name
    users: HashMap<String, String>,
    /// connection id -> user id
    sessions: HashMap<String, String>,
}

impl PresenceState {
    fn has_other_session(&self, user_id: &str) -> bool {
        self.sessions.values().any(|id| id == user_id)
    }
}

/// Thread-safe presence set, cheap to clone.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    platform: Platform,
    state: Arc<RwLock<PresenceState>>,
}

impl PresenceTracker {
    /// Create an empty tracker.
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            state: Arc::new(RwLock::new(PresenceState::default())),
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Record a join. Returns true when the user was not present before.
    pub fn join(&self, entry: PresenceEntry) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(session_id) = entry.session_id {
            state.sessions.insert(session_id, entry.user_id.clone());
        }
        let added = state.users.insert(entry.user_id.clone(), entry.name).is_none();

        if added {
            tracing::debug!("{} presence: {} joined", self.platform, entry.user_id);
        }
        added
    }

    /// Record a leave by connection id.
    ///
    /// Unknown connection ids are ignored. The user stays present while another of their
    /// connections is still open. Returns the user id if it left the set.
    pub fn leave_session(&self, session_id: &str) -> Option<String> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        let user_id = state.sessions.remove(session_id)?;
        if state.has_other_session(&user_id) {
            return None;
        }
        state.users.remove(&user_id)?;

        tracing::debug!("{} presence: {} left", self.platform, user_id);
        Some(user_id)
    }

    /// Record a leave by user id, dropping all of the user's connections.
    pub fn leave(&self, user_id: &str) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        state.sessions.retain(|_, id| id != user_id);
        let removed = state.users.remove(user_id).is_some();

        if removed {
            tracing::debug!("{} presence: {} left", self.platform, user_id);
        }
        removed
    }

    /// Replace the tracked set with an authoritative full snapshot.
    ///
    /// Users missing from the snapshot are removed, users only in the snapshot are
    /// added and names are refreshed. Reconciling twice with the same snapshot yields an
    /// empty second diff.
    pub fn reconcile(&self, snapshot: Vec<PresenceEntry>) -> ReconcileDiff {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        let mut users = HashMap::with_capacity(snapshot.len());
        let mut sessions = HashMap::new();
        for entry in snapshot {
            if let Some(session_id) = entry.session_id {
                sessions.insert(session_id, entry.user_id.clone());
            }
            users.insert(entry.user_id, entry.name);
        }

        let mut diff = ReconcileDiff {
            added: users
                .keys()
                .filter(|id| !state.users.contains_key(*id))
                .cloned()
                .collect(),
            removed: state
                .users
                .keys()
                .filter(|id| !users.contains_key(*id))
                .cloned()
                .collect(),
        };
        diff.added.sort();
        diff.removed.sort();

        state.users = users;
        state.sessions = sessions;

        if !diff.is_empty() {
            tracing::info!(
                "{} presence reconciled: +{} -{}",
                self.platform,
                diff.added.len(),
                diff.removed.len()
            );
        }
        diff
    }

    /// Copy of the current set.
    pub fn snapshot(&self) -> PresenceSnapshot {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        PresenceSnapshot {
            users: state
                .users
                .iter()
                .map(|(id, name)| (id.clone(), name.clone()))
                .collect(),
        }
    }

    /// Present user ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<String> = state.users.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// User id behind a connection id.
    pub fn user_for_session(&self, session_id: &str) -> Option<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.sessions.get(session_id).cloned()
    }

    pub fn contains(&self, user_id: &str) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.users.contains_key(user_id)
    }

    pub fn len(&self) -> usize {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
