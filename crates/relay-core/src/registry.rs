//! Identity registry for the relay router.
//!
//! Maps each online identity to its set of live connections. An identity
//! may hold several connections at once (multiple tabs or devices); it
//! appears in the registry exactly while it has at least one open
//! connection. The registry itself is a plain struct with a single owner:
//! the [`Router`](crate::router::Router) keeps it behind one mutex so that
//! bind, unbind, and snapshot reads are linearizable.

use crate::connection::{ConnectionHandle, ConnectionId};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Registry errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The connection already carries a different identity. A connection
    /// must close and reconnect to change identity.
    #[error("Connection already bound to '{bound}', cannot rebind to '{requested}'")]
    AlreadyBound {
        /// Identity currently bound to the connection.
        bound: String,
        /// Identity the rebind attempted to use.
        requested: String,
    },
}

/// Presence transition produced by a registry mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceChange {
    /// The identity gained its first connection.
    Online(String),
    /// The identity lost its last connection.
    Offline(String),
    /// The online set did not change.
    Unchanged,
}

/// Mapping from identity to its live connection set.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    /// Identity -> open connections carrying it.
    sessions: HashMap<String, Vec<Arc<ConnectionHandle>>>,
    /// Reverse index: which identity a connection is bound to.
    bound: HashMap<ConnectionId, String>,
}

impl IdentityRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `identity` with `connection`.
    ///
    /// Binding the same connection to the same identity again is an
    /// idempotent no-op. Binding a second distinct connection to an
    /// already-online identity grows the connection set without a presence
    /// event.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyBound`] if this connection already
    /// carries a different identity.
    pub fn bind(
        &mut self,
        connection: &Arc<ConnectionHandle>,
        identity: &str,
    ) -> Result<PresenceChange, RegistryError> {
        match self.bound.get(&connection.id()) {
            Some(existing) if existing == identity => return Ok(PresenceChange::Unchanged),
            Some(existing) => {
                return Err(RegistryError::AlreadyBound {
                    bound: existing.clone(),
                    requested: identity.to_string(),
                })
            }
            None => {}
        }

        self.bound.insert(connection.id(), identity.to_string());
        let connections = self.sessions.entry(identity.to_string()).or_default();
        let first = connections.is_empty();
        connections.push(Arc::clone(connection));

        debug!(
            identity = %identity,
            connection = %connection.id(),
            sessions = connections.len(),
            "Identity bound"
        );

        if first {
            Ok(PresenceChange::Online(identity.to_string()))
        } else {
            Ok(PresenceChange::Unchanged)
        }
    }

    /// Remove a connection from its identity's set.
    ///
    /// No-op if the connection was never bound. Empty connection sets are
    /// removed eagerly so the online view never shows a ghost identity.
    pub fn unbind(&mut self, connection_id: ConnectionId) -> PresenceChange {
        let Some(identity) = self.bound.remove(&connection_id) else {
            return PresenceChange::Unchanged;
        };

        let mut last = false;
        if let Some(connections) = self.sessions.get_mut(&identity) {
            connections.retain(|c| c.id() != connection_id);
            if connections.is_empty() {
                self.sessions.remove(&identity);
                last = true;
            }
        }

        debug!(
            identity = %identity,
            connection = %connection_id,
            offline = last,
            "Identity unbound"
        );

        if last {
            PresenceChange::Offline(identity)
        } else {
            PresenceChange::Unchanged
        }
    }

    /// Get the identity a connection is bound to, if any.
    #[must_use]
    pub fn identity_of(&self, connection_id: ConnectionId) -> Option<&str> {
        self.bound.get(&connection_id).map(String::as_str)
    }

    /// Get the live connection set for an identity. Empty if unknown.
    #[must_use]
    pub fn connections_for(&self, identity: &str) -> Vec<Arc<ConnectionHandle>> {
        self.sessions.get(identity).cloned().unwrap_or_default()
    }

    /// Snapshot of every open connection across all identities.
    ///
    /// A connection is bound to at most one identity, so each appears once.
    #[must_use]
    pub fn all_connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.sessions.values().flatten().cloned().collect()
    }

    /// Snapshot of currently online identities.
    #[must_use]
    pub fn identities(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    /// Check whether an identity has at least one open connection.
    #[must_use]
    pub fn is_online(&self, identity: &str) -> bool {
        self.sessions.contains_key(identity)
    }

    /// Number of online identities.
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of bound connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.bound.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Arc<ConnectionHandle> {
        ConnectionHandle::new(8).0
    }

    /// The online set must equal exactly the identities with >= 1 open
    /// connection, after every mutation.
    fn assert_consistent(registry: &IdentityRegistry) {
        for identity in registry.identities() {
            assert!(!registry.connections_for(&identity).is_empty());
        }
        assert_eq!(
            registry.connection_count(),
            registry
                .identities()
                .iter()
                .map(|i| registry.connections_for(i).len())
                .sum::<usize>()
        );
    }

    #[test]
    fn test_bind_first_connection_goes_online() {
        let mut registry = IdentityRegistry::new();
        let c1 = conn();

        let change = registry.bind(&c1, "alice").unwrap();
        assert_eq!(change, PresenceChange::Online("alice".to_string()));
        assert!(registry.is_online("alice"));
        assert_eq!(registry.connections_for("alice").len(), 1);
        assert_consistent(&registry);
    }

    #[test]
    fn test_rebind_same_identity_is_idempotent() {
        let mut registry = IdentityRegistry::new();
        let c1 = conn();

        registry.bind(&c1, "alice").unwrap();
        let repeat = registry.bind(&c1, "alice").unwrap();

        assert_eq!(repeat, PresenceChange::Unchanged);
        assert_eq!(registry.connections_for("alice").len(), 1);
        assert_consistent(&registry);
    }

    #[test]
    fn test_rebind_different_identity_fails() {
        let mut registry = IdentityRegistry::new();
        let c1 = conn();

        registry.bind(&c1, "alice").unwrap();
        let err = registry.bind(&c1, "mallory").unwrap_err();

        assert_eq!(
            err,
            RegistryError::AlreadyBound {
                bound: "alice".to_string(),
                requested: "mallory".to_string(),
            }
        );
        // Original binding is untouched.
        assert_eq!(registry.identity_of(c1.id()), Some("alice"));
        assert_consistent(&registry);
    }

    #[test]
    fn test_second_connection_no_duplicate_online_event() {
        let mut registry = IdentityRegistry::new();
        let (c1, c2) = (conn(), conn());

        let first = registry.bind(&c1, "alice").unwrap();
        let second = registry.bind(&c2, "alice").unwrap();

        assert_eq!(first, PresenceChange::Online("alice".to_string()));
        assert_eq!(second, PresenceChange::Unchanged);
        assert_eq!(registry.connections_for("alice").len(), 2);
        assert_eq!(registry.online_count(), 1);
        assert_consistent(&registry);
    }

    #[test]
    fn test_unbind_last_connection_goes_offline() {
        let mut registry = IdentityRegistry::new();
        let c1 = conn();

        registry.bind(&c1, "carol").unwrap();
        let change = registry.unbind(c1.id());

        assert_eq!(change, PresenceChange::Offline("carol".to_string()));
        assert!(!registry.is_online("carol"));
        assert!(registry.connections_for("carol").is_empty());
        assert_consistent(&registry);
    }

    #[test]
    fn test_unbind_one_of_many_stays_online() {
        let mut registry = IdentityRegistry::new();
        let (c1, c2) = (conn(), conn());

        registry.bind(&c1, "alice").unwrap();
        registry.bind(&c2, "alice").unwrap();

        let change = registry.unbind(c1.id());
        assert_eq!(change, PresenceChange::Unchanged);
        assert!(registry.is_online("alice"));
        assert_eq!(registry.connections_for("alice").len(), 1);
        assert_eq!(registry.connections_for("alice")[0].id(), c2.id());
        assert_consistent(&registry);
    }

    #[test]
    fn test_unbind_unbound_connection_is_noop() {
        let mut registry = IdentityRegistry::new();
        let c1 = conn();

        assert_eq!(registry.unbind(c1.id()), PresenceChange::Unchanged);
        assert_consistent(&registry);
    }

    #[test]
    fn test_identities_snapshot_excludes_departed() {
        let mut registry = IdentityRegistry::new();
        let (c1, c2) = (conn(), conn());

        registry.bind(&c1, "alice").unwrap();
        registry.bind(&c2, "bob").unwrap();
        registry.unbind(c2.id());

        let identities = registry.identities();
        assert_eq!(identities, vec!["alice".to_string()]);
        assert_consistent(&registry);
    }

    #[test]
    fn test_all_connections_spans_identities() {
        let mut registry = IdentityRegistry::new();
        let (c1, c2, c3) = (conn(), conn(), conn());

        registry.bind(&c1, "alice").unwrap();
        registry.bind(&c2, "alice").unwrap();
        registry.bind(&c3, "bob").unwrap();

        assert_eq!(registry.all_connections().len(), 3);
        assert_eq!(registry.online_count(), 2);
    }
}
