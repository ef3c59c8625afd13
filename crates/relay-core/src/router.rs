//! Message routing engine for relay.
//!
//! The router is the single serialization point for every registry
//! mutation: the [`IdentityRegistry`] lives behind one mutex, and every
//! bind, unbind, and snapshot read used to build a fan-out happens inside
//! one critical section. Dispatch to individual connections happens after
//! the lock is released, through non-blocking bounded queues, so a slow
//! connection can never stall the registry path.

use crate::connection::ConnectionHandle;
use crate::connection::ConnectionId;
use crate::presence;
use crate::registry::{IdentityRegistry, PresenceChange, RegistryError};
use relay_protocol::{Envelope, Kind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Router errors.
///
/// These are local to the offending connection: the caller closes that
/// connection and the router carries on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    /// The connection tried to bind a second, different identity.
    #[error("Connection already bound to '{bound}', cannot rebind to '{requested}'")]
    AlreadyBound {
        /// Identity currently bound to the connection.
        bound: String,
        /// Identity the rebind attempted to use.
        requested: String,
    },

    /// The envelope carries no sender identity.
    #[error("Envelope missing sender identity")]
    MissingFrom,
}

impl From<RegistryError> for RouterError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::AlreadyBound { bound, requested } => {
                RouterError::AlreadyBound { bound, requested }
            }
        }
    }
}

/// Router statistics.
#[derive(Debug, Clone)]
pub struct RouterStats {
    /// Number of online identities.
    pub online_identities: usize,
    /// Number of bound connections.
    pub bound_connections: usize,
}

/// The central message router.
///
/// Consumes inbound envelopes, classifies them (identity binding, broadcast
/// chat, direct message, passthrough), and dispatches via the identity
/// registry. Presence envelopes are synthesized here after every mutation
/// that changes the online set.
#[derive(Debug, Default)]
pub struct Router {
    registry: Mutex<IdentityRegistry>,
}

impl Router {
    /// Create a new router with an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, IdentityRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get router statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        let registry = self.registry();
        RouterStats {
            online_identities: registry.online_count(),
            bound_connections: registry.connection_count(),
        }
    }

    /// Snapshot of currently online identities.
    #[must_use]
    pub fn identities(&self) -> Vec<String> {
        self.registry().identities()
    }

    /// Install the close hook on a freshly accepted connection.
    ///
    /// The hook unbinds the connection from the registry as soon as it
    /// closes, whatever the cause, and broadcasts the updated user list if
    /// the identity went fully offline. Call this once at accept time,
    /// before the connection's first envelope is routed.
    pub fn attach(self: &Arc<Self>, connection: &Arc<ConnectionHandle>) {
        let router = Arc::clone(self);
        let connection_id = connection.id();
        connection.on_close(move || router.handle_close(connection_id));
    }

    /// Route one inbound envelope from a connection.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::MissingFrom`] for an envelope without a
    /// sender and [`RouterError::AlreadyBound`] for a rebind attempt with a
    /// different identity. In both cases the caller should close the
    /// connection; routing errors never affect other connections.
    pub fn inbound(
        &self,
        connection: &Arc<ConnectionHandle>,
        envelope: Envelope,
    ) -> Result<(), RouterError> {
        if envelope.from.is_empty() {
            return Err(RouterError::MissingFrom);
        }

        trace!(
            connection = %connection.id(),
            kind = %envelope.kind,
            to = envelope.to.as_deref().unwrap_or("<broadcast>"),
            "Routing envelope"
        );

        match envelope.kind.clone() {
            Kind::Login | Kind::Join => self.handle_identity_binding(connection, envelope),
            Kind::PrivateChat => {
                self.handle_private_chat(envelope);
                Ok(())
            }
            Kind::Chat => {
                self.broadcast(envelope);
                Ok(())
            }
            // Forward-compatible passthrough: unknown or server-originated
            // kinds are delivered unchanged to their addressed scope.
            _ => {
                match envelope.to.clone() {
                    Some(recipient) => self.forward_to(&recipient, envelope),
                    None => self.broadcast(envelope),
                }
                Ok(())
            }
        }
    }

    /// `LOGIN` / `JOIN`: bind the identity, then announce.
    ///
    /// The post-bind snapshot is read once; the new connection receives the
    /// user list directly, everyone (new identity included) receives a
    /// fresh list broadcast, then the join announcement goes out.
    fn handle_identity_binding(
        &self,
        connection: &Arc<ConnectionHandle>,
        envelope: Envelope,
    ) -> Result<(), RouterError> {
        let identity = envelope.from;

        let (snapshot, everyone) = {
            let mut registry = self.registry();
            registry.bind(connection, &identity)?;
            // The close hook is one-shot; a connection that closed before
            // this bind has already fired it and nothing would ever unbind
            // the entry. Undo the bind while still holding the lock. A
            // close that starts after this check still unbinds via its
            // hook.
            if !connection.is_open() {
                registry.unbind(connection.id());
                debug!(
                    identity = %identity,
                    connection = %connection.id(),
                    "Bind raced with close, dropped"
                );
                return Ok(());
            }
            (registry.identities(), registry.all_connections())
        };

        debug!(identity = %identity, connection = %connection.id(), "Identity joined");

        let user_list = presence::user_list_update(&snapshot);
        self.deliver_one(connection, user_list.clone());
        self.deliver_all(&everyone, user_list);
        self.deliver_all(&everyone, presence::join_announcement(&identity));

        Ok(())
    }

    /// `PRIVATE_CHAT`: deliver to every session of the recipient and echo
    /// to every session of the sender.
    ///
    /// An offline recipient is a silent drop, not an error. When sender and
    /// recipient coincide each session gets exactly one copy.
    fn handle_private_chat(&self, mut envelope: Envelope) {
        let Some(recipient) = envelope.to.clone() else {
            trace!(from = %envelope.from, "Direct message without recipient, dropping");
            return;
        };

        envelope.kind = Kind::PrivateChat;
        envelope.private = true;

        let (targets, recipient_online) = {
            let registry = self.registry();
            let mut targets = registry.connections_for(&recipient);
            let recipient_online = !targets.is_empty();
            if recipient != envelope.from {
                targets.extend(registry.connections_for(&envelope.from));
            }
            (targets, recipient_online)
        };

        if !recipient_online {
            trace!(
                from = %envelope.from,
                to = %recipient,
                "Recipient offline, dropping direct message"
            );
        }

        self.deliver_all(&targets, envelope);
    }

    /// Deliver an envelope to every connection of every online identity.
    fn broadcast(&self, envelope: Envelope) {
        let everyone = self.registry().all_connections();
        trace!(kind = %envelope.kind, recipients = everyone.len(), "Broadcast");
        self.deliver_all(&everyone, envelope);
    }

    /// Deliver an envelope to every connection of one identity.
    fn forward_to(&self, recipient: &str, envelope: Envelope) {
        let connections = self.registry().connections_for(recipient);
        self.deliver_all(&connections, envelope);
    }

    /// Connection closed: unbind, and if the identity went fully offline
    /// broadcast the updated user list to everyone still online.
    fn handle_close(&self, connection_id: ConnectionId) {
        let (change, snapshot, remaining) = {
            let mut registry = self.registry();
            let change = registry.unbind(connection_id);
            (change, registry.identities(), registry.all_connections())
        };

        if let PresenceChange::Offline(identity) = change {
            debug!(identity = %identity, connection = %connection_id, "Identity went offline");
            self.deliver_all(&remaining, presence::user_list_update(&snapshot));
        }
    }

    fn deliver_all(&self, connections: &[Arc<ConnectionHandle>], envelope: Envelope) {
        for connection in connections {
            self.deliver_one(connection, envelope.clone());
        }
    }

    /// Queue one envelope on one connection.
    ///
    /// A failed send is isolated: the connection is scheduled for close
    /// (which unbinds it through its close hook) and the fan-out continues
    /// with the remaining recipients.
    fn deliver_one(&self, connection: &Arc<ConnectionHandle>, envelope: Envelope) {
        if let Err(err) = connection.try_send(envelope) {
            warn!(
                connection = %connection.id(),
                error = %err,
                "Send failed, scheduling connection close"
            );
            connection.close();
        }
    }
}
