//! Envelope types for the relay protocol.
//!
//! An envelope is the single message unit exchanged between clients and the
//! router: chat text, login/join announcements, and presence updates all
//! travel as envelopes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The identity the router speaks as when it synthesizes envelopes.
pub const SERVER_IDENTITY: &str = "Server";

/// Envelope validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The envelope carries no sender identity.
    #[error("Envelope missing sender identity")]
    MissingFrom,
}

/// The command carried by an envelope.
///
/// The named variants form the closed set the router understands. Any other
/// command string is preserved verbatim in [`Kind::Other`] and forwarded
/// unchanged, so newer peers can introduce commands without being rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Kind {
    /// Public chat message, broadcast to everyone online.
    Chat,
    /// Direct message addressed to a single identity.
    PrivateChat,
    /// Identity binding request (socket clients).
    Login,
    /// Identity binding request / join announcement (room clients).
    Join,
    /// Server-derived snapshot of the online identity list.
    UserListUpdate,
    /// Informational notice from the server.
    ServerInfo,
    /// Unrecognized command, carried through untouched.
    Other(String),
}

impl Kind {
    /// Get the wire string for this kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Kind::Chat => "CHAT",
            Kind::PrivateChat => "PRIVATE_CHAT",
            Kind::Login => "LOGIN",
            Kind::Join => "JOIN",
            Kind::UserListUpdate => "USER_LIST_UPDATE",
            Kind::ServerInfo => "SERVER_INFO",
            Kind::Other(s) => s,
        }
    }

    /// Whether this kind binds an identity to the sending connection.
    #[must_use]
    pub fn is_identity_binding(&self) -> bool {
        matches!(self, Kind::Login | Kind::Join)
    }
}

impl From<String> for Kind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "CHAT" => Kind::Chat,
            "PRIVATE_CHAT" => Kind::PrivateChat,
            "LOGIN" => Kind::Login,
            "JOIN" => Kind::Join,
            "USER_LIST_UPDATE" => Kind::UserListUpdate,
            "SERVER_INFO" => Kind::ServerInfo,
            _ => Kind::Other(s),
        }
    }
}

impl From<Kind> for String {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Other(s) => s,
            named => named.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One routed message unit.
///
/// `to == None` means broadcast scope; a named `to` means direct scope.
/// The `private` flag is redundant with `kind` and every constructor keeps
/// the invariant `private == (kind == PRIVATE_CHAT)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Sender identity. Required and non-empty on every inbound envelope.
    pub from: String,

    /// Recipient identity, absent for broadcast scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    /// Text payload. May be empty (JOIN announcements carry none).
    #[serde(default)]
    pub content: String,

    /// Direct-message marker, mirrors `kind == PRIVATE_CHAT`.
    #[serde(rename = "isPrivate")]
    pub private: bool,

    /// Command discriminator.
    #[serde(rename = "command")]
    pub kind: Kind,
}

impl Envelope {
    /// Create an envelope with an explicit kind and scope.
    ///
    /// The `private` flag is derived from `kind`, not taken from the caller.
    #[must_use]
    pub fn new(
        from: impl Into<String>,
        to: Option<String>,
        content: impl Into<String>,
        kind: Kind,
    ) -> Self {
        let private = kind == Kind::PrivateChat;
        Self {
            from: from.into(),
            to,
            content: content.into(),
            private,
            kind,
        }
    }

    /// Create a broadcast chat envelope.
    #[must_use]
    pub fn chat(from: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(from, None, content, Kind::Chat)
    }

    /// Create a direct message envelope.
    #[must_use]
    pub fn private_chat(
        from: impl Into<String>,
        to: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(from, Some(to.into()), content, Kind::PrivateChat)
    }

    /// Create a login envelope binding `from` to the sending connection.
    #[must_use]
    pub fn login(from: impl Into<String>) -> Self {
        Self::new(from, None, "", Kind::Login)
    }

    /// Create a join announcement (empty content, broadcast scope).
    #[must_use]
    pub fn join(from: impl Into<String>) -> Self {
        Self::new(from, None, "", Kind::Join)
    }

    /// Create a user-list update from the server identity.
    #[must_use]
    pub fn user_list_update(content: impl Into<String>) -> Self {
        Self::new(SERVER_IDENTITY, None, content, Kind::UserListUpdate)
    }

    /// Create a server notice addressed to one identity.
    #[must_use]
    pub fn server_info(to: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(SERVER_IDENTITY, Some(to.into()), content, Kind::ServerInfo)
    }

    /// Whether this envelope targets broadcast scope.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.to.is_none()
    }

    /// Force the redundant direct-message flag to agree with `kind`.
    ///
    /// Peers control the flag on the wire; the decode path calls this so
    /// that a contradictory flag never travels past the protocol boundary.
    pub fn normalize(&mut self) {
        self.private = self.kind == Kind::PrivateChat;
    }

    /// Validate the envelope shape.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::MissingFrom`] if the sender identity is
    /// empty. An envelope without a sender is a protocol violation and the
    /// offending connection must be closed, not forwarded.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.from.is_empty() {
            return Err(EnvelopeError::MissingFrom);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for (kind, wire) in [
            (Kind::Chat, "CHAT"),
            (Kind::PrivateChat, "PRIVATE_CHAT"),
            (Kind::Login, "LOGIN"),
            (Kind::Join, "JOIN"),
            (Kind::UserListUpdate, "USER_LIST_UPDATE"),
            (Kind::ServerInfo, "SERVER_INFO"),
        ] {
            assert_eq!(kind.as_str(), wire);
            assert_eq!(Kind::from(wire.to_string()), kind);
        }
    }

    #[test]
    fn test_unknown_kind_preserved() {
        let kind = Kind::from("TYPING_INDICATOR".to_string());
        assert_eq!(kind, Kind::Other("TYPING_INDICATOR".to_string()));
        assert_eq!(String::from(kind), "TYPING_INDICATOR");
    }

    #[test]
    fn test_private_flag_tracks_kind() {
        let dm = Envelope::private_chat("alice", "bob", "hi");
        assert!(dm.private);
        assert_eq!(dm.kind, Kind::PrivateChat);

        let chat = Envelope::chat("alice", "hello");
        assert!(!chat.private);

        // Generic constructor derives the flag too.
        let forced = Envelope::new("alice", Some("bob".into()), "hi", Kind::Chat);
        assert!(!forced.private);
    }

    #[test]
    fn test_normalize_forces_flag_to_kind() {
        let mut chat = Envelope::chat("alice", "hello");
        chat.private = true;
        chat.normalize();
        assert!(!chat.private);

        let mut dm = Envelope::private_chat("alice", "bob", "psst");
        dm.private = false;
        dm.normalize();
        assert!(dm.private);
    }

    #[test]
    fn test_scope() {
        assert!(Envelope::chat("alice", "x").is_broadcast());
        assert!(!Envelope::private_chat("alice", "bob", "x").is_broadcast());
        assert!(Envelope::join("alice").is_broadcast());
    }

    #[test]
    fn test_validate_missing_from() {
        let mut env = Envelope::chat("alice", "hello");
        assert!(env.validate().is_ok());

        env.from.clear();
        assert_eq!(env.validate(), Err(EnvelopeError::MissingFrom));
    }

    #[test]
    fn test_user_list_update_is_from_server() {
        let env = Envelope::user_list_update("alice,bob");
        assert_eq!(env.from, SERVER_IDENTITY);
        assert!(env.is_broadcast());
        assert_eq!(env.kind, Kind::UserListUpdate);
    }
}
