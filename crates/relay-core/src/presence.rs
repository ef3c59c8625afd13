//! Presence derivation for the relay router.
//!
//! Pure functions from the registry's online snapshot to the canonical
//! envelopes the router broadcasts. No state lives here; the router invokes
//! these after every registry mutation that changes the online set.

use relay_protocol::Envelope;

pub use relay_protocol::SERVER_IDENTITY;

/// Build the canonical user-list envelope for an online snapshot.
///
/// Identities are sorted lexicographically before joining so the payload is
/// deterministic for a given snapshot regardless of map iteration order.
#[must_use]
pub fn user_list_update(identities: &[String]) -> Envelope {
    let mut names: Vec<&str> = identities.iter().map(String::as_str).collect();
    names.sort_unstable();
    Envelope::user_list_update(names.join(","))
}

/// Build the join announcement broadcast when an identity binds.
///
/// Content is empty; the announcement itself is the payload.
#[must_use]
pub fn join_announcement(identity: &str) -> Envelope {
    Envelope::join(identity)
}
