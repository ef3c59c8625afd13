//! # relay-core
//!
//! Connection-identity registry and message routing for the relay
//! group-chat router.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **ConnectionHandle** - One live session: bounded, non-blocking outbound queue
//! - **IdentityRegistry** - Identity -> connection-set mapping with presence invariants
//! - **Router** - Envelope classification and fan-out
//! - **presence** - Canonical user-list derivation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────────┐
//! │  Connection │────▶│   Router    │────▶│ IdentityRegistry │
//! └─────────────┘     └─────────────┘     └──────────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐
//!                     │  presence   │
//!                     └─────────────┘
//! ```
//!
//! The registry is the only shared mutable state and sits behind a single
//! lock inside the router; fan-out snapshots are taken once per logical
//! broadcast and dispatch happens outside the lock.

pub mod connection;
pub mod presence;
pub mod registry;
pub mod router;

pub use connection::{ConnectionHandle, ConnectionId, SendError};
pub use registry::{IdentityRegistry, PresenceChange, RegistryError};
pub use router::{Router, RouterError, RouterStats};
