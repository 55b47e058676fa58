//! # Game Server Library
//!
//! Authoritative server for the base-building game. It owns the canonical
//! record of every player's base, validates each mutation against the shared
//! rules engine, persists changes atomically and pushes incremental update
//! events to every session subscribed to the affected user's channels.
//!
//! ## Architecture
//!
//! A single main loop (see [`network::Server::run`]) processes all inbound
//! packets sequentially, so every state-changing call on a base is
//! serialized. Within the loop the [`store::BaseStore`] wraps each mutation
//! in a per-base transaction that re-validates invariants at commit time:
//! the affordability or placement check a request passed on its way in is
//! not trusted at the moment it commits, because another session of the
//! same user may have spent the resources or occupied the cells in between.
//!
//! Events fan out through the [`broadcaster::EventBroadcaster`] on per-user
//! channels strictly after the commit succeeds. Rejected requests re-publish
//! the unchanged base so the caller's optimistically updated client state
//! corrects itself without an explicit error channel.
//!
//! ## Module Organization
//!
//! - [`session_manager`]: who is speaking from which address, admin flags,
//!   timeout sweeping
//! - [`store`]: authoritative base records and their atomic mutations
//! - [`broadcaster`]: per-user publish/subscribe fan-out
//! - [`network`]: UDP plumbing and the main loop

pub mod broadcaster;
pub mod network;
pub mod session_manager;
pub mod store;
