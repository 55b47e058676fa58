//! # Game Client Library
//!
//! Client for the base-building game. The [`sync::SyncManager`] keeps the
//! locally believed copy of the player's base: it applies optimistic
//! predictions for cheap-to-predict mutations (construction, harvesting)
//! using the exact rules the server enforces, and reconciles the
//! authoritative push events the server fans out after every commit.
//!
//! The [`network::Client`] owns the UDP session: connect handshake, channel
//! subscriptions, request/response correlation, keepalive pings and a small
//! command prompt standing in for the rendering layer, which is out of
//! scope here.

pub mod network;
pub mod sync;
