//! Session lifecycle management for the game server
//!
//! This module handles the server-side management of connected sessions:
//! - Session lifecycle (connect, disconnect, timeout)
//! - Identity tracking: every session belongs to exactly one user, and a
//!   user may hold several sessions at once (two browser tabs both watching
//!   the same base)
//! - Admin flagging for the privileged resource-grant operation
//! - Connection health monitoring and automatic cleanup
//!
//! The session manager never touches base state itself; it only answers
//! "who is speaking from this address" so the store and broadcaster can be
//! addressed per user.

use crate::broadcaster::SubscriptionHandle;
use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// How long a session may stay silent before it is swept. Clients ping every
/// few seconds; base building is idle-heavy, so this is generous.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(30);

/// One connected client session bound to a user identity.
///
/// The subscription handles are held here so that every channel the session
/// subscribed to can be disposed of when it goes away; a session that
/// leaks its subscriptions would keep receiving fan-out work forever.
#[derive(Debug)]
pub struct Session {
    /// Unique session identifier assigned by the server
    pub id: u32,
    /// Network address for sending responses and pushed events
    pub addr: SocketAddr,
    /// The authenticated user this session acts as
    pub user_id: String,
    /// Whether this session may call admin-only operations
    pub is_admin: bool,
    /// Last time we received any packet from this session
    pub last_seen: Instant,
    /// Live channel subscriptions, disposed of on disconnect
    pub subscriptions: Vec<SubscriptionHandle>,
}

impl Session {
    pub fn new(id: u32, addr: SocketAddr, user_id: String, is_admin: bool) -> Self {
        Self {
            id,
            addr,
            user_id,
            is_admin,
            last_seen: Instant::now(),
            subscriptions: Vec::new(),
        }
    }

    /// Marks the session as recently active.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// True if no packets have arrived within `timeout`.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Tracks all connected sessions and enforces the capacity limit.
pub struct SessionManager {
    sessions: HashMap<u32, Session>,
    next_session_id: u32,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            next_session_id: 1,
            max_sessions,
        }
    }

    /// Attempts to register a new session for `user_id` speaking from
    /// `addr`. Returns `None` when the server is at capacity.
    pub fn add_session(&mut self, addr: SocketAddr, user_id: &str, is_admin: bool) -> Option<u32> {
        if self.sessions.len() >= self.max_sessions {
            return None;
        }

        let session_id = self.next_session_id;
        self.next_session_id += 1;

        info!(
            "Session {} connected from {} as user {}{}",
            session_id,
            addr,
            user_id,
            if is_admin { " (admin)" } else { "" }
        );
        self.sessions.insert(
            session_id,
            Session::new(session_id, addr, user_id.to_string(), is_admin),
        );

        Some(session_id)
    }

    /// Removes a session, returning it so the caller can dispose of its
    /// channel subscriptions. Returns `None` if it was already gone.
    pub fn remove_session(&mut self, session_id: u32) -> Option<Session> {
        let session = self.sessions.remove(&session_id);
        if let Some(session) = &session {
            info!("Session {} ({}) disconnected", session.id, session.user_id);
        }
        session
    }

    /// Finds the session currently speaking from `addr`.
    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.sessions
            .iter()
            .find(|(_, session)| session.addr == addr)
            .map(|(id, _)| *id)
    }

    pub fn get(&self, session_id: u32) -> Option<&Session> {
        self.sessions.get(&session_id)
    }

    pub fn get_mut(&mut self, session_id: u32) -> Option<&mut Session> {
        self.sessions.get_mut(&session_id)
    }

    /// Updates the activity timestamp of a session. Unknown ids are ignored.
    pub fn touch(&mut self, session_id: u32) {
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.touch();
        }
    }

    /// Session ids that have exceeded [`SESSION_TIMEOUT`]. The caller is
    /// responsible for removal, so cleanup (unsubscribing, notifying) stays
    /// in one place.
    pub fn timed_out_sessions(&self) -> Vec<u32> {
        self.sessions
            .iter()
            .filter(|(_, session)| session.is_timed_out(SESSION_TIMEOUT))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
