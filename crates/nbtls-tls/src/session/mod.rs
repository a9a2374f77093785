//! Session sharing and resumption.
//!
//! Connections to the same server name, validated against the same trust
//! root and authenticating with the same client key share one [`Session`].
//! The session caches what resumption needs (session id, ticket, master
//! secret) and orders its member connections so that only one of them is
//! negotiating with the server at a time.
//!
//! The [`SessionRegistry`] only holds weak references: a session lives as
//! long as the longest-lived connection using it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use log::debug;

use crate::config::PrivateKey;
use crate::crypt::key_schedule::MasterSecret;
use crate::validator::TrustRoot;

/// Identity of a member connection within its session.
pub type MemberId = u64;

static NEXT_MEMBER_ID: AtomicU64 = AtomicU64::new(1);

/// Lookup key: server name plus the identities of the trust root and the
/// client key. Identities are pointer-based, so two equal trust roots held
/// in different `Arc`s give different sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    name: String,
    trust_root: usize,
    client_key: usize,
}

impl SessionKey {
    fn new(name: &str, trust_root: &Arc<TrustRoot>, client_key: Option<&Arc<PrivateKey>>) -> Self {
        Self {
            name: name.to_string(),
            trust_root: Arc::as_ptr(trust_root) as usize,
            client_key: client_key.map_or(0, |k| Arc::as_ptr(k) as usize),
        }
    }
}

/// State cached for resumption.
#[derive(Debug, Clone, Default)]
pub struct CachedSession {
    /// Session id to offer; empty when nothing is cached.
    pub id: Vec<u8>,
    /// Session ticket to offer; empty when none.
    pub ticket: Vec<u8>,
    pub master_secret: Option<MasterSecret>,
}

impl CachedSession {
    /// Whether a later handshake can attempt resumption.
    pub fn is_resumable(&self) -> bool {
        !self.id.is_empty() && self.master_secret.is_some()
    }
}

#[derive(Debug)]
struct Member {
    id: MemberId,
    server_pending: bool,
}

#[derive(Debug, Default)]
struct SessionState {
    cached: CachedSession,
    members: Vec<Member>,
}

type SessionMap = Mutex<HashMap<SessionKey, Weak<Session>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A trust context shared by every connection that targets it.
#[derive(Debug)]
pub struct Session {
    key: SessionKey,
    registry: Weak<SessionMap>,
    state: Mutex<SessionState>,
}

impl Session {
    /// Server name this session belongs to.
    pub fn name(&self) -> &str {
        &self.key.name
    }

    /// Snapshot of the resumption state.
    pub fn cached(&self) -> CachedSession {
        lock(&self.state).cached.clone()
    }

    /// Add a connection at the tail of the member list.
    pub fn join(&self) -> MemberId {
        let id = NEXT_MEMBER_ID.fetch_add(1, Ordering::Relaxed);
        lock(&self.state).members.push(Member {
            id,
            server_pending: false,
        });
        id
    }

    /// Remove a connection. Later members may then proceed.
    pub fn leave(&self, id: MemberId) {
        lock(&self.state).members.retain(|m| m.id != id);
    }

    /// Number of live member connections.
    pub fn member_count(&self) -> usize {
        lock(&self.state).members.len()
    }

    /// Record whether the member still awaits the server's Finished.
    pub fn set_server_pending(&self, id: MemberId, pending: bool) {
        if let Some(m) = lock(&self.state).members.iter_mut().find(|m| m.id == id) {
            m.server_pending = pending;
        }
    }

    /// A member may send its ClientHello once no member ahead of it in the
    /// list is still negotiating with the server.
    pub fn may_send_client_hello(&self, id: MemberId) -> bool {
        let state = lock(&self.state);
        for m in &state.members {
            if m.id == id {
                return true;
            }
            if m.server_pending {
                return false;
            }
        }
        // Not a member (already closed): nothing to wait for.
        true
    }

    /// Store the outcome of a verified negotiation and move the member to
    /// the tail of the list.
    ///
    /// An empty `id` or absent `ticket` leaves the cached value unchanged.
    pub fn record(
        &self,
        member: MemberId,
        id: &[u8],
        ticket: Option<Vec<u8>>,
        master_secret: &MasterSecret,
    ) {
        let mut state = self.state_mut();
        if !id.is_empty() || ticket.is_some() {
            state.cached.master_secret = Some(master_secret.clone());
        }
        if !id.is_empty() {
            state.cached.id = id.to_vec();
        }
        if let Some(ticket) = ticket {
            state.cached.ticket = ticket;
        }
        if let Some(pos) = state.members.iter().position(|m| m.id == member) {
            let m = state.members.remove(pos);
            state.members.push(m);
        }
        debug!(
            "session {}: cached id of {} bytes, ticket of {} bytes",
            self.key.name,
            state.cached.id.len(),
            state.cached.ticket.len()
        );
    }

    fn state_mut(&self) -> MutexGuard<'_, SessionState> {
        lock(&self.state)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut map = lock(&registry);
        // A replacement session may already occupy the slot.
        if map.get(&self.key).is_some_and(|w| w.strong_count() == 0) {
            map.remove(&self.key);
            debug!("session {}: released", self.key.name);
        }
    }
}

/// Find-or-create registry of live sessions.
#[derive(Debug, Default, Clone)]
pub struct SessionRegistry {
    sessions: Arc<SessionMap>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live session for this context, creating it if needed.
    pub fn session(
        &self,
        name: &str,
        trust_root: &Arc<TrustRoot>,
        client_key: Option<&Arc<PrivateKey>>,
    ) -> Arc<Session> {
        let key = SessionKey::new(name, trust_root, client_key);
        let mut map = lock(&self.sessions);
        if let Some(session) = map.get(&key).and_then(Weak::upgrade) {
            debug!("session {name}: joining");
            return session;
        }
        let session = Arc::new(Session {
            key: key.clone(),
            registry: Arc::downgrade(&self.sessions),
            state: Mutex::new(SessionState::default()),
        });
        map.insert(key, Arc::downgrade(&session));
        debug!("session {name}: created");
        session
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        lock(&self.sessions)
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
