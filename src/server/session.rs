//! Session tracking
//!
//! Each accepted connection becomes a [`Session`] driven by one task.
//! The registry is the acceptor's view of its live sessions: insert on
//! start, reap on the cleanup tick once a session reaches `Closed`,
//! drain on shutdown. The mutex guards only map mutation, never I/O.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::trace;

use crate::cipher::CipherHandle;

/// Session lifecycle states. Advancement is monotonic; a session never
/// revisits an earlier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    Handshaking = 0,
    Connecting = 1,
    Relaying = 2,
    Closing = 3,
    Closed = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Handshaking,
            1 => SessionState::Connecting,
            2 => SessionState::Relaying,
            3 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

/// Client protocol flavor, known once the handshake classifies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    HttpConnect,
    HttpAbsolute,
    Socks5,
}

impl std::fmt::Display for Flavor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Flavor::HttpConnect => write!(f, "http-connect"),
            Flavor::HttpAbsolute => write!(f, "http-absolute"),
            Flavor::Socks5 => write!(f, "socks5"),
        }
    }
}

/// A live proxied connection.
pub struct Session {
    id: u64,
    peer: SocketAddr,
    created_at: Instant,
    flavor: OnceLock<Flavor>,
    state: AtomicU8,
    cipher: CipherHandle,
}

impl Session {
    fn new(id: u64, peer: SocketAddr, cipher: CipherHandle) -> Self {
        Self {
            id,
            peer,
            created_at: Instant::now(),
            flavor: OnceLock::new(),
            state: AtomicU8::new(SessionState::Handshaking as u8),
            cipher,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn cipher(&self) -> &CipherHandle {
        &self.cipher
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Advance to `next`; earlier states are never restored.
    pub fn advance(&self, next: SessionState) {
        self.state.fetch_max(next as u8, Ordering::AcqRel);
    }

    /// Record the protocol flavor; the first classification wins.
    pub fn set_flavor(&self, flavor: Flavor) {
        let _ = self.flavor.set(flavor);
    }

    pub fn flavor(&self) -> Option<Flavor> {
        self.flavor.get().copied()
    }
}

struct Entry {
    session: Arc<Session>,
    handle: JoinHandle<()>,
}

struct Inner {
    next_id: u64,
    sessions: HashMap<u64, Entry>,
}

/// Per-acceptor set of live sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_id: 1,
                sessions: HashMap::new(),
            })),
        }
    }

    /// Allocate a session; it is not tracked until [`insert`](Self::insert).
    pub fn new_session(&self, peer: SocketAddr, cipher: CipherHandle) -> Arc<Session> {
        let mut inner = self.inner.lock().expect("session registry poisoned");
        let id = inner.next_id;
        inner.next_id += 1;
        Arc::new(Session::new(id, peer, cipher))
    }

    /// Track a started session together with its driving task.
    pub fn insert(&self, session: Arc<Session>, handle: JoinHandle<()>) {
        let mut inner = self.inner.lock().expect("session registry poisoned");
        inner
            .sessions
            .insert(session.id(), Entry { session, handle });
    }

    /// Number of sessions that have not yet reached `Closed`.
    pub fn live(&self) -> usize {
        let inner = self.inner.lock().expect("session registry poisoned");
        inner
            .sessions
            .values()
            .filter(|e| e.session.state() != SessionState::Closed)
            .count()
    }

    /// Remove every `Closed` session. Their tasks have finished (the
    /// state is set last), so dropping the handles detaches nothing
    /// still running.
    pub fn reap(&self) -> usize {
        let mut inner = self.inner.lock().expect("session registry poisoned");
        let before = inner.sessions.len();
        inner
            .sessions
            .retain(|_, e| e.session.state() != SessionState::Closed);
        let removed = before - inner.sessions.len();
        if removed > 0 {
            trace!("reaped {} closed session(s)", removed);
        }
        removed
    }

    /// Await every tracked session task. Called after shutdown has been
    /// signalled, so each pump unblocks on its own; no join timeout is
    /// needed.
    pub async fn drain(&self) {
        let entries: Vec<Entry> = {
            let mut inner = self.inner.lock().expect("session registry poisoned");
            inner.sessions.drain().map(|(_, e)| e).collect()
        };

        for entry in entries {
            let _ = entry.handle.await;
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
