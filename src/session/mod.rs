//! Correlation identities for associations
//!
//! Every association handle maps to one [`SessionId`] from the moment it is
//! first seen until it is closed. Ids are decimal strings derived from the
//! microsecond clock, forced strictly increasing so two sessions opened in
//! the same microsecond still get distinct ids.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dimse::AssociationHandle;
use parking_lot::Mutex;
use serde::Serialize;

/// Strictly increasing microsecond-based id source
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: AtomicU64,
}

impl IdGenerator {
    pub const fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Current time in microseconds, or one past the previous id if the
    /// clock has not moved on
    pub fn next_id(&self) -> u64 {
        let now = u64::try_from(Utc::now().timestamp_micros()).unwrap_or(0);
        let mut last = self.last.load(Ordering::Acquire);
        loop {
            let candidate = now.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }

    pub fn next_string(&self) -> String {
        self.next_id().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One live association as seen by the honeypot
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub session_id: SessionId,
    /// Unknown until the open event supplies it
    pub peer: Option<SocketAddr>,
    pub client_version: Option<String>,
    pub calling_ae_title: Option<String>,
    pub opened_at: DateTime<Utc>,
}

/// Outcome of [`SessionRegistry::close`]
#[derive(Debug, Clone)]
pub enum Closed {
    /// The handle was known, here is its session
    Tracked(Session),
    /// The handle was never opened; a fresh id was made up for the record
    Untracked(SessionId),
}

impl Closed {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Closed::Tracked(session) => &session.session_id,
            Closed::Untracked(id) => id,
        }
    }

    pub fn is_tracked(&self) -> bool {
        matches!(self, Closed::Tracked(_))
    }
}

/// Maps association handles to sessions
#[derive(Debug, Default)]
pub struct SessionRegistry {
    ids: IdGenerator,
    sessions: Mutex<HashMap<AssociationHandle, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session id of `handle`, allocating one if the handle is new
    pub fn resolve(&self, handle: AssociationHandle) -> SessionId {
        let mut sessions = self.sessions.lock();
        sessions
            .entry(handle)
            .or_insert_with(|| self.new_session())
            .session_id
            .clone()
    }

    /// Register the metadata of a freshly opened association.
    ///
    /// An id already allocated by [`resolve`](Self::resolve) is kept; the
    /// metadata of the last call wins.
    pub fn open(
        &self,
        handle: AssociationHandle,
        peer: SocketAddr,
        client_version: Option<String>,
        calling_ae_title: Option<String>,
    ) -> SessionId {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .entry(handle)
            .or_insert_with(|| self.new_session());
        session.peer = Some(peer);
        session.client_version = client_version;
        session.calling_ae_title = calling_ae_title;
        session.session_id.clone()
    }

    /// Forget `handle`
    pub fn close(&self, handle: AssociationHandle) -> Closed {
        match self.sessions.lock().remove(&handle) {
            Some(session) => Closed::Tracked(session),
            None => Closed::Untracked(SessionId(self.ids.next_string())),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Snapshot of the live sessions, oldest first
    pub fn sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.lock().values().cloned().collect();
        sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        sessions
    }

    fn new_session(&self) -> Session {
        Session {
            session_id: SessionId(self.ids.next_string()),
            peer: None,
            client_version: None,
            calling_ae_title: None,
            opened_at: Utc::now(),
        }
    }
}
