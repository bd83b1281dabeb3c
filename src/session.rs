//! Server-side session store.
//!
//! Sessions are created on first reference: the tunnel has no handshake, so
//! the first frame carrying an unseen id opens its session. Each session sits
//! behind its own mutex; the map lock is only held for lookups and inserts.

use crate::frame::TunnelFrame;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Session id type (one base32 label on the wire)
pub type SessionId = u8;

/// Shared handle to one session
pub type SessionHandle = Arc<Mutex<Session>>;

/// Accumulation state of one tunnel session
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    buffer: Vec<u8>,
    /// Received byte ranges, offset -> length
    segments: BTreeMap<usize, usize>,
    /// Payload length, known once the final frame arrived
    total_len: Option<usize>,
    complete: bool,
    /// Last completed payload, kept until the client retrieves or starts
    /// another payload so that resent frames can be recognized
    completed: Option<Vec<u8>>,
    /// Response frames waiting for retrieve requests
    downlink: Vec<TunnelFrame>,
    last_activity: Instant,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            buffer: Vec::new(),
            segments: BTreeMap::new(),
            total_len: None,
            complete: false,
            completed: None,
            downlink: Vec::new(),
            last_activity: Instant::now(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// True if `bytes` at `offset` repeat a chunk of the last completed
    /// payload (and, for a final chunk, end where that payload ended).
    pub fn is_replay(&self, offset: usize, bytes: &[u8], last: bool) -> bool {
        let done = match &self.completed {
            Some(done) => done,
            None => return false,
        };

        let end = offset + bytes.len();
        end <= done.len() && done[offset..end] == *bytes && (!last || end == done.len())
    }

    /// Write `bytes` at `offset`, growing the buffer as needed.
    ///
    /// Rewriting a range that was already received is harmless. New data
    /// supersedes the record of the last completed payload.
    pub fn append(&mut self, offset: usize, bytes: &[u8]) {
        self.touch();
        self.completed = None;

        let end = offset + bytes.len();
        if self.buffer.len() < end {
            self.buffer.resize(end, 0);
        }
        self.buffer[offset..end].copy_from_slice(bytes);

        let longest = self.segments.entry(offset).or_insert(0);
        *longest = (*longest).max(bytes.len());

        self.refresh_complete();
    }

    /// Record the payload's total length (declared by the final frame).
    pub fn mark_final(&mut self, total_len: usize) {
        self.touch();
        self.total_len = Some(total_len);
        self.refresh_complete();
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Hand out the completed payload and reset for the next one.
    ///
    /// A copy is remembered so that late copies of its frames are not taken
    /// for the start of a new payload (see [`is_replay`](Self::is_replay)).
    pub fn take_buffer(&mut self) -> Option<Vec<u8>> {
        if !self.complete {
            return None;
        }

        let total_len = self.total_len.unwrap_or(self.buffer.len());
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.truncate(total_len);

        self.segments.clear();
        self.total_len = None;
        self.complete = false;
        self.completed = Some(buffer.clone());
        self.touch();

        Some(buffer)
    }

    /// Put the last completed payload back as an unfinished one, so that a
    /// resent final frame completes it again.
    pub fn reopen(&mut self) -> bool {
        let done = match self.completed.take() {
            Some(done) => done,
            None => return false,
        };

        self.segments.clear();
        self.segments.insert(0, done.len());
        self.buffer = done;
        self.total_len = None;
        self.complete = false;
        self.touch();
        true
    }

    /// Replace the queued downlink frames
    pub fn queue_downlink(&mut self, frames: Vec<TunnelFrame>) {
        self.touch();
        self.downlink = frames;
    }

    /// Queued downlink frame with `sequence_number`, if any.
    ///
    /// Retrieving means the client is past the uplink, so the record of the
    /// completed payload is dropped.
    pub fn downlink_frame(&mut self, sequence_number: u8) -> Option<TunnelFrame> {
        self.touch();
        self.completed = None;
        self.downlink
            .iter()
            .find(|frame| frame.sequence_number == sequence_number)
            .cloned()
    }

    pub fn pending_downlink(&self) -> usize {
        self.downlink.len()
    }

    // Complete once the segments cover [0, total_len) without a gap.
    fn refresh_complete(&mut self) {
        let total_len = match self.total_len {
            Some(total_len) => total_len,
            None => return,
        };

        let mut covered = 0;
        for (&offset, &len) in &self.segments {
            if offset > covered {
                break;
            }
            covered = covered.max(offset + len);
        }

        self.complete = covered >= total_len;
    }
}

/// Process-wide map of session id to session.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
}

fn lock(session: &SessionHandle) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing session for `id`, or a fresh empty one.
    pub fn get_or_create(&self, id: SessionId) -> SessionHandle {
        if let Some(session) = self.get(id) {
            return session;
        }

        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        sessions
            .entry(id)
            .or_insert_with(|| {
                log::info!("New tunnel session {:#04x}", id);
                Arc::new(Mutex::new(Session::new(id)))
            })
            .clone()
    }

    pub fn get(&self, id: SessionId) -> Option<SessionHandle> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Run `f` with exclusive access to session `id`, creating it if needed.
    pub fn with_session<T>(&self, id: SessionId, f: impl FnOnce(&mut Session) -> T) -> T {
        let session = self.get_or_create(id);
        let mut guard = lock(&session);
        f(&mut guard)
    }

    /// Run `f` with exclusive access to an existing session.
    pub fn with_existing<T>(&self, id: SessionId, f: impl FnOnce(&mut Session) -> T) -> Option<T> {
        let session = self.get(id)?;
        let mut guard = lock(&session);
        Some(f(&mut guard))
    }

    pub fn append(&self, id: SessionId, offset: usize, bytes: &[u8]) {
        self.with_session(id, |session| session.append(offset, bytes));
    }

    pub fn mark_final(&self, id: SessionId, total_len: usize) {
        self.with_session(id, |session| session.mark_final(total_len));
    }

    pub fn is_complete(&self, id: SessionId) -> bool {
        self.with_existing(id, |session| session.is_complete())
            .unwrap_or(false)
    }

    pub fn take_buffer(&self, id: SessionId) -> Option<Vec<u8>> {
        self.with_existing(id, Session::take_buffer).flatten()
    }

    pub fn reopen(&self, id: SessionId) -> bool {
        self.with_existing(id, Session::reopen).unwrap_or(false)
    }

    pub fn queue_downlink(&self, id: SessionId, frames: Vec<TunnelFrame>) {
        self.with_session(id, |session| session.queue_downlink(frames));
    }

    /// `None` if the session does not exist, `Some(None)` if nothing is queued
    /// under `sequence_number`.
    pub fn downlink_frame(&self, id: SessionId, sequence_number: u8) -> Option<Option<TunnelFrame>> {
        self.with_existing(id, |session| session.downlink_frame(sequence_number))
    }

    pub fn remove(&self, id: SessionId) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    /// Drop sessions idle for longer than `max_idle`; returns their ids.
    pub fn evict_idle(&self, max_idle: Duration) -> Vec<SessionId> {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let expired: Vec<SessionId> = sessions
            .iter()
            .filter(|(_, session)| lock(session).idle_for() > max_idle)
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            log::info!("Removing expired tunnel session {:#04x}", id);
            sessions.remove(id);
        }

        expired
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
