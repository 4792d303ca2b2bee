use chrono::DateTime;
use chrono_tz::Tz;
use std::sync::{Arc, RwLock};

use crate::application::snapshots::ring::RingBuffer;
use crate::domain::errors::{BuildError, ContractError};
use crate::domain::market::session::{self, Session, SessionName};

/// A week of sessions at four windows per day.
pub const DEFAULT_SESSION_CAPACITY: usize = 28;

type SessionHandle = Arc<RwLock<Session>>;

/// Generated sessions for one market, with a pointer at the active one.
///
/// The previous session is retained when the pointer moves: its frozen
/// extrema seed new levels.
#[derive(Debug)]
pub struct SessionSnapshot {
    ring: RingBuffer<SessionHandle>,
    current: RwLock<Option<SessionHandle>>,
    previous: RwLock<Option<SessionHandle>>,
}

impl SessionSnapshot {
    pub fn new(size: usize) -> Result<Self, BuildError> {
        Ok(Self {
            ring: RingBuffer::new(size)?,
            current: RwLock::new(None),
            previous: RwLock::new(None),
        })
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_SESSION_CAPACITY).expect("default capacity is nonzero")
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Adds the four windows that can contain `now` (Asia anchored
    /// yesterday, London, NewYork, and Asia anchored today). Idempotent:
    /// windows already generated are left untouched.
    pub fn generate_new_sessions(&self, now: DateTime<Tz>) -> Result<(), ContractError> {
        for candidate in session::candidate_sessions(now)? {
            if !self.exists(candidate.name, candidate.open) {
                self.ring.add(Arc::new(RwLock::new(candidate)));
            }
        }
        Ok(())
    }

    /// Repoints `current` at the session containing `now`, returning
    /// whether the pointer moved. The session being left becomes the
    /// previous session with its extrema frozen.
    pub fn set_current_session(&self, now: DateTime<Tz>) -> Result<bool, ContractError> {
        let target = session::current_session(now)?;

        let current_id = self
            .current
            .read()
            .expect("session lock poisoned")
            .as_ref()
            .map(|h| identity(h));
        let target_id = target.as_ref().map(|s| (s.name, s.open));
        if current_id == target_id {
            return Ok(false);
        }

        let replacement = match target {
            Some(ref s) => Some(self.find_or_add(s.name, s.open)?),
            None => None,
        };

        let mut current = self.current.write().expect("session lock poisoned");
        let outgoing = current.take();
        if let Some(outgoing) = outgoing {
            *self.previous.write().expect("session lock poisoned") = Some(outgoing);
        }
        *current = replacement;
        Ok(true)
    }

    pub fn current(&self) -> Option<SessionHandle> {
        self.current
            .read()
            .expect("session lock poisoned")
            .clone()
    }

    pub fn previous(&self) -> Option<SessionHandle> {
        self.previous
            .read()
            .expect("session lock poisoned")
            .clone()
    }

    /// Feeds a candle's extremes into the active session.
    pub fn absorb(&self, high: f64, low: f64) {
        if let Some(handle) = self.current() {
            handle
                .write()
                .expect("session lock poisoned")
                .absorb(high, low);
        }
    }

    /// Open time of the most recently frozen session.
    pub fn fetch_last_session_open(&self) -> Option<DateTime<Tz>> {
        self.previous()
            .map(|h| h.read().expect("session lock poisoned").open)
    }

    /// Frozen extrema of the most recently departed session, if any candle
    /// shaped them.
    pub fn fetch_last_session_high_low(&self) -> Option<(f64, f64)> {
        let handle = self.previous()?;
        let prev = handle.read().expect("session lock poisoned");
        if !prev.has_extrema() {
            return None;
        }
        Some((prev.high, prev.low))
    }

    fn exists(&self, name: SessionName, open: DateTime<Tz>) -> bool {
        !self
            .ring
            .filter(|h| {
                let s = h.read().expect("session lock poisoned");
                s.name == name && s.open == open
            })
            .is_empty()
    }

    fn find_or_add(
        &self,
        name: SessionName,
        open: DateTime<Tz>,
    ) -> Result<SessionHandle, ContractError> {
        if let Some(found) = self
            .ring
            .filter(|h| {
                let s = h.read().expect("session lock poisoned");
                s.name == name && s.open == open
            })
            .into_iter()
            .next()
        {
            return Ok(found);
        }

        let built = Session::for_day(name, open)
            .map_err(|e| ContractError::NotNewYork(e.to_string()))?;
        let handle = Arc::new(RwLock::new(built));
        self.ring.add(Arc::clone(&handle));
        Ok(handle)
    }
}

fn identity(handle: &SessionHandle) -> (SessionName, DateTime<Tz>) {
    let s = handle.read().expect("session lock poisoned");
    (s.name, s.open)
}
