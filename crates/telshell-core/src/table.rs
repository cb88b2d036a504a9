use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use crate::evaluator::Evaluator;
use crate::session::{
    CloseHandle, Lifecycle, Session, SessionError, SessionId, ShellConfig, SubmitOutcome,
};
use crate::transport::Transport;

struct Entry {
    session: Arc<Mutex<Session>>,
    /// Reaches the evaluator while a `submit` holds the session lock.
    closer: CloseHandle,
}

/// Owns every live session, keyed by id.
///
/// Sessions never free themselves: when one exits it reports
/// [`SubmitOutcome::Terminating`] and the table reclaims it, joining its
/// workers before the session is dropped. Each entry sits behind its own
/// mutex so a slow `submit` on one connection does not stall the others.
pub struct SessionTable {
    sessions: Mutex<HashMap<SessionId, Entry>>,
    next_id: AtomicU64,
}

impl SessionTable {
    /// Create a new, empty table.
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a session, bind it to `transport` and register it.
    pub fn create_session(
        &self,
        evaluator: Arc<dyn Evaluator>,
        config: ShellConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<SessionId, SessionError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut session = Session::new(id, evaluator, config);
        session.bind(transport)?;
        let entry = Entry {
            closer: session.close_handle(),
            session: Arc::new(Mutex::new(session)),
        };
        self.lock_sessions().insert(id, entry);
        log::info!("[table] session {id} created");
        Ok(id)
    }

    /// Get a handle to a session by id.
    pub fn get_session(&self, id: SessionId) -> Option<Arc<Mutex<Session>>> {
        self.lock_sessions()
            .get(&id)
            .map(|entry| Arc::clone(&entry.session))
    }

    /// Feed one line to a session. A session that exits on this line is
    /// reclaimed before returning.
    pub fn submit(&self, id: SessionId, line: &[u8]) -> Result<SubmitOutcome, SessionError> {
        let session = self.get_session(id).ok_or(SessionError::UnknownSession(id))?;
        let outcome = lock_session(&session).submit(line)?;
        if outcome == SubmitOutcome::Terminating {
            self.reclaim(id);
        }
        Ok(outcome)
    }

    /// Tear down a session whose connection went away.
    ///
    /// Interrupts the evaluator before taking the session lock, since a
    /// `submit` waiting on a running cycle holds it. Once locked, a cycle that
    /// started in between is interrupted too, then the workers are joined.
    /// Closing an unknown id is a no-op.
    pub fn close_session(&self, id: SessionId) {
        let Some(entry) = self.lock_sessions().remove(&id) else {
            return;
        };
        entry.closer.close();
        let mut session = lock_session(&entry.session);
        session.interrupt();
        session.shutdown();
        log::info!("[table] session {id} closed after {} cycles", session.cycles());
    }

    /// Reclaim a session that asked to exit: wait for its workers, then drop it.
    fn reclaim(&self, id: SessionId) {
        let Some(entry) = self.lock_sessions().remove(&id) else {
            return;
        };
        let mut session = lock_session(&entry.session);
        debug_assert_eq!(session.lifecycle(), Lifecycle::Terminating);
        session.shutdown();
        log::info!("[table] session {id} exited");
    }

    /// Reclaim every session that has exited but is still registered, e.g.
    /// one driven through [`get_session`](Self::get_session) directly.
    /// Sessions locked by a `submit` in progress are skipped. Returns the
    /// reclaimed ids.
    pub fn reap_terminating(&self) -> Vec<SessionId> {
        let exited: Vec<SessionId> = self
            .lock_sessions()
            .iter()
            .filter(|(_, entry)| {
                let session = match entry.session.try_lock() {
                    Ok(session) => session,
                    Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                    Err(TryLockError::WouldBlock) => return false,
                };
                session.lifecycle() == Lifecycle::Terminating
            })
            .map(|(id, _)| *id)
            .collect();
        for &id in &exited {
            self.reclaim(id);
        }
        exited
    }

    /// List all session ids, sorted.
    pub fn list_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.lock_sessions().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock_sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_sessions().is_empty()
    }

    /// Close every session. Used at server shutdown.
    pub fn close_all(&self) {
        for id in self.list_sessions() {
            self.close_session(id);
        }
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<SessionId, Entry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_session(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}
