//! # Session Store
//!
//! The only shared mutable resource of the workflow. Every write after the
//! initial insert is a compare-and-swap on the session's `version`: a write
//! built from version `n` must carry version `n + 1` and only lands if the
//! stored record is still at `n`.
//!
//! [`InMemorySessionStore`] backs tests and database-less deployments; the
//! API crate provides a PostgreSQL implementation of the same trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

use avs_core::{SessionId, SubjectId, Timestamp};
use avs_state::VerificationSession;

/// Bound on reload-and-reapply rounds when a write loses a version race.
pub const MAX_CAS_ROUNDS: usize = 8;

/// Session store failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The subject already has a session that is neither terminal nor
    /// superseded.
    #[error("subject {subject_id} already has active session {session_id}")]
    ActiveSessionExists {
        subject_id: SubjectId,
        session_id: SessionId,
    },

    #[error("session {0} not found")]
    NotFound(SessionId),

    /// The stored version moved on since the caller read it.
    #[error("session {session_id}: expected version {expected}, found {found}")]
    VersionConflict {
        session_id: SessionId,
        expected: u64,
        found: u64,
    },

    /// Backend failure (connection, serialization).
    #[error("{0}")]
    Backend(String),
}

/// Persistence of verification sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store a new session. Fails with
    /// [`StoreError::ActiveSessionExists`] if the subject already has an
    /// active one.
    async fn insert(&self, session: &VerificationSession) -> Result<(), StoreError>;

    async fn get(&self, session_id: SessionId) -> Result<Option<VerificationSession>, StoreError>;

    /// The most recently created session of a subject.
    async fn latest_for_subject(
        &self,
        subject_id: &SubjectId,
    ) -> Result<Option<VerificationSession>, StoreError>;

    /// Replace the stored session with `next` if it is still at
    /// `expected_version`. `next.version` must be `expected_version + 1`.
    async fn compare_and_swap(
        &self,
        next: &VerificationSession,
        expected_version: u64,
    ) -> Result<(), StoreError>;
}

#[async_trait]
impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    async fn insert(&self, session: &VerificationSession) -> Result<(), StoreError> {
        (**self).insert(session).await
    }

    async fn get(&self, session_id: SessionId) -> Result<Option<VerificationSession>, StoreError> {
        (**self).get(session_id).await
    }

    async fn latest_for_subject(
        &self,
        subject_id: &SubjectId,
    ) -> Result<Option<VerificationSession>, StoreError> {
        (**self).latest_for_subject(subject_id).await
    }

    async fn compare_and_swap(
        &self,
        next: &VerificationSession,
        expected_version: u64,
    ) -> Result<(), StoreError> {
        (**self).compare_and_swap(next, expected_version).await
    }
}

/// Reload, apply and compare-and-swap until the write lands.
///
/// `apply` runs against a fresh copy each round and may refuse by returning
/// an error, which ends the loop without writing. Version races are retried
/// up to [`MAX_CAS_ROUNDS`] times, then surface as the conflict.
pub async fn update_session<S, T, E, F>(
    store: &S,
    session_id: SessionId,
    mut apply: F,
) -> Result<(VerificationSession, T), E>
where
    S: SessionStore + ?Sized,
    E: From<StoreError>,
    F: FnMut(&mut VerificationSession, Timestamp) -> Result<T, E>,
{
    let mut round = 0;
    loop {
        round += 1;
        let current = store
            .get(session_id)
            .await?
            .ok_or(StoreError::NotFound(session_id))?;
        let now = Timestamp::now();
        let mut next = current.clone();
        let out = apply(&mut next, now)?;
        next.bump_version(now);
        match store.compare_and_swap(&next, current.version).await {
            Ok(()) => return Ok((next, out)),
            Err(StoreError::VersionConflict { found, .. }) if round < MAX_CAS_ROUNDS => {
                tracing::debug!(
                    session_id = %session_id,
                    expected = current.version,
                    found,
                    round,
                    "session write lost a version race, reapplying"
                );
            }
            Err(e) => return Err(e.into()),
        }
    }
}

// ─── In-Memory Store ─────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<SessionId, VerificationSession>,
    /// Session ids per subject, oldest first.
    by_subject: HashMap<SubjectId, Vec<SessionId>>,
}

/// Session store held in process memory. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemorySessionStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions.
    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: &VerificationSession) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let Inner {
            sessions,
            by_subject,
        } = &mut *inner;
        let history = by_subject.entry(session.subject_id.clone()).or_default();
        if let Some(active) = history
            .iter()
            .filter_map(|id| sessions.get(id))
            .find(|s| s.is_active())
        {
            return Err(StoreError::ActiveSessionExists {
                subject_id: session.subject_id.clone(),
                session_id: active.session_id,
            });
        }
        if sessions.contains_key(&session.session_id) {
            return Err(StoreError::Backend(format!(
                "session {} already stored",
                session.session_id
            )));
        }
        history.push(session.session_id);
        sessions.insert(session.session_id, session.clone());
        Ok(())
    }

    async fn get(&self, session_id: SessionId) -> Result<Option<VerificationSession>, StoreError> {
        Ok(self.inner.read().sessions.get(&session_id).cloned())
    }

    async fn latest_for_subject(
        &self,
        subject_id: &SubjectId,
    ) -> Result<Option<VerificationSession>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .by_subject
            .get(subject_id)
            .and_then(|ids| ids.last())
            .and_then(|id| inner.sessions.get(id))
            .cloned())
    }

    async fn compare_and_swap(
        &self,
        next: &VerificationSession,
        expected_version: u64,
    ) -> Result<(), StoreError> {
        if next.version != expected_version + 1 {
            return Err(StoreError::Backend(format!(
                "session {} written at version {} from version {expected_version}",
                next.session_id, next.version
            )));
        }
        let mut inner = self.inner.write();
        let stored = inner
            .sessions
            .get_mut(&next.session_id)
            .ok_or(StoreError::NotFound(next.session_id))?;
        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                session_id: next.session_id,
                expected: expected_version,
                found: stored.version,
            });
        }
        *stored = next.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avs_state::StepStateMachine;

    fn new_session(subject: &str) -> VerificationSession {
        StepStateMachine::standard().new_session(
            SessionId::new(),
            SubjectId::new(subject).unwrap(),
            Timestamp::now(),
        )
    }

    #[tokio::test]
    async fn one_active_session_per_subject() {
        let store = InMemorySessionStore::new();
        let first = new_session("appraiser-1");
        store.insert(&first).await.unwrap();

        let err = store.insert(&new_session("appraiser-1")).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::ActiveSessionExists {
                subject_id: first.subject_id.clone(),
                session_id: first.session_id,
            }
        );
        store.insert(&new_session("appraiser-2")).await.unwrap();
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn superseded_session_frees_the_subject() {
        let store = InMemorySessionStore::new();
        let first = new_session("appraiser-1");
        store.insert(&first).await.unwrap();
        let second = new_session("appraiser-1");

        let mut retired = first.clone();
        retired.superseded_by = Some(second.session_id);
        retired.bump_version(Timestamp::now());
        store.compare_and_swap(&retired, 1).await.unwrap();
        store.insert(&second).await.unwrap();

        let latest = store
            .latest_for_subject(&first.subject_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.session_id, second.session_id);
    }

    #[tokio::test]
    async fn compare_and_swap_rejects_stale_writes() {
        let store = InMemorySessionStore::new();
        let session = new_session("appraiser-1");
        store.insert(&session).await.unwrap();

        let mut a = session.clone();
        a.bump_version(Timestamp::now());
        let mut b = session.clone();
        b.bump_version(Timestamp::now());

        store.compare_and_swap(&a, 1).await.unwrap();
        let err = store.compare_and_swap(&b, 1).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::VersionConflict {
                session_id: session.session_id,
                expected: 1,
                found: 2,
            }
        );
        let stored = store.get(session.session_id).await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn compare_and_swap_requires_single_step_version() {
        let store = InMemorySessionStore::new();
        let mut session = new_session("appraiser-1");
        store.insert(&session).await.unwrap();
        session.version = 5;
        assert!(matches!(
            store.compare_and_swap(&session, 1).await,
            Err(StoreError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn update_session_bumps_version_once() {
        let store = InMemorySessionStore::new();
        let session = new_session("appraiser-1");
        store.insert(&session).await.unwrap();

        let (next, rounds) = update_session::<_, _, StoreError, _>(&store, session.session_id, |s, now| {
            s.updated_at = now;
            Ok(1)
        })
        .await
        .unwrap();
        assert_eq!(rounds, 1);
        assert_eq!(next.version, 2);

        let missing = update_session::<_, (), StoreError, _>(&store, SessionId::new(), |_, _| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(missing, StoreError::NotFound(_)));
    }
}
