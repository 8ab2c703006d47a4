//! Session persistence in PostgreSQL.
//!
//! The whole [`VerificationSession`] is stored as JSONB in `record`. The
//! scalar columns mirror it for indexing: `version` guards the
//! compare-and-swap, `active` feeds the partial unique index that allows one
//! live session per subject.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use avs_core::{SessionId, SubjectId};
use avs_state::VerificationSession;
use avs_workflow::{SessionStore, StoreError};

/// Name of the partial unique index on active sessions.
const ONE_ACTIVE_INDEX: &str = "uq_verification_sessions_one_active";

/// [`SessionStore`] backed by the `verification_sessions` table.
#[derive(Debug, Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn active_session_of(&self, subject_id: &SubjectId) -> Result<Option<Uuid>, StoreError> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT session_id FROM verification_sessions WHERE subject_id = $1 AND active",
        )
        .bind(subject_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn insert(&self, session: &VerificationSession) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO verification_sessions (session_id, subject_id, version, overall_status,
             active, superseded_by, record, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(*session.session_id.as_uuid())
        .bind(session.subject_id.as_str())
        .bind(to_db_version(session.version)?)
        .bind(session.overall_status.as_str())
        .bind(session.is_active())
        .bind(session.superseded_by.map(|id| *id.as_uuid()))
        .bind(Json(session))
        .bind(*session.created_at.as_datetime())
        .bind(*session.updated_at.as_datetime())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.constraint() == Some(ONE_ACTIVE_INDEX) => {
                let active = self.active_session_of(&session.subject_id).await?;
                Err(StoreError::ActiveSessionExists {
                    subject_id: session.subject_id.clone(),
                    session_id: active.map(SessionId::from_uuid).unwrap_or(session.session_id),
                })
            }
            Err(e) => Err(backend(e)),
        }
    }

    async fn get(&self, session_id: SessionId) -> Result<Option<VerificationSession>, StoreError> {
        let record = sqlx::query_scalar::<_, Json<VerificationSession>>(
            "SELECT record FROM verification_sessions WHERE session_id = $1",
        )
        .bind(*session_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(record.map(|Json(session)| session))
    }

    async fn latest_for_subject(
        &self,
        subject_id: &SubjectId,
    ) -> Result<Option<VerificationSession>, StoreError> {
        let record = sqlx::query_scalar::<_, Json<VerificationSession>>(
            "SELECT record FROM verification_sessions WHERE subject_id = $1
             ORDER BY seq DESC LIMIT 1",
        )
        .bind(subject_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(record.map(|Json(session)| session))
    }

    async fn compare_and_swap(
        &self,
        next: &VerificationSession,
        expected_version: u64,
    ) -> Result<(), StoreError> {
        if next.version != expected_version + 1 {
            return Err(StoreError::Backend(format!(
                "session {} written at version {} over expected {}",
                next.session_id, next.version, expected_version
            )));
        }

        let result = sqlx::query(
            "UPDATE verification_sessions
             SET version = $1, overall_status = $2, active = $3, superseded_by = $4,
                 record = $5, updated_at = $6
             WHERE session_id = $7 AND version = $8",
        )
        .bind(to_db_version(next.version)?)
        .bind(next.overall_status.as_str())
        .bind(next.is_active())
        .bind(next.superseded_by.map(|id| *id.as_uuid()))
        .bind(Json(next))
        .bind(*next.updated_at.as_datetime())
        .bind(*next.session_id.as_uuid())
        .bind(to_db_version(expected_version)?)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let found = sqlx::query_scalar::<_, i64>(
            "SELECT version FROM verification_sessions WHERE session_id = $1",
        )
        .bind(*next.session_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match found {
            None => Err(StoreError::NotFound(next.session_id)),
            Some(found) => Err(StoreError::VersionConflict {
                session_id: next.session_id,
                expected: expected_version,
                found: from_db_version(found)?,
            }),
        }
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn to_db_version(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version).map_err(|_| StoreError::Backend(format!("version {version} out of range")))
}

fn from_db_version(version: i64) -> Result<u64, StoreError> {
    u64::try_from(version).map_err(|_| StoreError::Backend(format!("stored version {version} is negative")))
}
