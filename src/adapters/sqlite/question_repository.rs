//! SQLite implementation of the pending-question store.
//!
//! Two properties carry the whole contract: supersede-on-write is a single
//! upsert keyed on the conversation id, and claim-and-delete is a single
//! `DELETE ... RETURNING`, so two concurrent claims can never both win.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::question::PendingQuestion;
use crate::domain::models::request::Stage;
use crate::domain::ports::question_store::QuestionStore;

use super::{parse_datetime, parse_uuid};

#[derive(Clone)]
pub struct SqliteQuestionStore {
    pool: SqlitePool,
}

impl SqliteQuestionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// All unexpired questions, oldest first. Inspection surface for the
    /// CLI; the engine only ever claims by conversation.
    pub async fn list_open(&self) -> DomainResult<Vec<PendingQuestion>> {
        let rows: Vec<QuestionRow> = sqlx::query_as(
            r#"SELECT id, run_id, conversation_id, source_stage, question_text,
                      expected_answer_hint, context_snapshot, created_at, expires_at
               FROM pending_questions
               WHERE expires_at > ?
               ORDER BY created_at ASC"#,
        )
        .bind(chrono::Utc::now().to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[async_trait]
impl QuestionStore for SqliteQuestionStore {
    async fn store(&self, question: &PendingQuestion) -> DomainResult<Uuid> {
        let snapshot = serde_json::to_string(&question.context_snapshot)?;
        sqlx::query(
            r#"INSERT INTO pending_questions
               (id, run_id, conversation_id, source_stage, question_text,
                expected_answer_hint, context_snapshot, created_at, expires_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(conversation_id) DO UPDATE SET
                   id = excluded.id,
                   run_id = excluded.run_id,
                   source_stage = excluded.source_stage,
                   question_text = excluded.question_text,
                   expected_answer_hint = excluded.expected_answer_hint,
                   context_snapshot = excluded.context_snapshot,
                   created_at = excluded.created_at,
                   expires_at = excluded.expires_at"#,
        )
        .bind(question.id.to_string())
        .bind(question.run_id.to_string())
        .bind(&question.conversation_id)
        .bind(question.source_stage.as_str())
        .bind(&question.question_text)
        .bind(&question.expected_answer_hint)
        .bind(&snapshot)
        .bind(question.created_at.to_rfc3339())
        .bind(question.expires_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(question.id)
    }

    async fn claim(&self, conversation_id: &str) -> DomainResult<Option<PendingQuestion>> {
        let row: Option<QuestionRow> = sqlx::query_as(
            r#"DELETE FROM pending_questions
               WHERE conversation_id = ?
               RETURNING id, run_id, conversation_id, source_stage, question_text,
                         expected_answer_hint, context_snapshot, created_at, expires_at"#,
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let question: PendingQuestion = row.try_into()?;
        // Expired questions are deleted above and never handed out.
        if question.is_expired(chrono::Utc::now()) {
            tracing::debug!(
                conversation = conversation_id,
                question = %question.id,
                "claim found only an expired question, dropped"
            );
            return Ok(None);
        }
        Ok(Some(question))
    }

    async fn peek(&self, conversation_id: &str) -> DomainResult<Option<PendingQuestion>> {
        let row: Option<QuestionRow> = sqlx::query_as(
            r#"SELECT id, run_id, conversation_id, source_stage, question_text,
                      expected_answer_hint, context_snapshot, created_at, expires_at
               FROM pending_questions WHERE conversation_id = ?"#,
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let question: PendingQuestion = row.try_into()?;
        if question.is_expired(chrono::Utc::now()) {
            return Ok(None);
        }
        Ok(Some(question))
    }

    async fn purge_expired(&self) -> DomainResult<u64> {
        let result = sqlx::query("DELETE FROM pending_questions WHERE expires_at <= ?")
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct QuestionRow {
    id: String,
    run_id: String,
    conversation_id: String,
    source_stage: String,
    question_text: String,
    expected_answer_hint: Option<String>,
    context_snapshot: String,
    created_at: String,
    expires_at: String,
}

impl TryFrom<QuestionRow> for PendingQuestion {
    type Error = DomainError;

    fn try_from(row: QuestionRow) -> Result<Self, Self::Error> {
        let source_stage = Stage::from_str(&row.source_stage).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid stage: {}", row.source_stage))
        })?;
        let context_snapshot = serde_json::from_str(&row.context_snapshot)
            .map_err(|e| DomainError::SerializationError(e.to_string()))?;

        Ok(PendingQuestion {
            id: parse_uuid(&row.id)?,
            run_id: parse_uuid(&row.run_id)?,
            conversation_id: row.conversation_id,
            source_stage,
            created_at: parse_datetime(&row.created_at)?,
            expires_at: parse_datetime(&row.expires_at)?,
            question_text: row.question_text,
            expected_answer_hint: row.expected_answer_hint,
            context_snapshot,
        })
    }
}
