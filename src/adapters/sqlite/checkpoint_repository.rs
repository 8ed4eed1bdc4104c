//! SQLite implementation of the checkpoint store.
//!
//! A checkpoint is stored as one serialized snapshot column, written and
//! replaced wholesale. A record that fails to deserialize is reported as
//! absent; resume logic never patches a partial snapshot.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::question::Checkpoint;
use crate::domain::ports::question_store::CheckpointStore;

#[derive(Clone)]
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn write(&self, checkpoint: &Checkpoint) -> DomainResult<()> {
        let snapshot = serde_json::to_string(checkpoint)?;
        sqlx::query(
            r#"INSERT INTO checkpoints (run_id, conversation_id, barrier, snapshot, created_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(run_id) DO UPDATE SET
                   conversation_id = excluded.conversation_id,
                   barrier = excluded.barrier,
                   snapshot = excluded.snapshot,
                   created_at = excluded.created_at"#,
        )
        .bind(checkpoint.run_id.to_string())
        .bind(&checkpoint.conversation_id)
        .bind(checkpoint.barrier.as_str())
        .bind(&snapshot)
        .bind(checkpoint.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn read(&self, run_id: Uuid) -> DomainResult<Option<Checkpoint>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT snapshot FROM checkpoints WHERE run_id = ?")
                .bind(run_id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        let Some((snapshot,)) = row else {
            return Ok(None);
        };
        match serde_json::from_str::<Checkpoint>(&snapshot) {
            Ok(checkpoint) => Ok(Some(checkpoint)),
            Err(error) => {
                tracing::warn!(
                    run = %run_id,
                    "checkpoint snapshot unreadable, treating as absent: {error}"
                );
                Ok(None)
            }
        }
    }

    async fn delete(&self, run_id: Uuid) -> DomainResult<()> {
        sqlx::query("DELETE FROM checkpoints WHERE run_id = ?")
            .bind(run_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::models::question::BarrierPoint;
    use crate::domain::models::request::Budgets;
    use chrono::Utc;

    fn checkpoint(run_id: Uuid) -> Checkpoint {
        Checkpoint {
            run_id,
            conversation_id: "conv-1".to_string(),
            barrier: BarrierPoint::ExecutionRecorded,
            context_id: "ctx-9".to_string(),
            snapshot_version: "v3".to_string(),
            evidence: vec![],
            strategies_tried: vec!["minimal_fix".to_string()],
            stages_passed: vec!["lint".to_string(), "security".to_string()],
            budgets: Budgets {
                tokens_remaining: 10_000,
                sandbox_seconds_remaining: 90,
                analysis_calls_remaining: 2,
                evidence_experiments_remaining: 1,
            },
            iteration_count: 2,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_write_read_delete_round_trip() {
        let pool = create_migrated_test_pool().await.unwrap();
        let store = SqliteCheckpointStore::new(pool);
        let run_id = Uuid::new_v4();

        store.write(&checkpoint(run_id)).await.unwrap();
        let loaded = store.read(run_id).await.unwrap().unwrap();
        assert_eq!(loaded.barrier, BarrierPoint::ExecutionRecorded);
        assert_eq!(loaded.iteration_count, 2);
        assert_eq!(loaded.strategies_tried, vec!["minimal_fix".to_string()]);
        assert_eq!(loaded.budgets.sandbox_seconds_remaining, 90);

        store.delete(run_id).await.unwrap();
        assert!(store.read(run_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rewrite_replaces_prior_snapshot() {
        let pool = create_migrated_test_pool().await.unwrap();
        let store = SqliteCheckpointStore::new(pool);
        let run_id = Uuid::new_v4();

        store.write(&checkpoint(run_id)).await.unwrap();
        let mut newer = checkpoint(run_id);
        newer.barrier = BarrierPoint::CritiqueRecorded;
        newer.iteration_count = 3;
        store.write(&newer).await.unwrap();

        let loaded = store.read(run_id).await.unwrap().unwrap();
        assert_eq!(loaded.barrier, BarrierPoint::CritiqueRecorded);
        assert_eq!(loaded.iteration_count, 3);
    }

    #[tokio::test]
    async fn test_unreadable_snapshot_is_absent() {
        let pool = create_migrated_test_pool().await.unwrap();
        let store = SqliteCheckpointStore::new(pool.clone());
        let run_id = Uuid::new_v4();

        // A torn write: valid row, snapshot cut mid-object.
        sqlx::query(
            "INSERT INTO checkpoints (run_id, conversation_id, barrier, snapshot, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(run_id.to_string())
        .bind("conv-1")
        .bind("execution_recorded")
        .bind("{\"run_id\": \"trunc")
        .bind(Utc::now().to_rfc3339())
        .execute(&pool)
        .await
        .unwrap();

        assert!(store.read(run_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_run_reads_as_none() {
        let pool = create_migrated_test_pool().await.unwrap();
        let store = SqliteCheckpointStore::new(pool);
        assert!(store.read(Uuid::new_v4()).await.unwrap().is_none());
    }
}
