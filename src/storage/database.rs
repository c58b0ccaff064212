use anyhow::Context;
use chrono::Utc;
use entities::progress;
use migration::MigratorTrait;
use sea_orm::{
    ActiveModelTrait,
    ActiveValue::{NotSet, Set},
    ColumnTrait, ConnectionTrait, Database, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    TransactionTrait,
};

use super::{ProgressStore, RecordKey, StoreError, locks::KeyedLocks};
use crate::{
    domain::{ProgressRecord, StorageKind, SyncRequest, apply_sync},
    intervals::Interval,
};

/// Durable backend on top of sea-orm. One row per (user, video), guarded by a
/// unique index.
#[derive(Debug)]
pub struct DatabaseProgressStore {
    db: DatabaseConnection,
    locks: KeyedLocks,
}

impl DatabaseProgressStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            locks: KeyedLocks::new(),
        }
    }

    /// Connects and brings the schema up to date.
    pub async fn connect(connection_string: &str) -> anyhow::Result<Self> {
        let db = Database::connect(connection_string)
            .await
            .with_context(|| "Failed to connect to database")?;

        migration::Migrator::up(&db, None)
            .await
            .with_context(|| "Failed to run database migrations")?;

        Ok(Self::new(db))
    }
}

async fn find_row<C: ConnectionTrait>(
    conn: &C,
    key: &RecordKey,
) -> Result<Option<progress::Model>, DbErr> {
    progress::Entity::find()
        .filter(progress::Column::UserId.eq(key.user_id.as_str()))
        .filter(progress::Column::VideoId.eq(key.video_id.as_str()))
        .one(conn)
        .await
}

fn to_record(key: &RecordKey, row: &progress::Model) -> ProgressRecord {
    let watched_intervals =
        match serde_json::from_value::<Vec<Interval>>(row.watched_intervals.clone()) {
            Ok(intervals) => intervals,
            Err(e) => {
                tracing::warn!(%key, error = %e, "stored intervals are unreadable, treating as empty");
                Vec::new()
            }
        };
    ProgressRecord {
        watched_intervals,
        progress: row.progress,
        last_watched_time: row.last_watched_time,
        total_duration: row.total_duration,
    }
}

#[async_trait::async_trait]
impl ProgressStore for DatabaseProgressStore {
    fn kind(&self) -> StorageKind {
        StorageKind::Durable
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get(&self, user_id: &str, video_id: &str) -> Result<Option<ProgressRecord>, StoreError> {
        let key = RecordKey::new(user_id, video_id);
        let row = find_row(&self.db, &key).await?;
        Ok(row.map(|row| to_record(&key, &row)))
    }

    #[tracing::instrument(level = "debug", skip(self, request))]
    async fn merge_and_save(
        &self,
        user_id: &str,
        video_id: &str,
        request: &SyncRequest,
    ) -> Result<ProgressRecord, StoreError> {
        request.validate()?;
        let key = RecordKey::new(user_id, video_id);

        let guard = self.locks.lock(&key).await;
        let txn = self.db.begin().await?;

        let row = find_row(&txn, &key).await?;
        let existing = row.as_ref().map(|row| to_record(&key, row));
        let record = apply_sync(existing.as_ref(), request);
        let now = Utc::now();

        match row {
            Some(row) => {
                let mut active: progress::ActiveModel = row.into();
                active.watched_intervals = Set(serde_json::json!(record.watched_intervals));
                active.progress = Set(record.progress);
                active.last_watched_time = Set(record.last_watched_time);
                active.total_duration = Set(record.total_duration);
                active.updated_at = Set(now);
                active.update(&txn).await?;
            }
            None => {
                progress::ActiveModel {
                    id: NotSet,
                    user_id: Set(key.user_id.clone()),
                    video_id: Set(key.video_id.clone()),
                    watched_intervals: Set(serde_json::json!(record.watched_intervals)),
                    progress: Set(record.progress),
                    last_watched_time: Set(record.last_watched_time),
                    total_duration: Set(record.total_duration),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?;
            }
        }

        txn.commit().await?;
        drop(guard);
        self.locks.prune();

        tracing::debug!(%key, progress = record.progress, "persisted progress record");
        Ok(record)
    }
}
