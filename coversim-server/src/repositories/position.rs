use std::sync::Arc;

use async_trait::async_trait;
use coversim_core::{PositionStore, StoreError};
use sqlx::Error;
use time::OffsetDateTime;

use crate::configs::Storage;
use crate::models::PositionRecord;

pub struct PositionRepository {
    storage: Arc<Storage>,
}

impl PositionRepository {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

impl PositionRepository {
    pub async fn find_by_name(&self, name: &str) -> Result<Option<PositionRecord>, Error> {
        let record: Option<PositionRecord> = sqlx::query_as("SELECT * FROM positions WHERE name = $1")
            .bind(name)
            .fetch_optional(self.storage.get_pool())
            .await?;

        Ok(record)
    }

    pub async fn find_all(&self) -> Result<Vec<PositionRecord>, Error> {
        let records: Vec<PositionRecord> = sqlx::query_as("SELECT * FROM positions ORDER BY name")
            .fetch_all(self.storage.get_pool())
            .await?;

        Ok(records)
    }

    pub async fn upsert(&self, name: &str, position: u8) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO positions (name, position, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO UPDATE
                SET position = excluded.position, updated_at = excluded.updated_at
            "#,
        )
        .bind(name)
        .bind(i64::from(position))
        .bind(OffsetDateTime::now_utc())
        .execute(self.storage.get_pool())
        .await?;

        Ok(())
    }
}

#[async_trait]
impl PositionStore for PositionRepository {
    async fn load(&self, name: &str) -> Result<Option<u8>, StoreError> {
        let record = self
            .find_by_name(name)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(record.map(|record| record.position.clamp(0, 100) as u8))
    }

    async fn save(&self, name: &str, position: u8) -> Result<(), StoreError> {
        self.upsert(name, position)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}
