use std::sync::Arc;

use sqlx::Error;

use crate::configs::Storage;
use crate::models::CertificateRecord;

pub struct CertificateRepository {
    storage: Arc<Storage>,
}

impl CertificateRepository {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

impl CertificateRepository {
    pub async fn find_by_name(&self, name: &str) -> Result<Option<CertificateRecord>, Error> {
        let record: Option<CertificateRecord> = sqlx::query_as("SELECT * FROM certificates WHERE name = $1")
            .bind(name)
            .fetch_optional(self.storage.get_pool())
            .await?;

        Ok(record)
    }

    pub async fn upsert(&self, record: &CertificateRecord) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO certificates (name, cert_pem, key_pem, version, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (name) DO UPDATE
                SET cert_pem = excluded.cert_pem,
                    key_pem = excluded.key_pem,
                    version = excluded.version,
                    created_at = excluded.created_at
            "#,
        )
        .bind(&record.name)
        .bind(&record.cert_pem)
        .bind(&record.key_pem)
        .bind(record.version)
        .bind(record.created_at)
        .execute(self.storage.get_pool())
        .await?;

        Ok(())
    }
}
