use time::OffsetDateTime;

use crate::models::Table;

/// Cached self-signed identity for the HTTPS webhook.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CertificateRecord {
    pub name: String,
    pub cert_pem: String,
    pub key_pem: String,
    pub version: i64,
    pub created_at: OffsetDateTime,
}

pub struct CertificateTable;

impl Table for CertificateTable {
    fn name(&self) -> &'static str {
        "certificates"
    }

    fn create(&self) -> String {
        String::from(
            r#"
            CREATE TABLE IF NOT EXISTS certificates (
                name TEXT PRIMARY KEY,
                cert_pem TEXT NOT NULL,
                key_pem TEXT NOT NULL,
                version INTEGER NOT NULL,
                created_at DATETIME NOT NULL
            );
            "#,
        )
    }

    fn dispose(&self) -> String {
        String::from("DROP TABLE IF EXISTS certificates;")
    }
}
