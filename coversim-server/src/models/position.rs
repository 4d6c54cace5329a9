use time::OffsetDateTime;

use crate::models::Table;

/// Last commanded position of one covering.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PositionRecord {
    pub name: String,
    pub position: i64,
    pub updated_at: OffsetDateTime,
}

pub struct PositionTable;

impl Table for PositionTable {
    fn name(&self) -> &'static str {
        "positions"
    }

    fn create(&self) -> String {
        String::from(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                name TEXT PRIMARY KEY,
                position INTEGER NOT NULL CHECK (position BETWEEN 0 AND 100),
                updated_at DATETIME NOT NULL
            );
            "#,
        )
    }

    fn dispose(&self) -> String {
        String::from("DROP TABLE IF EXISTS positions;")
    }
}
