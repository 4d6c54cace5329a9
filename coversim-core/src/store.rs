use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StoreError;

/// Last commanded position per covering, keyed by covering name.
#[async_trait]
pub trait PositionStore: Send + Sync + 'static {
    async fn load(&self, name: &str) -> Result<Option<u8>, StoreError>;

    async fn save(&self, name: &str, position: u8) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    positions: Mutex<HashMap<String, u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_position(name: &str, position: u8) -> Self {
        Self {
            positions: Mutex::new(HashMap::from([(name.to_string(), position)])),
        }
    }
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn load(&self, name: &str) -> Result<Option<u8>, StoreError> {
        Ok(self.positions.lock().await.get(name).copied())
    }

    async fn save(&self, name: &str, position: u8) -> Result<(), StoreError> {
        self.positions.lock().await.insert(name.to_string(), position);
        Ok(())
    }
}
