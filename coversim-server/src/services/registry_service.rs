use std::collections::BTreeMap;
use std::sync::Arc;

use coversim_core::{
    Covering, CoveringConfig, CoveringHandle, CoveringSetup, CoveringSnapshot, Gateway,
    PositionStore,
};
use tokio::sync::broadcast::Sender;

use crate::services::{BroadcastSink, CoveringEvent};

/// Running coverings, keyed by name.
#[derive(Clone, Default)]
pub struct CoveringRegistry {
    coverings: Arc<BTreeMap<String, CoveringHandle>>,
}

impl CoveringRegistry {
    /// Spawns a driver per valid config. Invalid or duplicate entries are logged and skipped.
    pub async fn start<F>(
        configs: Vec<CoveringConfig>,
        store: Arc<dyn PositionStore>,
        sender: Sender<CoveringEvent>,
        make_gateway: F,
    ) -> Self
    where
        F: Fn(&CoveringSetup) -> Arc<dyn Gateway>,
    {
        let mut coverings = BTreeMap::new();

        for config in configs {
            let setup = match config.into_setup() {
                Ok(setup) => setup,
                Err(e) => {
                    tracing::error!("skipping covering: {}", e);
                    continue;
                }
            };

            if coverings.contains_key(&setup.name) {
                tracing::error!("skipping covering {}: name is already in use", setup.name);
                continue;
            }

            let name = setup.name.clone();
            let gateway = make_gateway(&setup);
            let sink = Arc::new(BroadcastSink::new(name.clone(), sender.clone()));
            let handle = Covering::spawn(setup, gateway, store.clone(), sink).await;

            tracing::info!("covering {} started at {}%", name, handle.current_position());
            coverings.insert(name, handle);
        }

        Self {
            coverings: Arc::new(coverings),
        }
    }

    pub fn get(&self, name: &str) -> Option<&CoveringHandle> {
        self.coverings.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.coverings.keys().map(String::as_str).collect()
    }

    pub fn snapshots(&self) -> Vec<CoveringSnapshot> {
        self.coverings.values().map(CoveringHandle::snapshot).collect()
    }
}
