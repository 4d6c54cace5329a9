use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use coversim_core::mock::MockGateway;
use coversim_core::{CoveringConfig, CoveringSnapshot, Gateway};
use coversim_server::app::create_router;
use coversim_server::configs::{Database, SchemaManager, Storage, Webhook};
use coversim_server::repositories::PositionRepository;
use coversim_server::services::CoveringRegistry;
use serde::Deserialize;
use tokio::sync::broadcast;

const COVERINGS: &str = r#"
[[coverings]]
name = "Office"
up = "http://office.local/up"
down = "http://office.local/down"
stop = "http://office.local/stop"
show_stop_button = true
show_toggle_button = true

[[coverings]]
name = "Bedroom"
up = "http://bedroom.local/up"
down = "http://bedroom.local/down"

[[coverings]]
name = "Broken"
up = "http://broken.local/up"
"#;

#[derive(Deserialize)]
struct Coverings {
    coverings: Vec<CoveringConfig>,
}

pub struct MockApp {
    pub router: Router,
    pub registry: CoveringRegistry,
    pub gateway: Arc<MockGateway>,
    pub repository: Arc<PositionRepository>,
    pub storage: Arc<Storage>,
}

impl MockApp {
    pub async fn new() -> Self {
        Self::with_webhook(Webhook::default()).await
    }

    pub async fn with_webhook(webhook: Webhook) -> Self {
        let storage = Arc::new(
            Storage::new(
                Database {
                    clean_start: true,
                    url: String::from("sqlite::memory:"),
                },
                SchemaManager::default(),
            )
            .await
            .unwrap(),
        );
        let repository = Arc::new(PositionRepository::new(storage.clone()));
        let gateway = Arc::new(MockGateway::ok());
        let (sender, _receiver) = broadcast::channel(100);

        let configs = toml::from_str::<Coverings>(COVERINGS).unwrap().coverings;
        let registry = CoveringRegistry::start(configs, repository.clone(), sender.clone(), {
            let gateway = gateway.clone();
            move |_| -> Arc<dyn Gateway> { gateway.clone() }
        })
        .await;

        let router = create_router(registry.clone(), sender, &webhook);

        Self {
            router,
            registry,
            gateway,
            repository,
            storage,
        }
    }

    pub async fn wait_for(
        &self,
        name: &str,
        condition: impl FnMut(&CoveringSnapshot) -> bool,
    ) -> CoveringSnapshot {
        let mut receiver = self.registry.get(name).unwrap().subscribe();
        let snapshot = tokio::time::timeout(Duration::from_secs(5), receiver.wait_for(condition))
            .await
            .expect("covering did not reach the expected state")
            .unwrap()
            .clone();
        snapshot
    }
}
