use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post, put};
use axum::{Router, middleware};
use coversim_core::{Gateway, HttpGateway, MemoryStore, PositionStore};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::configs::{Settings, Storage, Webhook};
use crate::handles::*;
use crate::middlewares::{BasicAuthState, basic_auth};
use crate::repositories::PositionRepository;
use crate::services::{CoveringEvent, CoveringRegistry};

pub struct App {
    pub router: Router,
    /// Set when the webhook runs on its own port.
    pub webhook: Option<Router>,
}

pub async fn create_app(settings: &Arc<Settings>, storage: Option<Arc<Storage>>) -> anyhow::Result<App> {
    let (sender, _receiver) = broadcast::channel(100);

    let store: Arc<dyn PositionStore> = match storage {
        Some(storage) => {
            let repository = PositionRepository::new(storage);
            for record in repository.find_all().await? {
                tracing::debug!(
                    "stored position of {}: {}% (since {})",
                    record.name,
                    record.position,
                    record.updated_at
                );
            }
            Arc::new(repository)
        }
        None => {
            tracing::warn!("no database configured, positions will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_default();

    let registry = CoveringRegistry::start(
        settings.coverings.clone(),
        store,
        sender.clone(),
        |setup| -> Arc<dyn Gateway> {
            Arc::new(HttpGateway::with_client(client.clone(), setup.retry_policy.clone()))
        },
    )
    .await;

    let webhook = &settings.webhook;

    Ok(App {
        router: create_router(registry.clone(), sender, webhook),
        webhook: (webhook.enabled && webhook.port.is_some())
            .then(|| create_webhook_router(registry, webhook)),
    })
}

pub fn create_router(
    registry: CoveringRegistry,
    sender: broadcast::Sender<CoveringEvent>,
    webhook: &Webhook,
) -> Router {
    let coverings = Router::new()
        .route("/", get(get_coverings))
        .route("/:name", get(get_covering))
        .route("/:name/target", put(set_target_position))
        .route("/:name/stop", post(stop_covering))
        .route("/:name/toggle", post(toggle_covering))
        .with_state(ControlState {
            registry: registry.clone(),
        });

    let sse = Router::new()
        .route("/", get(sse_handler))
        .with_state(SSEState {
            sender: sender.clone(),
        });

    let mut router = Router::new()
        .nest("/coverings", coverings)
        .nest("/events", sse);

    if webhook.enabled && webhook.port.is_none() {
        router = router.nest("/webhook", webhook_routes(registry, webhook));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Router for a webhook served on its own listener.
pub fn create_webhook_router(registry: CoveringRegistry, webhook: &Webhook) -> Router {
    Router::new()
        .nest("/webhook", webhook_routes(registry, webhook))
        .layer(TraceLayer::new_for_http())
}

fn webhook_routes(registry: CoveringRegistry, webhook: &Webhook) -> Router {
    Router::new()
        .route("/:name", get(webhook_handler).post(webhook_handler))
        .route_layer(middleware::from_fn_with_state(
            BasicAuthState::from(webhook),
            basic_auth,
        ))
        .with_state(WebhookState { registry })
}
