use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use crate::app::{App, create_app};
use crate::configs::{SchemaManager, Settings, Storage};
use crate::repositories::CertificateRepository;
use crate::services::{create_acceptor, load_identity, serve_tls};

pub mod app;
pub mod configs;
pub mod errors;
pub mod handles;
pub mod middlewares;
pub mod models;
pub mod repositories;
pub mod services;

pub async fn run(settings: &Arc<Settings>) -> anyhow::Result<()> {
    let storage = match &settings.database {
        Some(database) => Some(Arc::new(
            Storage::new(database.clone(), SchemaManager::default()).await?,
        )),
        None => None,
    };

    let App { router, webhook } = create_app(settings, storage.clone()).await?;

    let tls = if settings.webhook.enabled && settings.webhook.https {
        let certificates = storage.map(CertificateRepository::new);
        let identity = load_identity(&settings.webhook, certificates.as_ref()).await?;
        Some(create_acceptor(&identity)?)
    } else {
        None
    };

    let ip_addr = settings
        .server
        .host
        .parse::<IpAddr>()
        .with_context(|| format!("invalid server host `{}`", settings.server.host))?;

    let address = SocketAddr::from((ip_addr, settings.server.port));
    let listener = TcpListener::bind(&address).await?;

    match (webhook, settings.webhook.port) {
        (Some(webhook), Some(port)) => {
            let webhook_address = SocketAddr::from((ip_addr, port));
            let webhook_listener = TcpListener::bind(&webhook_address).await?;
            tracing::info!("webhook listening on {:?} (https: {})", webhook_address, tls.is_some());

            tokio::spawn(async move {
                if let Err(e) = serve(webhook_listener, webhook, tls).await {
                    tracing::error!("webhook listener stopped: {}", e);
                }
            });

            tracing::info!("listening on {:?}", address);
            serve(listener, router, None).await
        }
        _ => {
            tracing::info!("listening on {:?} (https: {})", address, tls.is_some());
            serve(listener, router, tls).await
        }
    }
}

async fn serve(listener: TcpListener, router: Router, tls: Option<TlsAcceptor>) -> anyhow::Result<()> {
    match tls {
        Some(acceptor) => serve_tls(listener, router, acceptor).await,
        None => {
            axum::serve(listener, router).await?;
            Ok(())
        }
    }
}
