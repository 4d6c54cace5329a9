use std::sync::Arc;
use std::{fs, io};

use anyhow::{Context, anyhow};
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;
use rcgen::{CertificateParams, KeyPair};
use rustls_pemfile::{certs, private_key};
use time::{Duration, OffsetDateTime};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::rustls::crypto::ring;

use crate::configs::Webhook;
use crate::models::CertificateRecord;
use crate::repositories::CertificateRepository;

/// Lifetime of a generated certificate.
pub const CERT_DAYS: i64 = 365;

/// Bumped whenever the generated certificate layout changes.
pub const CERT_VERSION: i64 = 2;

const CERT_NAME: &str = "webhook";

/// PEM encoded certificate chain and private key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub cert_pem: String,
    pub key_pem: String,
}

/// A cached certificate is reused until a day before it expires.
pub fn is_fresh(record: &CertificateRecord, now: OffsetDateTime) -> bool {
    record.version == CERT_VERSION && now - record.created_at <= Duration::days(CERT_DAYS - 1)
}

pub fn generate_identity(now: OffsetDateTime) -> anyhow::Result<Identity> {
    let mut params = CertificateParams::new(vec!["localhost".to_string()])?;
    params.not_before = now;
    params.not_after = now + Duration::days(CERT_DAYS);

    let key_pair = KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;

    Ok(Identity {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

/// Returns the cached self-signed identity, generating a new one when it is
/// missing, expired, or from an older version.
pub async fn self_signed_identity(
    certificates: Option<&CertificateRepository>,
) -> anyhow::Result<Identity> {
    let now = OffsetDateTime::now_utc();

    let Some(certificates) = certificates else {
        tracing::warn!("no database configured, the webhook certificate changes on every start");
        return generate_identity(now);
    };

    if let Some(record) = certificates.find_by_name(CERT_NAME).await? {
        if is_fresh(&record, now) {
            tracing::debug!("reusing webhook certificate from {}", record.created_at);
            return Ok(Identity {
                cert_pem: record.cert_pem,
                key_pem: record.key_pem,
            });
        }
        tracing::info!("cached webhook certificate is stale");
    }

    tracing::info!("Generating new SSL self-signed certificate");
    let identity = generate_identity(now)?;

    certificates
        .upsert(&CertificateRecord {
            name: CERT_NAME.to_string(),
            cert_pem: identity.cert_pem.clone(),
            key_pem: identity.key_pem.clone(),
            version: CERT_VERSION,
            created_at: now,
        })
        .await?;

    Ok(identity)
}

/// Reads the configured key and certificate files, or falls back to a self-signed identity.
pub async fn load_identity(
    webhook: &Webhook,
    certificates: Option<&CertificateRepository>,
) -> anyhow::Result<Identity> {
    match (&webhook.https_key_file, &webhook.https_cert_file) {
        (Some(key_file), Some(cert_file)) => {
            tracing::info!("Using SSL certificate from {}", key_file);

            Ok(Identity {
                cert_pem: fs::read_to_string(cert_file)
                    .with_context(|| format!("cannot read certificate file {cert_file}"))?,
                key_pem: fs::read_to_string(key_file)
                    .with_context(|| format!("cannot read key file {key_file}"))?,
            })
        }
        _ => {
            tracing::info!("Using automatically generated self-signed SSL certificate");
            self_signed_identity(certificates).await
        }
    }
}

pub fn create_acceptor(identity: &Identity) -> anyhow::Result<TlsAcceptor> {
    let chain = certs(&mut io::BufReader::new(identity.cert_pem.as_bytes()))
        .collect::<Result<Vec<_>, _>>()
        .context("invalid certificate PEM")?;
    if chain.is_empty() {
        return Err(anyhow!("no certificates found"));
    }

    let key = private_key(&mut io::BufReader::new(identity.key_pem.as_bytes()))
        .context("invalid key PEM")?
        .ok_or_else(|| anyhow!("no keys found or encrypted keys not supported"))?;

    let mut config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(chain, key)?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Serves `router` over TLS until the listener fails.
pub async fn serve_tls(listener: TcpListener, router: Router, acceptor: TlsAcceptor) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let acceptor = acceptor.clone();
        let service = TowerToHyperService::new(router.clone());

        tokio::spawn(async move {
            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("TLS handshake with {} failed: {}", peer, e);
                    return;
                }
            };

            if let Err(e) = Builder::new(TokioExecutor::new())
                .serve_connection_with_upgrades(TokioIo::new(stream), service)
                .await
            {
                tracing::debug!("connection from {} closed: {}", peer, e);
            }
        });
    }
}
