use std::fs;

use coversim_server::app::create_webhook_router;
use coversim_server::configs::Webhook;
use coversim_server::models::CertificateRecord;
use coversim_server::repositories::CertificateRepository;
use coversim_server::services::{
    CERT_VERSION, create_acceptor, generate_identity, load_identity, self_signed_identity, serve_tls,
};
use serde_json::json;
use time::{Duration, OffsetDateTime};
use tokio::net::TcpListener;

mod common;
use common::mock_app::MockApp;

#[tokio::test]
async fn test_self_signed_certificate_is_cached() {
    let app = MockApp::new().await;
    let certificates = CertificateRepository::new(app.storage.clone());

    let first = self_signed_identity(Some(&certificates)).await.unwrap();
    let second = self_signed_identity(Some(&certificates)).await.unwrap();
    assert_eq!(first, second);

    let stored = certificates.find_by_name("webhook").await.unwrap().unwrap();
    assert_eq!(stored.version, CERT_VERSION);
    assert_eq!(stored.cert_pem, first.cert_pem);
}

#[tokio::test]
async fn test_stale_certificate_is_regenerated() {
    let app = MockApp::new().await;
    let certificates = CertificateRepository::new(app.storage.clone());

    let old = generate_identity(OffsetDateTime::now_utc()).unwrap();
    certificates
        .upsert(&CertificateRecord {
            name: "webhook".to_string(),
            cert_pem: old.cert_pem.clone(),
            key_pem: old.key_pem.clone(),
            version: CERT_VERSION - 1,
            created_at: OffsetDateTime::now_utc() - Duration::days(3),
        })
        .await
        .unwrap();

    let renewed = self_signed_identity(Some(&certificates)).await.unwrap();

    assert_ne!(renewed, old);
    let stored = certificates.find_by_name("webhook").await.unwrap().unwrap();
    assert_eq!(stored.version, CERT_VERSION);
    assert_eq!(stored.key_pem, renewed.key_pem);
}

#[tokio::test]
async fn test_configured_certificate_files() {
    let identity = generate_identity(OffsetDateTime::now_utc()).unwrap();
    let dir = std::env::temp_dir();
    let key_file = dir.join(format!("coversim-{}-key.pem", uuid::Uuid::new_v4()));
    let cert_file = dir.join(format!("coversim-{}-cert.pem", uuid::Uuid::new_v4()));
    fs::write(&key_file, &identity.key_pem).unwrap();
    fs::write(&cert_file, &identity.cert_pem).unwrap();

    let webhook = Webhook {
        https: true,
        https_key_file: Some(key_file.to_string_lossy().to_string()),
        https_cert_file: Some(cert_file.to_string_lossy().to_string()),
        ..Webhook::default()
    };
    let loaded = load_identity(&webhook, None).await.unwrap();
    assert_eq!(loaded, identity);

    let missing = Webhook {
        https_key_file: Some(dir.join("coversim-missing.pem").to_string_lossy().to_string()),
        ..webhook.clone()
    };
    assert!(load_identity(&missing, None).await.is_err());

    fs::remove_file(key_file).unwrap();
    fs::remove_file(cert_file).unwrap();
}

#[tokio::test]
async fn test_webhook_over_https() {
    let app = MockApp::new().await;
    let webhook = Webhook {
        https: true,
        port: Some(0),
        ..Webhook::default()
    };

    let identity = self_signed_identity(None).await.unwrap();
    let acceptor = create_acceptor(&identity).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve_tls(
        listener,
        create_webhook_router(app.registry.clone(), &webhook),
        acceptor,
    ));

    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .build()
        .unwrap();
    let response = client
        .get(format!("https://localhost:{}/webhook/Office?pos=40", addr.port()))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.json::<serde_json::Value>().await.unwrap(), json!({ "success": true }));

    let snapshot = app
        .wait_for("Office", |snapshot| snapshot.current_position == 40)
        .await;
    assert_eq!(snapshot.target_position, 40);
}
