use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use tracing::{debug, error, info, warn};

use crate::command::{Body, Command};
use crate::error::TransportError;

pub const DEFAULT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(2_000);
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Response of a successful dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub body: String,
    pub elapsed: Duration,
    pub attempts: u32,
}

#[async_trait]
pub trait Gateway: Send + Sync + 'static {
    async fn send(&self, command: &Command, method: Method) -> Result<Reply, TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
    success_codes: Vec<u16>,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration, success_codes: Vec<u16>) -> Self {
        let success_codes = if success_codes.is_empty() {
            vec![200]
        } else {
            success_codes
        };

        Self {
            attempts: attempts.max(1),
            delay: delay.max(MIN_RETRY_DELAY),
            success_codes,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_success(&self, status: u16) -> bool {
        self.success_codes.contains(&status)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ATTEMPTS, DEFAULT_RETRY_DELAY, vec![200])
    }
}

/// Sends commands over HTTP, or runs them locally when they carry the `file://` prefix.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    policy: RetryPolicy,
}

impl HttpGateway {
    pub fn new(policy: RetryPolicy) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self::with_client(client, policy)
    }

    pub fn with_client(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn run_local(&self, line: &str) -> Result<Reply, TransportError> {
        let started = Instant::now();

        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(line)
            .output()
            .await
            .map_err(|e| TransportError::Command {
                command: line.to_string(),
                stderr: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!("Command `{}` exited with {}: {}", line, output.status, stderr);
            return Err(TransportError::Command {
                command: line.to_string(),
                stderr,
            });
        }

        Ok(Reply {
            body: String::from_utf8_lossy(&output.stdout).into_owned(),
            elapsed: started.elapsed(),
            attempts: 1,
        })
    }

    fn build(&self, command: &Command, method: &Method) -> Result<reqwest::RequestBuilder, TransportError> {
        let request = self.client.request(method.clone(), command.url());

        let Command::Structured(spec) = command else {
            return Ok(request);
        };

        let mut headers = HeaderMap::new();
        for (name, value) in &spec.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| TransportError::Invalid(format!("invalid header name `{name}`")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| TransportError::Invalid(format!("invalid value for header `{name}`")))?;
            headers.insert(name, value);
        }

        let request = request.headers(headers);

        Ok(match &spec.body {
            None => request,
            Some(Body::Text(text)) => request.body(text.clone()),
            Some(Body::Json(json)) => request.json(json),
        })
    }
}

impl Default for HttpGateway {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn send(&self, command: &Command, method: Method) -> Result<Reply, TransportError> {
        if let Some(line) = command.local_command() {
            return self.run_local(line).await;
        }

        let url = command.url().to_string();
        let started = Instant::now();
        let total = self.policy.attempts;
        let mut last_error = None;

        for attempt in 1..=total {
            if attempt > 1 {
                tokio::time::sleep(self.policy.delay).await;
            }

            let request = self.build(command, &method)?;
            debug!("{} {} (attempt {}/{})", method, url, attempt, total);

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();

                    if self.policy.is_success(status) {
                        if attempt > 1 {
                            info!("{} {} succeeded on attempt {}/{}", method, url, attempt, total);
                        }
                        return Ok(Reply {
                            body,
                            elapsed: started.elapsed(),
                            attempts: attempt,
                        });
                    }

                    warn!(
                        "{} {} returned HTTP {} (attempt {}/{})",
                        method, url, status, attempt, total
                    );
                    last_error = Some(TransportError::Status {
                        url: url.clone(),
                        status,
                        attempts: attempt,
                        body,
                    });
                }
                Err(e) => {
                    warn!("{} {} failed (attempt {}/{}): {}", method, url, attempt, total, e);
                    last_error = Some(TransportError::Request {
                        url: url.clone(),
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
            }
        }

        let error = last_error.unwrap_or_else(|| TransportError::Request {
            url,
            attempts: total,
            message: "no attempt was made".to_string(),
        });
        error!("Giving up: {}", error);

        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use axum::Router;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::any;

    use super::*;

    /// Serves `/blinds` answering 503 for the first `failures` hits, then `success`.
    async fn flaky_device(failures: u32, success: StatusCode) -> (String, Arc<AtomicU32>) {
        let hits = Arc::new(AtomicU32::new(0));

        let app = Router::new()
            .route(
                "/blinds",
                any(move |State(hits): State<Arc<AtomicU32>>| async move {
                    if hits.fetch_add(1, Ordering::SeqCst) < failures {
                        (StatusCode::SERVICE_UNAVAILABLE, "busy")
                    } else {
                        (success, "moving")
                    }
                }),
            )
            .with_state(hits.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}/blinds"), hits)
    }

    fn gateway(attempts: u32, success_codes: Vec<u16>) -> HttpGateway {
        HttpGateway::new(RetryPolicy::new(attempts, MIN_RETRY_DELAY, success_codes))
    }

    #[test]
    fn test_retry_policy_clamps() {
        let policy = RetryPolicy::new(0, Duration::from_millis(5), Vec::new());

        assert_eq!(policy.attempts(), 1);
        assert_eq!(policy.delay(), MIN_RETRY_DELAY);
        assert!(policy.is_success(200));
        assert!(!policy.is_success(204));
    }

    #[test]
    fn test_custom_success_codes() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), vec![200, 204]);

        assert!(policy.is_success(204));
        assert!(!policy.is_success(500));
    }

    #[tokio::test]
    async fn test_retries_until_device_answers() {
        let (url, hits) = flaky_device(2, StatusCode::OK).await;

        let reply = gateway(5, vec![200])
            .send(&Command::from(url.as_str()), Method::POST)
            .await
            .unwrap();

        assert_eq!(reply.attempts, 3);
        assert_eq!(reply.body, "moving");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(reply.elapsed >= MIN_RETRY_DELAY * 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_all_attempts() {
        let (url, hits) = flaky_device(u32::MAX, StatusCode::OK).await;

        let result = gateway(3, vec![200])
            .send(&Command::from(url.as_str()), Method::GET)
            .await;

        match result {
            Err(TransportError::Status {
                status, attempts, body, ..
            }) => {
                assert_eq!(status, 503);
                assert_eq!(attempts, 3);
                assert_eq!(body, "busy");
            }
            other => panic!("Expected status error, got {:?}", other),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_custom_success_code_is_accepted() {
        let (url, hits) = flaky_device(0, StatusCode::ACCEPTED).await;

        let reply = gateway(3, vec![202])
            .send(&Command::from(url.as_str()), Method::POST)
            .await
            .unwrap();
        assert_eq!(reply.attempts, 1);

        let result = gateway(2, vec![200])
            .send(&Command::from(url.as_str()), Method::POST)
            .await;
        assert!(matches!(result, Err(TransportError::Status { status: 202, attempts: 2, .. })));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unreachable_device_is_retried() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = gateway(2, vec![200])
            .send(&Command::from(format!("http://{addr}/blinds").as_str()), Method::POST)
            .await;

        assert!(matches!(result, Err(TransportError::Request { attempts: 2, .. })));
    }

    #[tokio::test]
    async fn test_local_command_stdout_is_body() {
        let gateway = HttpGateway::default();

        let reply = gateway
            .send(&Command::from("file://echo 42"), Method::GET)
            .await
            .unwrap();

        assert_eq!(reply.body.trim(), "42");
        assert_eq!(reply.attempts, 1);
    }

    #[tokio::test]
    async fn test_local_command_failure() {
        let gateway = HttpGateway::default();

        let result = gateway
            .send(&Command::from("file://echo jammed >&2; exit 3"), Method::POST)
            .await;

        match result {
            Err(TransportError::Command { stderr, .. }) => assert_eq!(stderr, "jammed"),
            other => panic!("Expected command error, got {:?}", other),
        }
    }
}
