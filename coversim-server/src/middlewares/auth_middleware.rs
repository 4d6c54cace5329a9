use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Request, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::headers::authorization::Basic;
use axum_extra::headers::{Authorization, Header};

use crate::configs::Webhook;

/// Credentials the webhook expects; `None` leaves it open.
#[derive(Clone)]
pub struct BasicAuthState {
    pub credentials: Option<(String, String)>,
}

impl From<&Webhook> for BasicAuthState {
    fn from(webhook: &Webhook) -> Self {
        let credentials = match (&webhook.auth_user, &webhook.auth_pass) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            _ => None,
        };

        Self { credentials }
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static("Basic realm=\"Authorization required\""),
        )],
    )
        .into_response()
}

pub async fn basic_auth(
    State(state): State<BasicAuthState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some((user, pass)) = &state.credentials else {
        return next.run(req).await;
    };

    let mut headers = req.headers().get_all(header::AUTHORIZATION).iter();

    let Ok(header) = Authorization::<Basic>::decode(&mut headers) else {
        return unauthorized();
    };

    if header.username() != user.as_str() || header.password() != pass.as_str() {
        tracing::warn!("rejected webhook call with wrong credentials");
        return unauthorized();
    }

    next.run(req).await
}
