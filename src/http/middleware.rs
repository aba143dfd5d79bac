use axum::{
    body::Body,
    extract::{Request, State},
    http::{
        header::{COOKIE, SET_COOKIE},
        HeaderValue, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::AppState;
use crate::{
    identity::{Identity, IdentityPayload},
    session::session_id_from_cookies,
};

/// Largest request body accepted for identity payloads.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Resolve the request [`Identity`] and its [`Session`](crate::session::Session), and attach both
/// to the request extensions.
///
/// A session is created when the request carries no live session cookie. Its cookie is then set on
/// the response.
pub async fn identity_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(err) => {
            log::warn!(target: "abserve", "failed to read request body: {err}");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let existing = parts
        .headers
        .get(COOKIE)
        .and_then(|value| value.to_str().ok())
        .and_then(session_id_from_cookies)
        .and_then(|id| state.sessions.load(id));
    let (session, is_new) = match existing {
        Some(session) => (session, false),
        None => (state.sessions.create(), true),
    };

    let identity = Identity::resolve(
        IdentityPayload::from_body(&body),
        Some(&session),
        &mut rand::thread_rng(),
    );
    log::debug!(target: "abserve",
                user_id:display = identity.user_id,
                gender:display = identity.gender,
                path:display = parts.uri.path();
                "resolved identity");

    parts.extensions.insert(identity);
    parts.extensions.insert(session.clone());
    let mut response = next.run(Request::from_parts(parts, Body::from(body))).await;

    if is_new {
        match HeaderValue::from_str(&state.sessions.cookie(&session)) {
            Ok(cookie) => {
                response.headers_mut().append(SET_COOKIE, cookie);
            }
            Err(err) => {
                log::warn!(target: "abserve", "invalid session cookie: {err}");
            }
        }
    }

    response
}
