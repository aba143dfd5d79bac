use axum::{extract::State, http::StatusCode, Extension};

use super::AppState;
use crate::{identity::Identity, session::Session, Client};

const AB_EXPERIMENT: &str = "ab_test";
const PAGEVIEW_EVENT: &str = "pageview";
const DEFAULT_RESPONSE: &str = "default";

/// Identities that are always forced into a variation of the A/B test.
const FORCED_IDENTITIES: &[(&str, &str)] = &[("var1", "variation_1"), ("var2", "variation_2")];

pub async fn greet(Extension(session): Extension<Session>) -> String {
    match session.user_id {
        Some(user_id) => format!("Hello {user_id}!"),
        None => "Hi!".to_owned(),
    }
}

pub async fn ab_test(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> String {
    with_client(&state, |client| {
        let attributes = identity.attributes();

        if let Some((_, variation)) = FORCED_IDENTITIES
            .iter()
            .find(|(user_id, _)| *user_id == identity.user_id)
        {
            log::info!(target: "abserve", variation; "forcing variation");
            client.set_forced_variation(AB_EXPERIMENT, &identity.user_id, Some(variation));
        }

        let variation = client.activate(AB_EXPERIMENT, &identity.user_id, &attributes);
        let body = match variation.as_deref() {
            Some(variation @ ("variation_1" | "variation_2")) => variation.to_owned(),
            _ => DEFAULT_RESPONSE.to_owned(),
        };

        client.track(PAGEVIEW_EVENT, &identity.user_id, &attributes);
        body
    })
}

pub async fn feature(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> String {
    with_client(&state, |client| {
        feature_variable(client, &identity, "feature", "var_key")
    })
}

pub async fn rollout(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> String {
    with_client(&state, |client| {
        feature_variable(client, &identity, "rollout", "rollout_variable")
    })
}

pub async fn set_user(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Extension(identity): Extension<Identity>,
) -> StatusCode {
    log::info!(target: "abserve", user_id:display = identity.user_id; "storing user in session");
    state.sessions.set_user_id(&session.id, identity.user_id);
    StatusCode::OK
}

pub async fn health() -> &'static str {
    "OK"
}

/// Run `f` with the current client, or answer the default response if no client has been
/// published yet.
fn with_client(state: &AppState, f: impl FnOnce(&Client) -> String) -> String {
    match state.clients.current() {
        Some(client) => f(&client),
        None => {
            log::warn!(target: "abserve", "no client available yet, serving default");
            DEFAULT_RESPONSE.to_owned()
        }
    }
}

/// The string variable's value when the feature is enabled for the user, the default response
/// otherwise. A page view is tracked either way.
fn feature_variable(
    client: &Client,
    identity: &Identity,
    feature_key: &str,
    variable_key: &str,
) -> String {
    let attributes = identity.attributes();

    let enabled = client.is_feature_enabled(feature_key, &identity.user_id, &attributes);
    let value =
        client.get_feature_variable_string(feature_key, variable_key, &identity.user_id, &attributes);
    let body = match value {
        Some(value) if enabled => value,
        _ => DEFAULT_RESPONSE.to_owned(),
    };

    client.track(PAGEVIEW_EVENT, &identity.user_id, &attributes);
    body
}
