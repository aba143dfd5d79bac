use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use abserve::{
    fetcher::{parse_snapshot, Snapshot},
    http::{create_router, AppState},
    refresh::Refresher,
    session::SessionStore,
    ClientFactory, ClientHandle, FetchError, LogEvent,
};
use axum::{
    body::Body,
    http::{
        header::{CONTENT_TYPE, COOKIE, SET_COOKIE},
        Request, StatusCode,
    },
    Router,
};
use tower::ServiceExt;

const DATAFILE: &str = include_str!("data/datafile.json");

struct TestApp {
    router: Router,
    handle: Arc<ClientHandle>,
    events: Arc<Mutex<Vec<LogEvent>>>,
}

impl TestApp {
    /// An app without any published client.
    fn empty() -> TestApp {
        let handle = Arc::new(ClientHandle::new());
        let state = AppState::new(handle.clone(), SessionStore::new(Duration::from_secs(60)));
        TestApp {
            router: create_router(state),
            handle,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// An app serving a client built from the test datafile.
    fn new() -> TestApp {
        let app = TestApp::empty();
        let client = app
            .factory()
            .build(&parse_snapshot(DATAFILE).unwrap())
            .unwrap();
        app.handle.replace(client);
        app
    }

    fn factory(&self) -> ClientFactory {
        let events = self.events.clone();
        ClientFactory::new()
            .with_decision_listeners(Vec::new())
            .with_event_endpoint("http://localhost/events")
            .with_event_dispatcher(Arc::new(move |event: LogEvent| {
                events.lock().unwrap().push(event)
            }))
    }

    fn event_keys(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|event| {
                event.params["visitors"][0]["snapshots"][0]["events"][0]["key"]
                    .as_str()
                    .unwrap()
                    .to_owned()
            })
            .collect()
    }

    async fn send(&self, request: Request<Body>) -> Response {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let cookie = response
            .headers()
            .get(SET_COOKIE)
            .map(|value| value.to_str().unwrap().split(';').next().unwrap().to_owned());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        Response {
            status,
            cookie,
            body: String::from_utf8(body.to_vec()).unwrap(),
        }
    }

    async fn get(&self, path: &str, payload: Option<&str>, cookie: Option<&str>) -> Response {
        self.send(request("GET", path, payload, cookie)).await
    }
}

struct Response {
    status: StatusCode,
    /// `name=value` part of the `Set-Cookie` header.
    cookie: Option<String>,
    body: String,
}

fn request(method: &str, path: &str, payload: Option<&str>, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(cookie) = cookie {
        builder = builder.header(COOKIE, cookie);
    }
    match payload {
        Some(payload) => builder
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(payload.to_owned()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

#[tokio::test]
async fn greets_anonymous_users() {
    let app = TestApp::new();

    let response = app.get("/", None, None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, "Hi!");
    assert!(response.cookie.unwrap().starts_with("abserve.sid="));
}

#[tokio::test]
async fn set_user_is_remembered_by_the_session() {
    let app = TestApp::new();

    let response = app
        .send(request("POST", "/set/user", Some(r#"{"userID":"abc123"}"#), None))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.body.is_empty());
    let cookie = response.cookie.unwrap();

    let response = app.get("/", None, Some(&cookie)).await;
    assert_eq!(response.body, "Hello abc123!");
    // The session already exists, so the cookie is not set again.
    assert!(response.cookie.is_none());
}

#[tokio::test]
async fn unknown_session_cookie_starts_a_new_session() {
    let app = TestApp::new();

    let response = app.get("/", None, Some("abserve.sid=stale")).await;

    assert_eq!(response.body, "Hi!");
    assert!(response.cookie.is_some());
}

#[tokio::test]
async fn forced_identities_get_their_variation() {
    let app = TestApp::new();

    for _ in 0..3 {
        let response = app.get("/ab", Some(r#"{"userID":"var1"}"#), None).await;
        assert_eq!(response.body, "variation_1");
    }
    let response = app.get("/ab", Some(r#"{"userID":"var2"}"#), None).await;
    assert_eq!(response.body, "variation_2");
}

#[tokio::test]
async fn session_user_is_used_for_evaluation() {
    let app = TestApp::new();

    let cookie = app
        .send(request("POST", "/set/user", Some(r#"{"userID":"var2"}"#), None))
        .await
        .cookie
        .unwrap();
    let response = app.get("/ab", None, Some(&cookie)).await;

    assert_eq!(response.body, "variation_2");
}

#[tokio::test]
async fn ab_test_tracks_impression_and_pageview() {
    let app = TestApp::new();

    let response = app.get("/ab", None, None).await;

    assert!(response.body == "variation_1" || response.body == "variation_2");
    assert_eq!(app.event_keys(), vec!["campaign_activated", "pageview"]);
}

#[tokio::test]
async fn feature_is_stable_for_a_user() {
    let app = TestApp::new();
    let payload = Some(r#"{"userID":"new-user"}"#);

    let first = app.get("/feature", payload, None).await;
    let second = app.get("/feature", payload, None).await;

    assert_eq!(first.body, "on_value");
    assert_eq!(second.body, first.body);
    assert_eq!(
        app.event_keys(),
        vec!["campaign_activated", "pageview", "campaign_activated", "pageview"]
    );
}

#[tokio::test]
async fn rollout_depends_on_gender() {
    let app = TestApp::new();

    let female = app
        .get("/rollout", Some(r#"{"userID":"user-1","gender":"f"}"#), None)
        .await;
    let male = app
        .get("/rollout", Some(r#"{"userID":"user-1","gender":"m"}"#), None)
        .await;

    assert_eq!(female.body, "female_value");
    assert_eq!(male.body, "default");
    // Rollout decisions send no impression.
    assert_eq!(app.event_keys(), vec!["pageview", "pageview"]);
}

#[tokio::test]
async fn serves_default_without_a_client() {
    let app = TestApp::empty();

    for path in ["/ab", "/feature", "/rollout"] {
        let response = app.get(path, Some(r#"{"userID":"var1"}"#), None).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, "default", "{path}");
    }
    assert!(app.event_keys().is_empty());
}

#[tokio::test]
async fn previous_client_keeps_serving_after_failed_fetch() {
    let app = TestApp::empty();
    let mut bodies = VecDeque::from([DATAFILE.to_owned(), String::new()]);
    let mut refresher = Refresher::new(
        move || -> Result<Snapshot, FetchError> {
            parse_snapshot(&bodies.pop_front().unwrap_or_default())
        },
        app.factory(),
        app.handle.clone(),
    );

    refresher.refresh().unwrap();
    assert!(refresher.refresh().is_err());

    let response = app.get("/ab", Some(r#"{"userID":"var1"}"#), None).await;
    assert_eq!(response.body, "variation_1");
}

#[tokio::test]
async fn health_needs_no_session() {
    let app = TestApp::empty();

    let response = app.get("/health", None, None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, "OK");
    assert!(response.cookie.is_none());
}
