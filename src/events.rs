//! Impression and conversion events, and their delivery.
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use crate::{
    datafile::{EventDef, Experiment, ProjectConfig, Variation},
    UserAttributes, BUCKETING_ID_ATTRIBUTE,
};

/// Default endpoint that receives events.
pub const DEFAULT_EVENT_ENDPOINT: &str = "https://logx.optimizely.com/v1/events";

const CLIENT_NAME: &str = "abserve";
const ACTIVATE_EVENT_KEY: &str = "campaign_activated";
const BOT_FILTERING_ATTRIBUTE: &str = "$opt_bot_filtering";
const RESERVED_ATTRIBUTE_PREFIX: &str = "$opt_";

/// A ready-to-send event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub http_verb: String,
    pub url: String,
    pub params: Value,
}

/// Delivers events produced by the evaluation client.
///
/// `dispatch_event` is called on the evaluating thread before the decision is returned, so
/// implementations must not block.
pub trait EventDispatcher: Send + Sync {
    fn dispatch_event(&self, event: LogEvent);
}

impl<T: Fn(LogEvent) + Send + Sync> EventDispatcher for T {
    fn dispatch_event(&self, event: LogEvent) {
        self(event);
    }
}

/// Sends each event with a fire-and-forget HTTP request on the current tokio runtime.
///
/// There is no batching, retry or delivery confirmation. Events dispatched outside of a tokio
/// runtime are dropped with a warning.
#[derive(Default)]
pub struct HttpEventDispatcher {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
}

impl HttpEventDispatcher {
    pub fn new() -> HttpEventDispatcher {
        HttpEventDispatcher::default()
    }
}

impl EventDispatcher for HttpEventDispatcher {
    fn dispatch_event(&self, event: LogEvent) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                log::warn!(target: "abserve", url:display = event.url; "no async runtime to deliver event, dropping it");
                return;
            }
        };

        let client = self.client.clone();
        runtime.spawn(async move {
            let result = client
                .post(&event.url)
                .json(&event.params)
                .send()
                .await
                .and_then(|response| response.error_for_status());
            match result {
                Ok(response) => {
                    log::debug!(target: "abserve", status:display = response.status(); "event delivered");
                }
                Err(err) => {
                    log::warn!(target: "abserve", "failed to deliver event: {:?}", err.without_url());
                }
            }
        });
    }
}

/// Logs every event, then forwards it unmodified to the wrapped dispatcher.
pub struct LoggingEventRelay {
    inner: Arc<dyn EventDispatcher>,
}

impl LoggingEventRelay {
    pub fn new(inner: Arc<dyn EventDispatcher>) -> LoggingEventRelay {
        LoggingEventRelay { inner }
    }
}

impl EventDispatcher for LoggingEventRelay {
    fn dispatch_event(&self, event: LogEvent) {
        log::info!(target: "abserve", "sending event: {} {}", event.http_verb, event.url);
        self.inner.dispatch_event(event);
    }
}

/// Builds event payloads for a given datafile.
pub(crate) struct EventFactory<'a> {
    pub config: &'a ProjectConfig,
    pub endpoint: &'a str,
}

impl EventFactory<'_> {
    pub fn impression(
        &self,
        experiment: &Experiment,
        variation: &Variation,
        user_id: &str,
        attributes: &UserAttributes,
    ) -> LogEvent {
        let snapshot = json!({
            "decisions": [{
                "campaign_id": experiment.layer_id,
                "experiment_id": experiment.id,
                "variation_id": variation.id,
            }],
            "events": [{
                "entity_id": experiment.layer_id,
                "key": ACTIVATE_EVENT_KEY,
                "timestamp": Utc::now().timestamp_millis(),
                "uuid": uuid::Uuid::new_v4().to_string(),
            }],
        });
        self.log_event(user_id, attributes, snapshot)
    }

    pub fn conversion(
        &self,
        event: &EventDef,
        user_id: &str,
        attributes: &UserAttributes,
    ) -> LogEvent {
        let snapshot = json!({
            "events": [{
                "entity_id": event.id,
                "key": event.key,
                "timestamp": Utc::now().timestamp_millis(),
                "uuid": uuid::Uuid::new_v4().to_string(),
            }],
        });
        self.log_event(user_id, attributes, snapshot)
    }

    fn log_event(&self, user_id: &str, attributes: &UserAttributes, snapshot: Value) -> LogEvent {
        let params = json!({
            "account_id": self.config.account_id(),
            "project_id": self.config.project_id(),
            "revision": self.config.revision(),
            "client_name": CLIENT_NAME,
            "client_version": env!("CARGO_PKG_VERSION"),
            "anonymize_ip": self.config.anonymize_ip(),
            "enrich_decisions": true,
            "visitors": [{
                "visitor_id": user_id,
                "attributes": self.visitor_attributes(attributes),
                "snapshots": [snapshot],
            }],
        });

        LogEvent {
            http_verb: "POST".to_owned(),
            url: self.endpoint.to_owned(),
            params,
        }
    }

    /// Only attributes declared in the datafile are reported, plus reserved `$opt_` attributes.
    fn visitor_attributes(&self, attributes: &UserAttributes) -> Vec<Value> {
        let mut visitor_attributes: Vec<Value> = attributes
            .iter()
            .filter(|(_, value)| !value.is_null())
            .filter_map(|(key, value)| {
                let entity_id = match self.config.attribute_id(key) {
                    Some(id) => id,
                    None if key.starts_with(RESERVED_ATTRIBUTE_PREFIX) => key.as_str(),
                    None => return None,
                };
                Some(json!({
                    "entity_id": entity_id,
                    "key": key,
                    "type": "custom",
                    "value": value,
                }))
            })
            .filter(|attribute| attribute["key"] != BUCKETING_ID_ATTRIBUTE)
            .collect();

        if let Some(bot_filtering) = self.config.bot_filtering() {
            visitor_attributes.push(json!({
                "entity_id": BOT_FILTERING_ATTRIBUTE,
                "key": BOT_FILTERING_ATTRIBUTE,
                "type": "custom",
                "value": bot_filtering,
            }));
        }

        visitor_attributes
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    use serde_json::json;

    use super::{EventFactory, LogEvent, LoggingEventRelay};
    use crate::{datafile::ProjectConfig, EventDispatcher};

    fn config() -> ProjectConfig {
        let datafile = serde_json::from_str(include_str!("../tests/data/datafile.json")).unwrap();
        ProjectConfig::from_value(&datafile).unwrap()
    }

    #[test]
    fn relay_forwards_events_unmodified() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let relay = {
            let received = received.clone();
            LoggingEventRelay::new(Arc::new(move |event: LogEvent| {
                received.lock().unwrap().push(event);
            }))
        };
        let event = LogEvent {
            http_verb: "POST".to_owned(),
            url: "http://localhost/events".to_owned(),
            params: json!({"visitors": []}),
        };

        relay.dispatch_event(event.clone());

        assert_eq!(*received.lock().unwrap(), vec![event]);
    }

    #[test]
    fn impression_references_experiment_and_variation() {
        let config = config();
        let factory = EventFactory {
            config: &config,
            endpoint: "http://localhost/events",
        };
        let experiment = config.experiment("ab_test").unwrap();
        let variation = experiment.variation_by_key("variation_1").unwrap();
        let attributes = HashMap::from([
            ("gender".to_owned(), "f".into()),
            ("undeclared".to_owned(), "x".into()),
        ]);

        let event = factory.impression(experiment, variation, "user", &attributes);

        assert_eq!(event.http_verb, "POST");
        assert_eq!(event.url, "http://localhost/events");
        let visitor = &event.params["visitors"][0];
        assert_eq!(visitor["visitor_id"], "user");
        assert_eq!(
            visitor["attributes"],
            json!([{"entity_id": "attr_gender", "key": "gender", "type": "custom", "value": "f"}])
        );
        let decision = &visitor["snapshots"][0]["decisions"][0];
        assert_eq!(decision["experiment_id"], "exp_ab");
        assert_eq!(decision["variation_id"], "var_1");
        assert_eq!(
            visitor["snapshots"][0]["events"][0]["key"],
            "campaign_activated"
        );
        assert_eq!(event.params["revision"], "42");
    }

    #[test]
    fn conversion_references_event() {
        let config = config();
        let factory = EventFactory {
            config: &config,
            endpoint: "http://localhost/events",
        };
        let pageview = config.event("pageview").unwrap();

        let event = factory.conversion(pageview, "user", &HashMap::new());

        let snapshot = &event.params["visitors"][0]["snapshots"][0];
        assert!(snapshot.get("decisions").is_none());
        assert_eq!(snapshot["events"][0]["entity_id"], "evt_pageview");
        assert_eq!(snapshot["events"][0]["key"], "pageview");
    }
}
