use std::sync::Arc;

use serde_json::json;

use crate::{
    bucketer::Md5Sharder,
    datafile::ProjectConfig,
    decision::{DecisionService, DecisionSource, FeatureDecision, ForcedVariations, UserContext},
    error_handler::NoopErrorHandler,
    events::{EventFactory, LogEvent, DEFAULT_EVENT_ENDPOINT},
    notification::{DecisionNotification, DecisionType, NotificationCenter},
    ClientConstructionError, Error, ErrorHandler, EvaluationError, EventDispatcher,
    InMemoryUserProfileService, UserAttributes, UserProfileService,
};

/// Collaborators wired into a [`Client`].
pub struct ClientOptions {
    pub user_profile_service: Arc<dyn UserProfileService>,
    pub event_dispatcher: Arc<dyn EventDispatcher>,
    pub error_handler: Arc<dyn ErrorHandler>,
    /// URL that events are sent to.
    pub event_endpoint: String,
}

impl Default for ClientOptions {
    /// In-memory user profiles, and events and errors discarded.
    fn default() -> ClientOptions {
        ClientOptions {
            user_profile_service: Arc::new(InMemoryUserProfileService::new()),
            event_dispatcher: Arc::new(|_event: LogEvent| {}),
            error_handler: Arc::new(NoopErrorHandler),
            event_endpoint: DEFAULT_EVENT_ENDPOINT.to_owned(),
        }
    }
}

/// An evaluation client bound to one datafile.
///
/// A `Client` never changes its datafile: a new datafile means a new `Client`. Runtime forced
/// variations belong to the client and are gone once it is replaced.
///
/// No method returns an error. Errors are reported to the [`ErrorHandler`] and the caller receives
/// a fallback (`None` or `false`).
///
/// # Examples
/// ```
/// # use abserve::{Client, ClientOptions};
/// let datafile = serde_json::json!({ "version": "4" });
/// let client = Client::from_datafile(&datafile, ClientOptions::default()).unwrap();
/// assert_eq!(client.activate("ab_test", "user", &Default::default()), None);
/// ```
pub struct Client {
    config: ProjectConfig,
    options: ClientOptions,
    notification_center: NotificationCenter,
    forced_variations: ForcedVariations,
}

impl Client {
    /// Build a client from a datafile document.
    pub fn from_datafile(
        datafile: &serde_json::Value,
        options: ClientOptions,
    ) -> Result<Client, ClientConstructionError> {
        let config = ProjectConfig::from_value(datafile)?;
        Ok(Client {
            config,
            options,
            notification_center: NotificationCenter::new(),
            forced_variations: ForcedVariations::default(),
        })
    }

    /// Revision of the datafile this client was built from.
    pub fn revision(&self) -> &str {
        self.config.revision()
    }

    pub fn notification_center(&self) -> &NotificationCenter {
        &self.notification_center
    }

    /// Decide the variation of a running experiment and send an impression event for it.
    pub fn activate(
        &self,
        experiment_key: &str,
        user_id: &str,
        attributes: &UserAttributes,
    ) -> Option<String> {
        let user = UserContext {
            user_id,
            attributes,
        };
        let experiment = self.ok_or_report(self.config.experiment(experiment_key))?;
        let variation = self.decision_service().get_variation(experiment, user);

        if let Some(variation) = variation {
            log::info!(target: "abserve",
                       user_id,
                       experiment_key,
                       variation_key:display = variation.key;
                       "activating user");
            self.dispatch(self.event_factory().impression(
                experiment, variation, user_id, attributes,
            ));
        }

        self.notify(
            DecisionType::AbTest,
            user,
            json!({
                "experimentKey": experiment_key,
                "variationKey": variation.map(|v| &v.key),
            }),
        );
        variation.map(|variation| variation.key.clone())
    }

    /// Same decision as [`Client::activate`] without sending an impression.
    pub fn get_variation(
        &self,
        experiment_key: &str,
        user_id: &str,
        attributes: &UserAttributes,
    ) -> Option<String> {
        let user = UserContext {
            user_id,
            attributes,
        };
        let experiment = self.ok_or_report(self.config.experiment(experiment_key))?;
        let variation = self.decision_service().get_variation(experiment, user);

        self.notify(
            DecisionType::AbTest,
            user,
            json!({
                "experimentKey": experiment_key,
                "variationKey": variation.map(|v| &v.key),
            }),
        );
        variation.map(|variation| variation.key.clone())
    }

    /// Force `user_id` into `variation_key` of an experiment, bypassing bucketing. `None` clears
    /// the override. Returns `false` if the experiment or variation is unknown.
    pub fn set_forced_variation(
        &self,
        experiment_key: &str,
        user_id: &str,
        variation_key: Option<&str>,
    ) -> bool {
        let Some(experiment) = self.ok_or_report(self.config.experiment(experiment_key)) else {
            return false;
        };

        let variation_id = match variation_key {
            Some(variation_key) => {
                let variation = experiment.variation_by_key(variation_key).ok_or_else(|| {
                    EvaluationError::VariationNotFound {
                        experiment_key: experiment_key.to_owned(),
                        variation_key: variation_key.to_owned(),
                    }
                });
                let Some(variation) = self.ok_or_report(variation) else {
                    return false;
                };
                Some(variation.id.as_str())
            }
            None => None,
        };

        log::debug!(target: "abserve", user_id, experiment_key, variation_key:? = variation_key; "setting forced variation");
        self.forced_variations
            .set(user_id, &experiment.id, variation_id);
        true
    }

    pub fn get_forced_variation(&self, experiment_key: &str, user_id: &str) -> Option<String> {
        let experiment = self.ok_or_report(self.config.experiment(experiment_key))?;
        let variation_id = self.forced_variations.get(user_id, &experiment.id)?;
        experiment
            .variation_by_id(&variation_id)
            .map(|variation| variation.key.clone())
    }

    /// Whether the feature is on for the user. Sends an impression when the decision comes from a
    /// feature test.
    pub fn is_feature_enabled(
        &self,
        feature_key: &str,
        user_id: &str,
        attributes: &UserAttributes,
    ) -> bool {
        let user = UserContext {
            user_id,
            attributes,
        };
        let Some(feature) = self.ok_or_report(self.config.feature(feature_key)) else {
            return false;
        };
        let decision = self.decision_service().get_feature_decision(feature, user);
        let enabled = decision.is_enabled();

        if let (Some(experiment), Some(variation), DecisionSource::FeatureTest) =
            (decision.experiment, decision.variation, decision.source)
        {
            self.dispatch(self.event_factory().impression(
                experiment, variation, user_id, attributes,
            ));
        }

        log::info!(target: "abserve", user_id, feature_key, enabled; "evaluated feature");
        self.notify(
            DecisionType::Feature,
            user,
            json!({
                "featureKey": feature_key,
                "featureEnabled": enabled,
                "source": decision.source.as_str(),
                "sourceInfo": source_info(&decision),
            }),
        );
        enabled
    }

    /// Value of a string feature variable for the user: the decided variation's value when the
    /// feature is on, the variable default otherwise.
    pub fn get_feature_variable_string(
        &self,
        feature_key: &str,
        variable_key: &str,
        user_id: &str,
        attributes: &UserAttributes,
    ) -> Option<String> {
        const STRING_TYPE: &str = "string";

        let user = UserContext {
            user_id,
            attributes,
        };
        let feature = self.ok_or_report(self.config.feature(feature_key))?;
        let variable = self.ok_or_report(feature.variable(variable_key).ok_or_else(|| {
            EvaluationError::VariableNotFound {
                feature_key: feature_key.to_owned(),
                variable_key: variable_key.to_owned(),
            }
        }))?;
        if variable.variable_type != STRING_TYPE {
            self.report(EvaluationError::VariableTypeMismatch {
                variable_key: variable_key.to_owned(),
                expected: STRING_TYPE,
                actual: variable.variable_type.clone(),
            });
            return None;
        }

        let decision = self.decision_service().get_feature_decision(feature, user);
        let enabled = decision.is_enabled();
        let value = decision
            .variation
            .filter(|_| enabled)
            .and_then(|variation| variation.variable_value(&variable.id))
            .unwrap_or(&variable.default_value)
            .to_owned();

        self.notify(
            DecisionType::FeatureVariable,
            user,
            json!({
                "featureKey": feature_key,
                "featureEnabled": enabled,
                "source": decision.source.as_str(),
                "variableKey": variable_key,
                "variableType": variable.variable_type,
                "variableValue": value,
                "sourceInfo": source_info(&decision),
            }),
        );
        Some(value)
    }

    /// Send a conversion event for `event_key`.
    pub fn track(&self, event_key: &str, user_id: &str, attributes: &UserAttributes) {
        let Some(event) = self.ok_or_report(self.config.event(event_key)) else {
            return;
        };
        log::info!(target: "abserve", user_id, event_key; "tracking event");
        self.dispatch(self.event_factory().conversion(event, user_id, attributes));
    }

    fn decision_service(&self) -> DecisionService<'_, Md5Sharder> {
        DecisionService {
            config: &self.config,
            user_profile_service: self.options.user_profile_service.as_ref(),
            forced_variations: &self.forced_variations,
            sharder: &Md5Sharder,
        }
    }

    fn event_factory(&self) -> EventFactory<'_> {
        EventFactory {
            config: &self.config,
            endpoint: &self.options.event_endpoint,
        }
    }

    fn dispatch(&self, event: LogEvent) {
        self.options.event_dispatcher.dispatch_event(event);
    }

    fn notify(&self, decision_type: DecisionType, user: UserContext<'_>, info: serde_json::Value) {
        self.notification_center.notify(&DecisionNotification {
            decision_type,
            user_id: user.user_id.to_owned(),
            attributes: user.attributes.clone(),
            decision_info: info,
        });
    }

    fn report(&self, error: EvaluationError) {
        self.options
            .error_handler
            .handle_error(&Error::Evaluation(error));
    }

    fn ok_or_report<T>(&self, result: Result<T, EvaluationError>) -> Option<T> {
        result.map_err(|err| self.report(err)).ok()
    }
}

fn source_info(decision: &FeatureDecision<'_>) -> serde_json::Value {
    match (decision.experiment, decision.variation) {
        (Some(experiment), Some(variation)) => json!({
            "experimentKey": experiment.key,
            "variationKey": variation.key,
        }),
        _ => json!({}),
    }
}
