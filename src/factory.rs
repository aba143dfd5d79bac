use std::sync::Arc;

use crate::{
    events::DEFAULT_EVENT_ENDPOINT, fetcher::Snapshot, notification::DecisionListener, Client,
    ClientConstructionError, ClientOptions, ErrorHandler, EventDispatcher, HttpEventDispatcher,
    InMemoryUserProfileService, LoggingDecisionListener, LoggingErrorHandler, LoggingEventRelay,
    UserProfileService,
};

/// Builds evaluation clients from datafile snapshots.
///
/// Every client built by one factory shares the same user profile service, so sticky assignments
/// survive a datafile change. Events are always passed through a [`LoggingEventRelay`] before
/// they reach the delivery dispatcher.
pub struct ClientFactory {
    user_profile_service: Arc<dyn UserProfileService>,
    event_dispatcher: Arc<dyn EventDispatcher>,
    error_handler: Arc<dyn ErrorHandler>,
    listeners: Vec<Arc<dyn DecisionListener>>,
    event_endpoint: String,
}

impl Default for ClientFactory {
    fn default() -> ClientFactory {
        ClientFactory {
            user_profile_service: Arc::new(InMemoryUserProfileService::new()),
            event_dispatcher: Arc::new(HttpEventDispatcher::new()),
            error_handler: Arc::new(LoggingErrorHandler),
            listeners: vec![Arc::new(LoggingDecisionListener)],
            event_endpoint: DEFAULT_EVENT_ENDPOINT.to_owned(),
        }
    }
}

impl ClientFactory {
    pub fn new() -> ClientFactory {
        ClientFactory::default()
    }

    pub fn with_user_profile_service(
        mut self,
        user_profile_service: Arc<dyn UserProfileService>,
    ) -> ClientFactory {
        self.user_profile_service = user_profile_service;
        self
    }

    /// Dispatcher that delivers events after they have been logged.
    pub fn with_event_dispatcher(mut self, event_dispatcher: Arc<dyn EventDispatcher>) -> ClientFactory {
        self.event_dispatcher = event_dispatcher;
        self
    }

    pub fn with_error_handler(mut self, error_handler: Arc<dyn ErrorHandler>) -> ClientFactory {
        self.error_handler = error_handler;
        self
    }

    /// Replace the decision listeners registered on every new client.
    pub fn with_decision_listeners(
        mut self,
        listeners: Vec<Arc<dyn DecisionListener>>,
    ) -> ClientFactory {
        self.listeners = listeners;
        self
    }

    pub fn with_event_endpoint(mut self, event_endpoint: impl Into<String>) -> ClientFactory {
        self.event_endpoint = event_endpoint.into();
        self
    }

    pub fn user_profile_service(&self) -> &Arc<dyn UserProfileService> {
        &self.user_profile_service
    }

    /// Build a new client for `snapshot`.
    pub fn build(&self, snapshot: &Snapshot) -> Result<Client, ClientConstructionError> {
        let options = ClientOptions {
            user_profile_service: self.user_profile_service.clone(),
            event_dispatcher: Arc::new(LoggingEventRelay::new(self.event_dispatcher.clone())),
            error_handler: self.error_handler.clone(),
            event_endpoint: self.event_endpoint.clone(),
        };

        let client = Client::from_datafile(snapshot.as_value(), options)?;
        for listener in &self.listeners {
            client
                .notification_center()
                .add_decision_listener(listener.clone());
        }
        Ok(client)
    }
}
