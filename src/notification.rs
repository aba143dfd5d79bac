//! Decision observers.
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, PoisonError, RwLock,
    },
};

use serde::Serialize;

use crate::UserAttributes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionType {
    AbTest,
    Feature,
    FeatureVariable,
}

impl fmt::Display for DecisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DecisionType::AbTest => "ab-test",
            DecisionType::Feature => "feature",
            DecisionType::FeatureVariable => "feature-variable",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionNotification {
    #[serde(rename = "type")]
    pub decision_type: DecisionType,
    pub user_id: String,
    pub attributes: UserAttributes,
    pub decision_info: serde_json::Value,
}

/// Observer invoked on every decision made by the evaluation client.
///
/// Listeners are called synchronously on the evaluating thread and cannot influence the decision,
/// so they should return quickly.
pub trait DecisionListener: Send + Sync {
    fn on_decision(&self, notification: &DecisionNotification);
}

impl<T: Fn(&DecisionNotification) + Send + Sync> DecisionListener for T {
    fn on_decision(&self, notification: &DecisionNotification) {
        self(notification);
    }
}

/// Logs every decision.
pub struct LoggingDecisionListener;

impl DecisionListener for LoggingDecisionListener {
    fn on_decision(&self, notification: &DecisionNotification) {
        log::info!(target: "abserve",
                   user_id:display = notification.user_id,
                   decision_info:serde = notification.decision_info;
                   "decision for {}", notification.decision_type);
    }
}

/// Handle returned by [`NotificationCenter::add_decision_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub struct NotificationCenter {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn DecisionListener>)>>,
}

impl NotificationCenter {
    pub fn new() -> NotificationCenter {
        NotificationCenter::default()
    }

    pub fn add_decision_listener(&self, listener: Arc<dyn DecisionListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    /// Returns `false` if no listener with this id is registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn clear(&self) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn notify(&self, notification: &DecisionNotification) {
        // Listeners are called outside of the lock so that a listener may add or remove listeners.
        let listeners: Vec<_> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in listeners {
            listener.on_decision(notification);
        }
    }
}
