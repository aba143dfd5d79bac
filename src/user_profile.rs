//! Sticky per-user experiment assignments.
use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use serde::{Deserialize, Serialize};

/// A saved assignment for one experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub variation_id: String,
}

impl Decision {
    pub fn new(variation_id: impl Into<String>) -> Decision {
        Decision {
            variation_id: variation_id.into(),
        }
    }
}

/// Experiment id to the variation the user was bucketed into.
pub type ExperimentBucketMap = HashMap<String, Decision>;

/// Lookup/save capability for user assignments.
///
/// The evaluation client consults `lookup` before bucketing and calls `save` after a new bucketing
/// decision, so that users keep their variation across datafile updates.
pub trait UserProfileService: Send + Sync {
    /// Return the assignments saved for `user_id`, or `None` if nothing was saved. Must not have
    /// side effects.
    fn lookup(&self, user_id: &str) -> Option<ExperimentBucketMap>;

    /// Replace any assignments saved for `user_id`.
    fn save(&self, user_id: &str, experiment_bucket_map: ExperimentBucketMap);
}

/// Process-wide in-memory [`UserProfileService`].
///
/// Records are never evicted or expired and there is no size bound: memory grows with the number
/// of distinct users seen by the process.
#[derive(Debug, Default)]
pub struct InMemoryUserProfileService {
    profiles: RwLock<HashMap<String, ExperimentBucketMap>>,
}

impl InMemoryUserProfileService {
    pub fn new() -> InMemoryUserProfileService {
        InMemoryUserProfileService::default()
    }

    /// Number of users with a saved record.
    pub fn len(&self) -> usize {
        // A writer can only panic between `insert` calls, which leaves the map consistent, so a
        // poisoned lock is still safe to read.
        self.profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl UserProfileService for InMemoryUserProfileService {
    fn lookup(&self, user_id: &str) -> Option<ExperimentBucketMap> {
        self.profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .cloned()
    }

    fn save(&self, user_id: &str, experiment_bucket_map: ExperimentBucketMap) {
        log::debug!(target: "abserve", user_id; "saving user profile");
        self.profiles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id.to_owned(), experiment_bucket_map);
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use super::{Decision, ExperimentBucketMap, InMemoryUserProfileService, UserProfileService};

    fn bucket_map(experiment_id: &str, variation_id: &str) -> ExperimentBucketMap {
        HashMap::from([(experiment_id.to_owned(), Decision::new(variation_id))])
    }

    #[test]
    fn save_then_lookup_round_trips() {
        let store = InMemoryUserProfileService::new();
        let map = bucket_map("exp_ab", "var_1");

        store.save("user", map.clone());

        assert_eq!(store.lookup("user"), Some(map));
    }

    #[test]
    fn lookup_of_unknown_user_is_none() {
        let store = InMemoryUserProfileService::new();

        assert_eq!(store.lookup("nobody"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn save_overwrites_previous_record() {
        let store = InMemoryUserProfileService::new();

        store.save("user", bucket_map("exp_ab", "var_1"));
        store.save("user", bucket_map("exp_other", "var_x"));

        assert_eq!(store.lookup("user"), Some(bucket_map("exp_other", "var_x")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn concurrent_saves_leave_exactly_one_record() {
        let store = Arc::new(InMemoryUserProfileService::new());
        let first = bucket_map("exp_ab", "var_1");
        let second = bucket_map("exp_ab", "var_2");

        let handles = [first.clone(), second.clone()].map(|map| {
            let store = store.clone();
            std::thread::spawn(move || {
                for _ in 0..100 {
                    store.save("user", map.clone());
                }
            })
        });
        for handle in handles {
            handle.join().unwrap();
        }

        let saved = store.lookup("user").unwrap();
        assert!(saved == first || saved == second, "unexpected record {saved:?}");
        assert_eq!(store.len(), 1);
    }
}
