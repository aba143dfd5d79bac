//! Decides which variation a user sees.
use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use crate::{
    audience::matches_any_audience,
    bucketer::{bucket, Sharder},
    datafile::{Experiment, FeatureFlag, ProjectConfig, Variation},
    user_profile::{Decision, UserProfileService},
    UserAttributes, BUCKETING_ID_ATTRIBUTE,
};

/// The user being evaluated.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UserContext<'a> {
    pub user_id: &'a str,
    pub attributes: &'a UserAttributes,
}

impl<'a> UserContext<'a> {
    /// `$opt_bucketing_id` replaces the user id for bucketing when it is a string.
    fn bucketing_id(&self) -> &'a str {
        match self.attributes.get(BUCKETING_ID_ATTRIBUTE) {
            Some(value) => value.as_str().unwrap_or_else(|| {
                log::warn!(target: "abserve", user_id = self.user_id; "bucketing id attribute is not a string, using user id");
                self.user_id
            }),
            None => self.user_id,
        }
    }
}

/// Runtime variation overrides, by user id then experiment id.
#[derive(Debug, Default)]
pub(crate) struct ForcedVariations {
    variations: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl ForcedVariations {
    pub fn set(&self, user_id: &str, experiment_id: &str, variation_id: Option<&str>) {
        let mut variations = self
            .variations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match variation_id {
            Some(variation_id) => {
                variations
                    .entry(user_id.to_owned())
                    .or_default()
                    .insert(experiment_id.to_owned(), variation_id.to_owned());
            }
            None => {
                if let Some(for_user) = variations.get_mut(user_id) {
                    for_user.remove(experiment_id);
                }
            }
        }
    }

    pub fn get(&self, user_id: &str, experiment_id: &str) -> Option<String> {
        self.variations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)?
            .get(experiment_id)
            .cloned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DecisionSource {
    FeatureTest,
    Rollout,
}

impl DecisionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionSource::FeatureTest => "feature-test",
            DecisionSource::Rollout => "rollout",
        }
    }
}

/// Outcome of a feature decision. `variation` is `None` when the user is in neither a feature
/// test nor a rollout rule.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FeatureDecision<'a> {
    pub experiment: Option<&'a Experiment>,
    pub variation: Option<&'a Variation>,
    pub source: DecisionSource,
}

impl FeatureDecision<'_> {
    pub fn is_enabled(&self) -> bool {
        self.variation
            .and_then(|variation| variation.feature_enabled)
            .unwrap_or(false)
    }
}

pub(crate) struct DecisionService<'a, S> {
    pub config: &'a ProjectConfig,
    pub user_profile_service: &'a dyn UserProfileService,
    pub forced_variations: &'a ForcedVariations,
    pub sharder: &'a S,
}

impl<'a, S: Sharder> DecisionService<'a, S> {
    /// Variation of `experiment` for `user`, in order of precedence: runtime forced variation,
    /// datafile whitelist, saved user profile, then audience check and bucketing. A new bucketing
    /// decision is saved to the user profile.
    pub fn get_variation(
        &self,
        experiment: &'a Experiment,
        user: UserContext<'_>,
    ) -> Option<&'a Variation> {
        if !experiment.is_running() {
            log::debug!(target: "abserve", experiment_key:display = experiment.key; "experiment is not running");
            return None;
        }

        if let Some(variation) = self.forced_variation(experiment, user) {
            return Some(variation);
        }

        if let Some(variation) = self.whitelisted_variation(experiment, user) {
            return Some(variation);
        }

        let profile = self.user_profile_service.lookup(user.user_id);
        if let Some(decision) = profile.as_ref().and_then(|p| p.get(&experiment.id)) {
            match experiment.variation_by_id(&decision.variation_id) {
                Some(variation) => {
                    log::debug!(target: "abserve",
                                user_id = user.user_id,
                                experiment_key:display = experiment.key,
                                variation_key:display = variation.key;
                                "using saved variation");
                    return Some(variation);
                }
                None => {
                    log::debug!(target: "abserve",
                                user_id = user.user_id,
                                variation_id:display = decision.variation_id;
                                "saved variation is no longer in the experiment");
                }
            }
        }

        if !matches_any_audience(self.config, &experiment.audience_ids, user.attributes) {
            log::debug!(target: "abserve",
                        user_id = user.user_id,
                        experiment_key:display = experiment.key;
                        "user does not meet experiment audience conditions");
            return None;
        }

        let variation = self.bucket_experiment(experiment, user)?;

        let mut profile = profile.unwrap_or_default();
        profile.insert(experiment.id.clone(), Decision::new(variation.id.clone()));
        self.user_profile_service.save(user.user_id, profile);

        Some(variation)
    }

    /// Feature tests are tried first, in datafile order, then the feature's rollout.
    pub fn get_feature_decision(
        &self,
        feature: &'a FeatureFlag,
        user: UserContext<'_>,
    ) -> FeatureDecision<'a> {
        for experiment_id in &feature.experiment_ids {
            let Some(experiment) = self.config.experiment_by_id(experiment_id) else {
                log::warn!(target: "abserve", experiment_id:display = experiment_id; "feature references unknown experiment");
                continue;
            };
            if let Some(variation) = self.get_variation(experiment, user) {
                return FeatureDecision {
                    experiment: Some(experiment),
                    variation: Some(variation),
                    source: DecisionSource::FeatureTest,
                };
            }
        }

        let (experiment, variation) = match self.rollout_decision(feature, user) {
            Some((rule, variation)) => (Some(rule), Some(variation)),
            None => (None, None),
        };
        FeatureDecision {
            experiment,
            variation,
            source: DecisionSource::Rollout,
        }
    }

    /// Targeted rules are tried in order. A user who matches a rule's audience but falls outside
    /// its traffic skips straight to the last, "everyone else", rule.
    fn rollout_decision(
        &self,
        feature: &'a FeatureFlag,
        user: UserContext<'_>,
    ) -> Option<(&'a Experiment, &'a Variation)> {
        if feature.rollout_id.is_empty() {
            return None;
        }
        let rollout = self.config.rollout(&feature.rollout_id)?;
        let (everyone_else, targeted) = rollout.experiments.split_last()?;

        for rule in targeted {
            if !rule.is_running()
                || !matches_any_audience(self.config, &rule.audience_ids, user.attributes)
            {
                continue;
            }
            if let Some(variation) = self.bucket_experiment(rule, user) {
                return Some((rule, variation));
            }
            break;
        }

        if everyone_else.is_running()
            && matches_any_audience(self.config, &everyone_else.audience_ids, user.attributes)
        {
            return self
                .bucket_experiment(everyone_else, user)
                .map(|variation| (everyone_else, variation));
        }

        None
    }

    fn forced_variation(
        &self,
        experiment: &'a Experiment,
        user: UserContext<'_>,
    ) -> Option<&'a Variation> {
        let variation_id = self.forced_variations.get(user.user_id, &experiment.id)?;
        let variation = experiment.variation_by_id(&variation_id)?;
        log::debug!(target: "abserve",
                    user_id = user.user_id,
                    experiment_key:display = experiment.key,
                    variation_key:display = variation.key;
                    "user is forced into variation");
        Some(variation)
    }

    fn whitelisted_variation(
        &self,
        experiment: &'a Experiment,
        user: UserContext<'_>,
    ) -> Option<&'a Variation> {
        let variation_key = experiment.forced_variations.get(user.user_id)?;
        let variation = experiment.variation_by_key(variation_key);
        if variation.is_none() {
            log::warn!(target: "abserve",
                       experiment_key:display = experiment.key,
                       variation_key:display = variation_key;
                       "whitelisted variation is not in the experiment");
        }
        variation
    }

    fn bucket_experiment(
        &self,
        experiment: &'a Experiment,
        user: UserContext<'_>,
    ) -> Option<&'a Variation> {
        let bucketing_id = user.bucketing_id();

        if let Some(group) = self.config.group_of(&experiment.id) {
            if group.is_random() {
                let picked = bucket(
                    self.sharder,
                    bucketing_id,
                    &group.id,
                    &group.traffic_allocation,
                );
                if picked != Some(experiment.id.as_str()) {
                    log::debug!(target: "abserve",
                                user_id = user.user_id,
                                experiment_key:display = experiment.key,
                                group_id:display = group.id;
                                "user is not in this experiment of the group");
                    return None;
                }
            }
        }

        let variation_id = bucket(
            self.sharder,
            bucketing_id,
            &experiment.id,
            &experiment.traffic_allocation,
        )?;
        experiment.variation_by_id(variation_id)
    }
}
