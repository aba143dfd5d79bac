//! Datafile schema and its indexed form, [`ProjectConfig`], that the evaluation client reads.
use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{audience::ConditionTree, ClientConstructionError, EvaluationError};

const SUPPORTED_VERSIONS: &[&str] = &["2", "3", "4"];

/// Datafile as served by the remote configuration source.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datafile {
    version: String,
    #[serde(default)]
    revision: String,
    #[serde(default)]
    account_id: String,
    #[serde(default)]
    project_id: String,
    #[serde(default, rename = "anonymizeIP")]
    anonymize_ip: bool,
    #[serde(default)]
    bot_filtering: Option<bool>,
    #[serde(default)]
    experiments: Vec<TryParse<Experiment>>,
    #[serde(default)]
    groups: Vec<TryParse<Group>>,
    #[serde(default)]
    feature_flags: Vec<TryParse<FeatureFlag>>,
    #[serde(default)]
    rollouts: Vec<TryParse<Rollout>>,
    #[serde(default)]
    audiences: Vec<TryParse<Audience>>,
    #[serde(default)]
    typed_audiences: Vec<TryParse<Audience>>,
    #[serde(default)]
    attributes: Vec<TryParse<AttributeDef>>,
    #[serde(default)]
    events: Vec<TryParse<EventDef>>,
}

/// `TryParse` allows the subfield to fail parsing without failing the parsing of the whole
/// structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TryParse<T> {
    Parsed(T),
    ParseFailed(serde_json::Value),
}

impl<T> From<TryParse<T>> for Option<T> {
    fn from(value: TryParse<T>) -> Self {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub id: String,
    pub key: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub layer_id: String,
    #[serde(default)]
    pub audience_ids: Vec<String>,
    pub variations: Vec<Variation>,
    #[serde(default)]
    pub traffic_allocation: Vec<TrafficAllocation>,
    /// Datafile whitelist: user id to variation key.
    #[serde(default)]
    pub forced_variations: HashMap<String, String>,
}

fn default_status() -> String {
    "Running".to_owned()
}

impl Experiment {
    pub fn is_running(&self) -> bool {
        self.status == "Running"
    }

    pub fn variation_by_id(&self, id: &str) -> Option<&Variation> {
        self.variations.iter().find(|v| v.id == id)
    }

    pub fn variation_by_key(&self, key: &str) -> Option<&Variation> {
        self.variations.iter().find(|v| v.key == key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variation {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub feature_enabled: Option<bool>,
    #[serde(default)]
    pub variables: Vec<VariableUsage>,
}

impl Variation {
    pub fn variable_value(&self, variable_id: &str) -> Option<&str> {
        self.variables
            .iter()
            .find(|usage| usage.id == variable_id)
            .map(|usage| usage.value.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableUsage {
    pub id: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficAllocation {
    pub entity_id: String,
    pub end_of_range: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub policy: String,
    #[serde(default)]
    pub traffic_allocation: Vec<TrafficAllocation>,
    #[serde(default)]
    pub experiments: Vec<TryParse<Experiment>>,
}

/// Group membership of an experiment, kept after the group's experiments are flattened.
#[derive(Debug, Clone)]
pub struct ExperimentGroup {
    pub id: String,
    pub policy: String,
    pub traffic_allocation: Vec<TrafficAllocation>,
}

impl ExperimentGroup {
    /// Mutually exclusive groups pick one experiment per user before the experiment buckets.
    pub fn is_random(&self) -> bool {
        self.policy == "random"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlag {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub experiment_ids: Vec<String>,
    #[serde(default)]
    pub rollout_id: String,
    #[serde(default)]
    pub variables: Vec<FeatureVariable>,
}

impl FeatureFlag {
    pub fn variable(&self, key: &str) -> Option<&FeatureVariable> {
        self.variables.iter().find(|v| v.key == key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVariable {
    pub id: String,
    pub key: String,
    #[serde(rename = "type")]
    pub variable_type: String,
    pub default_value: String,
}

/// A rollout is an ordered list of targeting rules; the last one targets everyone else.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rollout {
    pub id: String,
    #[serde(default)]
    pub experiments: Vec<Experiment>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Audience {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Either a JSON-encoded string (`audiences`) or the tree itself (`typedAudiences`).
    pub conditions: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeDef {
    pub id: String,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDef {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub experiment_ids: Vec<String>,
}

/// Indexed datafile. Immutable once built; a new datafile produces a new `ProjectConfig`.
#[derive(Debug)]
pub struct ProjectConfig {
    revision: String,
    account_id: String,
    project_id: String,
    anonymize_ip: bool,
    bot_filtering: Option<bool>,
    experiments: HashMap<String, Experiment>,
    experiment_keys_by_id: HashMap<String, String>,
    groups_by_experiment_id: HashMap<String, ExperimentGroup>,
    features: HashMap<String, FeatureFlag>,
    rollouts: HashMap<String, Rollout>,
    audiences: HashMap<String, ConditionTree>,
    attribute_ids: HashMap<String, String>,
    events: HashMap<String, EventDef>,
}

impl ProjectConfig {
    /// Build a `ProjectConfig` from a datafile JSON document.
    pub fn from_value(value: &serde_json::Value) -> Result<ProjectConfig, ClientConstructionError> {
        let datafile = Datafile::deserialize(value)
            .map_err(|err| ClientConstructionError::InvalidDatafile(Arc::new(err)))?;
        ProjectConfig::compile(datafile)
    }

    fn compile(datafile: Datafile) -> Result<ProjectConfig, ClientConstructionError> {
        if !SUPPORTED_VERSIONS.contains(&datafile.version.as_str()) {
            return Err(ClientConstructionError::UnsupportedVersion(
                datafile.version,
            ));
        }

        let mut experiments: Vec<Experiment> = parsed(datafile.experiments, "experiment").collect();
        let mut groups_by_experiment_id = HashMap::new();
        for group in parsed(datafile.groups, "group") {
            let membership = ExperimentGroup {
                id: group.id,
                policy: group.policy,
                traffic_allocation: group.traffic_allocation,
            };
            for experiment in parsed(group.experiments, "grouped experiment") {
                groups_by_experiment_id.insert(experiment.id.clone(), membership.clone());
                experiments.push(experiment);
            }
        }

        let experiment_keys_by_id = experiments
            .iter()
            .map(|e| (e.id.clone(), e.key.clone()))
            .collect();
        let experiments = experiments
            .into_iter()
            .map(|e| (e.key.clone(), e))
            .collect();

        // Typed audiences come last so they take precedence over legacy audiences with the same id.
        let mut audiences = HashMap::new();
        for audience in parsed(datafile.audiences, "audience")
            .chain(parsed(datafile.typed_audiences, "typed audience"))
        {
            match ConditionTree::parse(&audience.conditions) {
                Some(tree) => {
                    audiences.insert(audience.id, tree);
                }
                None => {
                    log::warn!(target: "abserve",
                               audience_id:display = audience.id;
                               "skipping audience with unparseable conditions");
                }
            }
        }

        Ok(ProjectConfig {
            revision: datafile.revision,
            account_id: datafile.account_id,
            project_id: datafile.project_id,
            anonymize_ip: datafile.anonymize_ip,
            bot_filtering: datafile.bot_filtering,
            experiments,
            experiment_keys_by_id,
            groups_by_experiment_id,
            features: parsed(datafile.feature_flags, "feature flag")
                .map(|f| (f.key.clone(), f))
                .collect(),
            rollouts: parsed(datafile.rollouts, "rollout")
                .map(|r| (r.id.clone(), r))
                .collect(),
            audiences,
            attribute_ids: parsed(datafile.attributes, "attribute")
                .map(|a| (a.key, a.id))
                .collect(),
            events: parsed(datafile.events, "event")
                .map(|e| (e.key.clone(), e))
                .collect(),
        })
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn anonymize_ip(&self) -> bool {
        self.anonymize_ip
    }

    pub fn bot_filtering(&self) -> Option<bool> {
        self.bot_filtering
    }

    pub fn experiment(&self, key: &str) -> Result<&Experiment, EvaluationError> {
        self.experiments
            .get(key)
            .ok_or_else(|| EvaluationError::ExperimentNotFound(key.to_owned()))
    }

    pub fn experiment_by_id(&self, id: &str) -> Option<&Experiment> {
        self.experiment_keys_by_id
            .get(id)
            .and_then(|key| self.experiments.get(key))
    }

    pub fn group_of(&self, experiment_id: &str) -> Option<&ExperimentGroup> {
        self.groups_by_experiment_id.get(experiment_id)
    }

    pub fn feature(&self, key: &str) -> Result<&FeatureFlag, EvaluationError> {
        self.features
            .get(key)
            .ok_or_else(|| EvaluationError::FeatureNotFound(key.to_owned()))
    }

    pub fn rollout(&self, id: &str) -> Option<&Rollout> {
        self.rollouts.get(id)
    }

    pub fn audience(&self, id: &str) -> Option<&ConditionTree> {
        self.audiences.get(id)
    }

    pub fn attribute_id(&self, key: &str) -> Option<&str> {
        self.attribute_ids.get(key).map(String::as_str)
    }

    pub fn event(&self, key: &str) -> Result<&EventDef, EvaluationError> {
        self.events
            .get(key)
            .ok_or_else(|| EvaluationError::EventNotFound(key.to_owned()))
    }
}

/// Drop entries that failed to parse, logging each one.
fn parsed<T>(items: Vec<TryParse<T>>, kind: &'static str) -> impl Iterator<Item = T> {
    items.into_iter().filter_map(move |item| match item {
        TryParse::Parsed(value) => Some(value),
        TryParse::ParseFailed(raw) => {
            log::warn!(target: "abserve", kind, raw:serde; "skipping unparseable datafile entry");
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Group, ProjectConfig, TryParse};
    use crate::{ClientConstructionError, EvaluationError};

    fn fixture() -> serde_json::Value {
        serde_json::from_str(include_str!("../tests/data/datafile.json")).unwrap()
    }

    #[test]
    fn parse_fixture_datafile() {
        let config = ProjectConfig::from_value(&fixture()).unwrap();

        assert_eq!(config.revision(), "42");
        let ab_test = config.experiment("ab_test").unwrap();
        assert!(ab_test.is_running());
        assert_eq!(ab_test.variations.len(), 2);
        assert_eq!(config.experiment_by_id("exp_ab").unwrap().key, "ab_test");
        assert_eq!(config.feature("rollout").unwrap().rollout_id, "rollout_1");
        assert!(config.rollout("rollout_1").is_some());
        assert!(config.audience("aud_female").is_some());
        assert_eq!(config.attribute_id("gender"), Some("attr_gender"));
        assert_eq!(config.event("pageview").unwrap().id, "evt_pageview");
    }

    #[test]
    fn grouped_experiments_are_flattened() {
        let config = ProjectConfig::from_value(&fixture()).unwrap();

        let grouped = config.experiment("grouped_test").unwrap();
        let group = config.group_of(&grouped.id).unwrap();
        assert_eq!(group.id, "grp_1");
        assert!(group.is_random());
    }

    #[test]
    fn groups_clone_with_their_experiments() {
        let group: Group = serde_json::from_value(json!({
            "id": "grp_1",
            "policy": "random",
            "experiments": [
                fixture()["groups"][0]["experiments"][0].clone(),
                { "id": 5 }
            ]
        }))
        .unwrap();

        let copy = group.clone();

        assert_eq!(copy.id, "grp_1");
        assert!(matches!(
            copy.experiments.as_slice(),
            [TryParse::Parsed(experiment), TryParse::ParseFailed(_)] if experiment.key == "grouped_test"
        ));
    }

    #[test]
    fn unknown_keys_are_evaluation_errors() {
        let config = ProjectConfig::from_value(&fixture()).unwrap();

        assert_eq!(
            config.experiment("missing").unwrap_err(),
            EvaluationError::ExperimentNotFound("missing".to_owned())
        );
        assert!(matches!(
            config.feature("missing"),
            Err(EvaluationError::FeatureNotFound(_))
        ));
        assert!(matches!(
            config.event("missing"),
            Err(EvaluationError::EventNotFound(_))
        ));
    }

    #[test]
    fn rejects_unsupported_version() {
        let result = ProjectConfig::from_value(&json!({ "version": "99" }));

        assert!(matches!(
            result,
            Err(ClientConstructionError::UnsupportedVersion(v)) if v == "99"
        ));
    }

    #[test]
    fn rejects_document_without_version() {
        let result = ProjectConfig::from_value(&json!({ "experiments": [] }));

        assert!(matches!(
            result,
            Err(ClientConstructionError::InvalidDatafile(_))
        ));
    }

    #[test]
    fn parse_partially_if_unexpected() {
        let config = ProjectConfig::from_value(&json!({
            "version": "4",
            "experiments": [
                {
                    "id": "1",
                    "key": "success",
                    "variations": []
                },
                {
                    "id": "2",
                    "key": "fail_parsing",
                    "variations": "not-a-list"
                }
            ],
            "audiences": [
                { "id": "broken", "conditions": "not json" }
            ]
        }))
        .unwrap();

        assert!(config.experiment("success").is_ok());
        assert!(config.experiment("fail_parsing").is_err());
        assert!(config.audience("broken").is_none());
    }
}
