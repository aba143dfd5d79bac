use std::cmp::Ordering;

use semver::Version;
use serde::Deserialize;
use serde_json::Value;

use crate::{datafile::ProjectConfig, AttributeValue, UserAttributes};

/// Parsed audience conditions.
///
/// Conditions are nested lists whose first element names the operator (`"and"`, `"or"`, `"not"`).
/// A list without an operator is treated as `"or"`. Leaves are [`Condition`]s.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionTree {
    And(Vec<ConditionTree>),
    Or(Vec<ConditionTree>),
    Not(Box<ConditionTree>),
    Leaf(Condition),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Condition {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "match", default)]
    match_type: MatchType,
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    #[default]
    Exact,
    Exists,
    Substring,
    Gt,
    Ge,
    Lt,
    Le,
    SemverEq,
    SemverGt,
    SemverGe,
    SemverLt,
    SemverLe,
    #[serde(other)]
    Unknown,
}

impl ConditionTree {
    /// Parse audience conditions, either already decoded or as a JSON-encoded string. Returns
    /// `None` if the conditions are malformed.
    pub fn parse(conditions: &Value) -> Option<ConditionTree> {
        match conditions {
            Value::String(encoded) => {
                let decoded: Value = serde_json::from_str(encoded).ok()?;
                ConditionTree::from_json(&decoded)
            }
            other => ConditionTree::from_json(other),
        }
    }

    fn from_json(value: &Value) -> Option<ConditionTree> {
        match value {
            Value::Array(items) => {
                let (operator, operands) = match items.first() {
                    Some(Value::String(operator)) => (operator.as_str(), &items[1..]),
                    _ => ("or", &items[..]),
                };
                let children = operands
                    .iter()
                    .map(ConditionTree::from_json)
                    .collect::<Option<Vec<_>>>()?;
                match operator {
                    "and" => Some(ConditionTree::And(children)),
                    "or" => Some(ConditionTree::Or(children)),
                    "not" => children
                        .into_iter()
                        .next()
                        .map(|child| ConditionTree::Not(Box::new(child))),
                    _ => None,
                }
            }
            Value::Object(_) => Condition::deserialize(value)
                .ok()
                .map(ConditionTree::Leaf),
            _ => None,
        }
    }

    /// Evaluate the tree against user attributes. Conditions that cannot be evaluated (missing
    /// attribute, type mismatch, unknown match type) never match.
    pub fn eval(&self, attributes: &UserAttributes) -> bool {
        self.try_eval(attributes).unwrap_or(false)
    }

    /// Three-valued evaluation: `None` means "unknown".
    fn try_eval(&self, attributes: &UserAttributes) -> Option<bool> {
        match self {
            ConditionTree::And(children) => {
                let mut unknown = false;
                for child in children {
                    match child.try_eval(attributes) {
                        Some(false) => return Some(false),
                        None => unknown = true,
                        Some(true) => {}
                    }
                }
                (!unknown).then_some(true)
            }
            ConditionTree::Or(children) => {
                let mut unknown = false;
                for child in children {
                    match child.try_eval(attributes) {
                        Some(true) => return Some(true),
                        None => unknown = true,
                        Some(false) => {}
                    }
                }
                (!unknown).then_some(false)
            }
            ConditionTree::Not(child) => child.try_eval(attributes).map(|matched| !matched),
            ConditionTree::Leaf(condition) => condition.try_eval(attributes),
        }
    }
}

impl Condition {
    fn try_eval(&self, attributes: &UserAttributes) -> Option<bool> {
        if self.kind != "custom_attribute" {
            return None;
        }
        let attribute = attributes.get(&self.name);

        match self.match_type {
            MatchType::Exists => Some(attribute.is_some_and(|v| !v.is_null())),

            MatchType::Exact => match (attribute?, &self.value) {
                (AttributeValue::String(a), Value::String(c)) => Some(a == c),
                (AttributeValue::Boolean(a), Value::Bool(c)) => Some(a == c),
                (AttributeValue::Number(a), Value::Number(c)) => Some(*a == c.as_f64()?),
                _ => None,
            },

            MatchType::Substring => match (attribute?, &self.value) {
                (AttributeValue::String(a), Value::String(c)) => Some(a.contains(c.as_str())),
                _ => None,
            },

            MatchType::Gt | MatchType::Ge | MatchType::Lt | MatchType::Le => {
                let attribute_value = match attribute? {
                    AttributeValue::Number(n) => *n,
                    _ => return None,
                };
                let condition_value = self.value.as_f64()?;
                let ordering = attribute_value.partial_cmp(&condition_value)?;
                Some(self.match_type.accepts(ordering))
            }

            MatchType::SemverEq
            | MatchType::SemverGt
            | MatchType::SemverGe
            | MatchType::SemverLt
            | MatchType::SemverLe => {
                let attribute_version = Version::parse(attribute?.as_str()?).ok()?;
                let condition_version = Version::parse(self.value.as_str()?).ok()?;
                Some(
                    self.match_type
                        .accepts(attribute_version.cmp(&condition_version)),
                )
            }

            MatchType::Unknown => None,
        }
    }
}

impl MatchType {
    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            MatchType::Gt | MatchType::SemverGt => ordering.is_gt(),
            MatchType::Ge | MatchType::SemverGe => ordering.is_ge(),
            MatchType::Lt | MatchType::SemverLt => ordering.is_lt(),
            MatchType::Le | MatchType::SemverLe => ordering.is_le(),
            MatchType::SemverEq => ordering.is_eq(),
            MatchType::Exact | MatchType::Exists | MatchType::Substring | MatchType::Unknown => {
                false
            }
        }
    }
}

/// An experiment without audiences admits everyone; otherwise any one audience must match.
/// Audience ids missing from the datafile never match.
pub(crate) fn matches_any_audience(
    config: &ProjectConfig,
    audience_ids: &[String],
    attributes: &UserAttributes,
) -> bool {
    audience_ids.is_empty()
        || audience_ids.iter().any(|id| {
            config
                .audience(id)
                .is_some_and(|conditions| conditions.eval(attributes))
        })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::ConditionTree;
    use crate::UserAttributes;

    fn tree(conditions: serde_json::Value) -> ConditionTree {
        ConditionTree::parse(&conditions).unwrap()
    }

    fn leaf(match_type: &str, value: serde_json::Value) -> ConditionTree {
        tree(json!({
            "name": "attr",
            "type": "custom_attribute",
            "match": match_type,
            "value": value,
        }))
    }

    fn attrs(value: impl Into<crate::AttributeValue>) -> UserAttributes {
        HashMap::from([("attr".to_owned(), value.into())])
    }

    #[test]
    fn exact_match() {
        assert!(leaf("exact", json!("f")).eval(&attrs("f")));
        assert!(!leaf("exact", json!("f")).eval(&attrs("m")));
        assert!(leaf("exact", json!(3)).eval(&attrs(3.0)));
        assert!(leaf("exact", json!(true)).eval(&attrs(true)));
        // type mismatch never matches
        assert!(!leaf("exact", json!("true")).eval(&attrs(true)));
    }

    #[test]
    fn match_type_defaults_to_exact() {
        let condition = tree(json!({"name": "attr", "type": "custom_attribute", "value": "f"}));
        assert!(condition.eval(&attrs("f")));
    }

    #[test]
    fn exists() {
        assert!(leaf("exists", json!(null)).eval(&attrs("anything")));
        assert!(!leaf("exists", json!(null)).eval(&attrs(crate::AttributeValue::Null)));
        assert!(!leaf("exists", json!(null)).eval(&HashMap::new()));
    }

    #[test]
    fn substring() {
        assert!(leaf("substring", json!("exam")).eval(&attrs("test@example.com")));
        assert!(!leaf("substring", json!("exam")).eval(&attrs("test@test.com")));
    }

    #[test]
    fn numeric_comparisons() {
        assert!(leaf("gt", json!(10)).eval(&attrs(11.0)));
        assert!(!leaf("gt", json!(10)).eval(&attrs(10.0)));
        assert!(leaf("ge", json!(10)).eval(&attrs(10.0)));
        assert!(leaf("lt", json!(10)).eval(&attrs(9.5)));
        assert!(leaf("le", json!(10)).eval(&attrs(10.0)));
        assert!(!leaf("lt", json!(10)).eval(&attrs("9")));
    }

    #[test]
    fn semver_comparisons() {
        assert!(leaf("semver_eq", json!("1.2.3")).eval(&attrs("1.2.3")));
        assert!(leaf("semver_gt", json!("1.2.3")).eval(&attrs("1.10.0")));
        assert!(leaf("semver_lt", json!("1.2.3")).eval(&attrs("1.2.2")));
        assert!(!leaf("semver_ge", json!("1.2.3")).eval(&attrs("not-a-version")));
    }

    #[test]
    fn unknown_match_type_never_matches() {
        assert!(!leaf("regex", json!(".*")).eval(&attrs("anything")));
    }

    #[test]
    fn serialized_conditions_are_decoded() {
        let conditions = json!(
            "[\"and\", [\"or\", [\"or\", {\"name\": \"attr\", \"type\": \"custom_attribute\", \"value\": \"f\"}]]]"
        );
        let tree = ConditionTree::parse(&conditions).unwrap();

        assert!(tree.eval(&attrs("f")));
        assert!(!tree.eval(&attrs("m")));
    }

    #[test]
    fn not_inverts_known_results_only() {
        let not_f = tree(json!(["not", {"name": "attr", "type": "custom_attribute", "value": "f"}]));

        assert!(not_f.eval(&attrs("m")));
        assert!(!not_f.eval(&attrs("f")));
        // missing attribute is unknown, and "not unknown" is still unknown
        assert!(!not_f.eval(&HashMap::new()));
    }

    #[test]
    fn and_or_three_valued() {
        let known = json!({"name": "attr", "type": "custom_attribute", "value": "f"});
        let unknown = json!({"name": "other", "type": "custom_attribute", "value": "x"});

        assert!(tree(json!(["or", known.clone(), unknown.clone()])).eval(&attrs("f")));
        assert!(!tree(json!(["and", known.clone(), unknown.clone()])).eval(&attrs("f")));
        assert!(!tree(json!(["and", known, unknown])).eval(&attrs("m")));
    }

    #[test]
    fn malformed_conditions_fail_to_parse() {
        assert!(ConditionTree::parse(&json!("not json")).is_none());
        assert!(ConditionTree::parse(&json!(["xor", []])).is_none());
        assert!(ConditionTree::parse(&json!(42)).is_none());
    }
}
