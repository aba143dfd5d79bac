//! Per-request user identity.
use std::collections::HashMap;

use rand::Rng;
use serde::Deserialize;

use crate::{session::Session, AttributeValue, UserAttributes};

const GENDER_ATTRIBUTE: &str = "gender";
const RANDOM_USER_ID_LEN: usize = 16;

/// Identity fields a client may send in a JSON request body.
#[derive(Debug, Default, Deserialize)]
pub struct IdentityPayload {
    #[serde(default, rename = "userID")]
    user_id: Option<PayloadValue>,
    #[serde(default)]
    gender: Option<PayloadValue>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PayloadValue {
    String(String),
    Number(serde_json::Number),
    Other(serde_json::Value),
}

impl PayloadValue {
    /// Empty strings and non-scalar values count as absent.
    fn into_string(self) -> Option<String> {
        match self {
            PayloadValue::String(s) if !s.is_empty() => Some(s),
            PayloadValue::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl IdentityPayload {
    /// Parse a request body. A body that does not parse yields an empty payload.
    pub fn from_body(body: &[u8]) -> IdentityPayload {
        serde_json::from_slice(body).unwrap_or_default()
    }
}

/// The user a request is evaluated for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub gender: String,
}

impl Identity {
    /// Resolve the identity of a request.
    ///
    /// The user id comes from the payload, then the session, then is generated at random. Gender
    /// comes from the payload or is picked at random.
    pub fn resolve(
        payload: IdentityPayload,
        session: Option<&Session>,
        rng: &mut impl Rng,
    ) -> Identity {
        let gender = match payload.gender.and_then(PayloadValue::into_string) {
            Some(gender) => gender,
            None => {
                let gender = if rng.gen_bool(0.5) { "f" } else { "m" };
                log::debug!(target: "abserve", gender; "generated random gender");
                gender.to_owned()
            }
        };

        let user_id = match payload.user_id.and_then(PayloadValue::into_string) {
            Some(user_id) => user_id,
            None => match session.and_then(|session| session.user_id.clone()) {
                Some(user_id) => {
                    log::debug!(target: "abserve", user_id:display = user_id; "using user from session");
                    user_id
                }
                None => {
                    let user_id = random_user_id(rng);
                    log::debug!(target: "abserve", user_id:display = user_id; "generated random user id");
                    user_id
                }
            },
        };

        Identity { user_id, gender }
    }

    /// Attributes passed to the evaluation client.
    pub fn attributes(&self) -> UserAttributes {
        HashMap::from([(
            GENDER_ATTRIBUTE.to_owned(),
            AttributeValue::from(self.gender.as_str()),
        )])
    }
}

fn random_user_id(rng: &mut impl Rng) -> String {
    (0..RANDOM_USER_ID_LEN)
        .map(|_| char::from(b'0' + rng.gen_range(0..10)))
        .collect()
}
