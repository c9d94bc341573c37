//! The caller-supplied evaluation context.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Page the evaluation happens on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub url: Option<String>,
}

/// Request details the transport forwards to the expression language.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestInfo {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Input to a decision.
///
/// `id` and `user` come from the caller's POST body. `anonymous_id` is the
/// long-lived client-side identifier used for bucketing when no `id` is
/// supplied. `geo` and `request` are attached by the transport, not the
/// caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalInput {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub anonymous_id: Option<String>,
    #[serde(default)]
    pub user: Option<Value>,
    #[serde(default)]
    pub page: Page,
    #[serde(default)]
    pub geo: Option<Value>,
    #[serde(default)]
    pub request: Option<RequestInfo>,
}

impl EvalInput {
    /// The bucketing identity: `id`, else the anonymous id, else empty.
    /// Never synthesized; a random identity would break determinism.
    pub fn identity(&self) -> &str {
        self.id
            .as_deref()
            .or(self.anonymous_id.as_deref())
            .unwrap_or("")
    }

    /// The record expressions evaluate against:
    /// `{user, id, page, geo, request}`.
    pub fn context_record(&self) -> Value {
        json!({
            "id": self.id,
            "user": self.user.clone().unwrap_or(Value::Null),
            "page": { "url": self.page.url },
            "geo": self.geo.clone().unwrap_or(Value::Null),
            "request": {
                "headers": self
                    .request
                    .as_ref()
                    .map(|r| r.headers.clone())
                    .unwrap_or_default(),
            },
        })
    }
}
