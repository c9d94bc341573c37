//! Flag and segment definitions, and the per-tenant document that holds
//! them.
//!
//! Wire format is camelCase JSON. `flags` and `segments` are ordered maps
//! so a stored document serializes deterministically; iteration order never
//! influences an evaluation result.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// A tenant is an `(app, env)` pair; each tenant owns one document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantKey {
    pub app: String,
    pub env: String,
}

impl TenantKey {
    pub const DEFAULT_APP: &'static str = "default";
    pub const DEFAULT_ENV: &'static str = "production";

    /// Build a tenant key; empty components fall back to the defaults.
    pub fn new(app: &str, env: &str) -> Self {
        let app = app.trim();
        let env = env.trim();
        Self {
            app: if app.is_empty() { Self::DEFAULT_APP } else { app }.to_string(),
            env: if env.is_empty() { Self::DEFAULT_ENV } else { env }.to_string(),
        }
    }

    /// The same app pointed at a different environment.
    pub fn with_env(&self, env: &str) -> Self {
        Self::new(&self.app, env)
    }

    /// Versioned persistence key, one document per tenant.
    pub fn storage_key(&self) -> String {
        format!("v1:{}:{}", self.app, self.env)
    }
}

impl Default for TenantKey {
    fn default() -> Self {
        Self::new(Self::DEFAULT_APP, Self::DEFAULT_ENV)
    }
}

impl std::fmt::Display for TenantKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.app, self.env)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagKind {
    Boolean,
    Payload,
    Variant,
}

/// One arm of a variant flag. Weights are individually 0..=100 and are not
/// required to sum to 100; identities past the total get no variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variation {
    pub id: String,
    pub weight: u8,
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// A scheduled firing clause of a progressive release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutStep {
    /// ISO-8601 timestamp the step activates at.
    pub start: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagDefinition {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: FlagKind,
    #[serde(default)]
    pub enabled: bool,
    /// AND-combined rule expressions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<String>,
    /// OR-combined segment references; each must exist in the tenant.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<String>,
    /// Base rollout percentage, consulted only when `rollouts` is empty.
    #[serde(default = "default_rollout")]
    pub rollout: u8,
    /// Progressive-release steps; once present they subsume both the base
    /// rollout and the flat segment check.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rollouts: Vec<RolloutStep>,
    /// Payload flags only. `None` means the field was absent; an explicit
    /// JSON `null` arrives as `Some(Value::Null)` and is a legal payload.
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub payload: Option<Value>,
    /// Variant flags only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variations: Vec<Variation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub is_trackable: bool,
}

fn default_rollout() -> u8 {
    100
}

/// Deserializer that keeps an explicit `null` distinguishable from an
/// absent field: a present field always becomes `Some`.
fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl FlagDefinition {
    /// Schema and referential-integrity checks applied at write time.
    pub fn validate(&self, segments: &BTreeMap<String, String>) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::EmptyFlagId);
        }
        if self.rollout > 100 {
            return Err(ValidationError::RolloutRange(self.rollout));
        }
        for (index, step) in self.rollouts.iter().enumerate() {
            if step.percentage.is_none() && step.segment.is_none() {
                return Err(ValidationError::EmptyStep(index));
            }
            if let Some(percentage) = step.percentage {
                if percentage > 100 {
                    return Err(ValidationError::StepPercentageRange { index, percentage });
                }
            }
        }
        // Only `segments` is held to referential integrity. A rollout step
        // may name a segment that does not (yet) exist; such a step fails at
        // evaluation time instead.
        for reference in &self.segments {
            if !segments.contains_key(reference) {
                return Err(ValidationError::UnknownSegment(reference.clone()));
            }
        }
        match self.kind {
            FlagKind::Boolean => {
                if self.payload.is_some() || !self.variations.is_empty() {
                    return Err(ValidationError::BooleanExtras);
                }
            }
            FlagKind::Payload => {
                if self.payload.is_none() {
                    return Err(ValidationError::MissingPayload);
                }
            }
            FlagKind::Variant => {
                if self.variations.len() < 2 {
                    return Err(ValidationError::TooFewVariations);
                }
                for variation in &self.variations {
                    if variation.id.trim().is_empty() {
                        return Err(ValidationError::EmptyVariationId);
                    }
                    if variation.weight > 100 {
                        return Err(ValidationError::WeightRange {
                            id: variation.id.clone(),
                            weight: variation.weight,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// The sole source of truth for evaluation within one tenant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantDocument {
    #[serde(default)]
    pub flags: BTreeMap<String, FlagDefinition>,
    #[serde(default)]
    pub segments: BTreeMap<String, String>,
}

impl TenantDocument {
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty() && self.segments.is_empty()
    }

    /// Remove a segment and strip it from every referencing flag, keeping
    /// referential integrity by construction. Returns false if the segment
    /// did not exist.
    pub fn remove_segment(&mut self, segment_id: &str) -> bool {
        if self.segments.remove(segment_id).is_none() {
            return false;
        }
        for flag in self.flags.values_mut() {
            flag.segments.retain(|reference| reference != segment_id);
        }
        true
    }
}
