//! The flag decision procedure: a pure function of
//! `(definition, segments, input, now)`.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::definition::{FlagDefinition, FlagKind, RolloutStep};
use crate::eval::{parse_timestamp_ms, EvalScope, ExprCache};
use crate::hash::{choose_variant, in_rollout};

/// Outcome of one flag decision. `is_eval` is true when the flag fired.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagResult {
    #[serde(rename = "type")]
    pub kind: FlagKind,
    pub result: Value,
    pub is_eval: bool,
}

/// The negative-branch result per flag type: booleans read false, payload
/// flags read null, variant flags read their first variation.
pub fn default_result(flag: &FlagDefinition) -> FlagResult {
    let result = match flag.kind {
        FlagKind::Boolean => Value::Bool(false),
        FlagKind::Payload => Value::Null,
        FlagKind::Variant => flag
            .variations
            .first()
            .map(|v| {
                v.payload
                    .clone()
                    .unwrap_or_else(|| Value::String(v.id.clone()))
            })
            .unwrap_or(Value::Null),
    };
    FlagResult {
        kind: flag.kind,
        result,
        is_eval: false,
    }
}

/// Decide one flag. Every predicate short-circuits to the default result on
/// first failure; expression failures are contained and count as false.
pub fn decide(
    flag: &FlagDefinition,
    segments: &BTreeMap<String, String>,
    record: &Value,
    identity: &str,
    now_ms: i64,
    exprs: &ExprCache,
) -> FlagResult {
    let scope = EvalScope {
        root: record,
        now_ms,
    };

    if !flag.enabled {
        return default_result(flag);
    }

    for rule in &flag.rules {
        if !exprs.rule_passes(rule, &scope) {
            return default_result(flag);
        }
    }

    if flag.rollouts.is_empty() {
        // The flat segment OR only applies without rollout steps; steps
        // carry their own segment clauses and subsume it.
        if !flag.segments.is_empty() {
            let any_segment = flag.segments.iter().any(|segment_id| {
                segments
                    .get(segment_id)
                    .is_some_and(|rule| exprs.rule_passes(rule, &scope))
            });
            if !any_segment {
                return default_result(flag);
            }
        }
        if !in_rollout(identity, &flag.id, flag.rollout) {
            return default_result(flag);
        }
    } else if !eval_steps(flag, segments, &scope, identity, now_ms, exprs) {
        return default_result(flag);
    }

    fire(flag, identity)
}

fn fire(flag: &FlagDefinition, identity: &str) -> FlagResult {
    let result = match flag.kind {
        FlagKind::Boolean => Value::Bool(true),
        FlagKind::Payload => flag.payload.clone().unwrap_or(Value::Null),
        FlagKind::Variant => {
            match choose_variant(identity, &flag.id, &flag.variations) {
                Some(variation) => variation
                    .payload
                    .clone()
                    .unwrap_or_else(|| Value::String(variation.id.clone())),
                // Weights sum below 100: this identity gets no variant.
                None => return default_result(flag),
            }
        }
    };
    FlagResult {
        kind: flag.kind,
        result,
        is_eval: true,
    }
}

/// Walk the rollout steps in declared order; the first passing step fires
/// and later steps are never consulted.
fn eval_steps(
    flag: &FlagDefinition,
    segments: &BTreeMap<String, String>,
    scope: &EvalScope,
    identity: &str,
    now_ms: i64,
    exprs: &ExprCache,
) -> bool {
    flag.rollouts
        .iter()
        .any(|step| step_passes(step, flag, segments, scope, identity, now_ms, exprs))
}

fn step_passes(
    step: &RolloutStep,
    flag: &FlagDefinition,
    segments: &BTreeMap<String, String>,
    scope: &EvalScope,
    identity: &str,
    now_ms: i64,
    exprs: &ExprCache,
) -> bool {
    let Some(start_ms) = parse_timestamp_ms(&step.start) else {
        return false;
    };
    if now_ms < start_ms {
        return false;
    }
    if step.segment.is_none() && step.percentage.is_none() {
        return false;
    }
    if let Some(segment_id) = &step.segment {
        // A dangling reference fails the step; it never throws.
        let passes = segments
            .get(segment_id)
            .is_some_and(|rule| exprs.rule_passes(rule, scope));
        if !passes {
            return false;
        }
    }
    if let Some(percentage) = step.percentage {
        if !in_rollout(identity, &flag.id, percentage) {
            return false;
        }
    }
    true
}
