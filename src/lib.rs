//! Deterministic feature-flag evaluation.
//!
//! The engine resolves, for a caller context, which flags fire and what
//! value each yields. Bucketing is pinned to FNV-1a 32-bit so a given
//! identity gets the same answer across calls, processes and regions.
//! Rules and segments are written in a small sandboxed expression language
//! over the record `{user, id, page, geo, request}`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

pub mod ast;
pub mod context;
pub mod decision;
pub mod definition;
pub mod error;
pub mod eval;
pub mod hash;
pub mod parse;

pub use context::{EvalInput, Page, RequestInfo};
pub use decision::{decide, default_result, FlagResult};
pub use definition::{
    FlagDefinition, FlagKind, RolloutStep, TenantDocument, TenantKey, Variation,
};
pub use error::{ExprError, ValidationError};

/// The evaluation facade a transport layer calls.
///
/// Holds the compiled-expression cache; everything else is passed per call,
/// so one engine serves every tenant concurrently.
pub struct Engine {
    exprs: eval::ExprCache,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            exprs: eval::ExprCache::new(),
        }
    }

    /// Decide a single flag.
    ///
    /// `now` fixes the time reading for the whole decision; pass `None` to
    /// freeze the wall clock once at entry. Every rule, segment and rollout
    /// step inside the decision observes the same instant.
    pub fn evaluate(
        &self,
        flag: &FlagDefinition,
        segments: &BTreeMap<String, String>,
        input: &EvalInput,
        now: Option<DateTime<Utc>>,
    ) -> FlagResult {
        let now_ms = now.unwrap_or_else(Utc::now).timestamp_millis();
        let record = input.context_record();
        decision::decide(flag, segments, &record, input.identity(), now_ms, &self.exprs)
    }

    /// Decide every flag in a tenant document under one frozen time
    /// reading. A misbehaving rule only affects its own flag.
    pub fn evaluate_all(
        &self,
        document: &TenantDocument,
        input: &EvalInput,
        now: Option<DateTime<Utc>>,
    ) -> BTreeMap<String, FlagResult> {
        let now_ms = now.unwrap_or_else(Utc::now).timestamp_millis();
        let record = input.context_record();
        let identity = input.identity();
        document
            .flags
            .iter()
            .map(|(id, flag)| {
                (
                    id.clone(),
                    decision::decide(
                        flag,
                        &document.segments,
                        &record,
                        identity,
                        now_ms,
                        &self.exprs,
                    ),
                )
            })
            .collect()
    }

    /// Parse an expression through the engine's cache, reporting the error
    /// if it is malformed. Lets management surfaces reject bad rules at
    /// write time with the exact parser the evaluator uses.
    pub fn check_expression(&self, text: &str) -> Result<(), ExprError> {
        match self.exprs.compiled(text).as_ref() {
            Ok(_) => Ok(()),
            Err(e) => Err(e.clone()),
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
