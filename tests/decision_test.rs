use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use flagstone::{
    Engine, EvalInput, FlagDefinition, FlagKind, FlagResult, RolloutStep, TenantDocument,
    Variation,
};

fn flag(id: &str, kind: FlagKind) -> FlagDefinition {
    FlagDefinition {
        id: id.to_string(),
        kind,
        enabled: true,
        rules: Vec::new(),
        segments: Vec::new(),
        rollout: 100,
        rollouts: Vec::new(),
        payload: None,
        variations: Vec::new(),
        label: None,
        description: None,
        is_trackable: false,
    }
}

fn variation(id: &str, weight: u8) -> Variation {
    Variation {
        id: id.to_string(),
        weight,
        payload: None,
        label: None,
    }
}

fn step(start: &str, percentage: Option<u8>, segment: Option<&str>) -> RolloutStep {
    RolloutStep {
        start: start.to_string(),
        percentage,
        segment: segment.map(str::to_string),
    }
}

fn input(id: &str, user: Value) -> EvalInput {
    EvalInput {
        id: Some(id.to_string()),
        user: Some(user),
        ..EvalInput::default()
    }
}

fn at(timestamp: &str) -> Option<DateTime<Utc>> {
    Some(
        DateTime::parse_from_rfc3339(timestamp)
            .unwrap()
            .with_timezone(&Utc),
    )
}

fn no_segments() -> BTreeMap<String, String> {
    BTreeMap::new()
}

fn fired(result: &FlagResult) -> bool {
    result.is_eval
}

// ── Scenario 1: pinned buckets drive a 50% rollout ──────────────────────

#[test]
fn percentage_rollout_follows_pinned_buckets() {
    let mut dashboard = flag("new-dashboard", FlagKind::Boolean);
    dashboard.rollout = 50;
    let engine = Engine::new();

    // bucket("user-456", "new-dashboard") == 34 <= 50
    let result = engine.evaluate(&dashboard, &no_segments(), &input("user-456", json!({})), None);
    assert_eq!(result.result, json!(true));
    assert!(fired(&result));

    // bucket("user-123", "new-dashboard") == 95 > 50
    let result = engine.evaluate(&dashboard, &no_segments(), &input("user-123", json!({})), None);
    assert_eq!(result.result, json!(false));
    assert!(!fired(&result));
}

// ── Scenario 2: rules are AND-combined ──────────────────────────────────

#[test]
fn rule_conjunction_gates_the_flag() {
    let mut premium = flag("premium-feature", FlagKind::Boolean);
    premium.rules = vec!["user.subscription == 'premium'".to_string()];
    let engine = Engine::new();

    let result = engine.evaluate(
        &premium,
        &no_segments(),
        &input("u", json!({"subscription": "premium"})),
        None,
    );
    assert_eq!(result.kind, FlagKind::Boolean);
    assert_eq!(result.result, json!(true));
    assert!(result.is_eval);

    let result = engine.evaluate(
        &premium,
        &no_segments(),
        &input("u", json!({"subscription": "free"})),
        None,
    );
    assert_eq!(result.result, json!(false));
    assert!(!result.is_eval);
}

#[test]
fn any_failing_rule_yields_the_default() {
    let mut gated = flag("gated", FlagKind::Boolean);
    gated.rules = vec![
        "user.subscription == 'premium'".to_string(),
        "user.beta == true".to_string(),
    ];
    let engine = Engine::new();

    let result = engine.evaluate(
        &gated,
        &no_segments(),
        &input("u", json!({"subscription": "premium", "beta": false})),
        None,
    );
    assert!(!result.is_eval);
}

#[test]
fn malformed_rule_contains_the_failure() {
    let mut broken = flag("broken", FlagKind::Boolean);
    broken.rules = vec!["user.plan == (".to_string()];
    let engine = Engine::new();

    let result = engine.evaluate(&broken, &no_segments(), &input("u", json!({})), None);
    assert!(!result.is_eval);
    assert_eq!(result.result, json!(false));
}

// ── Scenario 3: segments are OR-combined when no rollout steps exist ────

#[test]
fn segment_disjunction_without_rollout_steps() {
    let segments = BTreeMap::from([
        ("premiumUsers".to_string(), "user.premium == true".to_string()),
        ("betaUsers".to_string(), "user.beta == true".to_string()),
    ]);
    let mut feature = flag("segmented", FlagKind::Boolean);
    feature.segments = vec!["premiumUsers".to_string(), "betaUsers".to_string()];
    let engine = Engine::new();

    let result = engine.evaluate(
        &feature,
        &segments,
        &input("u", json!({"premium": false, "beta": true})),
        None,
    );
    assert!(result.is_eval);

    let result = engine.evaluate(
        &feature,
        &segments,
        &input("u", json!({"premium": false, "beta": false})),
        None,
    );
    assert!(!result.is_eval);
}

// ── Scenario 4: progressive percentage release ──────────────────────────

#[test]
fn progressive_release_by_percentage() {
    let mut progressive = flag("progressive-rollout", FlagKind::Boolean);
    progressive.rollout = 0;
    progressive.rollouts = vec![
        step("2025-01-01T00:00:00Z", Some(10), None),
        step("2025-02-01T00:00:00Z", Some(100), None),
    ];
    let engine = Engine::new();

    // Before the first step: no one, regardless of bucket.
    for id in ["user-11", "user-0"] {
        let result = engine.evaluate(
            &progressive,
            &no_segments(),
            &input(id, json!({})),
            at("2024-12-15T00:00:00Z"),
        );
        assert!(!result.is_eval, "{id} must not fire before the first step");
    }

    // During the 10% step: bucket("user-11", "progressive-rollout") == 7
    // fires, bucket("user-0", ...) == 51 does not.
    let result = engine.evaluate(
        &progressive,
        &no_segments(),
        &input("user-11", json!({})),
        at("2025-01-15T00:00:00Z"),
    );
    assert!(result.is_eval);
    let result = engine.evaluate(
        &progressive,
        &no_segments(),
        &input("user-0", json!({})),
        at("2025-01-15T00:00:00Z"),
    );
    assert!(!result.is_eval);

    // After the 100% step: everyone.
    for id in ["user-11", "user-0"] {
        let result = engine.evaluate(
            &progressive,
            &no_segments(),
            &input(id, json!({})),
            at("2025-02-15T00:00:00Z"),
        );
        assert!(result.is_eval, "{id} must fire once the 100% step starts");
    }
}

// ── Scenario 5: staged release by segment, gated by a rule ──────────────

#[test]
fn staged_release_by_segment() {
    let segments = BTreeMap::from([
        ("internalTeam".to_string(), "user.team == 'internal'".to_string()),
        ("premiumUser".to_string(), "user.premium == true".to_string()),
        ("allUser".to_string(), "true".to_string()),
    ]);
    let mut staged = flag("staged", FlagKind::Boolean);
    staged.rules = vec!["now() >= ts('2025-01-01T00:00:00Z')".to_string()];
    staged.rollouts = vec![
        step("2025-02-01T00:00:00Z", None, Some("internalTeam")),
        step("2025-03-01T00:00:00Z", None, Some("premiumUser")),
        step("2025-04-01T00:00:00Z", None, Some("allUser")),
    ];
    let engine = Engine::new();

    let internal = input("i", json!({"team": "internal"}));
    let premium = input("p", json!({"premium": true}));
    let regular = input("r", json!({}));

    let fire_at = |input: &EvalInput, when: &str| {
        engine
            .evaluate(&staged, &segments, input, at(when))
            .is_eval
    };

    // The rule blocks everyone before 2025, even the internal team.
    assert!(!fire_at(&internal, "2024-12-15T00:00:00Z"));
    // Rule passes but no step has started yet.
    assert!(!fire_at(&internal, "2025-01-15T00:00:00Z"));
    // First step: internal only.
    assert!(fire_at(&internal, "2025-02-15T00:00:00Z"));
    assert!(!fire_at(&premium, "2025-02-15T00:00:00Z"));
    assert!(!fire_at(&regular, "2025-02-15T00:00:00Z"));
    // Second step: internal or premium.
    assert!(fire_at(&internal, "2025-03-15T00:00:00Z"));
    assert!(fire_at(&premium, "2025-03-15T00:00:00Z"));
    assert!(!fire_at(&regular, "2025-03-15T00:00:00Z"));
    // Final step: everyone.
    assert!(fire_at(&regular, "2025-04-15T00:00:00Z"));
}

// ── Determinism and identity isolation ──────────────────────────────────

#[test]
fn decisions_are_deterministic_across_engines() {
    let mut dashboard = flag("new-dashboard", FlagKind::Boolean);
    dashboard.rollout = 50;
    let caller = input("user-456", json!({"plan": "pro"}));
    let now = at("2025-06-01T00:00:00Z");

    let first = Engine::new().evaluate(&dashboard, &no_segments(), &caller, now);
    let second = Engine::new().evaluate(&dashboard, &no_segments(), &caller, now);
    assert_eq!(first, second);
}

#[test]
fn buckets_are_independent_across_flags() {
    // The same identity must not keep its bucket when the flag changes.
    assert_ne!(
        flagstone::hash::bucket("u", "flag-a"),
        flagstone::hash::bucket("u", "flag-b")
    );
}

// ── Gates and step precedence ───────────────────────────────────────────

#[test]
fn disabled_flag_always_yields_the_default() {
    let mut off = flag("off", FlagKind::Boolean);
    off.enabled = false;
    off.rules = vec!["true".to_string()];
    off.rollout = 100;
    let engine = Engine::new();

    let result = engine.evaluate(&off, &no_segments(), &input("u", json!({})), None);
    assert!(!result.is_eval);
    assert_eq!(result.result, json!(false));
}

#[test]
fn rollout_steps_subsume_the_base_rollout() {
    // Base rollout 100 would admit everyone, but an unstarted step list
    // must keep the flag dark: the base percentage is not consulted.
    let mut gated = flag("step-gated", FlagKind::Boolean);
    gated.rollout = 100;
    gated.rollouts = vec![step("2099-01-01T00:00:00Z", Some(100), None)];
    let engine = Engine::new();

    let result = engine.evaluate(
        &gated,
        &no_segments(),
        &input("u", json!({})),
        at("2025-01-01T00:00:00Z"),
    );
    assert!(!result.is_eval);
}

#[test]
fn rollout_steps_subsume_the_flat_segment_check() {
    // With steps present, flag.segments is not consulted globally.
    let segments = BTreeMap::from([
        ("nobody".to_string(), "false".to_string()),
    ]);
    let mut feature = flag("steps-over-segments", FlagKind::Boolean);
    feature.segments = vec!["nobody".to_string()];
    feature.rollouts = vec![step("2025-01-01T00:00:00Z", Some(100), None)];
    let engine = Engine::new();

    let result = engine.evaluate(
        &feature,
        &segments,
        &input("u", json!({})),
        at("2025-06-01T00:00:00Z"),
    );
    assert!(result.is_eval);
}

#[test]
fn first_passing_step_wins() {
    let mut feature = flag("stepped", FlagKind::Boolean);
    feature.rollouts = vec![
        step("2025-01-01T00:00:00Z", Some(0), None),
        step("2025-01-01T00:00:00Z", Some(100), None),
    ];
    let engine = Engine::new();

    // The 0% step admits no one, but the walk continues to the 100% step.
    let result = engine.evaluate(
        &feature,
        &no_segments(),
        &input("u", json!({})),
        at("2025-06-01T00:00:00Z"),
    );
    assert!(result.is_eval);
}

#[test]
fn step_with_segment_and_percentage_requires_both() {
    let segments = BTreeMap::from([
        ("beta".to_string(), "user.beta == true".to_string()),
    ]);
    let mut feature = flag("both-clauses", FlagKind::Boolean);
    feature.rollouts = vec![step("2025-01-01T00:00:00Z", Some(50), Some("beta"))];
    let engine = Engine::new();
    let when = at("2025-06-01T00:00:00Z");

    // bucket("user-456", "both-clauses"): in the 50% slice only if <= 50;
    // segment must also hold.
    let in_slice = flagstone::hash::bucket("user-456", "both-clauses") <= 50;
    let result = engine.evaluate(
        &feature,
        &segments,
        &input("user-456", json!({"beta": true})),
        when,
    );
    assert_eq!(result.is_eval, in_slice);

    let result = engine.evaluate(
        &feature,
        &segments,
        &input("user-456", json!({"beta": false})),
        when,
    );
    assert!(!result.is_eval);
}

#[test]
fn dangling_step_segment_fails_the_step() {
    let mut feature = flag("dangling", FlagKind::Boolean);
    feature.rollouts = vec![step("2025-01-01T00:00:00Z", None, Some("deleted-segment"))];
    let engine = Engine::new();

    let result = engine.evaluate(
        &feature,
        &no_segments(),
        &input("u", json!({})),
        at("2025-06-01T00:00:00Z"),
    );
    assert!(!result.is_eval);
}

#[test]
fn unparseable_step_start_fails_the_step() {
    let mut feature = flag("bad-start", FlagKind::Boolean);
    feature.rollouts = vec![step("soon-ish", Some(100), None)];
    let engine = Engine::new();

    let result = engine.evaluate(&feature, &no_segments(), &input("u", json!({})), None);
    assert!(!result.is_eval);
}

// ── Typed results ───────────────────────────────────────────────────────

#[test]
fn payload_flag_returns_its_payload() {
    let mut remote_config = flag("remote-config", FlagKind::Payload);
    remote_config.payload = Some(json!({"timeout": 30}));
    let engine = Engine::new();

    let result = engine.evaluate(&remote_config, &no_segments(), &input("u", json!({})), None);
    assert_eq!(result.kind, FlagKind::Payload);
    assert_eq!(result.result, json!({"timeout": 30}));
    assert!(result.is_eval);

    // An explicit null payload fires with a null result.
    remote_config.payload = Some(Value::Null);
    let result = engine.evaluate(&remote_config, &no_segments(), &input("u", json!({})), None);
    assert_eq!(result.result, Value::Null);
    assert!(result.is_eval);
}

#[test]
fn payload_flag_defaults_to_null() {
    let mut remote_config = flag("remote-config", FlagKind::Payload);
    remote_config.payload = Some(json!({"timeout": 30}));
    remote_config.enabled = false;
    let engine = Engine::new();

    let result = engine.evaluate(&remote_config, &no_segments(), &input("u", json!({})), None);
    assert_eq!(result.result, Value::Null);
    assert!(!result.is_eval);
}

#[test]
fn variant_flag_picks_by_bucket() {
    let mut banner = flag("exp-banner", FlagKind::Variant);
    banner.variations = vec![variation("control", 50), variation("treatment", 50)];
    let engine = Engine::new();

    // bucket("alice", "exp-banner") == 20 -> control
    let result = engine.evaluate(&banner, &no_segments(), &input("alice", json!({})), None);
    assert_eq!(result.result, json!("control"));
    assert!(result.is_eval);

    // bucket("dave", "exp-banner") == 60 -> treatment
    let result = engine.evaluate(&banner, &no_segments(), &input("dave", json!({})), None);
    assert_eq!(result.result, json!("treatment"));
}

#[test]
fn variant_payload_overrides_id() {
    let mut banner = flag("exp-banner", FlagKind::Variant);
    banner.variations = vec![
        Variation {
            id: "control".to_string(),
            weight: 50,
            payload: Some(json!({"color": "blue"})),
            label: None,
        },
        variation("treatment", 50),
    ];
    let engine = Engine::new();

    let result = engine.evaluate(&banner, &no_segments(), &input("alice", json!({})), None);
    assert_eq!(result.result, json!({"color": "blue"}));
}

#[test]
fn variant_weight_underflow_falls_back_to_default() {
    let mut banner = flag("exp-banner", FlagKind::Variant);
    banner.variations = vec![variation("control", 30), variation("treatment", 30)];
    let engine = Engine::new();

    // bucket("user-3", "exp-banner") == 97, past the 60 total: no variant,
    // so the default (first variation) is reported without firing.
    let result = engine.evaluate(&banner, &no_segments(), &input("user-3", json!({})), None);
    assert_eq!(result.result, json!("control"));
    assert!(!result.is_eval);
}

#[test]
fn variant_choice_stable_while_earlier_weights_unchanged() {
    let mut before = flag("exp-banner", FlagKind::Variant);
    before.variations = vec![variation("control", 50), variation("treatment", 30)];
    let mut after = before.clone();
    after.variations[1].weight = 50;
    let engine = Engine::new();

    let caller = input("alice", json!({}));
    let first = engine.evaluate(&before, &no_segments(), &caller, None);
    let second = engine.evaluate(&after, &no_segments(), &caller, None);
    assert_eq!(first.result, second.result);
}

// ── Identity fallback ───────────────────────────────────────────────────

#[test]
fn anonymous_id_substitutes_for_missing_id() {
    let mut dashboard = flag("new-dashboard", FlagKind::Boolean);
    dashboard.rollout = 50;
    let engine = Engine::new();

    // Same anonymous id buckets exactly like the equivalent id.
    let anonymous = EvalInput {
        anonymous_id: Some("user-456".to_string()),
        ..EvalInput::default()
    };
    let result = engine.evaluate(&dashboard, &no_segments(), &anonymous, None);
    assert!(result.is_eval);
}

// ── Batch evaluation ────────────────────────────────────────────────────

#[test]
fn batch_evaluates_every_flag_in_the_document() {
    let mut document = TenantDocument::default();
    document
        .segments
        .insert("beta".to_string(), "user.beta == true".to_string());

    let mut on = flag("on", FlagKind::Boolean);
    on.segments = vec!["beta".to_string()];
    document.flags.insert("on".to_string(), on);

    let mut broken = flag("broken", FlagKind::Boolean);
    broken.rules = vec!["((".to_string()];
    document.flags.insert("broken".to_string(), broken);

    let engine = Engine::new();
    let results = engine.evaluate_all(&document, &input("u", json!({"beta": true})), None);

    assert_eq!(results.len(), 2);
    assert!(results["on"].is_eval);
    // The malformed rule poisons only its own flag.
    assert!(!results["broken"].is_eval);
}

#[test]
fn result_serializes_with_wire_field_names() {
    let engine = Engine::new();
    let result = engine.evaluate(
        &flag("plain", FlagKind::Boolean),
        &no_segments(),
        &input("u", json!({})),
        None,
    );
    let wire = serde_json::to_value(&result).unwrap();
    assert_eq!(wire, json!({"type": "boolean", "result": true, "isEval": true}));
}
