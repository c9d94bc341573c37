use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

use crate::ast::{ArithOp, AstNode, CompareOp, LogicOp};
use crate::error::ExprError;
use crate::parse;

/// Everything an expression can see: the context record and the decision's
/// frozen time reading.
pub struct EvalScope<'a> {
    pub root: &'a Value,
    pub now_ms: i64,
}

/// "Truthy" JSON semantics: `false`, `null`, `0`, `""` and `[]` are false,
/// everything else is true.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

pub fn eval_truthy(expr: &AstNode, scope: &EvalScope) -> Result<bool, ExprError> {
    eval(expr, scope).map(|v| is_truthy(&v))
}

pub fn eval(expr: &AstNode, scope: &EvalScope) -> Result<Value, ExprError> {
    match expr {
        AstNode::Constant(lit) => Ok(lit.to_value()),
        AstNode::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval(item, scope)?);
            }
            Ok(Value::Array(out))
        }
        AstNode::Path(segments) => Ok(lookup_path(scope.root, segments)),
        AstNode::Not(inner) => Ok(Value::Bool(!eval_truthy(inner, scope)?)),
        AstNode::Neg(inner) => {
            let v = eval(inner, scope)?;
            match as_f64(&v) {
                Some(f) => Ok(number(-f)),
                None => Err(ExprError::Type(format!("cannot negate {v}"))),
            }
        }
        AstNode::Logic(lhs, op, rhs) => {
            let left = eval_truthy(lhs, scope)?;
            let result = match op {
                LogicOp::And => left && eval_truthy(rhs, scope)?,
                LogicOp::Or => left || eval_truthy(rhs, scope)?,
            };
            Ok(Value::Bool(result))
        }
        AstNode::Compare(lhs, op, rhs) => {
            let left = eval(lhs, scope)?;
            let right = eval(rhs, scope)?;
            let result = match op {
                CompareOp::Eq => values_equal(&left, &right),
                CompareOp::NotEq => !values_equal(&left, &right),
                CompareOp::Less => compare_values(&left, &right)? == Ordering::Less,
                CompareOp::LessEq => compare_values(&left, &right)? != Ordering::Greater,
                CompareOp::More => compare_values(&left, &right)? == Ordering::Greater,
                CompareOp::MoreEq => compare_values(&left, &right)? != Ordering::Less,
                CompareOp::In => eval_in(&left, &right)?,
            };
            Ok(Value::Bool(result))
        }
        AstNode::Arith(lhs, op, rhs) => {
            let left = eval(lhs, scope)?;
            let right = eval(rhs, scope)?;
            eval_arith(&left, *op, &right)
        }
        AstNode::Pipe(input, name, args) => {
            let value = eval(input, scope)?;
            apply_transform(name, &value, args, scope)
        }
        AstNode::Call(name, args) => apply_function(name, args, scope),
    }
}

fn lookup_path(root: &Value, segments: &[String]) -> Value {
    let mut current = root;
    for segment in segments {
        match current.get(segment.as_str()) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

/// Prefer an integer representation so `ts()` arithmetic stays exact.
fn number(f: f64) -> Value {
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Value::from(f as i64)
    } else {
        serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// Numbers compare numerically across int/float; everything else is deep
/// JSON equality.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare_values(a: &Value, b: &Value) -> Result<Ordering, ExprError> {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x
            .partial_cmp(&y)
            .ok_or_else(|| ExprError::Type("numbers do not order".into()));
    }
    if let (Value::String(x), Value::String(y)) = (a, b) {
        return Ok(x.cmp(y));
    }
    Err(ExprError::Type(format!("cannot order {a} against {b}")))
}

fn eval_in(needle: &Value, haystack: &Value) -> Result<bool, ExprError> {
    match haystack {
        Value::Array(items) => Ok(items.iter().any(|item| values_equal(needle, item))),
        Value::String(s) => match needle {
            Value::String(n) => Ok(s.contains(n.as_str())),
            other => Err(ExprError::Type(format!(
                "'in' over a string needs a string needle, got {other}"
            ))),
        },
        other => Err(ExprError::Type(format!(
            "'in' needs an array or string on the right, got {other}"
        ))),
    }
}

fn eval_arith(left: &Value, op: ArithOp, right: &Value) -> Result<Value, ExprError> {
    if op == ArithOp::Add {
        if let (Value::String(a), Value::String(b)) = (left, right) {
            return Ok(Value::String(format!("{a}{b}")));
        }
    }
    let (Some(a), Some(b)) = (as_f64(left), as_f64(right)) else {
        return Err(ExprError::Type(format!(
            "arithmetic needs numbers, got {left} and {right}"
        )));
    };
    let result = match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div | ArithOp::Rem if b == 0.0 => return Err(ExprError::DivisionByZero),
        ArithOp::Div => a / b,
        ArithOp::Rem => a % b,
    };
    Ok(number(result))
}

fn apply_transform(
    name: &str,
    value: &Value,
    args: &[AstNode],
    scope: &EvalScope,
) -> Result<Value, ExprError> {
    match name {
        "lower" | "upper" => {
            if !args.is_empty() {
                return Err(ExprError::Arity {
                    name: if name == "lower" { "lower" } else { "upper" },
                    expected: 0,
                });
            }
            match value {
                Value::String(s) => Ok(Value::String(if name == "lower" {
                    s.to_lowercase()
                } else {
                    s.to_uppercase()
                })),
                other => Err(ExprError::Type(format!("{name}() needs a string, got {other}"))),
            }
        }
        "split" => {
            let [sep_expr] = args else {
                return Err(ExprError::Arity {
                    name: "split",
                    expected: 1,
                });
            };
            let sep = match eval(sep_expr, scope)? {
                Value::String(s) => s,
                other => {
                    return Err(ExprError::Type(format!(
                        "split() separator must be a string, got {other}"
                    )))
                }
            };
            match value {
                Value::String(s) => Ok(Value::Array(
                    s.split(sep.as_str())
                        .map(|part| Value::String(part.to_string()))
                        .collect(),
                )),
                other => Err(ExprError::Type(format!("split() needs a string, got {other}"))),
            }
        }
        other => Err(ExprError::UnknownTransform(other.to_string())),
    }
}

fn apply_function(name: &str, args: &[AstNode], scope: &EvalScope) -> Result<Value, ExprError> {
    match name {
        "now" => {
            if !args.is_empty() {
                return Err(ExprError::Arity {
                    name: "now",
                    expected: 0,
                });
            }
            Ok(Value::from(scope.now_ms))
        }
        "ts" => {
            let [arg] = args else {
                return Err(ExprError::Arity {
                    name: "ts",
                    expected: 1,
                });
            };
            match eval(arg, scope)? {
                Value::String(text) => parse_timestamp_ms(&text)
                    .map(Value::from)
                    .ok_or(ExprError::Timestamp(text)),
                other => Err(ExprError::Type(format!(
                    "ts() needs an ISO-8601 string, got {other}"
                ))),
            }
        }
        other => Err(ExprError::UnknownFunction(other.to_string())),
    }
}

/// ISO-8601 to epoch milliseconds. Accepts an RFC 3339 timestamp, a naive
/// `YYYY-MM-DDTHH:MM:SS` (read as UTC), or a bare date.
pub(crate) fn parse_timestamp_ms(text: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc().timestamp_millis());
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis());
    }
    None
}

/// Compiled-expression cache keyed by expression text, shared across
/// decisions. Parse failures are cached too so a malformed rule is not
/// re-parsed on every evaluation.
///
/// Reads vastly outnumber writes; a `RwLock<HashMap>` keeps the read path
/// contention-free enough for the evaluation surface.
pub struct ExprCache {
    compiled: RwLock<HashMap<String, Arc<Result<AstNode, ExprError>>>>,
}

impl ExprCache {
    pub fn new() -> Self {
        Self {
            compiled: RwLock::new(HashMap::new()),
        }
    }

    /// Look up or compile the expression.
    pub fn compiled(&self, text: &str) -> Arc<Result<AstNode, ExprError>> {
        {
            let cache = self
                .compiled
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = cache.get(text) {
                return Arc::clone(hit);
            }
        }
        let parsed = Arc::new(parse::parse(text));
        let mut cache = self
            .compiled
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(cache.entry(text.to_string()).or_insert(parsed))
    }

    /// Rule semantics: a parse or runtime failure counts as false, never an
    /// error. A malformed rule can only ever hold its own flag at the
    /// default result.
    pub fn rule_passes(&self, text: &str, scope: &EvalScope) -> bool {
        match self.compiled(text).as_ref() {
            Ok(expr) => eval_truthy(expr, scope).unwrap_or(false),
            Err(_) => false,
        }
    }
}

impl Default for ExprCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn scope_in(root: &Value) -> EvalScope<'_> {
        EvalScope { root, now_ms: 0 }
    }

    fn check(expr: &str, root: &Value) -> bool {
        let parsed = parse::parse(expr).unwrap();
        eval_truthy(&parsed, &scope_in(root)).unwrap()
    }

    #[test]
    fn comparison_eval() {
        let ctx = json!({"user": {"age": 3, "plan": "premium"}});
        assert!(check("user.age < 4", &ctx));
        assert!(check("user.age <= 3", &ctx));
        assert!(check("user.age >= 3", &ctx));
        assert!(!check("user.age > 3", &ctx));
        assert!(check("user.age != 4", &ctx));
        assert!(check("user.plan == 'premium'", &ctx));
        assert!(!check("user.plan == 'free'", &ctx));
    }

    #[test]
    fn numbers_compare_across_int_and_float() {
        let ctx = json!({"a": 3});
        assert!(check("a == 3.0", &ctx));
        assert!(check("a < 3.5", &ctx));
    }

    #[test]
    fn logic_eval() {
        let ctx = json!({"x": 1, "y": 2});
        assert!(check("x == 1 && y == 2", &ctx));
        assert!(check("x == 12 || y == 2", &ctx));
        assert!(!check("x == 12 && y == 2", &ctx));
        assert!(check("!(x == 12)", &ctx));
    }

    #[test]
    fn in_over_array_and_string() {
        let ctx = json!({"country": "LT", "email": "dev@example.com"});
        assert!(check("country in ['LT', 'NL', 'DE']", &ctx));
        assert!(!check("country in ['US', 'CA']", &ctx));
        assert!(check("'example' in email", &ctx));
    }

    #[test]
    fn missing_paths_are_null() {
        let ctx = json!({});
        assert!(!check("user.plan", &ctx));
        assert!(check("user.plan == null", &ctx));
    }

    #[test]
    fn truthiness_of_bare_values() {
        let ctx = json!({
            "zero": 0, "empty": "", "none": null, "list": [], "items": [1],
            "name": "x", "flag": true
        });
        assert!(!check("zero", &ctx));
        assert!(!check("empty", &ctx));
        assert!(!check("none", &ctx));
        assert!(!check("list", &ctx));
        assert!(check("items", &ctx));
        assert!(check("name", &ctx));
        assert!(check("flag", &ctx));
    }

    #[test]
    fn transforms() {
        let ctx = json!({"email": "Dev@Example.COM", "tags": "a,b,c"});
        assert!(check("email | lower() == 'dev@example.com'", &ctx));
        assert!(check("email | upper() == 'DEV@EXAMPLE.COM'", &ctx));
        assert!(check("'b' in tags | split(',')", &ctx));
    }

    #[test]
    fn unknown_transform_is_an_error() {
        let ctx = json!({"a": "x"});
        let expr = parse::parse("a | reverse()").unwrap();
        assert_eq!(
            eval(&expr, &scope_in(&ctx)),
            Err(ExprError::UnknownTransform("reverse".into()))
        );
    }

    #[test]
    fn now_and_ts_use_the_frozen_clock() {
        let ctx = json!({});
        let expr = parse::parse("now() >= ts('2025-01-01T00:00:00Z')").unwrap();
        let before = EvalScope { root: &ctx, now_ms: parse_timestamp_ms("2024-12-15T00:00:00Z").unwrap() };
        let after = EvalScope { root: &ctx, now_ms: parse_timestamp_ms("2025-01-15T00:00:00Z").unwrap() };
        assert!(!eval_truthy(&expr, &before).unwrap());
        assert!(eval_truthy(&expr, &after).unwrap());
    }

    #[test]
    fn arithmetic() {
        let ctx = json!({"a": 10});
        assert!(check("a + 5 == 15", &ctx));
        assert!(check("a * 2 == 20", &ctx));
        assert!(check("a % 3 == 1", &ctx));
        assert!(check("'foo' + 'bar' == 'foobar'", &ctx));
        let expr = parse::parse("a / 0 == 1").unwrap();
        assert_eq!(
            eval(&expr, &scope_in(&ctx)),
            Err(ExprError::DivisionByZero)
        );
    }

    #[test]
    fn timestamp_formats() {
        assert_eq!(parse_timestamp_ms("1970-01-01T00:00:00Z"), Some(0));
        assert_eq!(
            parse_timestamp_ms("2025-01-01"),
            parse_timestamp_ms("2025-01-01T00:00:00Z")
        );
        assert_eq!(
            parse_timestamp_ms("2025-01-01T00:00:00"),
            parse_timestamp_ms("2025-01-01T00:00:00Z")
        );
        assert!(parse_timestamp_ms("not a date").is_none());
    }

    #[test]
    fn cache_contains_failures() {
        let cache = ExprCache::new();
        let ctx = json!({"a": 1});
        let scope = scope_in(&ctx);
        assert!(!cache.rule_passes("a == (", &scope));
        assert!(cache.rule_passes("a == 1", &scope));
        // The bad rule is cached as a failure and stays false.
        assert!(!cache.rule_passes("a == (", &scope));
    }
}
