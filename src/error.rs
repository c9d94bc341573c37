//! Error types for the evaluation core.

/// Failure while parsing or evaluating an expression.
///
/// These never escape a flag decision: a failing rule or segment expression
/// simply counts as false and the flag yields its default result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    /// The expression text does not match the grammar.
    #[error("parse error: {0}")]
    Parse(String),

    /// An operator was applied to operands it does not support.
    #[error("type error: {0}")]
    Type(String),

    /// A transform name outside the closed set.
    #[error("unknown transform: {0}")]
    UnknownTransform(String),

    /// A function name outside the closed set.
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// Wrong number of arguments to a transform or function.
    #[error("{name} expects {expected} argument(s)")]
    Arity {
        /// Transform or function name.
        name: &'static str,
        /// Expected argument count.
        expected: usize,
    },

    /// A timestamp string `ts()` could not parse.
    #[error("invalid timestamp: {0}")]
    Timestamp(String),

    /// Division or remainder by zero.
    #[error("division by zero")]
    DivisionByZero,
}

/// Schema violation in a flag definition, raised at write time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("flag id must be a non-empty string")]
    EmptyFlagId,

    #[error("segment id must be a non-empty string")]
    EmptySegmentId,

    #[error("rollout percentage {0} is outside 0..=100")]
    RolloutRange(u8),

    #[error("rollout step {index} percentage {percentage} is outside 0..=100")]
    StepPercentageRange { index: usize, percentage: u8 },

    #[error("rollout step {0} needs a percentage, a segment, or both")]
    EmptyStep(usize),

    #[error("flag references unknown segment '{0}'")]
    UnknownSegment(String),

    #[error("boolean flags carry neither payload nor variations")]
    BooleanExtras,

    #[error("payload flags require a payload field (an explicit null is fine)")]
    MissingPayload,

    #[error("variant flags require at least two variations")]
    TooFewVariations,

    #[error("variation id must be a non-empty string")]
    EmptyVariationId,

    #[error("variation '{id}' weight {weight} is outside 0..=100")]
    WeightRange { id: String, weight: u8 },
}
