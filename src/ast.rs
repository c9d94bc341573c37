use core::fmt;

use serde_json::Value;

/// A literal in the expression language.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Int(i64),
    Float(f64),
    Boolean(bool),
    Null,
}

impl Literal {
    /// The JSON value this literal denotes at runtime.
    pub fn to_value(&self) -> Value {
        match self {
            Literal::String(s) => Value::String(s.clone()),
            Literal::Int(n) => Value::from(*n),
            Literal::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Literal::Boolean(b) => Value::Bool(*b),
            Literal::Null => Value::Null,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => write!(f, "'{s}'"),
            Literal::Int(n) => write!(f, "{n}"),
            Literal::Float(x) => write!(f, "{x}"),
            Literal::Boolean(b) => write!(f, "{b}"),
            Literal::Null => write!(f, "null"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Less,
    LessEq,
    More,
    MoreEq,
    /// Membership: array on the right, or substring when both are strings.
    In,
}

impl CompareOp {
    pub fn build_from_str(expr: &str) -> Self {
        match expr {
            "==" => CompareOp::Eq,
            "!=" => CompareOp::NotEq,
            ">" => CompareOp::More,
            ">=" => CompareOp::MoreEq,
            "<" => CompareOp::Less,
            "<=" => CompareOp::LessEq,
            "in" => CompareOp::In,
            _ => unreachable!(),
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareOp::Eq => write!(f, "=="),
            CompareOp::NotEq => write!(f, "!="),
            CompareOp::Less => write!(f, "<"),
            CompareOp::LessEq => write!(f, "<="),
            CompareOp::More => write!(f, ">"),
            CompareOp::MoreEq => write!(f, ">="),
            CompareOp::In => write!(f, "in"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
}

impl LogicOp {
    pub fn build_from_str(i: &str) -> Self {
        match i {
            "&&" => LogicOp::And,
            "||" => LogicOp::Or,
            _ => unreachable!(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl ArithOp {
    pub fn build_from_str(i: &str) -> Self {
        match i {
            "+" => ArithOp::Add,
            "-" => ArithOp::Sub,
            "*" => ArithOp::Mul,
            "/" => ArithOp::Div,
            "%" => ArithOp::Rem,
            _ => unreachable!(),
        }
    }
}

/// A parsed expression.
///
/// Transform and function names are carried as text and resolved during
/// evaluation; an unknown name fails the referring rule, not the parse.
#[derive(Debug, Clone, PartialEq)]
pub enum AstNode {
    Constant(Literal),
    /// Array literal, e.g. `['US', 'CA']`.
    Array(Vec<AstNode>),
    /// Member access into the context record, e.g. `user.plan` or
    /// `request.headers["x-beta"]`.
    Path(Vec<String>),
    Not(Box<AstNode>),
    Neg(Box<AstNode>),
    Compare(Box<AstNode>, CompareOp, Box<AstNode>),
    Arith(Box<AstNode>, ArithOp, Box<AstNode>),
    Logic(Box<AstNode>, LogicOp, Box<AstNode>),
    /// Piped transform, e.g. `user.email | lower()`.
    Pipe(Box<AstNode>, String, Vec<AstNode>),
    /// Function call, e.g. `now()` or `ts('2025-01-01T00:00:00Z')`.
    Call(String, Vec<AstNode>),
}
