use nom::{
    branch::alt,
    bytes::complete::{is_not, tag},
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace0},
    combinator::{map, not, opt, recognize, value},
    error::ParseError,
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, terminated},
    IResult,
};

use crate::ast::{ArithOp, AstNode, CompareOp, Literal, LogicOp};
use crate::error::ExprError;

/// A combinator that takes a parser `inner` and produces a parser that also consumes both leading and
/// trailing whitespace, returning the output of `inner`.
fn ws<'a, F: 'a, O, E: ParseError<&'a str>>(
    inner: F,
) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where
    F: FnMut(&'a str) -> IResult<&'a str, O, E>,
{
    delimited(multispace0, inner, multispace0)
}

/// A keyword that must not run into a following identifier character.
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag(kw), not(alt((alphanumeric1, tag("_")))))
}

fn identifier(i: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))(i)
}

fn quoted_string(i: &str) -> IResult<&str, String> {
    map(
        alt((
            delimited(char('\''), opt(is_not("'")), char('\'')),
            delimited(char('"'), opt(is_not("\"")), char('"')),
        )),
        |s: Option<&str>| s.unwrap_or("").to_string(),
    )(i)
}

fn parse_number(i: &str) -> IResult<&str, Literal> {
    let (rest, text) = recognize(pair(digit1, opt(pair(char('.'), digit1))))(i)?;
    let literal = if text.contains('.') {
        text.parse::<f64>().ok().map(Literal::Float)
    } else {
        text.parse::<i64>().ok().map(Literal::Int)
    };
    match literal {
        Some(lit) => Ok((rest, lit)),
        None => Err(nom::Err::Error(nom::error::Error::new(
            i,
            nom::error::ErrorKind::Digit,
        ))),
    }
}

fn parse_literal(i: &str) -> IResult<&str, Literal> {
    alt((
        map(quoted_string, Literal::String),
        parse_number,
        value(Literal::Boolean(true), keyword("true")),
        value(Literal::Boolean(false), keyword("false")),
        value(Literal::Null, keyword("null")),
    ))(i)
}

fn parse_arg_list(i: &str) -> IResult<&str, Vec<AstNode>> {
    delimited(
        ws(char('(')),
        separated_list0(ws(char(',')), parse_expr),
        ws(char(')')),
    )(i)
}

fn parse_array(i: &str) -> IResult<&str, AstNode> {
    map(
        delimited(
            ws(char('[')),
            separated_list0(ws(char(',')), parse_expr),
            ws(char(']')),
        ),
        AstNode::Array,
    )(i)
}

/// An identifier is a function call when followed by an argument list,
/// otherwise the head of a member-access path. Bracket segments exist for
/// keys that are not identifiers, e.g. `request.headers["x-beta"]`.
fn parse_call_or_path(i: &str) -> IResult<&str, AstNode> {
    let (i, head) = identifier(i)?;
    if let Ok((rest, args)) = parse_arg_list(i) {
        return Ok((rest, AstNode::Call(head.to_string(), args)));
    }
    let (i, tail) = many0(alt((
        preceded(char('.'), map(identifier, str::to_string)),
        delimited(char('['), ws(quoted_string), char(']')),
    )))(i)?;
    let mut segments = vec![head.to_string()];
    segments.extend(tail);
    Ok((i, AstNode::Path(segments)))
}

fn parse_primary(i: &str) -> IResult<&str, AstNode> {
    alt((
        map(parse_literal, AstNode::Constant),
        parse_array,
        delimited(ws(char('(')), parse_expr, ws(char(')'))),
        parse_call_or_path,
    ))(i)
}

/// Postfix pipes bind tighter than any binary operator, so
/// `user.email | lower() == 'a@b.c'` compares the transformed value.
fn parse_piped(i: &str) -> IResult<&str, AstNode> {
    let (mut i, mut node) = ws(parse_primary)(i)?;
    loop {
        let step = preceded(
            terminated(ws(char('|')), not(char('|'))),
            pair(identifier, opt(parse_arg_list)),
        )(i);
        match step {
            Ok((rest, (name, args))) => {
                node = AstNode::Pipe(Box::new(node), name.to_string(), args.unwrap_or_default());
                i = rest;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((i, node))
}

fn parse_unary(i: &str) -> IResult<&str, AstNode> {
    alt((
        map(preceded(ws(char('!')), parse_unary), |e| {
            AstNode::Not(Box::new(e))
        }),
        map(preceded(ws(char('-')), parse_unary), |e| {
            AstNode::Neg(Box::new(e))
        }),
        parse_piped,
    ))(i)
}

fn parse_product(i: &str) -> IResult<&str, AstNode> {
    let (i, first) = parse_unary(i)?;
    let (i, rest) = many0(pair(ws(alt((tag("*"), tag("/"), tag("%")))), parse_unary))(i)?;
    Ok((i, fold_arith(first, rest)))
}

fn parse_sum(i: &str) -> IResult<&str, AstNode> {
    let (i, first) = parse_product(i)?;
    let (i, rest) = many0(pair(ws(alt((tag("+"), tag("-")))), parse_product))(i)?;
    Ok((i, fold_arith(first, rest)))
}

fn fold_arith(first: AstNode, rest: Vec<(&str, AstNode)>) -> AstNode {
    rest.into_iter().fold(first, |acc, (op, rhs)| {
        AstNode::Arith(Box::new(acc), ArithOp::build_from_str(op), Box::new(rhs))
    })
}

fn parse_comparison(i: &str) -> IResult<&str, AstNode> {
    let (i, first) = parse_sum(i)?;
    let (i, rest) = opt(pair(
        ws(alt((
            tag("=="),
            tag("!="),
            tag("<="),
            tag(">="),
            tag("<"),
            tag(">"),
            keyword("in"),
        ))),
        parse_sum,
    ))(i)?;
    Ok(match rest {
        Some((op, rhs)) => (
            i,
            AstNode::Compare(Box::new(first), CompareOp::build_from_str(op), Box::new(rhs)),
        ),
        None => (i, first),
    })
}

fn parse_and(i: &str) -> IResult<&str, AstNode> {
    let (i, first) = parse_comparison(i)?;
    let (i, rest) = many0(preceded(ws(tag("&&")), parse_comparison))(i)?;
    Ok((i, fold_logic(first, LogicOp::And, rest)))
}

fn parse_expr(i: &str) -> IResult<&str, AstNode> {
    let (i, first) = parse_and(i)?;
    let (i, rest) = many0(preceded(ws(tag("||")), parse_and))(i)?;
    Ok((i, fold_logic(first, LogicOp::Or, rest)))
}

fn fold_logic(first: AstNode, op: LogicOp, rest: Vec<AstNode>) -> AstNode {
    rest.into_iter().fold(first, |acc, rhs| {
        AstNode::Logic(Box::new(acc), op, Box::new(rhs))
    })
}

/// Parse a complete expression. Trailing input is a parse error: a rule
/// that only half-parses must fail loudly at compile time, not silently
/// evaluate its prefix.
pub fn parse(input: &str) -> Result<AstNode, ExprError> {
    match parse_expr(input) {
        Ok((rest, node)) if rest.trim().is_empty() => Ok(node),
        Ok((rest, _)) => Err(ExprError::Parse(format!(
            "unexpected trailing input near '{}'",
            rest.trim().lines().next().unwrap_or("")
        ))),
        Err(e) => Err(ExprError::Parse(e.to_string())),
    }
}
