//! Declarative condition expressions.
//!
//! Condition steps carry an [`Expr`] tree: field lookups, literals,
//! comparisons and boolean combinators. It is evaluated by a small
//! interpreter over the instance [`DataBag`]; nothing is compiled or run as
//! code.
//!
//! Expressions can be written as text and parsed with [`Expr::parse`]:
//!
//! ```text
//! x > 5
//! priority == "urgent" || (sentiment == "negative" && not escalated)
//! tags contains "billing"
//! exists customer.email
//! ```
//!
//! Field paths are dotted (`customer.tier`, `tags.0`). A leading `data.`
//! segment is accepted and ignored, so `data.x > 5` and `x > 5` agree.

use crate::data::DataBag;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    /// Array membership, substring, or object key presence.
    Contains,
}

impl CompareOp {
    fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Contains => "contains",
        }
    }
}

/// A condition expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Expr {
    /// A constant value.
    Literal { value: JsonValue },
    /// The value at a path in the data bag (`null` when absent).
    Field { path: String },
    /// True when the path resolves to a value.
    Exists { path: String },
    /// A binary comparison.
    Compare {
        cmp: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// True when every operand is truthy.
    And { all: Vec<Expr> },
    /// True when any operand is truthy.
    Or { any: Vec<Expr> },
    /// Negation.
    Not { expr: Box<Expr> },
}

impl Expr {
    /// A literal value.
    #[must_use]
    pub fn literal(value: impl Into<JsonValue>) -> Self {
        Self::Literal {
            value: value.into(),
        }
    }

    /// A field lookup.
    #[must_use]
    pub fn field(path: impl Into<String>) -> Self {
        Self::Field {
            path: normalize_path(path.into()),
        }
    }

    /// A comparison between two expressions.
    #[must_use]
    pub fn compare(cmp: CompareOp, left: Expr, right: Expr) -> Self {
        Self::Compare {
            cmp,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Parses an expression from text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a well-formed expression.
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        if parser.tokens.is_empty() {
            return Err(ExprError::Empty);
        }
        let expr = parser.parse_or()?;
        match parser.peek() {
            None => Ok(expr),
            Some(token) => Err(ExprError::UnexpectedToken {
                found: token.to_string(),
            }),
        }
    }

    /// Evaluates the expression to a JSON value.
    #[must_use]
    pub fn eval(&self, data: &DataBag) -> JsonValue {
        match self {
            Self::Literal { value } => value.clone(),
            Self::Field { path } => data.lookup(path).cloned().unwrap_or(JsonValue::Null),
            Self::Exists { path } => JsonValue::Bool(data.lookup(path).is_some()),
            Self::Compare { cmp, left, right } => {
                JsonValue::Bool(compare(*cmp, &left.eval(data), &right.eval(data)))
            }
            Self::And { all } => JsonValue::Bool(all.iter().all(|e| e.evaluate(data))),
            Self::Or { any } => JsonValue::Bool(any.iter().any(|e| e.evaluate(data))),
            Self::Not { expr } => JsonValue::Bool(!expr.evaluate(data)),
        }
    }

    /// Evaluates the expression as a boolean predicate.
    #[must_use]
    pub fn evaluate(&self, data: &DataBag) -> bool {
        truthy(&self.eval(data))
    }
}

impl FromStr for Expr {
    type Err = ExprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal { value } => write!(f, "{value}"),
            Self::Field { path } => write!(f, "{path}"),
            Self::Exists { path } => write!(f, "exists {path}"),
            Self::Compare { cmp, left, right } => write!(f, "({left} {} {right})", cmp.symbol()),
            Self::And { all } => write_joined(f, all, " && "),
            Self::Or { any } => write_joined(f, any, " || "),
            Self::Not { expr } => write!(f, "!{expr}"),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, exprs: &[Expr], sep: &str) -> fmt::Result {
    write!(f, "(")?;
    for (i, expr) in exprs.iter().enumerate() {
        if i > 0 {
            write!(f, "{sep}")?;
        }
        write!(f, "{expr}")?;
    }
    write!(f, ")")
}

fn normalize_path(path: String) -> String {
    match path.strip_prefix("data.") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => path,
    }
}

fn truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(items) => !items.is_empty(),
        JsonValue::Object(_) => true,
    }
}

fn values_equal(left: &JsonValue, right: &JsonValue) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

fn ordering(left: &JsonValue, right: &JsonValue) -> Option<Ordering> {
    match (left, right) {
        (JsonValue::Number(l), JsonValue::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (JsonValue::String(l), JsonValue::String(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

fn compare(cmp: CompareOp, left: &JsonValue, right: &JsonValue) -> bool {
    match cmp {
        CompareOp::Eq => values_equal(left, right),
        CompareOp::Ne => !values_equal(left, right),
        CompareOp::Gt => ordering(left, right) == Some(Ordering::Greater),
        CompareOp::Ge => matches!(ordering(left, right), Some(Ordering::Greater | Ordering::Equal)),
        CompareOp::Lt => ordering(left, right) == Some(Ordering::Less),
        CompareOp::Le => matches!(ordering(left, right), Some(Ordering::Less | Ordering::Equal)),
        CompareOp::Contains => match (left, right) {
            (JsonValue::Array(items), needle) => items.iter().any(|item| values_equal(item, needle)),
            (JsonValue::String(haystack), JsonValue::String(needle)) => haystack.contains(needle.as_str()),
            (JsonValue::Object(map), JsonValue::String(key)) => map.contains_key(key),
            _ => false,
        },
    }
}

/// An expression could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprError {
    /// The source text is blank.
    Empty,
    /// A character that starts no token.
    UnexpectedChar { ch: char, offset: usize },
    /// A string literal without a closing quote.
    UnterminatedString { offset: usize },
    /// A numeric literal that does not parse.
    InvalidNumber { text: String },
    /// A token in a position where it is not allowed.
    UnexpectedToken { found: String },
    /// The text ended in the middle of an expression.
    UnexpectedEnd,
    /// Parentheses or negations nest deeper than the parser allows.
    TooDeep { limit: usize },
}

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "expression is empty"),
            Self::UnexpectedChar { ch, offset } => {
                write!(f, "unexpected character '{ch}' at offset {offset}")
            }
            Self::UnterminatedString { offset } => {
                write!(f, "unterminated string starting at offset {offset}")
            }
            Self::InvalidNumber { text } => write!(f, "invalid number '{text}'"),
            Self::UnexpectedToken { found } => write!(f, "unexpected token '{found}'"),
            Self::UnexpectedEnd => write!(f, "unexpected end of expression"),
            Self::TooDeep { limit } => {
                write!(f, "expression nests deeper than {limit} levels")
            }
        }
    }
}

impl std::error::Error for ExprError {}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(JsonValue),
    Str(String),
    True,
    False,
    Null,
    Cmp(CompareOp),
    And,
    Or,
    Not,
    Exists,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(name) => write!(f, "{name}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "\"{s}\""),
            Self::True => write!(f, "true"),
            Self::False => write!(f, "false"),
            Self::Null => write!(f, "null"),
            Self::Cmp(op) => write!(f, "{}", op.symbol()),
            Self::And => write!(f, "&&"),
            Self::Or => write!(f, "||"),
            Self::Not => write!(f, "!"),
            Self::Exists => write!(f, "exists"),
            Self::LParen => write!(f, "("),
            Self::RParen => write!(f, ")"),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, ch) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);
        let after = chars.get(i + 2).map(|(_, c)| *c);

        match ch {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Cmp(CompareOp::Eq));
                i += if after == Some('=') { 3 } else { 2 };
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Cmp(CompareOp::Ne));
                i += if after == Some('=') { 3 } else { 2 };
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '>' | '<' => {
                let or_equal = next == Some('=');
                let op = match (ch, or_equal) {
                    ('>', true) => CompareOp::Ge,
                    ('>', false) => CompareOp::Gt,
                    ('<', true) => CompareOp::Le,
                    _ => CompareOp::Lt,
                };
                tokens.push(Token::Cmp(op));
                i += if or_equal { 2 } else { 1 };
            }
            '"' | '\'' => {
                let quote = ch;
                let mut value = String::new();
                let mut j = i + 1;
                loop {
                    let Some(&(_, c)) = chars.get(j) else {
                        return Err(ExprError::UnterminatedString { offset });
                    };
                    match c {
                        '\\' => {
                            let Some(&(_, escaped)) = chars.get(j + 1) else {
                                return Err(ExprError::UnterminatedString { offset });
                            };
                            value.push(escaped);
                            j += 2;
                        }
                        c if c == quote => break,
                        c => {
                            value.push(c);
                            j += 1;
                        }
                    }
                }
                tokens.push(Token::Str(value));
                i = j + 1;
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let mut j = i + 1;
                while chars
                    .get(j)
                    .is_some_and(|(_, c)| c.is_ascii_digit() || *c == '.')
                {
                    j += 1;
                }
                let text: String = chars[i..j].iter().map(|(_, c)| c).collect();
                tokens.push(Token::Number(parse_number(&text)?));
                i = j;
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let mut j = i + 1;
                while chars
                    .get(j)
                    .is_some_and(|(_, c)| c.is_alphanumeric() || matches!(*c, '_' | '.' | '$'))
                {
                    j += 1;
                }
                let word: String = chars[i..j].iter().map(|(_, c)| c).collect();
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "exists" => Token::Exists,
                    "contains" => Token::Cmp(CompareOp::Contains),
                    _ => Token::Ident(word),
                });
                i = j;
            }
            other => return Err(ExprError::UnexpectedChar { ch: other, offset }),
        }
    }

    Ok(tokens)
}

fn parse_number(text: &str) -> Result<JsonValue, ExprError> {
    let invalid = || ExprError::InvalidNumber {
        text: text.to_string(),
    };
    if let Ok(n) = text.parse::<i64>() {
        return Ok(JsonValue::from(n));
    }
    let n: f64 = text.parse().map_err(|_| invalid())?;
    serde_json::Number::from_f64(n)
        .map(JsonValue::Number)
        .ok_or_else(invalid)
}

/// Maximum nesting of parentheses and `!` operators.
const MAX_DEPTH: usize = 64;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T, ExprError>) -> Result<T, ExprError> {
        if self.depth >= MAX_DEPTH {
            return Err(ExprError::TooDeep { limit: MAX_DEPTH });
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut operands = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            operands.push(self.parse_and()?);
        }
        Ok(if operands.len() == 1 {
            operands.remove(0)
        } else {
            Expr::Or { any: operands }
        })
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut operands = vec![self.parse_unary()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            operands.push(self.parse_unary()?);
        }
        Ok(if operands.len() == 1 {
            operands.remove(0)
        } else {
            Expr::And { all: operands }
        })
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            let expr = self.nested(Self::parse_unary)?;
            return Ok(Expr::Not {
                expr: Box::new(expr),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExprError> {
        let left = self.parse_primary()?;
        if let Some(Token::Cmp(cmp)) = self.peek().cloned() {
            self.pos += 1;
            let right = self.parse_primary()?;
            return Ok(Expr::compare(cmp, left, right));
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        match self.advance().ok_or(ExprError::UnexpectedEnd)? {
            Token::Ident(path) => Ok(Expr::field(path)),
            Token::Number(value) => Ok(Expr::Literal { value }),
            Token::Str(s) => Ok(Expr::literal(s)),
            Token::True => Ok(Expr::literal(true)),
            Token::False => Ok(Expr::literal(false)),
            Token::Null => Ok(Expr::literal(JsonValue::Null)),
            Token::Exists => match self.advance().ok_or(ExprError::UnexpectedEnd)? {
                Token::Ident(path) => Ok(Expr::Exists {
                    path: normalize_path(path),
                }),
                other => Err(ExprError::UnexpectedToken {
                    found: other.to_string(),
                }),
            },
            Token::LParen => {
                let inner = self.nested(Self::parse_or)?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    Some(other) => Err(ExprError::UnexpectedToken {
                        found: other.to_string(),
                    }),
                    None => Err(ExprError::UnexpectedEnd),
                }
            }
            other => Err(ExprError::UnexpectedToken {
                found: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: JsonValue) -> DataBag {
        DataBag::from_value(value).expect("object")
    }

    fn eval(source: &str, value: JsonValue) -> bool {
        Expr::parse(source)
            .expect("expression should parse")
            .evaluate(&data(value))
    }

    #[test]
    fn deep_parentheses_are_rejected() {
        let source = format!("{}x > 1{}", "(".repeat(10_000), ")".repeat(10_000));
        assert_eq!(
            Expr::parse(&source),
            Err(ExprError::TooDeep { limit: MAX_DEPTH })
        );
    }

    #[test]
    fn deep_negation_is_rejected() {
        let source = format!("{}x", "!".repeat(10_000));
        assert_eq!(
            Expr::parse(&source),
            Err(ExprError::TooDeep { limit: MAX_DEPTH })
        );
    }

    #[test]
    fn nesting_within_limit_parses() {
        let source = format!("{}x > 1{}", "(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert!(eval(&source, json!({"x": 2})));
        assert!(eval(&format!("{}x", "!".repeat(MAX_DEPTH)), json!({"x": true})));
    }

    #[test]
    fn greater_than_against_number() {
        assert!(eval("x > 5", json!({"x": 10})));
        assert!(!eval("x > 5", json!({"x": 1})));
    }

    #[test]
    fn data_prefix_is_optional() {
        assert!(eval("data.x > 5", json!({"x": 10})));
        assert_eq!(Expr::parse("data.x").unwrap(), Expr::field("x"));
    }

    #[test]
    fn equality_across_number_representations() {
        assert!(eval("score == 3", json!({"score": 3.0})));
        assert!(eval("score != 4", json!({"score": 3})));
    }

    #[test]
    fn boolean_combinators_and_precedence() {
        let record = json!({"priority": "urgent", "sentiment": "neutral", "escalated": false});
        assert!(eval(
            r#"priority == "urgent" || sentiment == "negative" && escalated"#,
            record.clone()
        ));
        assert!(!eval(
            r#"(priority == "urgent" || sentiment == "negative") && escalated"#,
            record.clone()
        ));
        assert!(eval("not escalated and priority == 'urgent'", record));
    }

    #[test]
    fn contains_on_arrays_strings_and_objects() {
        let record = json!({
            "tags": ["billing", "refund"],
            "subject": "Refund for order 77",
            "customer": {"email": "a@example.com"}
        });
        assert!(eval(r#"tags contains "billing""#, record.clone()));
        assert!(!eval(r#"tags contains "shipping""#, record.clone()));
        assert!(eval(r#"subject contains "order""#, record.clone()));
        assert!(eval(r#"customer contains "email""#, record));
    }

    #[test]
    fn exists_and_missing_fields() {
        let record = json!({"customer": {"email": "a@example.com"}});
        assert!(eval("exists customer.email", record.clone()));
        assert!(!eval("exists customer.phone", record.clone()));
        assert!(!eval("missing > 1", record.clone()));
        assert!(eval("missing == null", record));
    }

    #[test]
    fn ordering_between_mismatched_types_is_false() {
        assert!(!eval(r#"x > "5""#, json!({"x": 10})));
        assert!(!eval(r#"x <= "5""#, json!({"x": 10})));
    }

    #[test]
    fn negative_and_fractional_literals() {
        assert!(eval("delta < -1.5", json!({"delta": -2})));
        assert!(eval("ratio >= 0.25", json!({"ratio": 0.25})));
    }

    #[test]
    fn strict_equality_aliases() {
        assert!(eval("status === 'open'", json!({"status": "open"})));
        assert!(eval("status !== 'closed'", json!({"status": "open"})));
    }

    #[test]
    fn parse_errors() {
        assert_eq!(Expr::parse("   "), Err(ExprError::Empty));
        assert_eq!(Expr::parse("x >"), Err(ExprError::UnexpectedEnd));
        assert!(matches!(
            Expr::parse("x = 5"),
            Err(ExprError::UnexpectedChar { ch: '=', .. })
        ));
        assert!(matches!(
            Expr::parse("name == 'open"),
            Err(ExprError::UnterminatedString { .. })
        ));
        assert!(matches!(
            Expr::parse("(x > 1"),
            Err(ExprError::UnexpectedEnd)
        ));
        assert!(matches!(
            Expr::parse("x > 1 y"),
            Err(ExprError::UnexpectedToken { .. })
        ));
    }

    #[test]
    fn code_like_input_is_rejected() {
        assert!(Expr::parse("process.exit(1); x > 5").is_err());
        assert!(Expr::parse("x > 5; drop()").is_err());
    }

    #[test]
    fn tree_form_serde() {
        let expr = Expr::parse(r#"x > 5 && tier == "gold""#).unwrap();
        let json = serde_json::to_value(&expr).expect("serialize");
        assert_eq!(json["op"], "and");
        assert_eq!(json["all"][0]["cmp"], "gt");

        let parsed: Expr = serde_json::from_value(json).expect("deserialize");
        assert_eq!(parsed, expr);
    }
}
