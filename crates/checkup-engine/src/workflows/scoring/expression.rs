//! Structured rule expressions for condition and safety rules.
//!
//! Rules are stored as JSON-encoded [`RuleExpr`] trees. Older rule rows written
//! as text (`{hba1c} >= 6.5 && {fasting_glucose} > 126`) are parsed into the same
//! tree by [`parse`]; the text is never executed.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ParameterValues;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl Comparator {
    fn apply(self, left: f64, right: f64) -> bool {
        match self {
            Self::Gt => left > right,
            Self::Ge => left >= right,
            Self::Lt => left < right,
            Self::Le => left <= right,
            Self::Eq => (left - right).abs() < f64::EPSILON,
            Self::Ne => (left - right).abs() >= f64::EPSILON,
        }
    }

    /// Comparator to use when the operands are swapped (`6.5 <= x` ⇒ `x >= 6.5`).
    fn flipped(self) -> Self {
        match self {
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Eq => Self::Eq,
            Self::Ne => Self::Ne,
        }
    }

    const fn symbol(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RuleExpr {
    Compare {
        parameter: String,
        comparator: Comparator,
        value: f64,
    },
    All {
        terms: Vec<RuleExpr>,
    },
    Any {
        terms: Vec<RuleExpr>,
    },
    Not {
        term: Box<RuleExpr>,
    },
}

impl RuleExpr {
    pub fn compare(parameter: impl Into<String>, comparator: Comparator, value: f64) -> Self {
        Self::Compare {
            parameter: parameter.into(),
            comparator,
            value,
        }
    }

    /// Three-valued evaluation. A comparison on an absent or non-finite parameter is
    /// unknown; `None` at the root means the rule cannot be decided and is skipped.
    pub fn evaluate(&self, values: &ParameterValues) -> Option<bool> {
        match self {
            RuleExpr::Compare {
                parameter,
                comparator,
                value,
            } => {
                let observed = values.get(parameter).copied().filter(|v| v.is_finite())?;
                Some(comparator.apply(observed, *value))
            }
            RuleExpr::All { terms } => {
                let mut unknown = false;
                for term in terms {
                    match term.evaluate(values) {
                        Some(false) => return Some(false),
                        Some(true) => {}
                        None => unknown = true,
                    }
                }
                (!unknown).then_some(true)
            }
            RuleExpr::Any { terms } => {
                let mut unknown = false;
                for term in terms {
                    match term.evaluate(values) {
                        Some(true) => return Some(true),
                        Some(false) => {}
                        None => unknown = true,
                    }
                }
                (!unknown).then_some(false)
            }
            RuleExpr::Not { term } => term.evaluate(values).map(|value| !value),
        }
    }

    pub fn parameters(&self) -> BTreeSet<&str> {
        let mut keys = BTreeSet::new();
        self.collect_parameters(&mut keys);
        keys
    }

    fn collect_parameters<'a>(&'a self, keys: &mut BTreeSet<&'a str>) {
        match self {
            RuleExpr::Compare { parameter, .. } => {
                keys.insert(parameter.as_str());
            }
            RuleExpr::All { terms } | RuleExpr::Any { terms } => {
                for term in terms {
                    term.collect_parameters(keys);
                }
            }
            RuleExpr::Not { term } => term.collect_parameters(keys),
        }
    }
}

impl fmt::Display for RuleExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleExpr::Compare {
                parameter,
                comparator,
                value,
            } => write!(f, "{{{parameter}}} {} {value}", comparator.symbol()),
            RuleExpr::All { terms } => write_joined(f, terms, " && "),
            RuleExpr::Any { terms } => write_joined(f, terms, " || "),
            RuleExpr::Not { term } => write!(f, "!({term})"),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, terms: &[RuleExpr], separator: &str) -> fmt::Result {
    write!(f, "(")?;
    for (index, term) in terms.iter().enumerate() {
        if index > 0 {
            f.write_str(separator)?;
        }
        write!(f, "{term}")?;
    }
    write!(f, ")")
}

#[derive(Debug, Error, PartialEq)]
pub enum RuleParseError {
    #[error("rule expression is empty")]
    Empty,
    #[error("unexpected character '{found}' at position {position}")]
    UnexpectedCharacter { position: usize, found: char },
    #[error("unexpected token '{found}' at position {position}")]
    UnexpectedToken { position: usize, found: String },
    #[error("rule expression ended unexpectedly")]
    UnexpectedEnd,
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("comparison at position {position} must compare one parameter with one number")]
    InvalidComparison { position: usize },
    #[error("rule nests deeper than {limit} levels at position {position}")]
    TooDeep { position: usize, limit: usize },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Parameter(String),
    Number(f64),
    Comparator(Comparator),
    And,
    Or,
    Not,
    Open,
    Close,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Parameter(name) => write!(f, "{{{name}}}"),
            Token::Number(value) => write!(f, "{value}"),
            Token::Comparator(comparator) => f.write_str(comparator.symbol()),
            Token::And => f.write_str("&&"),
            Token::Or => f.write_str("||"),
            Token::Not => f.write_str("!"),
            Token::Open => f.write_str("("),
            Token::Close => f.write_str(")"),
        }
    }
}

/// Parses legacy rule text into a [`RuleExpr`].
///
/// Accepts `{key}` or bare identifiers, numeric literals, the six comparators,
/// `&&`/`AND`, `||`/`OR`, `!`/`NOT` and parentheses.
pub fn parse(input: &str) -> Result<RuleExpr, RuleParseError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(RuleParseError::Empty);
    }

    let mut parser = Parser {
        tokens,
        cursor: 0,
        depth: 0,
    };
    let expr = parser.parse_or()?;
    match parser.tokens.get(parser.cursor) {
        None => Ok(expr),
        Some((position, token)) => Err(RuleParseError::UnexpectedToken {
            position: *position,
            found: token.to_string(),
        }),
    }
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, RuleParseError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut index = 0;

    while index < chars.len() {
        let (position, ch) = chars[index];
        let next = chars.get(index + 1).map(|(_, c)| *c);

        match ch {
            c if c.is_whitespace() => index += 1,
            '(' => {
                tokens.push((position, Token::Open));
                index += 1;
            }
            ')' => {
                tokens.push((position, Token::Close));
                index += 1;
            }
            '&' if next == Some('&') => {
                tokens.push((position, Token::And));
                index += 2;
            }
            '|' if next == Some('|') => {
                tokens.push((position, Token::Or));
                index += 2;
            }
            '>' | '<' | '=' | '!' => {
                let (token, width) = match (ch, next) {
                    ('>', Some('=')) => (Token::Comparator(Comparator::Ge), 2),
                    ('<', Some('=')) => (Token::Comparator(Comparator::Le), 2),
                    ('=', Some('=')) => (Token::Comparator(Comparator::Eq), 2),
                    ('!', Some('=')) => (Token::Comparator(Comparator::Ne), 2),
                    ('>', _) => (Token::Comparator(Comparator::Gt), 1),
                    ('<', _) => (Token::Comparator(Comparator::Lt), 1),
                    ('!', _) => (Token::Not, 1),
                    _ => {
                        return Err(RuleParseError::UnexpectedCharacter { position, found: ch });
                    }
                };
                tokens.push((position, token));
                index += width;
            }
            '{' => {
                let start = index + 1;
                let mut end = start;
                while end < chars.len() && chars[end].1 != '}' {
                    end += 1;
                }
                if end >= chars.len() {
                    return Err(RuleParseError::UnexpectedEnd);
                }
                let name: String = chars[start..end].iter().map(|(_, c)| *c).collect();
                let name = name.trim();
                if name.is_empty() {
                    return Err(RuleParseError::UnexpectedCharacter { position, found: '{' });
                }
                tokens.push((position, Token::Parameter(name.to_string())));
                index = end + 1;
            }
            c if c.is_ascii_digit() || c == '.' || (c == '-' && next.is_some_and(|n| n.is_ascii_digit() || n == '.')) => {
                let start = index;
                index += 1;
                while index < chars.len()
                    && (chars[index].1.is_ascii_digit() || chars[index].1 == '.')
                {
                    index += 1;
                }
                let literal: String = chars[start..index].iter().map(|(_, c)| *c).collect();
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| RuleParseError::InvalidNumber(literal.clone()))?;
                tokens.push((position, Token::Number(value)));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = index;
                while index < chars.len()
                    && (chars[index].1.is_ascii_alphanumeric() || chars[index].1 == '_')
                {
                    index += 1;
                }
                let word: String = chars[start..index].iter().map(|(_, c)| *c).collect();
                let token = match word.to_ascii_uppercase().as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    _ => Token::Parameter(word),
                };
                tokens.push((position, token));
            }
            other => {
                return Err(RuleParseError::UnexpectedCharacter {
                    position,
                    found: other,
                })
            }
        }
    }

    Ok(tokens)
}

/// Bound on `(` and `!` nesting; real rules use two or three levels.
const MAX_NESTING: usize = 32;

struct Parser {
    tokens: Vec<(usize, Token)>,
    cursor: usize,
    depth: usize,
}

impl Parser {
    fn descend(&mut self) -> Result<(), RuleParseError> {
        if self.depth >= MAX_NESTING {
            let position = self
                .tokens
                .get(self.cursor)
                .map_or(0, |(position, _)| *position);
            return Err(RuleParseError::TooDeep {
                position,
                limit: MAX_NESTING,
            });
        }
        self.depth += 1;
        Ok(())
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor).map(|(_, token)| token)
    }

    fn next(&mut self) -> Result<(usize, Token), RuleParseError> {
        let item = self
            .tokens
            .get(self.cursor)
            .cloned()
            .ok_or(RuleParseError::UnexpectedEnd)?;
        self.cursor += 1;
        Ok(item)
    }

    fn parse_or(&mut self) -> Result<RuleExpr, RuleParseError> {
        let mut terms = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.cursor += 1;
            terms.push(self.parse_and()?);
        }
        Ok(collapse(terms, |terms| RuleExpr::Any { terms }))
    }

    fn parse_and(&mut self) -> Result<RuleExpr, RuleParseError> {
        let mut terms = vec![self.parse_unary()?];
        while self.peek() == Some(&Token::And) {
            self.cursor += 1;
            terms.push(self.parse_unary()?);
        }
        Ok(collapse(terms, |terms| RuleExpr::All { terms }))
    }

    fn parse_unary(&mut self) -> Result<RuleExpr, RuleParseError> {
        match self.peek() {
            Some(Token::Not) => {
                self.descend()?;
                self.cursor += 1;
                let term = self.parse_unary()?;
                self.depth -= 1;
                Ok(RuleExpr::Not {
                    term: Box::new(term),
                })
            }
            Some(Token::Open) => {
                self.descend()?;
                self.cursor += 1;
                let inner = self.parse_or()?;
                self.depth -= 1;
                match self.next()? {
                    (_, Token::Close) => Ok(inner),
                    (position, token) => Err(RuleParseError::UnexpectedToken {
                        position,
                        found: token.to_string(),
                    }),
                }
            }
            _ => self.parse_comparison(),
        }
    }

    fn parse_comparison(&mut self) -> Result<RuleExpr, RuleParseError> {
        let (position, left) = self.next()?;
        let comparator = match self.next()? {
            (_, Token::Comparator(comparator)) => comparator,
            (position, token) => {
                return Err(RuleParseError::UnexpectedToken {
                    position,
                    found: token.to_string(),
                })
            }
        };
        let (_, right) = self.next()?;

        match (left, right) {
            (Token::Parameter(parameter), Token::Number(value)) => {
                Ok(RuleExpr::compare(parameter, comparator, value))
            }
            (Token::Number(value), Token::Parameter(parameter)) => {
                Ok(RuleExpr::compare(parameter, comparator.flipped(), value))
            }
            _ => Err(RuleParseError::InvalidComparison { position }),
        }
    }
}

fn collapse(mut terms: Vec<RuleExpr>, combine: impl FnOnce(Vec<RuleExpr>) -> RuleExpr) -> RuleExpr {
    if terms.len() == 1 {
        terms.remove(0)
    } else {
        combine(terms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, f64)]) -> ParameterValues {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), *value))
            .collect()
    }

    #[test]
    fn parses_placeholder_conjunctions() {
        let expr = parse("{hba1c} >= 6.5 && {fasting_glucose} > 126").expect("parses");
        assert_eq!(
            expr,
            RuleExpr::All {
                terms: vec![
                    RuleExpr::compare("hba1c", Comparator::Ge, 6.5),
                    RuleExpr::compare("fasting_glucose", Comparator::Gt, 126.0),
                ]
            }
        );
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let expr = parse("a > 1 OR b > 2 AND c < 3").expect("parses");
        assert_eq!(
            expr,
            RuleExpr::Any {
                terms: vec![
                    RuleExpr::compare("a", Comparator::Gt, 1.0),
                    RuleExpr::All {
                        terms: vec![
                            RuleExpr::compare("b", Comparator::Gt, 2.0),
                            RuleExpr::compare("c", Comparator::Lt, 3.0),
                        ]
                    },
                ]
            }
        );
    }

    #[test]
    fn number_on_the_left_flips_the_comparator() {
        let expr = parse("40 > {hdl_cholesterol}").expect("parses");
        assert_eq!(expr, RuleExpr::compare("hdl_cholesterol", Comparator::Lt, 40.0));
    }

    #[test]
    fn negation_and_parentheses() {
        let expr = parse("!({crp} <= 3) && {bmi} > -1").expect("parses");
        let sample = values(&[("crp", 5.0), ("bmi", 22.0)]);
        assert_eq!(expr.evaluate(&sample), Some(true));
        assert_eq!(
            expr.parameters().into_iter().collect::<Vec<_>>(),
            vec!["bmi", "crp"]
        );
    }

    #[test]
    fn missing_parameter_leaves_undecided_rules_unknown() {
        let expr = parse("{ldl_cholesterol} > 160 || {triglycerides} > 200").expect("parses");
        assert_eq!(expr.evaluate(&values(&[("ldl_cholesterol", 120.0)])), None);
        assert_eq!(expr.evaluate(&values(&[("ldl_cholesterol", 170.0)])), Some(true));
        assert_eq!(
            expr.evaluate(&values(&[("ldl_cholesterol", 120.0), ("triglycerides", 90.0)])),
            Some(false)
        );

        let both = parse("{ldl_cholesterol} > 160 && {triglycerides} > 200").expect("parses");
        assert_eq!(both.evaluate(&values(&[("ldl_cholesterol", 120.0)])), Some(false));
        assert_eq!(both.evaluate(&values(&[("ldl_cholesterol", 170.0)])), None);
    }

    #[test]
    fn rejects_code_like_input() {
        assert!(matches!(
            parse("{a} > 1; drop table reports"),
            Err(RuleParseError::UnexpectedCharacter { found: ';', .. })
        ));
        assert!(matches!(
            parse("{a} > {b}"),
            Err(RuleParseError::InvalidComparison { .. })
        ));
        assert_eq!(parse("   "), Err(RuleParseError::Empty));
        assert_eq!(parse("{a} >"), Err(RuleParseError::UnexpectedEnd));
    }

    #[test]
    fn deep_nesting_is_rejected_instead_of_recursing() {
        let nested = format!("{}{{a}} > 1{}", "(".repeat(10_000), ")".repeat(10_000));
        assert!(matches!(
            parse(&nested),
            Err(RuleParseError::TooDeep { limit: MAX_NESTING, .. })
        ));
        assert!(matches!(
            parse(&format!("{}{{a}} > 1", "!".repeat(10_000))),
            Err(RuleParseError::TooDeep { .. })
        ));

        let shallow = format!("{}{{a}} > 1{}", "(".repeat(4), ")".repeat(4));
        assert!(parse(&shallow).is_ok());
    }

    #[test]
    fn display_round_trips_through_the_parser() {
        let expr = parse("({a} > 1 && !({b} == 2)) || {c} <= 0.5").expect("parses");
        let reparsed = parse(&expr.to_string()).expect("display output parses");
        assert_eq!(expr, reparsed);
    }

    #[test]
    fn json_shape_is_tagged_by_op() {
        let expr = RuleExpr::compare("crp", Comparator::Gt, 10.0);
        let json = serde_json::to_value(&expr).expect("serializes");
        assert_eq!(
            json,
            serde_json::json!({"op": "compare", "parameter": "crp", "comparator": "gt", "value": 10.0})
        );
    }
}
