//! # Contact Query Parser
//!
//! Parses the text query language into a [`ContactQuery`] and checks every
//! condition against the org's assets.
//!
//! ```text
//! query      := or_expr
//! or_expr    := and_expr ( OR and_expr )*
//! and_expr   := term ( AND? term )*
//! term       := '(' or_expr ')' | condition
//! condition  := text ( operator text )?
//! ```
//!
//! A term with no operator is a free-text search: `name ~ "<text>"`, or
//! `urn ~ "<text>"` when the text looks like a phone number.

use chrono::NaiveDate;

use super::ast::{attributes, Condition, ContactQuery, Operator, PropertyType, QueryNode};
use super::errors::QueryError;
use crate::assets::OrgAssets;
use crate::models::urn::is_scheme;
use crate::models::{ContactStatus, FieldType};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Op(Operator),
    Text(String),
    Quoted(String),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::LParen => "(".to_string(),
            Self::RParen => ")".to_string(),
            Self::And => "AND".to_string(),
            Self::Or => "OR".to_string(),
            Self::Op(op) => op.to_string(),
            Self::Text(t) => t.clone(),
            Self::Quoted(t) => format!("\"{t}\""),
        }
    }
}

fn is_operator_char(c: char) -> bool {
    matches!(c, '=' | '!' | '<' | '>' | '~')
}

fn tokenize(input: &str) -> Result<Vec<Token>, QueryError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '(' {
            chars.next();
            tokens.push(Token::LParen);
        } else if c == ')' {
            chars.next();
            tokens.push(Token::RParen);
        } else if c == '"' {
            chars.next();
            let mut value = String::new();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => {
                        closed = true;
                        break;
                    }
                    _ => value.push(c),
                }
            }
            if !closed {
                return Err(QueryError::syntax(
                    format!("\"{value}"),
                    "unterminated quoted string",
                ));
            }
            tokens.push(Token::Quoted(value));
        } else if is_operator_char(c) {
            let mut symbol = String::new();
            while let Some(&c) = chars.peek() {
                if !is_operator_char(c) {
                    break;
                }
                symbol.push(c);
                chars.next();
            }
            let op = Operator::from_symbol(&symbol)
                .ok_or_else(|| QueryError::syntax(&symbol, "unknown operator"))?;
            tokens.push(Token::Op(op));
        } else {
            let mut text = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() || c == '(' || c == ')' || c == '"' || is_operator_char(c) {
                    break;
                }
                text.push(c);
                chars.next();
            }
            match text.to_uppercase().as_str() {
                "AND" => tokens.push(Token::And),
                "OR" => tokens.push(Token::Or),
                _ => tokens.push(Token::Text(text)),
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn unexpected(&self, message: &str) -> QueryError {
        let near = self
            .peek()
            .map(Token::describe)
            .unwrap_or_else(|| "<EOF>".to_string());
        QueryError::syntax(near, message)
    }

    fn parse_or(&mut self) -> Result<QueryNode, QueryError> {
        let mut children = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.next();
            children.push(self.parse_and()?);
        }
        Ok(if children.len() == 1 {
            children.remove(0)
        } else {
            QueryNode::or(children)
        })
    }

    fn parse_and(&mut self) -> Result<QueryNode, QueryError> {
        let mut children = vec![self.parse_term()?];
        loop {
            match self.peek() {
                Some(Token::And) => {
                    self.next();
                    children.push(self.parse_term()?);
                }
                // adjacent terms are implicitly ANDed
                Some(Token::LParen | Token::Text(_) | Token::Quoted(_)) => {
                    children.push(self.parse_term()?);
                }
                _ => break,
            }
        }
        Ok(if children.len() == 1 {
            children.remove(0)
        } else {
            QueryNode::and(children)
        })
    }

    fn parse_term(&mut self) -> Result<QueryNode, QueryError> {
        match self.peek() {
            Some(Token::LParen) => {
                self.next();
                let inner = self.parse_or()?;
                if self.next() != Some(Token::RParen) {
                    self.pos -= 1;
                    return Err(self.unexpected("expecting ')'"));
                }
                Ok(inner)
            }
            Some(Token::Text(_) | Token::Quoted(_)) => self.parse_condition(),
            _ => Err(self.unexpected("expecting a condition")),
        }
    }

    fn parse_condition(&mut self) -> Result<QueryNode, QueryError> {
        let (key, quoted) = match self.next() {
            Some(Token::Text(t)) => (t, false),
            Some(Token::Quoted(t)) => (t, true),
            _ => return Err(self.unexpected("expecting a condition")),
        };

        let op = match self.peek() {
            Some(Token::Op(op)) => *op,
            _ => return Ok(implicit_condition(&key)),
        };
        if quoted {
            return Err(QueryError::syntax(format!("\"{key}\""), "property names can't be quoted"));
        }
        self.next();

        let value = match self.next() {
            Some(Token::Text(t) | Token::Quoted(t)) => t,
            _ => {
                self.pos -= 1;
                return Err(self.unexpected("expecting a value"));
            }
        };

        Ok(QueryNode::Condition(Condition::new(
            PropertyType::Attribute,
            key,
            op,
            value,
        )))
    }
}

fn looks_like_phone(text: &str) -> bool {
    let digits = text.chars().filter(|c| c.is_ascii_digit()).count();
    digits >= 5
        && text
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | ' ' | '(' | ')'))
}

fn implicit_condition(text: &str) -> QueryNode {
    let key = if looks_like_phone(text) {
        attributes::URN
    } else {
        attributes::NAME
    };
    Condition::attribute(key, Operator::Contains, text).into()
}

/// Parses query text without checking it against any org. Every condition
/// is left typed as an attribute.
pub fn parse_unchecked(text: &str) -> Result<ContactQuery, QueryError> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Ok(ContactQuery::default());
    }
    let mut parser = Parser { tokens, pos: 0 };
    let root = parser.parse_or()?;
    if parser.peek().is_some() {
        return Err(parser.unexpected("extraneous input"));
    }
    Ok(ContactQuery::new(Some(root)))
}

/// Parses query text and resolves every condition against the org's
/// attributes, URN schemes and fields
pub fn parse_query(text: &str, assets: &OrgAssets) -> Result<ContactQuery, QueryError> {
    let parsed = parse_unchecked(text)?;
    let root = parsed.into_root().map(|r| resolve_node(r, assets)).transpose()?;
    Ok(ContactQuery::new(root))
}

fn resolve_node(node: QueryNode, assets: &OrgAssets) -> Result<QueryNode, QueryError> {
    match node {
        QueryNode::Condition(c) => resolve_condition(&c, assets).map(QueryNode::Condition),
        QueryNode::Combination { op, children } => {
            let children = children
                .into_iter()
                .map(|c| resolve_node(c, assets))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(QueryNode::Combination { op, children })
        }
    }
}

fn require(key: &str, op: Operator, allowed: &[Operator]) -> Result<(), QueryError> {
    if allowed.contains(&op) {
        Ok(())
    } else {
        Err(QueryError::unsupported_operator(key, op))
    }
}

const EQUALITY: &[Operator] = &[Operator::Equal, Operator::NotEqual];
const TEXT_SEARCH: &[Operator] = &[Operator::Equal, Operator::NotEqual, Operator::Contains];
const ORDERED: &[Operator] = &[
    Operator::Equal,
    Operator::NotEqual,
    Operator::GreaterThan,
    Operator::GreaterThanOrEqual,
    Operator::LessThan,
    Operator::LessThanOrEqual,
];

fn check_number(value: &str) -> Result<(), QueryError> {
    value
        .parse::<f64>()
        .map(|_| ())
        .map_err(|_| QueryError::InvalidNumber(value.to_string()))
}

fn check_date(value: &str, assets: &OrgAssets) -> Result<NaiveDate, QueryError> {
    assets
        .env()
        .parse_date(value)
        .ok_or_else(|| QueryError::InvalidDate(value.to_string()))
}

/// Dates may be compared against an empty value to test whether they are set
fn check_optional_date(
    key: &str,
    op: Operator,
    value: &str,
    assets: &OrgAssets,
) -> Result<(), QueryError> {
    require(key, op, ORDERED)?;
    if value.is_empty() {
        return require(key, op, EQUALITY);
    }
    check_date(value, assets).map(|_| ())
}

fn resolve_condition(c: &Condition, assets: &OrgAssets) -> Result<Condition, QueryError> {
    let key = c.key();
    let op = c.operator();
    let value = c.value();

    if attributes::ALL.contains(&key) {
        match key {
            attributes::ID => {
                require(key, op, EQUALITY)?;
                value
                    .parse::<i64>()
                    .map_err(|_| QueryError::InvalidNumber(value.to_string()))?;
            }
            attributes::UUID | attributes::LANGUAGE => require(key, op, EQUALITY)?,
            attributes::NAME | attributes::URN => require(key, op, TEXT_SEARCH)?,
            attributes::STATUS => {
                require(key, op, EQUALITY)?;
                if ContactStatus::from_name(value).is_none() {
                    return Err(QueryError::InvalidStatus(value.to_string()));
                }
                return Ok(Condition::attribute(key, op, value.to_lowercase()));
            }
            attributes::GROUP => {
                require(key, op, EQUALITY)?;
                let group = assets
                    .group_by_name(value)
                    .ok_or_else(|| QueryError::UnknownGroup(value.to_string()))?;
                return Ok(Condition::attribute(key, op, group.name.clone()));
            }
            attributes::FLOW | attributes::HISTORY => {
                require(key, op, EQUALITY)?;
                if value.is_empty() {
                    return Ok(c.clone());
                }
                let flow = assets
                    .flow_by_name(value)
                    .ok_or_else(|| QueryError::UnknownFlow(value.to_string()))?;
                return Ok(Condition::attribute(key, op, flow.name.clone()));
            }
            attributes::CREATED_ON | attributes::LAST_SEEN_ON => {
                check_optional_date(key, op, value, assets)?;
            }
            _ => return Err(QueryError::unknown_property(key)),
        }
        return Ok(c.clone());
    }

    if is_scheme(key) {
        require(key, op, TEXT_SEARCH)?;
        return Ok(Condition::scheme(key, op, value));
    }

    if let Some(field) = assets.field_by_key(key) {
        match field.value_type {
            FieldType::Text | FieldType::State | FieldType::District | FieldType::Ward => {
                require(key, op, EQUALITY)?
            }
            FieldType::Number => {
                require(key, op, ORDERED)?;
                if !value.is_empty() {
                    check_number(value)?;
                } else {
                    require(key, op, EQUALITY)?;
                }
            }
            FieldType::Datetime => check_optional_date(key, op, value, assets)?,
        }
        return Ok(Condition::field(&field.key, op, value));
    }

    Err(QueryError::unknown_property(key))
}
