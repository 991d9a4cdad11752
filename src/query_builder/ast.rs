//! # Contact Query AST
//!
//! Boolean expression trees over `property operator value` conditions, and
//! their canonical text form.
//!
//! The canonical form is what the search resolver parses and what smart
//! groups persist, so rendering must be stable: the same tree always renders
//! to the same string, and parsing that string yields the same tree. Text
//! values are double-quoted, numbers and dates are written bare, and nested
//! combinations are parenthesised.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Attribute keys every contact has, independent of org configuration
pub mod attributes {
    pub const ID: &str = "id";
    pub const UUID: &str = "uuid";
    pub const NAME: &str = "name";
    pub const STATUS: &str = "status";
    pub const LANGUAGE: &str = "language";
    pub const GROUP: &str = "group";
    pub const FLOW: &str = "flow";
    pub const HISTORY: &str = "history";
    pub const CREATED_ON: &str = "created_on";
    pub const LAST_SEEN_ON: &str = "last_seen_on";
    pub const URN: &str = "urn";

    pub const ALL: &[&str] = &[
        ID,
        UUID,
        NAME,
        STATUS,
        LANGUAGE,
        GROUP,
        FLOW,
        HISTORY,
        CREATED_ON,
        LAST_SEEN_ON,
        URN,
    ];
}

/// What a condition's key refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    Attribute,
    Scheme,
    Field,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Contains,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::Contains => "~",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "=" => Some(Self::Equal),
            "!=" => Some(Self::NotEqual),
            ">" => Some(Self::GreaterThan),
            ">=" => Some(Self::GreaterThanOrEqual),
            "<" => Some(Self::LessThan),
            "<=" => Some(Self::LessThanOrEqual),
            "~" => Some(Self::Contains),
            _ => None,
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Self::GreaterThan | Self::GreaterThanOrEqual | Self::LessThan | Self::LessThanOrEqual
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoolOperator {
    And,
    Or,
}

impl fmt::Display for BoolOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
        }
    }
}

/// A single `key operator value` comparison
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Condition {
    property_type: PropertyType,
    key: String,
    operator: Operator,
    value: String,
}

impl Condition {
    pub fn new(
        property_type: PropertyType,
        key: impl Into<String>,
        operator: Operator,
        value: impl Into<String>,
    ) -> Self {
        Self {
            property_type,
            key: key.into().to_lowercase(),
            operator,
            value: value.into(),
        }
    }

    pub fn attribute(key: &str, operator: Operator, value: impl Into<String>) -> Self {
        Self::new(PropertyType::Attribute, key, operator, value)
    }

    pub fn scheme(scheme: &str, operator: Operator, value: impl Into<String>) -> Self {
        Self::new(PropertyType::Scheme, scheme, operator, value)
    }

    pub fn field(key: &str, operator: Operator, value: impl Into<String>) -> Self {
        Self::new(PropertyType::Field, key, operator, value)
    }

    pub fn property_type(&self) -> PropertyType {
        self.property_type
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ", self.key, self.operator)?;
        if is_number(&self.value) || is_date(&self.value) {
            f.write_str(&self.value)
        } else {
            write_quoted(f, &self.value)
        }
    }
}

/// A node in a query tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryNode {
    Condition(Condition),
    Combination {
        op: BoolOperator,
        children: Vec<QueryNode>,
    },
}

impl QueryNode {
    pub fn and(children: Vec<QueryNode>) -> Self {
        Self::Combination {
            op: BoolOperator::And,
            children,
        }
    }

    pub fn or(children: Vec<QueryNode>) -> Self {
        Self::Combination {
            op: BoolOperator::Or,
            children,
        }
    }

    /// Flattens nested combinations of the same operator, drops empty
    /// combinations and unwraps combinations with a single child. Returns
    /// `None` when nothing is left.
    pub fn simplify(self) -> Option<QueryNode> {
        match self {
            Self::Condition(c) => Some(Self::Condition(c)),
            Self::Combination { op, children } => {
                let mut flat = Vec::with_capacity(children.len());
                for child in children {
                    match child.simplify() {
                        None => {}
                        Some(Self::Combination {
                            op: child_op,
                            children: grandchildren,
                        }) if child_op == op => flat.extend(grandchildren),
                        Some(other) => flat.push(other),
                    }
                }
                match flat.len() {
                    0 => None,
                    1 => flat.pop(),
                    _ => Some(Self::Combination { op, children: flat }),
                }
            }
        }
    }

    /// All conditions in the tree, depth first
    pub fn conditions(&self) -> Vec<&Condition> {
        let mut out = Vec::new();
        self.collect_conditions(&mut out);
        out
    }

    fn collect_conditions<'a>(&'a self, out: &mut Vec<&'a Condition>) {
        match self {
            Self::Condition(c) => out.push(c),
            Self::Combination { children, .. } => {
                for child in children {
                    child.collect_conditions(out);
                }
            }
        }
    }
}

impl From<Condition> for QueryNode {
    fn from(condition: Condition) -> Self {
        Self::Condition(condition)
    }
}

impl fmt::Display for QueryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Condition(c) => write!(f, "{c}"),
            Self::Combination { op, children } => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " {op} ")?;
                    }
                    match child {
                        Self::Combination { .. } => write!(f, "({child})")?,
                        Self::Condition(c) => write!(f, "{c}")?,
                    }
                }
                Ok(())
            }
        }
    }
}

/// A parsed or built contact query. An empty query matches every contact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactQuery {
    root: Option<QueryNode>,
}

impl ContactQuery {
    pub fn new(root: Option<QueryNode>) -> Self {
        Self {
            root: root.and_then(QueryNode::simplify),
        }
    }

    pub fn root(&self) -> Option<&QueryNode> {
        self.root.as_ref()
    }

    pub fn into_root(self) -> Option<QueryNode> {
        self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }
}

impl fmt::Display for ContactQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.root {
            Some(root) => write!(f, "{root}"),
            None => Ok(()),
        }
    }
}

pub(crate) fn is_number(value: &str) -> bool {
    let digits = value.strip_prefix('-').unwrap_or(value);
    let mut parts = digits.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    let fraction = parts.next();
    !whole.is_empty()
        && whole.chars().all(|c| c.is_ascii_digit())
        && fraction.map_or(true, |f| !f.is_empty() && f.chars().all(|c| c.is_ascii_digit()))
}

/// Three digit groups joined by one of `-`, `/` or `.`
pub(crate) fn is_date(value: &str) -> bool {
    let Some(separator) = value.chars().find(|c| matches!(c, '-' | '/' | '.')) else {
        return false;
    };
    let parts: Vec<&str> = value.split(separator).collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| (1..=4).contains(&p.len()) && p.chars().all(|c| c.is_ascii_digit()))
}

fn write_quoted(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in value.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            _ => write!(f, "{c}")?,
        }
    }
    f.write_str("\"")
}
