//! # Query Builder
//!
//! The contact query language: its AST and canonical rendering, a parser
//! that checks queries against org assets, and the builder that turns an
//! audience description into one normalized query.
//!
//! ## Key Components
//!
//! - [`ast`] - conditions, boolean combinations and simplification
//! - [`parser`] - text to AST, with property resolution
//! - [`recipients`] - audience to query

pub mod ast;
pub mod errors;
pub mod parser;
pub mod recipients;

pub use ast::{BoolOperator, Condition, ContactQuery, Operator, PropertyType, QueryNode};
pub use errors::QueryError;
pub use parser::{parse_query, parse_unchecked};
pub use recipients::{build_recipients_query, RecipientsQuery};
