//! # Index Query Translation
//!
//! Turns resolved contact query trees into Elasticsearch bool queries over
//! the contacts index.
//!
//! Contact documents carry top level attributes (`id`, `uuid`, `name`,
//! `status`, `language`, `group_ids`, `flow_id`, `flow_history_ids`,
//! `created_on`, `last_seen_on`), a nested `urns` list of
//! `{scheme, path}` and a nested `fields` list of
//! `{field, text, number, datetime, state, district, ward}`.
//!
//! Dates in queries are calendar days in the org timezone, so every date
//! comparison becomes a range over the UTC instants bounding that day.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::assets::OrgAssets;
use crate::models::{ContactId, ContactStatus, FieldType, OrgEnvironment};
use crate::query_builder::ast::{attributes, BoolOperator, Condition, Operator, PropertyType, QueryNode};
use crate::query_builder::QueryError;

fn term(field: &str, value: impl Into<Value>) -> Value {
    json!({ "term": { field: value.into() } })
}

fn not(query: Value) -> Value {
    json!({ "bool": { "must_not": [query] } })
}

fn exists(field: &str) -> Value {
    json!({ "exists": { "field": field } })
}

fn nested(path: &str, query: Value) -> Value {
    json!({ "nested": { "path": path, "query": query } })
}

fn must(clauses: Vec<Value>) -> Value {
    json!({ "bool": { "must": clauses } })
}

/// Applies `!=` by negating the positive query
fn equality(op: Operator, query: Value) -> Value {
    if op == Operator::NotEqual {
        not(query)
    } else {
        query
    }
}

/// `= ""` means the property is unset, `!= ""` that it is set
fn presence(op: Operator, is_set: Value) -> Value {
    if op == Operator::NotEqual {
        is_set
    } else {
        not(is_set)
    }
}

fn instant(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn date_range(
    key: &str,
    field: &str,
    op: Operator,
    value: &str,
    env: &OrgEnvironment,
) -> Result<Value, QueryError> {
    let date: NaiveDate = env
        .parse_date(value)
        .ok_or_else(|| QueryError::InvalidDate(value.to_string()))?;
    let next = date
        .succ_opt()
        .ok_or_else(|| QueryError::InvalidDate(value.to_string()))?;
    let start = instant(env.start_of_day(date));
    let end = instant(env.start_of_day(next));

    let bounds = match op {
        Operator::Equal | Operator::NotEqual => json!({ "gte": start, "lt": end }),
        Operator::GreaterThan => json!({ "gte": end }),
        Operator::GreaterThanOrEqual => json!({ "gte": start }),
        Operator::LessThan => json!({ "lt": start }),
        Operator::LessThanOrEqual => json!({ "lt": end }),
        Operator::Contains => return Err(QueryError::unsupported_operator(key, op)),
    };
    Ok(equality(op, json!({ "range": { field: bounds } })))
}

fn number_query(key: &str, field: &str, op: Operator, value: &str) -> Result<Value, QueryError> {
    let number: f64 = value
        .parse()
        .map_err(|_| QueryError::InvalidNumber(value.to_string()))?;
    let bound = match op {
        Operator::Equal | Operator::NotEqual => return Ok(equality(op, term(field, number))),
        Operator::GreaterThan => "gt",
        Operator::GreaterThanOrEqual => "gte",
        Operator::LessThan => "lt",
        Operator::LessThanOrEqual => "lte",
        Operator::Contains => return Err(QueryError::unsupported_operator(key, op)),
    };
    Ok(json!({ "range": { field: { bound: number } } }))
}

fn translate_attribute(c: &Condition, assets: &OrgAssets) -> Result<Value, QueryError> {
    let key = c.key();
    let op = c.operator();
    let value = c.value();

    let query = match key {
        attributes::ID => {
            let id: i64 = value
                .parse()
                .map_err(|_| QueryError::InvalidNumber(value.to_string()))?;
            equality(op, json!({ "ids": { "values": [id.to_string()] } }))
        }
        attributes::UUID => equality(op, term("uuid", value)),
        attributes::NAME if value.is_empty() => presence(op, exists("name")),
        attributes::NAME if op == Operator::Contains => json!({ "match": { "name": { "query": value } } }),
        attributes::NAME => equality(op, term("name.keyword", value)),
        attributes::STATUS => {
            let status = ContactStatus::from_name(value)
                .ok_or_else(|| QueryError::InvalidStatus(value.to_string()))?;
            equality(op, term("status", status.code()))
        }
        attributes::LANGUAGE if value.is_empty() => presence(op, exists("language")),
        attributes::LANGUAGE => equality(op, term("language", value.to_lowercase())),
        attributes::GROUP => {
            let group = assets
                .group_by_name(value)
                .ok_or_else(|| QueryError::UnknownGroup(value.to_string()))?;
            equality(op, term("group_ids", group.id.0))
        }
        attributes::FLOW | attributes::HISTORY => {
            let field = if key == attributes::FLOW {
                "flow_id"
            } else {
                "flow_history_ids"
            };
            if value.is_empty() {
                presence(op, exists(field))
            } else {
                let flow = assets
                    .flow_by_name(value)
                    .ok_or_else(|| QueryError::UnknownFlow(value.to_string()))?;
                equality(op, term(field, flow.id.0))
            }
        }
        attributes::CREATED_ON | attributes::LAST_SEEN_ON => {
            if value.is_empty() {
                presence(op, exists(key))
            } else {
                date_range(key, key, op, value, assets.env())?
            }
        }
        attributes::URN => {
            if value.is_empty() {
                presence(op, nested("urns", exists("urns.path")))
            } else if op == Operator::Contains {
                nested("urns", json!({ "match_phrase": { "urns.path": value } }))
            } else {
                equality(op, nested("urns", term("urns.path.keyword", value.to_lowercase())))
            }
        }
        _ => return Err(QueryError::unknown_property(key)),
    };
    Ok(query)
}

fn translate_scheme(c: &Condition) -> Value {
    let scheme = term("urns.scheme", c.key());
    let op = c.operator();
    let value = c.value();

    if value.is_empty() {
        return presence(op, nested("urns", scheme));
    }
    let path = if op == Operator::Contains {
        json!({ "match_phrase": { "urns.path": value } })
    } else {
        term("urns.path.keyword", value.to_lowercase())
    };
    equality(op, nested("urns", must(vec![scheme, path])))
}

fn translate_field(c: &Condition, assets: &OrgAssets) -> Result<Value, QueryError> {
    let field = assets
        .field_by_key(c.key())
        .ok_or_else(|| QueryError::unknown_property(c.key()))?;
    let op = c.operator();
    let value = c.value();
    let is_field = term("fields.field", field.uuid.to_string());
    let slot = format!("fields.{}", field.value_type.index_key());

    if value.is_empty() {
        return Ok(presence(op, nested("fields", must(vec![is_field, exists(&slot)]))));
    }

    let value_query = match field.value_type {
        FieldType::Number => {
            // != negates the whole nested query below, so compare for equality here
            let positive = if op == Operator::NotEqual { Operator::Equal } else { op };
            number_query(c.key(), &slot, positive, value)?
        }
        FieldType::Datetime => {
            let positive = if op == Operator::NotEqual { Operator::Equal } else { op };
            date_range(c.key(), &slot, positive, value, assets.env())?
        }
        FieldType::Text => term(&slot, value.to_lowercase()),
        FieldType::State | FieldType::District | FieldType::Ward => {
            term(&format!("{slot}_keyword"), value.to_lowercase())
        }
    };

    Ok(equality(op, nested("fields", must(vec![is_field, value_query]))))
}

/// Translates a resolved query tree into an index query
pub fn translate(node: &QueryNode, assets: &OrgAssets) -> Result<Value, QueryError> {
    match node {
        QueryNode::Condition(c) => match c.property_type() {
            PropertyType::Attribute => translate_attribute(c, assets),
            PropertyType::Scheme => Ok(translate_scheme(c)),
            PropertyType::Field => translate_field(c, assets),
        },
        QueryNode::Combination { op, children } => {
            let clauses = children
                .iter()
                .map(|child| translate(child, assets))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(match op {
                BoolOperator::And => must(clauses),
                BoolOperator::Or => json!({
                    "bool": { "should": clauses, "minimum_should_match": 1 }
                }),
            })
        }
    }
}

fn mentions_status(node: &QueryNode) -> bool {
    node.conditions().iter().any(|c| {
        c.property_type() == PropertyType::Attribute && c.key() == attributes::STATUS
    })
}

/// Full index query for a contact search: the org and active-record scope,
/// blocked and stopped contacts left out unless the query itself filters on
/// status, explicit id exclusions, and the translated user query.
pub fn contacts_query(
    assets: &OrgAssets,
    query: Option<&QueryNode>,
    exclude_ids: &[ContactId],
) -> Result<Value, QueryError> {
    let mut must_clauses = vec![
        term("org_id", assets.org_id().0),
        term("is_active", true),
    ];
    let mut must_not: Vec<Value> = Vec::new();

    if !query.is_some_and(mentions_status) {
        must_not.push(json!({
            "terms": { "status": [ContactStatus::Blocked.code(), ContactStatus::Stopped.code()] }
        }));
    }
    if let Some(root) = query {
        must_clauses.push(translate(root, assets)?);
    }
    if !exclude_ids.is_empty() {
        let ids: Vec<String> = exclude_ids.iter().map(ToString::to_string).collect();
        must_not.push(json!({ "ids": { "values": ids } }));
    }

    Ok(json!({ "bool": { "must": must_clauses, "must_not": must_not } }))
}

/// Sort clauses for `sort_by` (`-` prefix for descending, default `-id`),
/// always ending with an `id` tie-break so paging is deterministic
pub fn sort_clauses(sort_by: Option<&str>, assets: &OrgAssets) -> Result<Vec<Value>, QueryError> {
    let sort_by = sort_by
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(crate::constants::system::DEFAULT_SEARCH_SORT);
    let (order, key) = match sort_by.strip_prefix('-') {
        Some(key) => ("desc", key.to_lowercase()),
        None => ("asc", sort_by.to_lowercase()),
    };

    let primary = match key.as_str() {
        attributes::ID | attributes::CREATED_ON | attributes::LAST_SEEN_ON | attributes::LANGUAGE => {
            json!({ key.as_str(): { "order": order } })
        }
        attributes::NAME => json!({ "name.keyword": { "order": order } }),
        _ => {
            let field = assets
                .field_by_key(&key)
                .ok_or_else(|| QueryError::unknown_property(&key))?;
            let slot = format!("fields.{}", field.value_type.index_key());
            json!({
                slot: {
                    "order": order,
                    "nested": {
                        "path": "fields",
                        "filter": term("fields.field", field.uuid.to_string())
                    }
                }
            })
        }
    };

    let mut clauses = vec![primary];
    if key != attributes::ID {
        clauses.push(json!({ "id": { "order": "desc" } }));
    }
    Ok(clauses)
}
