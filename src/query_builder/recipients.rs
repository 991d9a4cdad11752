//! # Recipients Query
//!
//! Builds the single contact query describing an audience: included groups,
//! contacts, URNs and the user's own query are ORed together, exclusions
//! are ANDed onto that, and the result is simplified.
//!
//! Building is pure. Callers resolve group ids, contacts and the user's
//! query beforehand and pass in the clock reading used for date-based
//! exclusions.

use chrono::{DateTime, Duration, Utc};

use super::ast::{attributes, Condition, ContactQuery, Operator, QueryNode};
use crate::models::{ContactId, Exclusions, FlowRef, Group, OrgEnvironment, Urn};

/// Inputs to [`build_recipients_query`]
#[derive(Debug, Clone, Copy)]
pub struct RecipientsQuery<'a> {
    pub env: &'a OrgEnvironment,
    /// Flow being started, used by the started-previously exclusion
    pub flow: Option<&'a FlowRef>,
    pub groups: &'a [&'a Group],
    pub contact_ids: &'a [ContactId],
    pub urns: &'a [Urn],
    pub user_query: Option<&'a QueryNode>,
    pub exclusions: Exclusions,
    pub exclude_groups: &'a [&'a Group],
}

impl<'a> RecipientsQuery<'a> {
    pub fn new(env: &'a OrgEnvironment) -> Self {
        Self {
            env,
            flow: None,
            groups: &[],
            contact_ids: &[],
            urns: &[],
            user_query: None,
            exclusions: Exclusions::NONE,
            exclude_groups: &[],
        }
    }
}

pub fn build_recipients_query(input: &RecipientsQuery<'_>, now: DateTime<Utc>) -> ContactQuery {
    let mut inclusions: Vec<QueryNode> = Vec::new();

    for group in input.groups {
        inclusions.push(Condition::attribute(attributes::GROUP, Operator::Equal, &group.name).into());
    }
    for id in input.contact_ids {
        inclusions.push(Condition::attribute(attributes::ID, Operator::Equal, id.to_string()).into());
    }
    for urn in input.urns {
        inclusions.push(Condition::scheme(urn.scheme(), Operator::Equal, urn.path()).into());
    }
    if let Some(root) = input.user_query {
        inclusions.push(root.clone());
    }

    let mut exclusions: Vec<QueryNode> = Vec::new();
    let excs = input.exclusions;

    if excs.non_active {
        exclusions.push(Condition::attribute(attributes::STATUS, Operator::Equal, "active").into());
    }
    if excs.in_a_flow {
        exclusions.push(Condition::attribute(attributes::FLOW, Operator::Equal, "").into());
    }
    if excs.started_previously {
        if let Some(flow) = input.flow {
            exclusions.push(
                Condition::attribute(attributes::HISTORY, Operator::NotEqual, &flow.name).into(),
            );
        }
    }
    if excs.not_seen_since_days > 0 {
        let cutoff = now - Duration::days(i64::from(excs.not_seen_since_days));
        exclusions.push(
            Condition::attribute(
                attributes::LAST_SEEN_ON,
                Operator::GreaterThan,
                input.env.format_date(cutoff),
            )
            .into(),
        );
    }
    for group in input.exclude_groups {
        exclusions.push(Condition::attribute(attributes::GROUP, Operator::NotEqual, &group.name).into());
    }

    let root = QueryNode::and(vec![QueryNode::or(inclusions), QueryNode::and(exclusions)]);
    ContactQuery::new(Some(root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FlowId, FlowType, GroupId, OrgId};
    use crate::query_builder::parser::parse_unchecked;
    use crate::state_machine::GroupStatus;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn group(id: i32, name: &str) -> Group {
        Group {
            id: GroupId(id),
            uuid: Uuid::new_v4(),
            org_id: OrgId(1),
            name: name.to_string(),
            query: String::new(),
            status: GroupStatus::Ready,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 1, 20, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_groups_contacts_and_exclusions() {
        let env = OrgEnvironment::default();
        let doctors = group(1, "Doctors");
        let input = RecipientsQuery {
            groups: &[&doctors],
            contact_ids: &[ContactId(10000)],
            exclusions: Exclusions {
                non_active: true,
                not_seen_since_days: 30,
                ..Default::default()
            },
            ..RecipientsQuery::new(&env)
        };

        let query = build_recipients_query(&input, now());
        assert_eq!(
            query.to_string(),
            r#"(group = "Doctors" OR id = 10000) AND status = "active" AND last_seen_on > 21-12-2021"#
        );
        assert_eq!(query.to_string(), build_recipients_query(&input, now()).to_string());
    }

    #[test]
    fn test_every_exclusion() {
        let env = OrgEnvironment::default();
        let flow = FlowRef {
            id: FlowId(1),
            uuid: Uuid::new_v4(),
            name: "Favorites".to_string(),
            flow_type: FlowType::Messaging,
        };
        let testers = group(2, "Testers");
        let user_query = parse_unchecked("age > 18").unwrap();
        let input = RecipientsQuery {
            flow: Some(&flow),
            user_query: user_query.root(),
            exclusions: Exclusions {
                non_active: true,
                in_a_flow: true,
                started_previously: true,
                not_seen_since_days: 0,
            },
            exclude_groups: &[&testers],
            ..RecipientsQuery::new(&env)
        };

        assert_eq!(
            build_recipients_query(&input, now()).to_string(),
            r#"age > 18 AND status = "active" AND flow = "" AND history != "Favorites" AND group != "Testers""#
        );
    }

    #[test]
    fn test_user_query_or_is_parenthesised() {
        let env = OrgEnvironment::default();
        let doctors = group(1, "Doctors");
        let user_query = parse_unchecked("name ~ bob OR name ~ jim").unwrap();
        let input = RecipientsQuery {
            groups: &[&doctors],
            user_query: user_query.root(),
            exclusions: Exclusions {
                in_a_flow: true,
                ..Default::default()
            },
            ..RecipientsQuery::new(&env)
        };

        // the user's OR merges into the inclusion OR
        assert_eq!(
            build_recipients_query(&input, now()).to_string(),
            r#"(group = "Doctors" OR name ~ "bob" OR name ~ "jim") AND flow = """#
        );
    }

    #[test]
    fn test_no_inclusions_leaves_only_exclusions() {
        let env = OrgEnvironment::default();
        let input = RecipientsQuery {
            exclusions: Exclusions {
                non_active: true,
                ..Default::default()
            },
            ..RecipientsQuery::new(&env)
        };
        assert_eq!(
            build_recipients_query(&input, now()).to_string(),
            r#"status = "active""#
        );

        let empty = build_recipients_query(&RecipientsQuery::new(&env), now());
        assert!(empty.is_empty());
        assert_eq!(empty.to_string(), "");
    }

    #[test]
    fn test_urn_inclusions() {
        let env = OrgEnvironment::default();
        let urns = vec!["tel:+1555".parse::<Urn>().unwrap()];
        let input = RecipientsQuery {
            urns: &urns,
            ..RecipientsQuery::new(&env)
        };
        assert_eq!(build_recipients_query(&input, now()).to_string(), r#"tel = "+1555""#);
    }

    #[test]
    fn test_cutoff_uses_org_format_and_timezone() {
        let env = OrgEnvironment::new(
            OrgId(1),
            crate::models::DateFormat::YearMonthDay,
            chrono_tz::America::Los_Angeles,
        );
        let input = RecipientsQuery {
            exclusions: Exclusions {
                not_seen_since_days: 1,
                ..Default::default()
            },
            ..RecipientsQuery::new(&env)
        };
        // 2022-01-19 00:00 UTC is still the 18th in Los Angeles
        assert_eq!(
            build_recipients_query(&input, now()).to_string(),
            "last_seen_on > 2022-01-18"
        );
    }
}
