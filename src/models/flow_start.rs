//! # Flow Start Model
//!
//! A flow start is a persisted request to run a flow for an audience. The
//! audience columns mirror [`RecipientSpec`]; the counters track progress as
//! batches complete.
//!
//! ## Database Schema
//!
//! Maps to `flows_flowstart`, with newly created contacts recorded in
//! `flows_flowstart_contacts` and per-batch completion markers in
//! `flows_flowstart_batch_completions`.
//!
//! ## Completion
//!
//! Many batch executors may finish concurrently, so completion is a single
//! statement that inserts the `(start_id, batch_index)` marker and increments
//! `processed_count` only when the marker was new. Redelivered batches are
//! therefore counted once, and the start flips to `Complete` in the same
//! statement that settles its last contacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::flow::FlowType;
use super::ids::{ContactId, FlowId, GroupId, OrgId, StartId, UserId};
use super::recipients::{Exclusions, RecipientSpec};
use super::urn::Urn;
use crate::state_machine::StartStatus;

/// What created the start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartType {
    Manual,
    Api,
    FlowAction,
    Trigger,
}

impl StartType {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Manual => "M",
            Self::Api => "A",
            Self::FlowAction => "F",
            Self::Trigger => "T",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "M" => Some(Self::Manual),
            "A" => Some(Self::Api),
            "F" => Some(Self::FlowAction),
            "T" => Some(Self::Trigger),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStart {
    pub id: StartId,
    pub uuid: Uuid,
    pub org_id: OrgId,
    pub flow_id: FlowId,
    pub flow_type: FlowType,
    pub start_type: StartType,
    pub status: StartStatus,

    pub contact_ids: Vec<ContactId>,
    pub group_ids: Vec<GroupId>,
    pub urns: Vec<Urn>,
    pub query: String,
    pub exclusions: Exclusions,
    pub exclude_group_ids: Vec<GroupId>,
    pub create_contact: bool,

    /// When false, contacts who have ever started this flow are skipped
    pub restart_participants: bool,
    /// When false, contacts currently in a flow are skipped
    pub include_active: bool,

    pub extra: Option<serde_json::Value>,
    pub created_by: Option<UserId>,

    pub contact_count: Option<i32>,
    pub processed_count: i32,
    pub dropped_count: i32,

    pub created_on: DateTime<Utc>,
    pub modified_on: DateTime<Utc>,
}

impl FlowStart {
    /// The audience this start targets, with the start flags folded into
    /// its exclusions
    pub fn recipients(&self) -> RecipientSpec {
        let mut exclusions = self.exclusions;
        if !self.restart_participants {
            exclusions.started_previously = true;
        }
        if !self.include_active {
            exclusions.in_a_flow = true;
        }

        RecipientSpec::new()
            .with_contacts(self.contact_ids.iter().copied())
            .with_groups(self.group_ids.iter().copied())
            .with_urns(self.urns.iter().cloned())
            .with_query(self.query.clone())
            .with_exclusions(exclusions)
            .excluding_groups(self.exclude_group_ids.iter().copied())
    }
}

/// New start as created by an API or task entrypoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewFlowStart {
    pub org_id: OrgId,
    pub flow_id: FlowId,
    pub start_type: Option<StartType>,
    pub contact_ids: Vec<ContactId>,
    pub group_ids: Vec<GroupId>,
    pub urns: Vec<Urn>,
    pub query: String,
    pub exclusions: Exclusions,
    pub exclude_group_ids: Vec<GroupId>,
    pub create_contact: bool,
    pub restart_participants: bool,
    pub include_active: bool,
    pub extra: Option<serde_json::Value>,
    pub created_by: Option<UserId>,
}

/// Outcome of recording one batch as processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchCompletion {
    /// First completion of this batch; the start's status afterwards
    Recorded {
        status: StartStatus,
        processed_count: i32,
    },
    /// This batch had already been recorded, nothing changed
    Duplicate,
}

#[derive(Debug, FromRow)]
struct FlowStartRow {
    id: i64,
    uuid: Uuid,
    org_id: i32,
    flow_id: i32,
    flow_type: String,
    start_type: String,
    status: String,
    contact_ids: Vec<i64>,
    group_ids: Vec<i32>,
    urns: Vec<String>,
    query: Option<String>,
    exclusions: serde_json::Value,
    exclude_group_ids: Vec<i32>,
    create_contact: bool,
    restart_participants: bool,
    include_active: bool,
    extra: Option<serde_json::Value>,
    created_by_id: Option<i32>,
    contact_count: Option<i32>,
    processed_count: i32,
    dropped_count: i32,
    created_on: DateTime<Utc>,
    modified_on: DateTime<Utc>,
}

fn decode_error(message: String) -> sqlx::Error {
    sqlx::Error::Decode(message.into())
}

impl TryFrom<FlowStartRow> for FlowStart {
    type Error = sqlx::Error;

    fn try_from(row: FlowStartRow) -> Result<Self, Self::Error> {
        let flow_type = FlowType::from_code(&row.flow_type)
            .ok_or_else(|| decode_error(format!("invalid flow type: {}", row.flow_type)))?;
        let start_type = StartType::from_code(&row.start_type)
            .ok_or_else(|| decode_error(format!("invalid start type: {}", row.start_type)))?;
        let status = StartStatus::from_code(&row.status).map_err(decode_error)?;
        let urns = row
            .urns
            .iter()
            .map(|u| u.parse::<Urn>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| decode_error(format!("invalid start urn: {e}")))?;
        let exclusions: Exclusions = serde_json::from_value(row.exclusions)
            .map_err(|e| decode_error(format!("invalid start exclusions: {e}")))?;

        Ok(FlowStart {
            id: StartId(row.id),
            uuid: row.uuid,
            org_id: OrgId(row.org_id),
            flow_id: FlowId(row.flow_id),
            flow_type,
            start_type,
            status,
            contact_ids: row.contact_ids.into_iter().map(ContactId).collect(),
            group_ids: row.group_ids.into_iter().map(GroupId).collect(),
            urns,
            query: row.query.unwrap_or_default(),
            exclusions,
            exclude_group_ids: row.exclude_group_ids.into_iter().map(GroupId).collect(),
            create_contact: row.create_contact,
            restart_participants: row.restart_participants,
            include_active: row.include_active,
            extra: row.extra,
            created_by: row.created_by_id.map(UserId),
            contact_count: row.contact_count,
            processed_count: row.processed_count,
            dropped_count: row.dropped_count,
            created_on: row.created_on,
            modified_on: row.modified_on,
        })
    }
}

const SELECT_START: &str = r#"
    SELECT s.id, s.uuid, s.org_id, s.flow_id, f.flow_type, s.start_type, s.status,
           s.contact_ids, s.group_ids, s.urns, s.query, s.exclusions, s.exclude_group_ids,
           s.create_contact, s.restart_participants, s.include_active, s.extra,
           s.created_by_id, s.contact_count, s.processed_count, s.dropped_count,
           s.created_on, s.modified_on
    FROM flows_flowstart s
    JOIN flows_flow f ON f.id = s.flow_id
"#;

impl FlowStart {
    pub async fn create(pool: &PgPool, new_start: NewFlowStart) -> Result<FlowStart, sqlx::Error> {
        let exclusions = serde_json::to_value(new_start.exclusions)
            .map_err(|e| sqlx::Error::Encode(e.into()))?;
        let contact_ids: Vec<i64> = new_start.contact_ids.iter().map(|id| id.0).collect();
        let group_ids: Vec<i32> = new_start.group_ids.iter().map(|id| id.0).collect();
        let exclude_group_ids: Vec<i32> =
            new_start.exclude_group_ids.iter().map(|id| id.0).collect();
        let urns: Vec<String> = new_start.urns.iter().map(Urn::identity).collect();

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO flows_flowstart (
                uuid, org_id, flow_id, start_type, status,
                contact_ids, group_ids, urns, query, exclusions, exclude_group_ids,
                create_contact, restart_participants, include_active, extra, created_by_id,
                processed_count, dropped_count, created_on, modified_on
            )
            VALUES ($1, $2, $3, $4, 'P', $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, 0, 0, NOW(), NOW())
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new_start.org_id.0)
        .bind(new_start.flow_id.0)
        .bind(new_start.start_type.unwrap_or(StartType::Manual).code())
        .bind(&contact_ids)
        .bind(&group_ids)
        .bind(&urns)
        .bind(&new_start.query)
        .bind(exclusions)
        .bind(&exclude_group_ids)
        .bind(new_start.create_contact)
        .bind(new_start.restart_participants)
        .bind(new_start.include_active)
        .bind(&new_start.extra)
        .bind(new_start.created_by.map(|u| u.0))
        .fetch_one(pool)
        .await?;

        Self::find_by_id(pool, StartId(id))
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn find_by_id(pool: &PgPool, id: StartId) -> Result<Option<FlowStart>, sqlx::Error> {
        let row = sqlx::query_as::<_, FlowStartRow>(&format!("{SELECT_START} WHERE s.id = $1"))
            .bind(id.0)
            .fetch_optional(pool)
            .await?;
        row.map(FlowStart::try_from).transpose()
    }

    /// Moves a pending start to `Starting`, recording its resolved audience
    /// size and any contacts created while resolving it. Returns false if
    /// the start was no longer pending.
    pub async fn mark_starting(
        pool: &PgPool,
        id: StartId,
        contact_count: i32,
        created_contacts: &[ContactId],
    ) -> Result<bool, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE flows_flowstart
            SET status = 'S', contact_count = $2, modified_on = NOW()
            WHERE id = $1 AND status = 'P'
            "#,
        )
        .bind(id.0)
        .bind(contact_count)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        if !created_contacts.is_empty() {
            let raw_ids: Vec<i64> = created_contacts.iter().map(|id| id.0).collect();
            sqlx::query(
                r#"
                INSERT INTO flows_flowstart_contacts (flowstart_id, contact_id)
                SELECT $1, UNNEST($2::BIGINT[])
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(id.0)
            .bind(&raw_ids)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    pub async fn mark_complete(pool: &PgPool, id: StartId) -> Result<(), sqlx::Error> {
        Self::update_status(pool, id, StartStatus::Complete).await
    }

    pub async fn mark_failed(pool: &PgPool, id: StartId) -> Result<(), sqlx::Error> {
        Self::update_status(pool, id, StartStatus::Failed).await
    }

    async fn update_status(
        pool: &PgPool,
        id: StartId,
        status: StartStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE flows_flowstart SET status = $2, modified_on = NOW() WHERE id = $1 AND status IN ('P', 'S')",
        )
        .bind(id.0)
        .bind(status.code())
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Counts contacts whose batches could not be enqueued as settled.
    /// When `nothing_queued` the start fails instead of completing.
    /// Returns the status after the update.
    pub async fn record_dropped(
        pool: &PgPool,
        id: StartId,
        dropped: i32,
        nothing_queued: bool,
    ) -> Result<StartStatus, sqlx::Error> {
        let code = sqlx::query_scalar::<_, String>(
            r#"
            UPDATE flows_flowstart
            SET dropped_count = dropped_count + $2,
                status = CASE
                    WHEN status = 'S' AND $3 THEN 'F'
                    WHEN status = 'S' AND processed_count + dropped_count + $2 >= contact_count THEN 'C'
                    ELSE status
                END,
                modified_on = NOW()
            WHERE id = $1
            RETURNING status
            "#,
        )
        .bind(id.0)
        .bind(dropped)
        .bind(nothing_queued)
        .fetch_one(pool)
        .await?;
        StartStatus::from_code(&code).map_err(decode_error)
    }

    pub async fn is_batch_recorded(
        pool: &PgPool,
        id: StartId,
        batch_index: i32,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM flows_flowstart_batch_completions
                WHERE start_id = $1 AND batch_index = $2
            )
            "#,
        )
        .bind(id.0)
        .bind(batch_index)
        .fetch_one(pool)
        .await
    }

    /// Records a batch as processed. Idempotent per `(start_id, batch_index)`.
    pub async fn record_batch_complete(
        pool: &PgPool,
        id: StartId,
        batch_index: i32,
        contact_count: i32,
    ) -> Result<BatchCompletion, sqlx::Error> {
        let row = sqlx::query_as::<_, (String, i32)>(
            r#"
            WITH inserted AS (
                INSERT INTO flows_flowstart_batch_completions (start_id, batch_index, contact_count, completed_on)
                VALUES ($1, $2, $3, NOW())
                ON CONFLICT (start_id, batch_index) DO NOTHING
                RETURNING start_id, contact_count
            )
            UPDATE flows_flowstart s
            SET processed_count = s.processed_count + i.contact_count,
                status = CASE
                    WHEN s.status = 'S'
                         AND s.processed_count + i.contact_count + s.dropped_count >= s.contact_count
                    THEN 'C'
                    ELSE s.status
                END,
                modified_on = NOW()
            FROM inserted i
            WHERE s.id = i.start_id
            RETURNING s.status, s.processed_count
            "#,
        )
        .bind(id.0)
        .bind(batch_index)
        .bind(contact_count)
        .fetch_optional(pool)
        .await?;

        match row {
            Some((code, processed_count)) => Ok(BatchCompletion::Recorded {
                status: StartStatus::from_code(&code).map_err(decode_error)?,
                processed_count,
            }),
            None => Ok(BatchCompletion::Duplicate),
        }
    }
}

/// One queued slice of a start's audience. Immutable once created; may be
/// delivered more than once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStartBatch {
    pub start_id: StartId,
    pub batch_index: i32,
    pub org_id: OrgId,
    pub flow_id: FlowId,
    pub flow_type: FlowType,
    pub start_type: StartType,
    pub contact_ids: Vec<ContactId>,
    pub restart_participants: bool,
    pub include_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<UserId>,
    pub total_contacts: usize,
    pub is_last: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> FlowStart {
        FlowStart {
            id: StartId(1),
            uuid: Uuid::new_v4(),
            org_id: OrgId(1),
            flow_id: FlowId(7),
            flow_type: FlowType::Messaging,
            start_type: StartType::Manual,
            status: StartStatus::Pending,
            contact_ids: vec![ContactId(3), ContactId(3)],
            group_ids: vec![GroupId(2)],
            urns: vec![],
            query: String::new(),
            exclusions: Exclusions::default(),
            exclude_group_ids: vec![],
            create_contact: false,
            restart_participants: true,
            include_active: true,
            extra: None,
            created_by: None,
            contact_count: None,
            processed_count: 0,
            dropped_count: 0,
            created_on: Utc::now(),
            modified_on: Utc::now(),
        }
    }

    #[test]
    fn test_recipients_keep_exclusions_when_flags_allow_everyone() {
        let spec = start().recipients();
        assert!(spec.exclusions().is_none());
        assert_eq!(spec.contact_ids(), &[ContactId(3)]);
        assert_eq!(spec.group_ids(), &[GroupId(2)]);
    }

    #[test]
    fn test_start_flags_become_exclusions() {
        let mut s = start();
        s.restart_participants = false;
        s.include_active = false;
        let excs = s.recipients().exclusions();
        assert!(excs.started_previously);
        assert!(excs.in_a_flow);
        assert!(!excs.non_active);
    }

    #[test]
    fn test_batch_payload_shape() {
        let batch = FlowStartBatch {
            start_id: StartId(9),
            batch_index: 0,
            org_id: OrgId(1),
            flow_id: FlowId(7),
            flow_type: FlowType::Voice,
            start_type: StartType::Trigger,
            contact_ids: vec![ContactId(1), ContactId(2)],
            restart_participants: true,
            include_active: false,
            extra: None,
            created_by: None,
            total_contacts: 2,
            is_last: true,
        };
        let json = serde_json::to_value(&batch).unwrap();
        assert_eq!(json["start_id"], 9);
        assert_eq!(json["flow_type"], "voice");
        assert_eq!(json["contact_ids"], serde_json::json!([1, 2]));
        assert!(json.get("extra").is_none());
    }

    #[test]
    fn test_start_type_codes() {
        for t in [
            StartType::Manual,
            StartType::Api,
            StartType::FlowAction,
            StartType::Trigger,
        ] {
            assert_eq!(StartType::from_code(t.code()), Some(t));
        }
    }
}
