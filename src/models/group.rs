//! # Contact Groups
//!
//! Static groups have explicitly assigned members. Smart groups carry a query
//! and have their membership materialized by the smart group reconciler.
//!
//! Maps to `contacts_contactgroup` and the `contacts_contactgroup_contacts`
//! join table.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::ids::{ContactId, GroupId, OrgId};
use crate::state_machine::GroupStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub uuid: Uuid,
    pub org_id: OrgId,
    pub name: String,
    /// Empty for static groups
    pub query: String,
    pub status: GroupStatus,
}

impl Group {
    pub fn is_smart(&self) -> bool {
        !self.query.is_empty()
    }
}

#[derive(Debug, FromRow)]
struct GroupRow {
    id: i32,
    uuid: Uuid,
    org_id: i32,
    name: String,
    query: Option<String>,
    status: String,
}

impl TryFrom<GroupRow> for Group {
    type Error = sqlx::Error;

    fn try_from(row: GroupRow) -> Result<Self, Self::Error> {
        let status = GroupStatus::from_code(&row.status)
            .map_err(|e| sqlx::Error::Decode(e.into()))?;
        Ok(Group {
            id: GroupId(row.id),
            uuid: row.uuid,
            org_id: OrgId(row.org_id),
            name: row.name,
            query: row.query.unwrap_or_default(),
            status,
        })
    }
}

impl Group {
    /// Active groups of an org, ordered by id
    pub async fn load_for_org(pool: &PgPool, org_id: OrgId) -> Result<Vec<Group>, sqlx::Error> {
        let rows = sqlx::query_as::<_, GroupRow>(
            r#"
            SELECT id, uuid, org_id, name, query, status
            FROM contacts_contactgroup
            WHERE org_id = $1 AND is_active = TRUE
            ORDER BY id
            "#,
        )
        .bind(org_id.0)
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(Group::try_from).collect()
    }

    pub async fn update_status(
        pool: &PgPool,
        group_id: GroupId,
        status: GroupStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE contacts_contactgroup SET status = $2, modified_on = NOW() WHERE id = $1")
            .bind(group_id.0)
            .bind(status.code())
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Current materialized membership
    pub async fn member_ids(pool: &PgPool, group_id: GroupId) -> Result<Vec<ContactId>, sqlx::Error> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT contact_id FROM contacts_contactgroup_contacts WHERE contactgroup_id = $1 ORDER BY contact_id",
        )
        .bind(group_id.0)
        .fetch_all(pool)
        .await?;
        Ok(ids.into_iter().map(ContactId).collect())
    }

    /// Bulk adds members, ignoring contacts that are already members
    pub async fn add_contacts(
        tx: &mut Transaction<'_, Postgres>,
        group_id: GroupId,
        contact_ids: &[ContactId],
    ) -> Result<u64, sqlx::Error> {
        if contact_ids.is_empty() {
            return Ok(0);
        }
        let raw_ids: Vec<i64> = contact_ids.iter().map(|id| id.0).collect();
        let result = sqlx::query(
            r#"
            INSERT INTO contacts_contactgroup_contacts (contactgroup_id, contact_id)
            SELECT $1, UNNEST($2::BIGINT[])
            ON CONFLICT (contactgroup_id, contact_id) DO NOTHING
            "#,
        )
        .bind(group_id.0)
        .bind(&raw_ids)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }

    /// Bulk removes members
    pub async fn remove_contacts(
        tx: &mut Transaction<'_, Postgres>,
        group_id: GroupId,
        contact_ids: &[ContactId],
    ) -> Result<u64, sqlx::Error> {
        if contact_ids.is_empty() {
            return Ok(0);
        }
        let raw_ids: Vec<i64> = contact_ids.iter().map(|id| id.0).collect();
        let result = sqlx::query(
            "DELETE FROM contacts_contactgroup_contacts WHERE contactgroup_id = $1 AND contact_id = ANY($2)",
        )
        .bind(group_id.0)
        .bind(&raw_ids)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }
}
