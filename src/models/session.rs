//! Flow sessions written after a contact has been driven through the flow
//! engine. Maps to `flows_flowsession`.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::ids::{ContactId, FlowId, OrgId, StartId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Paused, waiting for the contact to reply
    Waiting,
    Completed,
    Interrupted,
    Failed,
}

impl SessionStatus {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Waiting => "W",
            Self::Completed => "C",
            Self::Interrupted => "I",
            Self::Failed => "F",
        }
    }
}

/// Session state produced by one flow engine run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSession {
    pub uuid: Uuid,
    pub org_id: OrgId,
    pub contact_id: ContactId,
    pub flow_id: FlowId,
    pub start_id: Option<StartId>,
    pub status: SessionStatus,
    pub events: Vec<serde_json::Value>,
}

pub struct FlowSession;

impl FlowSession {
    /// Writes a session in one transaction: any session the contact is
    /// waiting in is interrupted, the new session is inserted, and the
    /// contact's current flow is updated to match.
    pub async fn persist(pool: &PgPool, session: &NewSession) -> Result<i64, sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE flows_flowsession
            SET status = 'I', ended_on = NOW()
            WHERE contact_id = $1 AND status = 'W'
            "#,
        )
        .bind(session.contact_id.0)
        .execute(&mut *tx)
        .await?;

        let ended = session.status != SessionStatus::Waiting;
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO flows_flowsession (uuid, org_id, contact_id, flow_id, start_id, status, events, created_on, ended_on)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), CASE WHEN $8 THEN NOW() ELSE NULL END)
            RETURNING id
            "#,
        )
        .bind(session.uuid)
        .bind(session.org_id.0)
        .bind(session.contact_id.0)
        .bind(session.flow_id.0)
        .bind(session.start_id.map(|s| s.0))
        .bind(session.status.code())
        .bind(serde_json::Value::Array(session.events.clone()))
        .bind(ended)
        .fetch_one(&mut *tx)
        .await?;

        let current_flow = (!ended).then_some(session.flow_id.0);
        sqlx::query(
            "UPDATE contacts_contact SET current_flow_id = $2, modified_on = NOW() WHERE id = $1",
        )
        .bind(session.contact_id.0)
        .bind(current_flow)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }
}
