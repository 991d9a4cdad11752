//! Flow references as seen by the start pipeline. Flow definitions and their
//! execution belong to the flow engine; only identity, name and modality
//! matter here.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::ids::{FlowId, OrgId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    Messaging,
    Voice,
    Background,
    Survey,
}

impl FlowType {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Messaging => "M",
            Self::Voice => "V",
            Self::Background => "B",
            Self::Survey => "S",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "M" => Some(Self::Messaging),
            "V" => Some(Self::Voice),
            "B" => Some(Self::Background),
            "S" => Some(Self::Survey),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRef {
    pub id: FlowId,
    pub uuid: Uuid,
    pub name: String,
    pub flow_type: FlowType,
}

#[derive(Debug, FromRow)]
struct FlowRow {
    id: i32,
    uuid: Uuid,
    name: String,
    flow_type: String,
}

impl FlowRef {
    pub async fn load_for_org(pool: &PgPool, org_id: OrgId) -> Result<Vec<FlowRef>, sqlx::Error> {
        let rows = sqlx::query_as::<_, FlowRow>(
            "SELECT id, uuid, name, flow_type FROM flows_flow WHERE org_id = $1 AND is_active = TRUE ORDER BY id",
        )
        .bind(org_id.0)
        .fetch_all(pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let flow_type = FlowType::from_code(&row.flow_type).ok_or_else(|| {
                    sqlx::Error::Decode(format!("invalid flow type: {}", row.flow_type).into())
                })?;
                Ok(FlowRef {
                    id: FlowId(row.id),
                    uuid: row.uuid,
                    name: row.name,
                    flow_type,
                })
            })
            .collect()
    }
}
