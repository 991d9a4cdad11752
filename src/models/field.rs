//! Custom contact fields. Maps to `contacts_contactfield`.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::ids::OrgId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Number,
    Datetime,
    State,
    District,
    Ward,
}

impl FieldType {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Text => "T",
            Self::Number => "N",
            Self::Datetime => "D",
            Self::State => "S",
            Self::District => "I",
            Self::Ward => "W",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "T" => Some(Self::Text),
            "N" => Some(Self::Number),
            "D" => Some(Self::Datetime),
            "S" => Some(Self::State),
            "I" => Some(Self::District),
            "W" => Some(Self::Ward),
            _ => None,
        }
    }

    /// Name of the value slot in the search index document
    pub fn index_key(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Datetime => "datetime",
            Self::State => "state",
            Self::District => "district",
            Self::Ward => "ward",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactField {
    pub uuid: Uuid,
    pub key: String,
    pub name: String,
    pub value_type: FieldType,
}

#[derive(Debug, FromRow)]
struct FieldRow {
    uuid: Uuid,
    key: String,
    name: String,
    value_type: String,
}

impl ContactField {
    pub fn new(key: &str, value_type: FieldType) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            key: key.to_string(),
            name: key.to_string(),
            value_type,
        }
    }

    pub async fn load_for_org(pool: &PgPool, org_id: OrgId) -> Result<Vec<ContactField>, sqlx::Error> {
        let rows = sqlx::query_as::<_, FieldRow>(
            r#"
            SELECT uuid, key, name, value_type
            FROM contacts_contactfield
            WHERE org_id = $1 AND is_active = TRUE
            ORDER BY key
            "#,
        )
        .bind(org_id.0)
        .fetch_all(pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let value_type = FieldType::from_code(&row.value_type).ok_or_else(|| {
                    sqlx::Error::Decode(format!("invalid field type: {}", row.value_type).into())
                })?;
                Ok(ContactField {
                    uuid: row.uuid,
                    key: row.key,
                    name: row.name,
                    value_type,
                })
            })
            .collect()
    }
}
