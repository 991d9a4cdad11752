use async_trait::async_trait;
use sqlx::PgPool;
use std::str::FromStr;

use super::OrgAssets;
use crate::error::{MailroomError, Result};
use crate::models::{ContactField, DateFormat, FlowRef, Group, OrgEnvironment, OrgId};

/// Source of org asset snapshots
#[async_trait]
pub trait AssetLoader: Send + Sync {
    async fn load(&self, org_id: OrgId) -> Result<OrgAssets>;
}

/// Loads assets from the relational store
#[derive(Debug, Clone)]
pub struct PgAssetLoader {
    pool: PgPool,
}

impl PgAssetLoader {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_env(&self, org_id: OrgId) -> Result<OrgEnvironment> {
        let row = sqlx::query_as::<_, (String, String)>(
            "SELECT date_format, timezone FROM orgs_org WHERE id = $1 AND is_active = TRUE",
        )
        .bind(org_id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| MailroomError::not_found("org", org_id))?;

        let (date_format, timezone) = row;
        let date_format = DateFormat::from_str(&date_format).map_err(|e| {
            MailroomError::Database(sqlx::Error::Decode(e.into()))
        })?;
        let timezone = chrono_tz::Tz::from_str(&timezone).map_err(|e| {
            MailroomError::Database(sqlx::Error::Decode(
                format!("invalid org timezone '{timezone}': {e}").into(),
            ))
        })?;

        Ok(OrgEnvironment::new(org_id, date_format, timezone))
    }
}

#[async_trait]
impl AssetLoader for PgAssetLoader {
    async fn load(&self, org_id: OrgId) -> Result<OrgAssets> {
        let env = self.load_env(org_id).await?;
        let fields = ContactField::load_for_org(&self.pool, org_id).await?;
        let groups = Group::load_for_org(&self.pool, org_id).await?;
        let flows = FlowRef::load_for_org(&self.pool, org_id).await?;

        tracing::debug!(
            org_id = %org_id,
            fields = fields.len(),
            groups = groups.len(),
            flows = flows.len(),
            "Loaded org assets"
        );

        Ok(OrgAssets::new(env, fields, groups, flows))
    }
}
