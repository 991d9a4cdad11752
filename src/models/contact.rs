//! # Contact Model
//!
//! Contacts are the end users flows are started for. This module holds the
//! row types plus the bulk queries the resolution pipeline needs: explicit
//! id lookups, get-or-create by URN, group membership reads and the
//! `modified_on` touch that tells the indexer a contact changed.
//!
//! ## Database Schema
//!
//! Maps to `contacts_contact` and `contacts_contacturn`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::ids::{ContactId, GroupId, OrgId};
use super::urn::Urn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactStatus {
    Active,
    Blocked,
    Stopped,
    Archived,
}

impl ContactStatus {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Active => "A",
            Self::Blocked => "B",
            Self::Stopped => "S",
            Self::Archived => "V",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "A" => Some(Self::Active),
            "B" => Some(Self::Blocked),
            "S" => Some(Self::Stopped),
            "V" => Some(Self::Archived),
            _ => None,
        }
    }

    /// Parses the name users write in queries (`status = "blocked"`)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "blocked" => Some(Self::Blocked),
            "stopped" => Some(Self::Stopped),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// A contact as handed to the flow engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub uuid: Uuid,
    pub org_id: OrgId,
    pub name: Option<String>,
    pub language: Option<String>,
    pub status: ContactStatus,
    pub created_on: DateTime<Utc>,
    pub modified_on: DateTime<Utc>,
    pub last_seen_on: Option<DateTime<Utc>>,
    pub urns: Vec<Urn>,
}

#[derive(Debug, FromRow)]
struct ContactRow {
    id: i64,
    uuid: Uuid,
    org_id: i32,
    name: Option<String>,
    language: Option<String>,
    status: String,
    created_on: DateTime<Utc>,
    modified_on: DateTime<Utc>,
    last_seen_on: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct UrnRow {
    contact_id: i64,
    identity: String,
}

/// Contacts found or created while resolving raw URNs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrnResolution {
    /// Contacts that already owned one of the URNs
    pub fetched: Vec<ContactId>,
    /// Contacts created because nobody owned the URN yet
    pub created: Vec<ContactId>,
}

impl Contact {
    /// Loads active contacts by id, with their URNs, in id order
    pub async fn load_by_ids(
        pool: &PgPool,
        org_id: OrgId,
        ids: &[ContactId],
    ) -> Result<Vec<Contact>, sqlx::Error> {
        let raw_ids: Vec<i64> = ids.iter().map(|id| id.0).collect();

        let rows = sqlx::query_as::<_, ContactRow>(
            r#"
            SELECT id, uuid, org_id, name, language, status, created_on, modified_on, last_seen_on
            FROM contacts_contact
            WHERE org_id = $1 AND id = ANY($2) AND is_active = TRUE
            ORDER BY id
            "#,
        )
        .bind(org_id.0)
        .bind(&raw_ids)
        .fetch_all(pool)
        .await?;

        let urn_rows = sqlx::query_as::<_, UrnRow>(
            r#"
            SELECT contact_id, identity
            FROM contacts_contacturn
            WHERE contact_id = ANY($1)
            ORDER BY contact_id, priority DESC, id
            "#,
        )
        .bind(&raw_ids)
        .fetch_all(pool)
        .await?;

        let mut urns_by_contact: HashMap<i64, Vec<Urn>> = HashMap::new();
        for row in urn_rows {
            // URNs with schemes we no longer support are skipped rather than failing the load
            if let Ok(urn) = row.identity.parse::<Urn>() {
                urns_by_contact.entry(row.contact_id).or_default().push(urn);
            }
        }

        rows.into_iter()
            .map(|row| {
                let status = ContactStatus::from_code(&row.status).ok_or_else(|| {
                    sqlx::Error::Decode(format!("invalid contact status: {}", row.status).into())
                })?;
                Ok(Contact {
                    id: ContactId(row.id),
                    uuid: row.uuid,
                    org_id: OrgId(row.org_id),
                    name: row.name,
                    language: row.language,
                    status,
                    created_on: row.created_on,
                    modified_on: row.modified_on,
                    last_seen_on: row.last_seen_on,
                    urns: urns_by_contact.remove(&row.id).unwrap_or_default(),
                })
            })
            .collect()
    }

    /// Filters `ids` down to those of active contacts in the org
    pub async fn existing_ids(
        pool: &PgPool,
        org_id: OrgId,
        ids: &[ContactId],
    ) -> Result<Vec<ContactId>, sqlx::Error> {
        let raw_ids: Vec<i64> = ids.iter().map(|id| id.0).collect();
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM contacts_contact WHERE org_id = $1 AND id = ANY($2) AND is_active = TRUE",
        )
        .bind(org_id.0)
        .bind(&raw_ids)
        .fetch_all(pool)
        .await?;

        // preserve the caller's order
        let found: HashSet<i64> = found.into_iter().collect();
        Ok(ids.iter().copied().filter(|id| found.contains(&id.0)).collect())
    }

    /// Creates a new contact with no URNs
    pub async fn create(pool: &PgPool, org_id: OrgId) -> Result<ContactId, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let id = Self::create_with_transaction(&mut tx, org_id).await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn create_with_transaction(
        tx: &mut Transaction<'_, Postgres>,
        org_id: OrgId,
    ) -> Result<ContactId, sqlx::Error> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO contacts_contact (uuid, org_id, status, is_active, created_on, modified_on)
            VALUES ($1, $2, 'A', TRUE, NOW(), NOW())
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(org_id.0)
        .fetch_one(&mut **tx)
        .await?;
        Ok(ContactId(id))
    }

    /// Finds the owners of the given URNs, creating a contact for each URN
    /// nobody owns yet. Runs in one transaction with a per-identity advisory
    /// lock so concurrent callers can't create duplicate owners.
    pub async fn get_or_create_by_urns(
        pool: &PgPool,
        org_id: OrgId,
        urns: &[Urn],
    ) -> Result<UrnResolution, sqlx::Error> {
        let mut identities: Vec<String> = urns.iter().map(Urn::identity).collect();
        identities.sort();
        identities.dedup();

        let mut tx = pool.begin().await?;

        for identity in &identities {
            sqlx::query("SELECT pg_advisory_xact_lock($1, hashtext($2))")
                .bind(org_id.0)
                .bind(identity)
                .execute(&mut *tx)
                .await?;
        }

        let owned = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT u.identity, u.contact_id
            FROM contacts_contacturn u
            JOIN contacts_contact c ON c.id = u.contact_id
            WHERE u.org_id = $1 AND u.identity = ANY($2) AND c.is_active = TRUE
            "#,
        )
        .bind(org_id.0)
        .bind(&identities)
        .fetch_all(&mut *tx)
        .await?;
        let owned: HashMap<String, i64> = owned.into_iter().collect();

        let mut resolution = UrnResolution::default();
        let mut seen_contacts = HashSet::new();
        let mut seen_identities = HashSet::new();

        for urn in urns {
            let identity = urn.identity();
            if !seen_identities.insert(identity.clone()) {
                continue;
            }
            if let Some(contact_id) = owned.get(&identity) {
                if seen_contacts.insert(*contact_id) {
                    resolution.fetched.push(ContactId(*contact_id));
                }
                continue;
            }

            let contact_id = Self::create_with_transaction(&mut tx, org_id).await?;
            sqlx::query(
                r#"
                INSERT INTO contacts_contacturn (org_id, contact_id, scheme, path, identity, priority)
                VALUES ($1, $2, $3, $4, $5, 1000)
                ON CONFLICT (org_id, identity) DO UPDATE SET contact_id = EXCLUDED.contact_id
                "#,
            )
            .bind(org_id.0)
            .bind(contact_id.0)
            .bind(urn.scheme())
            .bind(urn.path())
            .bind(&identity)
            .execute(&mut *tx)
            .await?;
            resolution.created.push(contact_id);
        }

        tx.commit().await?;
        Ok(resolution)
    }

    /// Ids of active contacts that are members of any of the given groups
    pub async fn member_ids_for_groups(
        pool: &PgPool,
        group_ids: &[GroupId],
    ) -> Result<Vec<ContactId>, sqlx::Error> {
        let raw_ids: Vec<i32> = group_ids.iter().map(|id| id.0).collect();
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT DISTINCT gc.contact_id
            FROM contacts_contactgroup_contacts gc
            JOIN contacts_contact c ON c.id = gc.contact_id
            WHERE gc.contactgroup_id = ANY($1) AND c.is_active = TRUE
            ORDER BY gc.contact_id
            "#,
        )
        .bind(&raw_ids)
        .fetch_all(pool)
        .await?;
        Ok(ids.into_iter().map(ContactId).collect())
    }

    /// When the most recently modified contact in the org was modified
    pub async fn last_modified_on(
        pool: &PgPool,
        org_id: OrgId,
    ) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
        sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT modified_on FROM contacts_contact WHERE org_id = $1 ORDER BY modified_on DESC LIMIT 1",
        )
        .bind(org_id.0)
        .fetch_optional(pool)
        .await
    }

    /// Bumps `modified_on` so the search indexer picks the contacts up again
    pub async fn touch_modified_on(
        tx: &mut Transaction<'_, Postgres>,
        ids: &[ContactId],
    ) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let raw_ids: Vec<i64> = ids.iter().map(|id| id.0).collect();
        let result = sqlx::query("UPDATE contacts_contact SET modified_on = NOW() WHERE id = ANY($1)")
            .bind(&raw_ids)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Insertion-ordered set of contact ids.
///
/// A contact reachable through several inclusion paths (explicit id, group
/// membership, query match, creation by URN) appears once, at the position
/// it was first seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactIdSet {
    ids: Vec<ContactId>,
    seen: HashSet<ContactId>,
}

impl ContactIdSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: Vec::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Adds `id`, returning false if it was already present
    pub fn insert(&mut self, id: ContactId) -> bool {
        if self.seen.insert(id) {
            self.ids.push(id);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, id: &ContactId) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn as_slice(&self) -> &[ContactId] {
        &self.ids
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ContactId> {
        self.ids.iter()
    }

    /// Keeps only the first `limit` ids
    pub fn truncate(&mut self, limit: usize) {
        if self.ids.len() > limit {
            for id in self.ids.drain(limit..) {
                self.seen.remove(&id);
            }
        }
    }

    pub fn into_vec(self) -> Vec<ContactId> {
        self.ids
    }
}

impl Extend<ContactId> for ContactIdSet {
    fn extend<I: IntoIterator<Item = ContactId>>(&mut self, iter: I) {
        for id in iter {
            self.insert(id);
        }
    }
}

impl FromIterator<ContactId> for ContactIdSet {
    fn from_iter<I: IntoIterator<Item = ContactId>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl IntoIterator for ContactIdSet {
    type Item = ContactId;
    type IntoIter = std::vec::IntoIter<ContactId>;

    fn into_iter(self) -> Self::IntoIter {
        self.ids.into_iter()
    }
}

impl<'a> IntoIterator for &'a ContactIdSet {
    type Item = &'a ContactId;
    type IntoIter = std::slice::Iter<'a, ContactId>;

    fn into_iter(self) -> Self::IntoIter {
        self.ids.iter()
    }
}
