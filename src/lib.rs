#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, Elasticsearch in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Mailroom
//!
//! Audience resolution and batched flow-start orchestration for a
//! conversational-messaging platform.
//!
//! ## Overview
//!
//! A flow start asks for a flow to be run for an audience: explicit
//! contacts, URNs, groups and a free-text contact query, narrowed by
//! exclusions. Mailroom resolves that audience against the relational store
//! and an Elasticsearch contact index that lags it, deduplicates it, and fans
//! it out as fixed-size batches on PostgreSQL message queues. Workers pick
//! the batches up, drive each contact through the external flow engine and
//! record completion so the start finishes exactly once.
//!
//! Query-defined smart groups are materialized by diffing their stored
//! membership against the live query result.
//!
//! ## Module Organization
//!
//! - [`query_builder`] - contact query language, parser and audience query builder
//! - [`search`] - search index client and id resolution
//! - [`orchestration`] - recipient resolution, smart groups, batching and execution
//! - [`store`] - persistence traits and their PostgreSQL implementation
//! - [`models`] - data layer
//! - [`messaging`] - work queue contract over pgmq
//! - [`assets`] - per-org read model snapshots
//! - [`state_machine`] - flow start and group statuses
//! - [`config`] - layered configuration
//! - [`error`] - structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mailroom::models::{ContactId, FlowId, NewFlowStart, OrgId};
//! use mailroom::orchestration::FlowEngine;
//! use mailroom::SystemContext;
//! use std::sync::Arc;
//!
//! # async fn example(engine: Arc<dyn FlowEngine>) -> mailroom::Result<()> {
//! let context = SystemContext::new(engine).await?;
//!
//! let start = context
//!     .queue_flow_start(NewFlowStart {
//!         org_id: OrgId(1),
//!         flow_id: FlowId(12),
//!         contact_ids: vec![ContactId(10000)],
//!         restart_participants: true,
//!         include_active: true,
//!         ..Default::default()
//!     })
//!     .await?;
//! println!("queued start {}", start.id);
//! # Ok(())
//! # }
//! ```

pub mod assets;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod query_builder;
pub mod search;
pub mod state_machine;
pub mod store;
pub mod system_context;

pub use config::{ConfigLoader, MailroomConfig};
pub use error::{MailroomError, ResolutionStep, Result};
pub use system_context::SystemContext;
