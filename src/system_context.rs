//! # System Context
//!
//! Builds the pipeline's shared dependencies once at startup: the database
//! pool, the stores, search and queue clients, the asset cache and the
//! orchestration components wired on top of them.

use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::assets::{AssetCache, PgAssetLoader};
use crate::config::{ConfigLoader, MailroomConfig};
use crate::error::Result;
use crate::logging::{init_structured_logging, log_start_operation};
use crate::messaging::{PgmqTaskQueue, TaskPriority, TaskQueue};
use crate::models::{FlowStart, GroupId, NewFlowStart, OrgId};
use crate::orchestration::{
    BatchExecutor, FlowEngine, PopulateGroupTask, QueueWorker, RecipientResolver,
    SmartGroupReconciler, StartBatcher, StartBatcherConfig, StartFlowTask, TaskPayload,
    TaskProcessor,
};
use crate::search::{ElasticSearchIndex, SearchIndex, SearchResolver, SearchSettings};
use crate::store::{FlowStartStore, PgStore};

pub struct SystemContext {
    pub system_id: Uuid,
    pub config: Arc<MailroomConfig>,
    pub database_pool: PgPool,
    pub store: Arc<PgStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub search: SearchResolver,
    pub assets: Arc<AssetCache>,
    pub processor: Arc<TaskProcessor>,
}

impl std::fmt::Debug for SystemContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemContext")
            .field("system_id", &self.system_id)
            .field(
                "database_pool",
                &format!("PgPool(size={})", self.database_pool.size()),
            )
            .field("search", &self.search)
            .field("assets", &self.assets)
            .finish_non_exhaustive()
    }
}

impl SystemContext {
    /// Loads configuration from the default sources and connects
    pub async fn new(engine: Arc<dyn FlowEngine>) -> Result<Self> {
        let config = ConfigLoader::load()?;
        init_structured_logging(&config.logging);
        Self::from_config(config, engine).await
    }

    pub async fn from_config(config: MailroomConfig, engine: Arc<dyn FlowEngine>) -> Result<Self> {
        config.validate()?;

        let database_pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .acquire_timeout(Duration::from_secs(config.database.acquire_timeout_seconds))
            .connect(&config.database.url)
            .await?;
        info!(
            max_connections = config.database.max_connections,
            "Database connection established"
        );

        Self::from_pool_and_config(database_pool, config, engine).await
    }

    pub async fn from_pool_and_config(
        database_pool: PgPool,
        config: MailroomConfig,
        engine: Arc<dyn FlowEngine>,
    ) -> Result<Self> {
        let store = Arc::new(PgStore::new(database_pool.clone()));
        let queue: Arc<dyn TaskQueue> =
            Arc::new(PgmqTaskQueue::new_with_pool(database_pool.clone()).await);

        let index: Arc<dyn SearchIndex> = Arc::new(ElasticSearchIndex::new(&config.elastic)?);
        let search = SearchResolver::new(
            index,
            SearchSettings {
                max_result_window: config.elastic.max_result_window,
                point_in_time_keep_alive: config.elastic.point_in_time_keep_alive.clone(),
            },
        );

        let assets = Arc::new(AssetCache::new(
            Arc::new(PgAssetLoader::new(database_pool.clone())),
            config.assets.ttl(),
        ));

        let recipients = RecipientResolver::new(store.clone(), store.clone(), search.clone());
        let batcher = Arc::new(StartBatcher::new(
            store.clone(),
            store.clone(),
            recipients,
            queue.clone(),
            StartBatcherConfig::from_config(&config.starts, &config.queue),
        ));
        let executor = Arc::new(BatchExecutor::new(
            store.clone(),
            store.clone(),
            store.clone(),
            engine,
        ));
        let reconciler = Arc::new(SmartGroupReconciler::new(
            store.clone(),
            store.clone(),
            search.clone(),
            config.smart_groups.freshness_window(),
        ));
        let processor = Arc::new(TaskProcessor::new(
            assets.clone(),
            store.clone(),
            batcher,
            executor,
            reconciler,
        ));

        let system_id = Uuid::new_v4();
        info!(system_id = %system_id, "System context initialized");

        Ok(Self {
            system_id,
            config: Arc::new(config),
            database_pool,
            store,
            queue,
            search,
            assets,
            processor,
        })
    }

    pub fn worker(&self) -> QueueWorker {
        QueueWorker::new(
            self.queue.clone(),
            self.processor.clone(),
            self.config.queue.clone(),
        )
    }

    /// Persists a new flow start and queues it for batching. Starts naming
    /// only a few contacts directly go to the handler queue.
    pub async fn queue_flow_start(&self, new_start: NewFlowStart) -> Result<FlowStart> {
        let start = self.store.create_start(new_start).await?;

        let direct_only = start.group_ids.is_empty() && start.query.is_empty();
        let direct_count = start.contact_ids.len() + start.urns.len() + usize::from(start.create_contact);
        let (queue, priority) =
            if direct_only && direct_count <= self.config.starts.handler_queue_threshold {
                (&self.config.queue.handler_queue, TaskPriority::High)
            } else {
                (&self.config.queue.batch_queue, TaskPriority::Default)
            };

        let task = TaskPayload::StartFlow(StartFlowTask { start_id: start.id })
            .to_task(start.org_id)?
            .with_priority(priority);
        self.queue.push(queue, &task).await?;

        log_start_operation(
            "queue",
            start.id,
            start.org_id,
            &start.status.to_string(),
            None,
            Some(queue.as_str()),
        );
        Ok(start)
    }

    /// Queues re-evaluation of a smart group, optionally with a new query
    pub async fn queue_group_population(
        &self,
        org_id: OrgId,
        group_id: GroupId,
        query: Option<String>,
    ) -> Result<()> {
        let task = TaskPayload::PopulateDynamicGroup(PopulateGroupTask { group_id, query })
            .to_task(org_id)?;
        self.queue.push(&self.config.queue.batch_queue, &task).await?;
        Ok(())
    }
}
