//! Shared test doubles: an in-memory store, a scripted search index, a
//! recording queue and flow engine, plus asset fixtures.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use mailroom::assets::{AssetCache, AssetLoader, OrgAssets};
use mailroom::config::QueueConfig;
use mailroom::error::{MailroomError, Result};
use mailroom::messaging::{MessagingError, MessagingResult, QueuedTask, ReceivedTask, TaskQueue};
use mailroom::models::{
    BatchCompletion, Contact, ContactField, ContactId, ContactStatus, DateFormat, FieldType,
    FlowId, FlowRef, FlowStart, FlowType, Group, GroupId, NewFlowStart, NewSession,
    OrgEnvironment, OrgId, SessionStatus, StartId, StartType, Urn, UrnResolution,
};
use mailroom::orchestration::{
    BatchExecutor, FlowEngine, FlowRun, FlowStartContext, FlowTrigger, QueueWorker,
    RecipientResolver, SmartGroupReconciler, StartBatcher, StartBatcherConfig, TaskProcessor,
};
use mailroom::search::{SearchError, SearchHit, SearchHits, SearchIndex, SearchResolver, SearchSettings};
use mailroom::state_machine::{GroupStatus, StartStatus};
use mailroom::store::{ContactStore, FlowStartStore, GroupLock, GroupStore, SessionStore};

pub const ORG: OrgId = OrgId(1);

// ---------------------------------------------------------------------------
// assets
// ---------------------------------------------------------------------------

pub fn group(id: i32, name: &str, query: &str) -> Group {
    Group {
        id: GroupId(id),
        uuid: Uuid::new_v4(),
        org_id: ORG,
        name: name.to_string(),
        query: query.to_string(),
        status: if query.is_empty() {
            GroupStatus::Ready
        } else {
            GroupStatus::Initializing
        },
    }
}

pub fn flow(id: i32, name: &str, flow_type: FlowType) -> FlowRef {
    FlowRef {
        id: FlowId(id),
        uuid: Uuid::new_v4(),
        name: name.to_string(),
        flow_type,
    }
}

pub const DOCTORS: GroupId = GroupId(1);
pub const TESTERS: GroupId = GroupId(2);
pub const ADULTS: GroupId = GroupId(3);
pub const FAVORITES: FlowId = FlowId(10);
pub const IVR_FLOW: FlowId = FlowId(11);

pub fn assets() -> OrgAssets {
    OrgAssets::new(
        OrgEnvironment::new(ORG, DateFormat::DayMonthYear, chrono_tz::UTC),
        vec![
            ContactField::new("age", FieldType::Number),
            ContactField::new("gender", FieldType::Text),
        ],
        vec![
            group(1, "Doctors", ""),
            group(2, "Testers", ""),
            group(3, "Adults", "age >= 18"),
        ],
        vec![
            flow(10, "Favorites", FlowType::Messaging),
            flow(11, "IVR Survey", FlowType::Voice),
        ],
    )
}

// ---------------------------------------------------------------------------
// store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct StoreState {
    pub next_contact_id: i64,
    pub next_start_id: i64,
    pub next_session_id: i64,
    pub contacts: HashMap<ContactId, Contact>,
    pub urn_owners: HashMap<String, ContactId>,
    pub group_status: HashMap<GroupId, GroupStatus>,
    pub status_history: Vec<(GroupId, GroupStatus)>,
    pub members: HashMap<GroupId, BTreeSet<ContactId>>,
    pub added: Vec<ContactId>,
    pub removed: Vec<ContactId>,
    /// Order of membership writes, "remove" or "add"
    pub membership_writes: Vec<&'static str>,
    pub touched: Vec<ContactId>,
    pub last_modified: Option<DateTime<Utc>>,
    pub locks_held: usize,
    pub max_locks_held: usize,
    pub locks_taken: usize,
    pub starts: HashMap<StartId, FlowStart>,
    pub created_for_start: HashMap<StartId, Vec<ContactId>>,
    pub completions: HashSet<(StartId, i32)>,
    pub sessions: Vec<NewSession>,
    pub existing_id_calls: usize,
    pub fail_group_members: bool,
    /// Membership writes that add contacts fail
    pub fail_member_adds: bool,
    pub fail_sessions: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pub state: Arc<Mutex<StoreState>>,
}

pub fn contact(id: i64, name: &str) -> Contact {
    Contact {
        id: ContactId(id),
        uuid: Uuid::new_v4(),
        org_id: ORG,
        name: Some(name.to_string()),
        language: None,
        status: ContactStatus::Active,
        created_on: Utc::now(),
        modified_on: Utc::now(),
        last_seen_on: None,
        urns: vec![],
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let store = Self::default();
        store.state.lock().unwrap().next_contact_id = 1000;
        store
    }

    pub fn add_contact(&self, id: i64, name: &str) -> ContactId {
        let mut state = self.state.lock().unwrap();
        state.contacts.insert(ContactId(id), contact(id, name));
        ContactId(id)
    }

    pub fn add_contact_with_urn(&self, id: i64, name: &str, urn: &str) -> ContactId {
        let contact_id = self.add_contact(id, name);
        let urn: Urn = urn.parse().unwrap();
        let mut state = self.state.lock().unwrap();
        state.urn_owners.insert(urn.identity(), contact_id);
        if let Some(c) = state.contacts.get_mut(&contact_id) {
            c.urns.push(urn);
        }
        contact_id
    }

    pub fn set_members(&self, group_id: GroupId, ids: &[ContactId]) {
        let mut state = self.state.lock().unwrap();
        state.members.insert(group_id, ids.iter().copied().collect());
    }

    pub fn members(&self, group_id: GroupId) -> BTreeSet<ContactId> {
        let state = self.state.lock().unwrap();
        state.members.get(&group_id).cloned().unwrap_or_default()
    }

    pub fn group_status(&self, group_id: GroupId) -> Option<GroupStatus> {
        self.state.lock().unwrap().group_status.get(&group_id).copied()
    }

    pub fn start(&self, id: StartId) -> FlowStart {
        self.state.lock().unwrap().starts[&id].clone()
    }

    pub fn insert_start(&self, new_start: NewFlowStart, flow_type: FlowType) -> FlowStart {
        let mut state = self.state.lock().unwrap();
        state.next_start_id += 1;
        let start = FlowStart {
            id: StartId(state.next_start_id),
            uuid: Uuid::new_v4(),
            org_id: new_start.org_id,
            flow_id: new_start.flow_id,
            flow_type,
            start_type: new_start.start_type.unwrap_or(StartType::Manual),
            status: StartStatus::Pending,
            contact_ids: new_start.contact_ids,
            group_ids: new_start.group_ids,
            urns: new_start.urns,
            query: new_start.query,
            exclusions: new_start.exclusions,
            exclude_group_ids: new_start.exclude_group_ids,
            create_contact: new_start.create_contact,
            restart_participants: new_start.restart_participants,
            include_active: new_start.include_active,
            extra: new_start.extra,
            created_by: new_start.created_by,
            contact_count: None,
            processed_count: 0,
            dropped_count: 0,
            created_on: Utc::now(),
            modified_on: Utc::now(),
        };
        state.starts.insert(start.id, start.clone());
        start
    }
}

fn settle(start: &mut FlowStart) {
    if start.status == StartStatus::Starting
        && start.processed_count + start.dropped_count >= start.contact_count.unwrap_or(i32::MAX)
    {
        start.status = StartStatus::Complete;
    }
}

fn create_in(state: &mut StoreState) -> ContactId {
    state.next_contact_id += 1;
    let id = state.next_contact_id;
    state.contacts.insert(ContactId(id), contact(id, ""));
    ContactId(id)
}

#[async_trait]
impl ContactStore for MemoryStore {
    async fn existing_ids(&self, _org_id: OrgId, ids: &[ContactId]) -> Result<Vec<ContactId>> {
        let mut state = self.state.lock().unwrap();
        state.existing_id_calls += 1;
        Ok(ids
            .iter()
            .copied()
            .filter(|id| state.contacts.contains_key(id))
            .collect())
    }

    async fn load_contacts(&self, _org_id: OrgId, ids: &[ContactId]) -> Result<Vec<Contact>> {
        let state = self.state.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| state.contacts.get(id).cloned())
            .collect())
    }

    async fn get_or_create_by_urns(&self, _org_id: OrgId, urns: &[Urn]) -> Result<UrnResolution> {
        let mut state = self.state.lock().unwrap();
        let mut resolution = UrnResolution::default();
        for urn in urns {
            let identity = urn.identity();
            match state.urn_owners.get(&identity).copied() {
                Some(owner) => {
                    if !resolution.fetched.contains(&owner) {
                        resolution.fetched.push(owner);
                    }
                }
                None => {
                    let id = create_in(&mut state);
                    state.urn_owners.insert(identity, id);
                    resolution.created.push(id);
                }
            }
        }
        Ok(resolution)
    }

    async fn create_contact(&self, _org_id: OrgId) -> Result<ContactId> {
        let mut state = self.state.lock().unwrap();
        Ok(create_in(&mut state))
    }

    async fn last_modified_on(&self, _org_id: OrgId) -> Result<Option<DateTime<Utc>>> {
        Ok(self.state.lock().unwrap().last_modified)
    }
}

/// Membership changes staged by a group lock until it is released
#[derive(Debug, Default)]
struct StagedMembership {
    removed: Vec<ContactId>,
    added: Vec<ContactId>,
}

pub struct MemoryGroupLock {
    state: Arc<Mutex<StoreState>>,
    group_id: GroupId,
    staged: Vec<StagedMembership>,
    released: bool,
}

impl MemoryGroupLock {
    fn unlock(&mut self) {
        if !self.released {
            self.released = true;
            self.state.lock().unwrap().locks_held -= 1;
        }
    }

    fn commit(&mut self) {
        let mut state = self.state.lock().unwrap();
        for change in self.staged.drain(..) {
            if !change.removed.is_empty() {
                state.membership_writes.push("remove");
                state.removed.extend_from_slice(&change.removed);
            }
            if !change.added.is_empty() {
                state.membership_writes.push("add");
                state.added.extend_from_slice(&change.added);
            }
            state.touched.extend(change.removed.iter().chain(&change.added).copied());

            let members = state.members.entry(self.group_id).or_default();
            for id in &change.removed {
                members.remove(id);
            }
            members.extend(change.added.iter().copied());
        }
    }
}

impl Drop for MemoryGroupLock {
    fn drop(&mut self) {
        self.unlock();
    }
}

#[async_trait]
impl GroupLock for MemoryGroupLock {
    async fn apply_membership(
        &mut self,
        removed: &[ContactId],
        added: &[ContactId],
    ) -> Result<()> {
        if self.state.lock().unwrap().fail_member_adds && !added.is_empty() {
            return Err(MailroomError::Database(sqlx::Error::PoolTimedOut));
        }
        self.staged.push(StagedMembership {
            removed: removed.to_vec(),
            added: added.to_vec(),
        });
        Ok(())
    }

    async fn release(mut self: Box<Self>) -> Result<()> {
        self.commit();
        self.unlock();
        Ok(())
    }
}

#[async_trait]
impl GroupStore for MemoryStore {
    async fn lock_group(&self, group_id: GroupId) -> Result<Box<dyn GroupLock>> {
        let mut state = self.state.lock().unwrap();
        state.locks_held += 1;
        state.locks_taken += 1;
        state.max_locks_held = state.max_locks_held.max(state.locks_held);
        Ok(Box::new(MemoryGroupLock {
            state: self.state.clone(),
            group_id,
            staged: Vec::new(),
            released: false,
        }))
    }

    async fn update_status(&self, group_id: GroupId, status: GroupStatus) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.group_status.insert(group_id, status);
        state.status_history.push((group_id, status));
        Ok(())
    }

    async fn member_ids(&self, group_id: GroupId) -> Result<Vec<ContactId>> {
        Ok(self.members(group_id).into_iter().collect())
    }

    async fn members_of_groups(&self, group_ids: &[GroupId]) -> Result<Vec<ContactId>> {
        let state = self.state.lock().unwrap();
        if state.fail_group_members {
            return Err(MailroomError::Database(sqlx::Error::PoolTimedOut));
        }
        let mut ids = BTreeSet::new();
        for group_id in group_ids {
            if let Some(members) = state.members.get(group_id) {
                ids.extend(members.iter().copied());
            }
        }
        Ok(ids.into_iter().collect())
    }
}

#[async_trait]
impl FlowStartStore for MemoryStore {
    async fn create_start(&self, new_start: NewFlowStart) -> Result<FlowStart> {
        Ok(self.insert_start(new_start, FlowType::Messaging))
    }

    async fn find_start(&self, id: StartId) -> Result<Option<FlowStart>> {
        Ok(self.state.lock().unwrap().starts.get(&id).cloned())
    }

    async fn mark_starting(
        &self,
        id: StartId,
        contact_count: usize,
        created_contacts: &[ContactId],
    ) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let start = state
            .starts
            .get_mut(&id)
            .ok_or_else(|| MailroomError::not_found("flow start", id))?;
        if start.status != StartStatus::Pending {
            return Ok(false);
        }
        start.status = StartStatus::Starting;
        start.contact_count = Some(contact_count as i32);
        state
            .created_for_start
            .insert(id, created_contacts.to_vec());
        Ok(true)
    }

    async fn mark_complete(&self, id: StartId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(start) = state.starts.get_mut(&id) {
            if !start.status.is_terminal() {
                start.status = StartStatus::Complete;
            }
        }
        Ok(())
    }

    async fn mark_failed(&self, id: StartId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(start) = state.starts.get_mut(&id) {
            if !start.status.is_terminal() {
                start.status = StartStatus::Failed;
            }
        }
        Ok(())
    }

    async fn record_dropped(
        &self,
        id: StartId,
        dropped: usize,
        nothing_queued: bool,
    ) -> Result<StartStatus> {
        let mut state = self.state.lock().unwrap();
        let start = state
            .starts
            .get_mut(&id)
            .ok_or_else(|| MailroomError::not_found("flow start", id))?;
        start.dropped_count += dropped as i32;
        if nothing_queued && start.status == StartStatus::Starting {
            start.status = StartStatus::Failed;
        }
        settle(start);
        Ok(start.status)
    }

    async fn is_batch_recorded(&self, id: StartId, batch_index: i32) -> Result<bool> {
        Ok(self.state.lock().unwrap().completions.contains(&(id, batch_index)))
    }

    async fn record_batch_complete(
        &self,
        id: StartId,
        batch_index: i32,
        contact_count: usize,
    ) -> Result<BatchCompletion> {
        let mut state = self.state.lock().unwrap();
        if !state.completions.insert((id, batch_index)) {
            return Ok(BatchCompletion::Duplicate);
        }
        let start = state
            .starts
            .get_mut(&id)
            .ok_or_else(|| MailroomError::not_found("flow start", id))?;
        start.processed_count += contact_count as i32;
        settle(start);
        Ok(BatchCompletion::Recorded {
            status: start.status,
            processed_count: start.processed_count,
        })
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn persist_session(&self, session: &NewSession) -> Result<i64> {
        let mut state = self.state.lock().unwrap();
        if state.fail_sessions {
            return Err(MailroomError::Database(sqlx::Error::PoolTimedOut));
        }
        state.next_session_id += 1;
        state.sessions.push(session.clone());
        Ok(state.next_session_id)
    }
}

// ---------------------------------------------------------------------------
// search index
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct IndexState {
    /// Ids every search matches, in index order
    pub ids: Vec<ContactId>,
    pub bodies: Vec<Value>,
    pub opened: usize,
    pub closed: Vec<String>,
    pub fail_with_status: Option<u16>,
}

/// Search index that matches a fixed list of ids for every query and pages
/// through it with `from`/`size` or `search_after`
#[derive(Debug, Clone, Default)]
pub struct MockSearchIndex {
    pub state: Arc<Mutex<IndexState>>,
}

impl MockSearchIndex {
    pub fn returning(ids: &[ContactId]) -> Self {
        let index = Self::default();
        index.state.lock().unwrap().ids = ids.to_vec();
        index
    }

    pub fn search_count(&self) -> usize {
        self.state.lock().unwrap().bodies.len()
    }

    pub fn bodies(&self) -> Vec<Value> {
        self.state.lock().unwrap().bodies.clone()
    }
}

#[async_trait]
impl SearchIndex for MockSearchIndex {
    async fn search(&self, _org_id: OrgId, body: Value) -> std::result::Result<SearchHits, SearchError> {
        let mut state = self.state.lock().unwrap();
        state.bodies.push(body.clone());
        if let Some(status) = state.fail_with_status {
            return Err(SearchError::Status {
                status,
                body: "index unavailable".to_string(),
            });
        }

        let start = match body.get("search_after").and_then(|a| a[0].as_i64()) {
            Some(after) => state
                .ids
                .iter()
                .position(|id| id.0 == after)
                .map_or(state.ids.len(), |p| p + 1),
            None => body["from"].as_u64().unwrap_or(0) as usize,
        };
        let size = body["size"].as_u64().unwrap_or(10) as usize;

        let hits = state
            .ids
            .iter()
            .skip(start)
            .take(size)
            .map(|id| SearchHit {
                id: *id,
                sort: vec![json!(id.0)],
            })
            .collect();
        Ok(SearchHits {
            total: Some(state.ids.len() as u64),
            hits,
            pit_id: body.get("pit").map(|_| "pit-next".to_string()),
        })
    }

    async fn open_point_in_time(&self, _org_id: OrgId) -> std::result::Result<String, SearchError> {
        let mut state = self.state.lock().unwrap();
        state.opened += 1;
        Ok("pit-1".to_string())
    }

    async fn close_point_in_time(&self, pit_id: &str) -> std::result::Result<(), SearchError> {
        self.state.lock().unwrap().closed.push(pit_id.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// queue
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct QueueState {
    pub next_msg_id: i64,
    pub pushed: Vec<(String, QueuedTask)>,
    pub pending: HashMap<String, VecDeque<ReceivedTask>>,
    pub acked: Vec<i64>,
    pub archived: Vec<i64>,
    /// Zero-based push attempts that fail
    pub fail_pushes: HashSet<usize>,
    pub push_attempts: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MockQueue {
    pub state: Arc<Mutex<QueueState>>,
}

impl MockQueue {
    pub fn failing_pushes(attempts: &[usize]) -> Self {
        let queue = Self::default();
        queue.state.lock().unwrap().fail_pushes = attempts.iter().copied().collect();
        queue
    }

    pub fn pushed(&self) -> Vec<(String, QueuedTask)> {
        self.state.lock().unwrap().pushed.clone()
    }

    /// Makes a task available to `pop`, as if read `read_count - 1` times before
    pub fn deliver(&self, queue: &str, task: QueuedTask, read_count: i32) -> i64 {
        let mut state = self.state.lock().unwrap();
        state.next_msg_id += 1;
        let msg_id = state.next_msg_id;
        state
            .pending
            .entry(queue.to_string())
            .or_default()
            .push_back(ReceivedTask {
                msg_id,
                read_count,
                task,
            });
        msg_id
    }
}

#[async_trait]
impl TaskQueue for MockQueue {
    async fn ensure_queue(&self, _queue: &str) -> MessagingResult<()> {
        Ok(())
    }

    async fn push(&self, queue: &str, task: &QueuedTask) -> MessagingResult<i64> {
        let mut state = self.state.lock().unwrap();
        let attempt = state.push_attempts;
        state.push_attempts += 1;
        if state.fail_pushes.contains(&attempt) {
            return Err(MessagingError::queue_operation(queue, "send", "connection reset"));
        }
        state.next_msg_id += 1;
        state.pushed.push((queue.to_string(), task.clone()));
        Ok(state.next_msg_id)
    }

    async fn pop(
        &self,
        queue: &str,
        max: usize,
        _visibility_timeout_seconds: i32,
    ) -> MessagingResult<Vec<ReceivedTask>> {
        let mut state = self.state.lock().unwrap();
        let pending = state.pending.entry(queue.to_string()).or_default();
        let count = max.min(pending.len());
        Ok(pending.drain(..count).collect())
    }

    async fn ack(&self, _queue: &str, msg_id: i64) -> MessagingResult<()> {
        self.state.lock().unwrap().acked.push(msg_id);
        Ok(())
    }

    async fn archive(&self, _queue: &str, msg_id: i64) -> MessagingResult<()> {
        self.state.lock().unwrap().archived.push(msg_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// flow engine
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct EngineState {
    pub runs: Vec<(ContactId, FlowStartContext, FlowTrigger)>,
    pub failing: HashSet<ContactId>,
}

#[derive(Debug, Clone, Default)]
pub struct MockFlowEngine {
    pub state: Arc<Mutex<EngineState>>,
}

impl MockFlowEngine {
    pub fn failing_for(ids: &[ContactId]) -> Self {
        let engine = Self::default();
        engine.state.lock().unwrap().failing = ids.iter().copied().collect();
        engine
    }

    pub fn started(&self) -> Vec<ContactId> {
        self.state.lock().unwrap().runs.iter().map(|r| r.0).collect()
    }
}

#[async_trait]
impl FlowEngine for MockFlowEngine {
    async fn start_flow(
        &self,
        context: &FlowStartContext,
        contact: &Contact,
        trigger: &FlowTrigger,
    ) -> Result<FlowRun> {
        let mut state = self.state.lock().unwrap();
        state.runs.push((contact.id, context.clone(), trigger.clone()));
        if state.failing.contains(&contact.id) {
            return Err(MailroomError::FlowEngine(format!(
                "no active channel for contact {}",
                contact.id
            )));
        }
        Ok(FlowRun {
            status: SessionStatus::Waiting,
            events: vec![json!({"type": "msg_created", "text": "Hi there"})],
        })
    }
}

// ---------------------------------------------------------------------------
// wiring
// ---------------------------------------------------------------------------

/// Serves the same fixture assets for every org
#[derive(Debug, Default)]
pub struct FixtureAssetLoader;

#[async_trait]
impl AssetLoader for FixtureAssetLoader {
    async fn load(&self, _org_id: OrgId) -> Result<OrgAssets> {
        Ok(assets())
    }
}

pub fn search_resolver(index: &MockSearchIndex) -> SearchResolver {
    SearchResolver::new(Arc::new(index.clone()), SearchSettings::default())
}

pub fn recipient_resolver(store: &MemoryStore, index: &MockSearchIndex) -> RecipientResolver {
    RecipientResolver::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        search_resolver(index),
    )
}

/// Every pipeline component over one set of test doubles
pub struct Pipeline {
    pub store: MemoryStore,
    pub index: MockSearchIndex,
    pub queue: MockQueue,
    pub engine: MockFlowEngine,
    pub batcher: Arc<StartBatcher>,
    pub executor: Arc<BatchExecutor>,
    pub reconciler: Arc<SmartGroupReconciler>,
    pub processor: Arc<TaskProcessor>,
    pub queue_config: QueueConfig,
}

impl Pipeline {
    pub fn new(store: MemoryStore, index: MockSearchIndex, queue: MockQueue) -> Self {
        Self::with_config(store, index, queue, StartBatcherConfig::default())
    }

    pub fn with_config(
        store: MemoryStore,
        index: MockSearchIndex,
        queue: MockQueue,
        config: StartBatcherConfig,
    ) -> Self {
        let engine = MockFlowEngine::default();
        let batcher = Arc::new(StartBatcher::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            recipient_resolver(&store, &index),
            Arc::new(queue.clone()),
            config,
        ));
        let executor = Arc::new(BatchExecutor::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(engine.clone()),
        ));
        let reconciler = Arc::new(SmartGroupReconciler::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            search_resolver(&index),
            Duration::ZERO,
        ));
        let assets = Arc::new(AssetCache::new(
            Arc::new(FixtureAssetLoader),
            Duration::from_secs(60),
        ));
        let processor = Arc::new(TaskProcessor::new(
            assets,
            Arc::new(store.clone()),
            batcher.clone(),
            executor.clone(),
            reconciler.clone(),
        ));

        Self {
            store,
            index,
            queue,
            engine,
            batcher,
            executor,
            reconciler,
            processor,
            queue_config: QueueConfig::default(),
        }
    }

    pub fn worker(&self) -> QueueWorker {
        QueueWorker::new(
            Arc::new(self.queue.clone()),
            self.processor.clone(),
            self.queue_config.clone(),
        )
    }
}

/// A start that neither skips previous participants nor contacts in a flow
pub fn new_start(contact_ids: &[ContactId]) -> NewFlowStart {
    NewFlowStart {
        org_id: ORG,
        flow_id: FAVORITES,
        start_type: Some(StartType::Manual),
        contact_ids: contact_ids.to_vec(),
        restart_participants: true,
        include_active: true,
        ..NewFlowStart::default()
    }
}

pub fn ids(raw: impl IntoIterator<Item = i64>) -> Vec<ContactId> {
    raw.into_iter().map(ContactId).collect()
}
