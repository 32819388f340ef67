//! In-memory implementations of the domain traits.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use router_core::{RouterError, RouterResult};
use router_domain::entities::{
    AnalysisConfig, ExecutionLog, ExecutionStatistics, ExecutionStatus, NodeInfo, NodeRecord,
    Recording, StatusProjection, TaskMessage,
};
use router_domain::messaging::{TaskDelivery, TaskQueue};
use router_domain::repositories::{
    AnalysisConfigRepository, ClaimOutcome, ExecutionLogRepository, NodeRepository,
    RecordingRepository, RuleRepository,
};
use router_domain::rule::{resolve_path, Condition, DocumentFilter, RoutingRule};

/// Evaluates a compiled document filter against a recording.
///
/// Filter entries deserialize back into `Condition` (objects become
/// operator conditions, scalars equality), so the in-memory stores and
/// the SQL translation share one semantic reference. Malformed entries
/// fail closed.
pub fn matches_document_filter(filter: &DocumentFilter, recording: &Recording) -> bool {
    filter.iter().all(|(path, raw)| {
        serde_json::from_value::<Condition>(raw.clone())
            .map(|condition| condition.matches(resolve_path(&recording.info_features, path)))
            .unwrap_or(false)
    })
}

/// Mock rule repository backed by a HashMap.
pub struct MockRuleRepository {
    rules: Arc<Mutex<HashMap<String, RoutingRule>>>,
}

impl MockRuleRepository {
    pub fn new() -> Self {
        Self {
            rules: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_rules(rules: Vec<RoutingRule>) -> Self {
        let map = rules
            .into_iter()
            .map(|rule| (rule.rule_id.clone(), rule))
            .collect();
        Self {
            rules: Arc::new(Mutex::new(map)),
        }
    }
}

impl Default for MockRuleRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuleRepository for MockRuleRepository {
    async fn create(&self, rule: &RoutingRule) -> RouterResult<RoutingRule> {
        let mut rules = self.rules.lock().unwrap();
        if rules.contains_key(&rule.rule_id) {
            return Err(RouterError::InvalidRule(format!(
                "duplicate rule_id: {}",
                rule.rule_id
            )));
        }
        rules.insert(rule.rule_id.clone(), rule.clone());
        Ok(rule.clone())
    }

    async fn find_by_rule_id(&self, rule_id: &str) -> RouterResult<Option<RoutingRule>> {
        Ok(self.rules.lock().unwrap().get(rule_id).cloned())
    }

    async fn find_by_router_id(&self, router_id: &str) -> RouterResult<Option<RoutingRule>> {
        let rules = self.rules.lock().unwrap();
        let mut matched: Vec<&RoutingRule> = rules
            .values()
            .filter(|rule| rule.handles_router_id(router_id))
            .collect();
        // Highest priority wins when several rules share a router_id.
        matched.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.rule_id.cmp(&b.rule_id)));
        Ok(matched.first().map(|rule| (*rule).clone()))
    }

    async fn find_all(&self, enabled_only: bool) -> RouterResult<Vec<RoutingRule>> {
        let rules = self.rules.lock().unwrap();
        let mut all: Vec<RoutingRule> = rules
            .values()
            .filter(|rule| !enabled_only || rule.enabled)
            .cloned()
            .collect();
        all.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.rule_id.cmp(&b.rule_id)));
        Ok(all)
    }

    async fn update(&self, rule: &RoutingRule) -> RouterResult<RoutingRule> {
        let mut rules = self.rules.lock().unwrap();
        if !rules.contains_key(&rule.rule_id) {
            return Err(RouterError::RuleNotFound {
                router_id: rule.rule_id.clone(),
            });
        }
        rules.insert(rule.rule_id.clone(), rule.clone());
        Ok(rule.clone())
    }

    async fn delete(&self, rule_id: &str) -> RouterResult<bool> {
        Ok(self.rules.lock().unwrap().remove(rule_id).is_some())
    }
}

/// Mock recording repository with an atomic claim under one lock and
/// optional unavailability injection for hard-failure tests.
pub struct MockRecordingRepository {
    recordings: Arc<Mutex<HashMap<String, Recording>>>,
    unavailable: Arc<Mutex<bool>>,
}

impl MockRecordingRepository {
    pub fn new() -> Self {
        Self {
            recordings: Arc::new(Mutex::new(HashMap::new())),
            unavailable: Arc::new(Mutex::new(false)),
        }
    }

    pub fn with_recordings(recordings: Vec<Recording>) -> Self {
        let map = recordings
            .into_iter()
            .map(|recording| (recording.analyze_uuid.clone(), recording))
            .collect();
        Self {
            recordings: Arc::new(Mutex::new(map)),
            unavailable: Arc::new(Mutex::new(false)),
        }
    }

    /// Makes every operation fail with `DatastoreUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }

    pub fn insert(&self, recording: Recording) {
        self.recordings
            .lock()
            .unwrap()
            .insert(recording.analyze_uuid.clone(), recording);
    }

    /// Snapshot of a stored recording, for assertions.
    pub fn get(&self, analyze_uuid: &str) -> Option<Recording> {
        self.recordings.lock().unwrap().get(analyze_uuid).cloned()
    }

    fn guard(&self) -> RouterResult<()> {
        if *self.unavailable.lock().unwrap() {
            return Err(RouterError::DatastoreUnavailable(
                "injected by test double".to_string(),
            ));
        }
        Ok(())
    }

    fn sorted(mut records: Vec<Recording>) -> Vec<Recording> {
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.analyze_uuid.cmp(&b.analyze_uuid))
        });
        records
    }
}

impl Default for MockRecordingRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordingRepository for MockRecordingRepository {
    async fn find_by_uuid(&self, analyze_uuid: &str) -> RouterResult<Option<Recording>> {
        self.guard()?;
        Ok(self.recordings.lock().unwrap().get(analyze_uuid).cloned())
    }

    async fn try_claim(&self, analyze_uuid: &str, router_id: &str) -> RouterResult<ClaimOutcome> {
        self.guard()?;
        let mut recordings = self.recordings.lock().unwrap();
        match recordings.get_mut(analyze_uuid) {
            None => Ok(ClaimOutcome::NotFound),
            Some(recording) if recording.is_assigned_to(router_id) => {
                Ok(ClaimOutcome::AlreadyAssigned)
            }
            Some(recording) => {
                recording.assigned_router_ids.push(router_id.to_string());
                recording.last_router_dispatch = Some(Utc::now());
                Ok(ClaimOutcome::Claimed)
            }
        }
    }

    async fn release_claim(&self, analyze_uuid: &str, router_id: &str) -> RouterResult<bool> {
        self.guard()?;
        let mut recordings = self.recordings.lock().unwrap();
        match recordings.get_mut(analyze_uuid) {
            None => Ok(false),
            Some(recording) => {
                let before = recording.assigned_router_ids.len();
                recording.assigned_router_ids.retain(|id| id != router_id);
                Ok(recording.assigned_router_ids.len() != before)
            }
        }
    }

    async fn count_matching(&self, filter: &DocumentFilter) -> RouterResult<u64> {
        self.guard()?;
        let recordings = self.recordings.lock().unwrap();
        Ok(recordings
            .values()
            .filter(|recording| matches_document_filter(filter, recording))
            .count() as u64)
    }

    async fn find_matching(
        &self,
        filter: &DocumentFilter,
        limit: Option<u32>,
    ) -> RouterResult<Vec<Recording>> {
        self.guard()?;
        let recordings = self.recordings.lock().unwrap();
        let matched: Vec<Recording> = recordings
            .values()
            .filter(|recording| matches_document_filter(filter, recording))
            .cloned()
            .collect();
        let mut matched = Self::sorted(matched);
        if let Some(limit) = limit {
            matched.truncate(limit as usize);
        }
        Ok(matched)
    }

    async fn count_unassigned(
        &self,
        filter: &DocumentFilter,
        router_id: &str,
    ) -> RouterResult<u64> {
        self.guard()?;
        let recordings = self.recordings.lock().unwrap();
        Ok(recordings
            .values()
            .filter(|recording| {
                !recording.is_assigned_to(router_id) && matches_document_filter(filter, recording)
            })
            .count() as u64)
    }

    async fn find_unassigned(
        &self,
        filter: &DocumentFilter,
        router_id: &str,
        limit: Option<u32>,
    ) -> RouterResult<Vec<Recording>> {
        self.guard()?;
        let recordings = self.recordings.lock().unwrap();
        let matched: Vec<Recording> = recordings
            .values()
            .filter(|recording| {
                !recording.is_assigned_to(router_id) && matches_document_filter(filter, recording)
            })
            .cloned()
            .collect();
        let mut matched = Self::sorted(matched);
        if let Some(limit) = limit {
            matched.truncate(limit as usize);
        }
        Ok(matched)
    }
}

/// Mock analysis config repository.
pub struct MockAnalysisConfigRepository {
    configs: Arc<Mutex<HashMap<String, AnalysisConfig>>>,
}

impl MockAnalysisConfigRepository {
    pub fn new() -> Self {
        Self {
            configs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_configs(configs: Vec<AnalysisConfig>) -> Self {
        let map = configs
            .into_iter()
            .map(|config| (config.config_id.clone(), config))
            .collect();
        Self {
            configs: Arc::new(Mutex::new(map)),
        }
    }

    pub fn insert(&self, config: AnalysisConfig) {
        self.configs
            .lock()
            .unwrap()
            .insert(config.config_id.clone(), config);
    }
}

impl Default for MockAnalysisConfigRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnalysisConfigRepository for MockAnalysisConfigRepository {
    async fn find_by_config_id(&self, config_id: &str) -> RouterResult<Option<AnalysisConfig>> {
        Ok(self.configs.lock().unwrap().get(config_id).cloned())
    }
}

/// Mock execution log repository. Insertion order stands in for
/// creation order, so "newest first" reads reverse it.
pub struct MockExecutionLogRepository {
    logs: Arc<Mutex<Vec<ExecutionLog>>>,
}

impl MockExecutionLogRepository {
    pub fn new() -> Self {
        Self {
            logs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn all_logs(&self) -> Vec<ExecutionLog> {
        self.logs.lock().unwrap().clone()
    }

    pub fn logs_for_router(&self, router_id: &str) -> Vec<ExecutionLog> {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| log.router_id == router_id)
            .cloned()
            .collect()
    }

    pub fn insert(&self, log: ExecutionLog) {
        self.logs.lock().unwrap().push(log);
    }
}

impl Default for MockExecutionLogRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionLogRepository for MockExecutionLogRepository {
    async fn create(&self, log: &ExecutionLog) -> RouterResult<ExecutionLog> {
        self.logs.lock().unwrap().push(log.clone());
        Ok(log.clone())
    }

    async fn find_by_task_id(&self, task_id: &str) -> RouterResult<Option<ExecutionLog>> {
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .find(|log| log.task_id == task_id)
            .cloned())
    }

    async fn find_by_router_id(
        &self,
        router_id: &str,
        limit: i64,
        skip: i64,
    ) -> RouterResult<Vec<ExecutionLog>> {
        let logs = self.logs.lock().unwrap();
        let mut matched: Vec<ExecutionLog> = logs
            .iter()
            .filter(|log| log.router_id == router_id)
            .cloned()
            .collect();
        // Newest first, regardless of insertion order.
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched
            .into_iter()
            .skip(skip.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn update_status(
        &self,
        task_id: &str,
        status: ExecutionStatus,
        error_message: Option<&str>,
    ) -> RouterResult<bool> {
        let mut logs = self.logs.lock().unwrap();
        match logs.iter_mut().find(|log| log.task_id == task_id) {
            Some(log) => {
                log.apply_status(status, error_message.map(str::to_string), Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn assign_node(&self, task_id: &str, node_id: &str) -> RouterResult<bool> {
        let mut logs = self.logs.lock().unwrap();
        match logs.iter_mut().find(|log| log.task_id == task_id) {
            Some(log) => {
                log.node_id = Some(node_id.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_statistics(&self, router_id: &str) -> RouterResult<ExecutionStatistics> {
        let logs = self.logs.lock().unwrap();
        let projections: Vec<StatusProjection> = logs
            .iter()
            .filter(|log| log.router_id == router_id)
            .map(|log| StatusProjection {
                status: log.status.as_str().to_string(),
                created_at: log.created_at,
                started_at: log.started_at,
                completed_at: log.completed_at,
            })
            .collect();
        Ok(ExecutionStatistics::from_projections(projections))
    }
}

/// Mock node repository.
pub struct MockNodeRepository {
    nodes: Arc<Mutex<HashMap<String, NodeRecord>>>,
}

impl MockNodeRepository {
    pub fn new() -> Self {
        Self {
            nodes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Inserts a record as-is, useful for backdated heartbeats.
    pub fn insert(&self, record: NodeRecord) {
        self.nodes
            .lock()
            .unwrap()
            .insert(record.node_id.clone(), record);
    }

    pub fn get(&self, node_id: &str) -> Option<NodeRecord> {
        self.nodes.lock().unwrap().get(node_id).cloned()
    }
}

impl Default for MockNodeRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeRepository for MockNodeRepository {
    async fn register(&self, node_id: &str, info: &NodeInfo) -> RouterResult<NodeRecord> {
        let mut nodes = self.nodes.lock().unwrap();
        let now = Utc::now();
        let record = match nodes.get_mut(node_id) {
            Some(existing) => {
                // created_at survives re-registration
                existing.info = info.clone();
                existing.current_tasks = 0;
                existing.last_heartbeat = now;
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let record = NodeRecord {
                    node_id: node_id.to_string(),
                    info: info.clone(),
                    current_tasks: 0,
                    last_heartbeat: now,
                    created_at: now,
                    updated_at: now,
                };
                nodes.insert(node_id.to_string(), record.clone());
                record
            }
        };
        Ok(record)
    }

    async fn heartbeat(&self, node_id: &str, current_tasks: Option<i32>) -> RouterResult<bool> {
        let mut nodes = self.nodes.lock().unwrap();
        match nodes.get_mut(node_id) {
            Some(record) => {
                let now = Utc::now();
                record.last_heartbeat = now;
                record.updated_at = now;
                if let Some(count) = current_tasks {
                    record.current_tasks = count;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_by_id(&self, node_id: &str) -> RouterResult<Option<NodeRecord>> {
        Ok(self.nodes.lock().unwrap().get(node_id).cloned())
    }

    async fn find_all(&self) -> RouterResult<Vec<NodeRecord>> {
        let nodes = self.nodes.lock().unwrap();
        let mut all: Vec<NodeRecord> = nodes.values().cloned().collect();
        all.sort_by(|a, b| b.last_heartbeat.cmp(&a.last_heartbeat));
        Ok(all)
    }

    async fn unregister(&self, node_id: &str) -> RouterResult<bool> {
        Ok(self.nodes.lock().unwrap().remove(node_id).is_some())
    }

    async fn remove_stale(&self, older_than: DateTime<Utc>) -> RouterResult<u64> {
        let mut nodes = self.nodes.lock().unwrap();
        let before = nodes.len();
        nodes.retain(|_, record| record.last_heartbeat >= older_than);
        Ok((before - nodes.len()) as u64)
    }
}

#[derive(Default)]
struct QueueState {
    published: Vec<(String, TaskMessage)>,
    queue: VecDeque<TaskDelivery>,
    unacked: HashMap<u64, TaskMessage>,
    dead_lettered: Vec<TaskMessage>,
    next_delivery_tag: u64,
    fail_all_publishes: bool,
    fail_methods: HashSet<String>,
}

/// Task queue test double: records every publish, supports scripted
/// publish failures, and implements the fetch/ack/nack consumer side.
pub struct MockTaskQueue {
    state: Arc<Mutex<QueueState>>,
}

impl MockTaskQueue {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
        }
    }

    /// Every subsequent publish fails.
    pub fn set_fail_all_publishes(&self, fail: bool) {
        self.state.lock().unwrap().fail_all_publishes = fail;
    }

    /// Publishes for this analysis method fail; other methods succeed.
    pub fn fail_method(&self, analysis_method_id: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_methods
            .insert(analysis_method_id.to_string());
    }

    pub fn published_tasks(&self) -> Vec<(String, TaskMessage)> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn published_count(&self) -> usize {
        self.state.lock().unwrap().published.len()
    }

    pub fn dead_lettered(&self) -> Vec<TaskMessage> {
        self.state.lock().unwrap().dead_lettered.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }
}

impl Default for MockTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for MockTaskQueue {
    async fn publish_task(&self, routing_key: &str, task: &TaskMessage) -> RouterResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_all_publishes || state.fail_methods.contains(&task.analysis_method_id) {
            return Err(RouterError::MessageQueue(
                "publish rejected by test double".to_string(),
            ));
        }
        state.published.push((routing_key.to_string(), task.clone()));
        state.next_delivery_tag += 1;
        let delivery = TaskDelivery {
            delivery_tag: state.next_delivery_tag,
            task: task.clone(),
        };
        state.queue.push_back(delivery);
        Ok(())
    }

    async fn fetch_task(&self) -> RouterResult<Option<TaskDelivery>> {
        let mut state = self.state.lock().unwrap();
        match state.queue.pop_front() {
            Some(delivery) => {
                state
                    .unacked
                    .insert(delivery.delivery_tag, delivery.task.clone());
                Ok(Some(delivery))
            }
            None => Ok(None),
        }
    }

    async fn ack(&self, delivery_tag: u64) -> RouterResult<()> {
        self.state.lock().unwrap().unacked.remove(&delivery_tag);
        Ok(())
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> RouterResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(task) = state.unacked.remove(&delivery_tag) {
            if requeue {
                // Requeued messages land at the head, like broker redelivery.
                state.next_delivery_tag += 1;
                let delivery = TaskDelivery {
                    delivery_tag: state.next_delivery_tag,
                    task,
                };
                state.queue.push_front(delivery);
            } else {
                state.dead_lettered.push(task);
            }
        }
        Ok(())
    }

    async fn queue_depth(&self) -> RouterResult<u32> {
        Ok(self.state.lock().unwrap().queue.len() as u32)
    }
}
