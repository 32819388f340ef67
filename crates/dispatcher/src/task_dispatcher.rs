//! 任务派发器
//!
//! 派发流程（每个派发入口一次调用）：
//! 1. 解析规则，禁用/缺失直接报错；
//! 2. 原子占用记录（占用即幂等判定，检查+写入为单个条件更新）；
//! 3. 逐动作：解析配置（缺失/禁用静默跳过）、先写 pending 日志行、
//!    再发布；发布失败将该行置 failed 并继续后续动作；
//! 4. 全部动作都没发布成功时释放占用，让后续派发可从头重试。

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use router_core::{AppConfig, RouterError, RouterResult};
use router_domain::entities::{ExecutionLog, ExecutionStatus, TaskMessage};
use router_domain::messaging::TaskQueue;
use router_domain::repositories::{
    AnalysisConfigRepository, ClaimOutcome, ExecutionLogRepository, RecordingRepository,
    RuleRepository,
};
use router_domain::rule::compile_conditions;
use router_domain::services::{
    BackfillFailure, BackfillOutcome, BatchDispatchOutcome, DispatchFailure, DispatchOutcome,
    DispatchService, MatchPreview, RecordingPreview, RuleConditions,
};

/// 派发器运行参数
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub routing_key_prefix: String,
    /// 单次派发的动作处理时限，超时放弃剩余动作（已发布任务不回滚）
    pub dispatch_timeout: Duration,
    pub default_backfill_limit: u32,
    pub default_preview_limit: u32,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            routing_key_prefix: "analysis".to_string(),
            dispatch_timeout: Duration::from_secs(30),
            default_backfill_limit: 100,
            default_preview_limit: 100,
        }
    }
}

impl DispatcherSettings {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            routing_key_prefix: config.message_queue.routing_key_prefix.clone(),
            dispatch_timeout: Duration::from_secs(config.dispatcher.dispatch_timeout_seconds),
            default_backfill_limit: config.dispatcher.default_backfill_limit,
            default_preview_limit: config.dispatcher.default_preview_limit,
        }
    }
}

/// 任务派发器
pub struct TaskDispatcher {
    rule_repo: Arc<dyn RuleRepository>,
    recording_repo: Arc<dyn RecordingRepository>,
    config_repo: Arc<dyn AnalysisConfigRepository>,
    log_repo: Arc<dyn ExecutionLogRepository>,
    task_queue: Arc<dyn TaskQueue>,
    settings: DispatcherSettings,
}

impl TaskDispatcher {
    pub fn new(
        rule_repo: Arc<dyn RuleRepository>,
        recording_repo: Arc<dyn RecordingRepository>,
        config_repo: Arc<dyn AnalysisConfigRepository>,
        log_repo: Arc<dyn ExecutionLogRepository>,
        task_queue: Arc<dyn TaskQueue>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            rule_repo,
            recording_repo,
            config_repo,
            log_repo,
            task_queue,
            settings,
        }
    }

    /// 单条记录、单个派发入口的完整派发
    async fn dispatch_one(
        &self,
        analyze_uuid: &str,
        router_id: &str,
        sequence_order: Option<i32>,
    ) -> RouterResult<DispatchOutcome> {
        let deadline = Instant::now() + self.settings.dispatch_timeout;

        let rule = self
            .rule_repo
            .find_by_router_id(router_id)
            .await?
            .ok_or_else(|| RouterError::RuleNotFound {
                router_id: router_id.to_string(),
            })?;
        if !rule.enabled {
            return Err(RouterError::RuleDisabled {
                router_id: router_id.to_string(),
            });
        }

        // 占用即幂等判定：已处理过的记录在此返回，不产生任何任务
        match self.recording_repo.try_claim(analyze_uuid, router_id).await? {
            ClaimOutcome::NotFound => {
                return Err(RouterError::RecordingNotFound {
                    analyze_uuid: analyze_uuid.to_string(),
                })
            }
            ClaimOutcome::AlreadyAssigned => {
                debug!(analyze_uuid, router_id, "记录已处理过，跳过派发");
                return Ok(DispatchOutcome::already_processed(analyze_uuid, router_id));
            }
            ClaimOutcome::Claimed => {}
        }

        let mut outcome = DispatchOutcome {
            analyze_uuid: analyze_uuid.to_string(),
            router_id: router_id.to_string(),
            created_task_ids: vec![],
            already_processed: false,
            skipped_configs: 0,
            publish_failures: 0,
        };

        for action in &rule.actions {
            if Instant::now() >= deadline {
                warn!(router_id, "派发超时，放弃剩余动作");
                break;
            }

            let config = match self
                .config_repo
                .find_by_config_id(&action.config_id)
                .await?
            {
                Some(config) if config.enabled => config,
                Some(_) => {
                    warn!(
                        router_id,
                        config_id = %action.config_id,
                        "分析配置已禁用，跳过该动作"
                    );
                    outcome.skipped_configs += 1;
                    continue;
                }
                None => {
                    warn!(
                        router_id,
                        config_id = %action.config_id,
                        "分析配置不存在，跳过该动作"
                    );
                    outcome.skipped_configs += 1;
                    continue;
                }
            };

            let task = TaskMessage::for_action(
                analyze_uuid,
                &rule,
                action,
                &config,
                router_id,
                sequence_order,
            );

            // 发布前先落库，保证每条已发布任务都有日志行
            self.log_repo.create(&ExecutionLog::from_task(&task)).await?;

            let routing_key = task.routing_key(&self.settings.routing_key_prefix);
            match self.task_queue.publish_task(&routing_key, &task).await {
                Ok(()) => {
                    debug!(task_id = %task.task_id, %routing_key, "任务已发布");
                    outcome.created_task_ids.push(task.task_id.clone());
                }
                Err(err) => {
                    error!(task_id = %task.task_id, error = %err, "任务发布失败");
                    outcome.publish_failures += 1;
                    // 单个动作失败不影响其余动作
                    self.log_repo
                        .update_status(
                            &task.task_id,
                            ExecutionStatus::Failed,
                            Some(&format!("消息队列发布失败: {err}")),
                        )
                        .await?;
                }
            }
        }

        if outcome.created_task_ids.is_empty() {
            // 占用补偿：一个任务都没发出去，释放标记使后续派发可重试
            self.recording_repo
                .release_claim(analyze_uuid, router_id)
                .await?;
            warn!(analyze_uuid, router_id, "未能创建任何任务，已释放占用");
            return Err(RouterError::NoTasksCreated {
                router_id: router_id.to_string(),
            });
        }

        info!(
            analyze_uuid,
            router_id,
            created = outcome.created_task_ids.len(),
            skipped = outcome.skipped_configs,
            publish_failures = outcome.publish_failures,
            "派发完成"
        );
        Ok(outcome)
    }
}

#[async_trait]
impl DispatchService for TaskDispatcher {
    async fn dispatch_by_router_id(
        &self,
        analyze_uuid: &str,
        router_id: &str,
        sequence_order: Option<i32>,
    ) -> RouterResult<DispatchOutcome> {
        self.dispatch_one(analyze_uuid, router_id, sequence_order)
            .await
    }

    async fn dispatch_by_router_ids(
        &self,
        analyze_uuid: &str,
        router_ids: &[String],
        sequential: bool,
    ) -> RouterResult<BatchDispatchOutcome> {
        let mut batch = BatchDispatchOutcome {
            analyze_uuid: analyze_uuid.to_string(),
            created_task_ids: vec![],
            already_processed: vec![],
            errors: vec![],
            success: false,
        };

        for (index, router_id) in router_ids.iter().enumerate() {
            let sequence_order = if sequential {
                Some(index as i32 + 1)
            } else {
                None
            };
            match self
                .dispatch_one(analyze_uuid, router_id, sequence_order)
                .await
            {
                Ok(outcome) if outcome.already_processed => {
                    batch.already_processed.push(router_id.clone());
                }
                Ok(outcome) => batch.created_task_ids.extend(outcome.created_task_ids),
                Err(err) => {
                    // 单个入口失败不中断其余入口
                    batch.errors.push(DispatchFailure {
                        router_id: router_id.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        batch.success = batch.errors.is_empty();
        Ok(batch)
    }

    async fn backfill_by_router_id(
        &self,
        router_id: &str,
        limit: Option<u32>,
    ) -> RouterResult<BackfillOutcome> {
        let rule = self
            .rule_repo
            .find_by_router_id(router_id)
            .await?
            .ok_or_else(|| RouterError::RuleNotFound {
                router_id: router_id.to_string(),
            })?;
        if !rule.enabled {
            return Err(RouterError::RuleDisabled {
                router_id: router_id.to_string(),
            });
        }
        if !rule.backfill_enabled {
            return Err(RouterError::BackfillDisabled {
                router_id: router_id.to_string(),
            });
        }

        // 查询自动排除已处理记录，重复执行回填不会产生新任务
        let filter = rule.compile_query();
        let total = self.recording_repo.count_unassigned(&filter, router_id).await?;
        let limit = limit.unwrap_or(self.settings.default_backfill_limit);
        let recordings = self
            .recording_repo
            .find_unassigned(&filter, router_id, Some(limit))
            .await?;

        info!(
            router_id,
            total_matched = total,
            batch = recordings.len(),
            "开始回填历史记录"
        );

        let mut outcome = BackfillOutcome {
            router_id: router_id.to_string(),
            total_matched: total,
            dispatched: 0,
            tasks_created: 0,
            failures: vec![],
        };

        for recording in &recordings {
            match self
                .dispatch_one(&recording.analyze_uuid, router_id, None)
                .await
            {
                // 查询和派发之间被并发处理，按无事发生计
                Ok(dispatch) if dispatch.already_processed => {}
                Ok(dispatch) => {
                    outcome.dispatched += 1;
                    outcome.tasks_created += dispatch.created_task_ids.len() as u64;
                }
                Err(err) => outcome.failures.push(BackfillFailure {
                    analyze_uuid: recording.analyze_uuid.clone(),
                    error: err.to_string(),
                }),
            }
        }

        info!(
            router_id,
            dispatched = outcome.dispatched,
            tasks_created = outcome.tasks_created,
            failures = outcome.failures.len(),
            "回填完成"
        );
        Ok(outcome)
    }

    async fn preview_matching_records(
        &self,
        conditions: &RuleConditions,
        limit: Option<u32>,
    ) -> RouterResult<MatchPreview> {
        let filter = compile_conditions(conditions);
        let total = self.recording_repo.count_matching(&filter).await?;
        let limit = limit.unwrap_or(self.settings.default_preview_limit);
        let recordings = self
            .recording_repo
            .find_matching(&filter, Some(limit))
            .await?;

        let records: Vec<RecordingPreview> = recordings
            .into_iter()
            .map(|recording| RecordingPreview {
                analyze_uuid: recording.analyze_uuid,
                info_features: recording.info_features,
                assigned_router_ids: recording.assigned_router_ids,
            })
            .collect();
        let sample = records.iter().take(10).cloned().collect();

        Ok(MatchPreview {
            total,
            sample,
            records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use router_testing_utils::{
        analysis_config, MockAnalysisConfigRepository, MockExecutionLogRepository,
        MockRecordingRepository, MockRuleRepository, MockTaskQueue, RecordingBuilder, RuleBuilder,
    };
    use serde_json::json;

    struct Fixture {
        rule_repo: Arc<MockRuleRepository>,
        recording_repo: Arc<MockRecordingRepository>,
        config_repo: Arc<MockAnalysisConfigRepository>,
        log_repo: Arc<MockExecutionLogRepository>,
        task_queue: Arc<MockTaskQueue>,
        dispatcher: TaskDispatcher,
    }

    /// 默认夹具：规则R1两个动作（fft/rms），配置齐全且启用
    fn fixture_with_rule(rule: router_domain::RoutingRule) -> Fixture {
        let rule_repo = Arc::new(MockRuleRepository::with_rules(vec![rule]));
        let recording_repo = Arc::new(MockRecordingRepository::new());
        let config_repo = Arc::new(MockAnalysisConfigRepository::with_configs(vec![
            analysis_config("cfg-fft", "fft", true),
            analysis_config("cfg-rms", "rms", true),
        ]));
        let log_repo = Arc::new(MockExecutionLogRepository::new());
        let task_queue = Arc::new(MockTaskQueue::new());
        let dispatcher = TaskDispatcher::new(
            rule_repo.clone(),
            recording_repo.clone(),
            config_repo.clone(),
            log_repo.clone(),
            task_queue.clone(),
            DispatcherSettings::default(),
        );
        Fixture {
            rule_repo,
            recording_repo,
            config_repo,
            log_repo,
            task_queue,
            dispatcher,
        }
    }

    fn two_action_rule() -> router_domain::RoutingRule {
        RuleBuilder::new("R1")
            .actions(vec![("fft", "cfg-fft"), ("rms", "cfg-rms")])
            .build()
    }

    #[tokio::test]
    async fn test_dispatch_publishes_one_task_per_action() {
        let fx = fixture_with_rule(two_action_rule());
        fx.recording_repo
            .insert(RecordingBuilder::new("rec-1").build());

        let outcome = fx
            .dispatcher
            .dispatch_by_router_id("rec-1", "R1", None)
            .await
            .expect("派发失败");

        assert_eq!(outcome.created_task_ids.len(), 2);
        assert!(!outcome.already_processed);
        assert_eq!(fx.task_queue.published_count(), 2);

        // 每个任务一条 pending 日志行
        let logs = fx.log_repo.logs_for_router("R1");
        assert_eq!(logs.len(), 2);
        assert!(logs
            .iter()
            .all(|log| log.status == ExecutionStatus::Pending));
        assert!(logs.iter().all(|log| log.analyze_uuid == "rec-1"));

        // routing key 为 <前缀>.<分析方法>
        let keys: Vec<String> = fx
            .task_queue
            .published_tasks()
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert!(keys.contains(&"analysis.fft".to_string()));
        assert!(keys.contains(&"analysis.rms".to_string()));

        // 记录被标记为已处理
        let recording = fx.recording_repo.get("rec-1").expect("记录应存在");
        assert!(recording.is_assigned_to("R1"));
        assert!(recording.last_router_dispatch.is_some());
    }

    #[tokio::test]
    async fn test_second_dispatch_is_idempotent() {
        let fx = fixture_with_rule(two_action_rule());
        fx.recording_repo
            .insert(RecordingBuilder::new("rec-1").build());

        let first = fx
            .dispatcher
            .dispatch_by_router_id("rec-1", "R1", None)
            .await
            .expect("首次派发失败");
        assert_eq!(first.created_task_ids.len(), 2);

        let second = fx
            .dispatcher
            .dispatch_by_router_id("rec-1", "R1", None)
            .await
            .expect("重复派发不应报错");
        assert!(second.already_processed);
        assert!(second.created_task_ids.is_empty());

        // 队列与日志都不增长
        assert_eq!(fx.task_queue.published_count(), 2);
        assert_eq!(fx.log_repo.logs_for_router("R1").len(), 2);
    }

    #[tokio::test]
    async fn test_dispatch_errors_for_missing_or_disabled_rule() {
        let fx = fixture_with_rule(two_action_rule());
        fx.recording_repo
            .insert(RecordingBuilder::new("rec-1").build());

        let err = fx
            .dispatcher
            .dispatch_by_router_id("rec-1", "R-unknown", None)
            .await
            .expect_err("未知入口应报错");
        assert!(matches!(err, RouterError::RuleNotFound { .. }));

        let disabled = RuleBuilder::new("R2").enabled(false).build();
        fx.rule_repo.create(&disabled).await.expect("建规则失败");
        let err = fx
            .dispatcher
            .dispatch_by_router_id("rec-1", "R2", None)
            .await
            .expect_err("禁用规则应报错");
        assert!(matches!(err, RouterError::RuleDisabled { .. }));

        // 规则错误不应占用记录
        let recording = fx.recording_repo.get("rec-1").expect("记录应存在");
        assert!(recording.assigned_router_ids.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_errors_for_missing_recording() {
        let fx = fixture_with_rule(two_action_rule());
        let err = fx
            .dispatcher
            .dispatch_by_router_id("rec-none", "R1", None)
            .await
            .expect_err("记录缺失应报错");
        assert!(matches!(err, RouterError::RecordingNotFound { .. }));
    }

    #[tokio::test]
    async fn test_disabled_config_skips_action_without_log_row() {
        let fx = fixture_with_rule(two_action_rule());
        // rms 的配置禁用
        fx.config_repo.insert(analysis_config("cfg-rms", "rms", false));
        fx.recording_repo
            .insert(RecordingBuilder::new("rec-1").build());

        let outcome = fx
            .dispatcher
            .dispatch_by_router_id("rec-1", "R1", None)
            .await
            .expect("派发失败");

        // N个动作中1个配置禁用 => N-1 条日志
        assert_eq!(outcome.created_task_ids.len(), 1);
        assert_eq!(outcome.skipped_configs, 1);
        assert_eq!(fx.log_repo.logs_for_router("R1").len(), 1);
        assert_eq!(fx.task_queue.published_count(), 1);

        // 只要有任务发布成功记录就算已处理
        let recording = fx.recording_repo.get("rec-1").expect("记录应存在");
        assert!(recording.is_assigned_to("R1"));
    }

    #[tokio::test]
    async fn test_publish_failure_fails_that_row_and_continues() {
        let fx = fixture_with_rule(two_action_rule());
        fx.task_queue.fail_method("fft");
        fx.recording_repo
            .insert(RecordingBuilder::new("rec-1").build());

        let outcome = fx
            .dispatcher
            .dispatch_by_router_id("rec-1", "R1", None)
            .await
            .expect("部分失败不应使整体报错");

        assert_eq!(outcome.created_task_ids.len(), 1);
        assert_eq!(outcome.publish_failures, 1);

        // 两条日志都在：发布前写入；失败的那条转为 failed
        let logs = fx.log_repo.logs_for_router("R1");
        assert_eq!(logs.len(), 2);
        let failed: Vec<_> = logs
            .iter()
            .filter(|log| log.status == ExecutionStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].analysis_method_id, "fft");
        assert!(failed[0]
            .error_message
            .as_deref()
            .is_some_and(|msg| msg.contains("发布失败")));

        let recording = fx.recording_repo.get("rec-1").expect("记录应存在");
        assert!(recording.is_assigned_to("R1"));
    }

    #[tokio::test]
    async fn test_total_publish_failure_releases_claim_for_retry() {
        let fx = fixture_with_rule(two_action_rule());
        fx.task_queue.set_fail_all_publishes(true);
        fx.recording_repo
            .insert(RecordingBuilder::new("rec-1").build());

        let err = fx
            .dispatcher
            .dispatch_by_router_id("rec-1", "R1", None)
            .await
            .expect_err("全部发布失败应报错");
        assert!(matches!(err, RouterError::NoTasksCreated { .. }));

        // 占用被补偿释放，日志行保留为 failed
        let recording = fx.recording_repo.get("rec-1").expect("记录应存在");
        assert!(!recording.is_assigned_to("R1"));
        let logs = fx.log_repo.logs_for_router("R1");
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|log| log.status == ExecutionStatus::Failed));

        // 故障恢复后重试成功
        fx.task_queue.set_fail_all_publishes(false);
        let outcome = fx
            .dispatcher
            .dispatch_by_router_id("rec-1", "R1", None)
            .await
            .expect("恢复后重试应成功");
        assert_eq!(outcome.created_task_ids.len(), 2);
        assert!(fx
            .recording_repo
            .get("rec-1")
            .expect("记录应存在")
            .is_assigned_to("R1"));
    }

    #[tokio::test]
    async fn test_datastore_failure_aborts_dispatch() {
        let fx = fixture_with_rule(two_action_rule());
        fx.recording_repo
            .insert(RecordingBuilder::new("rec-1").build());
        fx.recording_repo.set_unavailable(true);

        let err = fx
            .dispatcher
            .dispatch_by_router_id("rec-1", "R1", None)
            .await
            .expect_err("数据存储不可用应硬失败");
        assert!(matches!(err, RouterError::DatastoreUnavailable(_)));
        assert_eq!(fx.task_queue.published_count(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_many_accumulates_per_router_errors() {
        let fx = fixture_with_rule(two_action_rule());
        fx.recording_repo
            .insert(RecordingBuilder::new("rec-1").build());

        let batch = fx
            .dispatcher
            .dispatch_by_router_ids(
                "rec-1",
                &["R1".to_string(), "R-unknown".to_string()],
                false,
            )
            .await
            .expect("批量派发不应整体失败");

        assert_eq!(batch.created_task_ids.len(), 2);
        assert_eq!(batch.errors.len(), 1);
        assert_eq!(batch.errors[0].router_id, "R-unknown");
        assert!(!batch.success);
    }

    #[tokio::test]
    async fn test_dispatch_many_sequential_sets_sequence_order() {
        let rule_a = RuleBuilder::new("R1")
            .actions(vec![("fft", "cfg-fft")])
            .build();
        let rule_b = RuleBuilder::new("R2")
            .actions(vec![("rms", "cfg-rms")])
            .build();
        let fx = fixture_with_rule(rule_a);
        fx.rule_repo.create(&rule_b).await.expect("建规则失败");
        fx.recording_repo
            .insert(RecordingBuilder::new("rec-1").build());

        let batch = fx
            .dispatcher
            .dispatch_by_router_ids("rec-1", &["R1".to_string(), "R2".to_string()], true)
            .await
            .expect("批量派发失败");

        assert_eq!(batch.created_task_ids.len(), 2);
        assert!(batch.success);

        let published = fx.task_queue.published_tasks();
        let orders: Vec<Option<i32>> = published
            .iter()
            .map(|(_, task)| task.metadata.sequence_order)
            .collect();
        assert_eq!(orders, vec![Some(1), Some(2)]);
    }

    #[tokio::test]
    async fn test_dispatch_many_all_already_processed_is_success() {
        let fx = fixture_with_rule(two_action_rule());
        fx.recording_repo
            .insert(RecordingBuilder::new("rec-1").assigned_to("R1").build());

        let batch = fx
            .dispatcher
            .dispatch_by_router_ids("rec-1", &["R1".to_string()], false)
            .await
            .expect("批量派发失败");

        assert!(batch.created_task_ids.is_empty());
        assert_eq!(batch.already_processed, vec!["R1".to_string()]);
        assert!(batch.success);
    }

    #[tokio::test]
    async fn test_backfill_then_rerun_creates_no_new_tasks() {
        let rule = RuleBuilder::new("R1")
            .condition("device_type", json!("vibration"))
            .actions(vec![("fft", "cfg-fft")])
            .build();
        let fx = fixture_with_rule(rule);

        // 三条匹配（其中一条已处理），一条不匹配
        for (uuid, assigned) in [("rec-1", false), ("rec-2", false), ("rec-3", true)] {
            let mut builder = RecordingBuilder::new(uuid).feature("device_type", json!("vibration"));
            if assigned {
                builder = builder.assigned_to("R1");
            }
            fx.recording_repo.insert(builder.build());
        }
        fx.recording_repo.insert(
            RecordingBuilder::new("rec-4")
                .feature("device_type", json!("acoustic"))
                .build(),
        );

        let first = fx
            .dispatcher
            .backfill_by_router_id("R1", None)
            .await
            .expect("回填失败");
        assert_eq!(first.total_matched, 2);
        assert_eq!(first.dispatched, 2);
        assert_eq!(first.tasks_created, 2);
        assert!(first.failures.is_empty());

        // 重复执行不再产生任务
        let second = fx
            .dispatcher
            .backfill_by_router_id("R1", None)
            .await
            .expect("重复回填失败");
        assert_eq!(second.total_matched, 0);
        assert_eq!(second.dispatched, 0);
        assert_eq!(second.tasks_created, 0);
        assert_eq!(fx.task_queue.published_count(), 2);
    }

    #[tokio::test]
    async fn test_backfill_respects_limit() {
        let rule = RuleBuilder::new("R1")
            .actions(vec![("fft", "cfg-fft")])
            .build();
        let fx = fixture_with_rule(rule);
        for i in 0..5 {
            fx.recording_repo
                .insert(RecordingBuilder::new(&format!("rec-{i}")).build());
        }

        let outcome = fx
            .dispatcher
            .backfill_by_router_id("R1", Some(2))
            .await
            .expect("回填失败");
        // total 统计全部未处理记录，本批只派发 limit 条
        assert_eq!(outcome.total_matched, 5);
        assert_eq!(outcome.dispatched, 2);
        assert_eq!(fx.task_queue.published_count(), 2);
    }

    #[tokio::test]
    async fn test_backfill_refuses_when_disabled_on_rule() {
        let rule = RuleBuilder::new("R1").backfill_enabled(false).build();
        let fx = fixture_with_rule(rule);

        let err = fx
            .dispatcher
            .backfill_by_router_id("R1", None)
            .await
            .expect_err("规则未启用回填应报错");
        assert!(matches!(err, RouterError::BackfillDisabled { .. }));
    }

    #[tokio::test]
    async fn test_preview_is_pure_read() {
        let fx = fixture_with_rule(two_action_rule());
        for i in 0..15 {
            fx.recording_repo.insert(
                RecordingBuilder::new(&format!("rec-{i:02}"))
                    .feature("duration", json!(30))
                    .created_seconds_ago(100 - i)
                    .build(),
            );
        }
        fx.recording_repo.insert(
            RecordingBuilder::new("rec-short")
                .feature("duration", json!(1))
                .build(),
        );

        let conditions: RuleConditions =
            serde_json::from_value(json!({"duration": {"$gte": 5, "$lte": 60}}))
                .expect("条件反序列化失败");

        let preview = fx
            .dispatcher
            .preview_matching_records(&conditions, Some(12))
            .await
            .expect("预览失败");

        assert_eq!(preview.total, 15);
        assert_eq!(preview.records.len(), 12);
        // 速览样本最多10条
        assert_eq!(preview.sample.len(), 10);
        assert!(preview
            .records
            .iter()
            .all(|record| record.info_features["duration"] == json!(30)));

        // 纯读取：不发布、不写日志、不占用
        assert_eq!(fx.task_queue.published_count(), 0);
        assert!(fx.log_repo.all_logs().is_empty());
        assert!(fx
            .recording_repo
            .get("rec-00")
            .expect("记录应存在")
            .assigned_router_ids
            .is_empty());
    }

    #[tokio::test]
    async fn test_rule_without_usable_actions_releases_claim() {
        // 两个动作的配置都不存在
        let rule = RuleBuilder::new("R1")
            .actions(vec![("fft", "cfg-missing-a"), ("rms", "cfg-missing-b")])
            .build();
        let fx = fixture_with_rule(rule);
        fx.recording_repo
            .insert(RecordingBuilder::new("rec-1").build());

        let err = fx
            .dispatcher
            .dispatch_by_router_id("rec-1", "R1", None)
            .await
            .expect_err("无可用动作应报错");
        assert!(matches!(err, RouterError::NoTasksCreated { .. }));

        // 静默跳过的动作不产生日志行，占用被释放
        assert!(fx.log_repo.all_logs().is_empty());
        assert!(fx
            .recording_repo
            .get("rec-1")
            .expect("记录应存在")
            .assigned_router_ids
            .is_empty());
    }
}
