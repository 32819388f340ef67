//! 单进程内存管线端到端测试
//!
//! HTTP派发 -> 内存队列 -> 工作节点消费 -> 执行日志完成，
//! 不依赖外部数据库与消息队列。

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::{json, Value};
use tower::ServiceExt;

use router_api::create_app;
use router_core::AppConfig;
use router_dispatcher::{DispatcherSettings, HeartbeatRegistry, TaskDispatcher};
use router_domain::entities::ExecutionStatus;
use router_domain::messaging::TaskQueue;
use router_domain::services::NodeRegistry;
use router_infrastructure::InMemoryTaskQueue;
use router_testing_utils::{
    analysis_config, MockAnalysisConfigRepository, MockExecutionLogRepository,
    MockNodeRepository, MockRecordingRepository, MockRuleRepository, RecordingBuilder,
    RuleBuilder,
};
use router_worker::{ExecutorRegistry, LoggingExecutor, WorkerService};

struct Pipeline {
    rule_repo: Arc<MockRuleRepository>,
    recording_repo: Arc<MockRecordingRepository>,
    config_repo: Arc<MockAnalysisConfigRepository>,
    log_repo: Arc<MockExecutionLogRepository>,
    node_repo: Arc<MockNodeRepository>,
    task_queue: Arc<InMemoryTaskQueue>,
}

impl Pipeline {
    fn new(rules: Vec<router_domain::rule::RoutingRule>) -> Self {
        Self {
            rule_repo: Arc::new(MockRuleRepository::with_rules(rules)),
            recording_repo: Arc::new(MockRecordingRepository::new()),
            config_repo: Arc::new(MockAnalysisConfigRepository::new()),
            log_repo: Arc::new(MockExecutionLogRepository::new()),
            node_repo: Arc::new(MockNodeRepository::new()),
            task_queue: Arc::new(InMemoryTaskQueue::new()),
        }
    }

    fn node_registry(&self) -> Arc<dyn NodeRegistry> {
        Arc::new(HeartbeatRegistry::new(
            self.node_repo.clone(),
            Duration::from_secs(90),
        ))
    }

    fn api(&self) -> axum::Router {
        let dispatcher = TaskDispatcher::new(
            self.rule_repo.clone(),
            self.recording_repo.clone(),
            self.config_repo.clone(),
            self.log_repo.clone(),
            self.task_queue.clone(),
            DispatcherSettings::default(),
        );
        create_app(
            Arc::new(dispatcher),
            self.node_registry(),
            self.rule_repo.clone(),
            self.log_repo.clone(),
        )
    }

    fn worker(&self) -> WorkerService {
        let mut config = AppConfig::default();
        config.worker.enabled = true;
        config.worker.node_id = "pipeline-node".to_string();
        config.worker.poll_interval_ms = 10;

        let mut executors = ExecutorRegistry::new();
        executors.register(Arc::new(LoggingExecutor::new("fft")));
        executors.register(Arc::new(LoggingExecutor::new("mfcc")));

        WorkerService::new(
            &config,
            self.node_registry(),
            self.log_repo.clone(),
            self.task_queue.clone(),
            Arc::new(executors),
        )
    }
}

async fn dispatch(app: &axum::Router, analyze_uuid: &str, router_id: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/api/dispatch")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"analyze_uuid": analyze_uuid, "router_ids": [router_id]}).to_string(),
        ))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_dispatch_to_completion_and_idempotent_redispatch() {
    let rule = RuleBuilder::new("acoustic-entry")
        .condition("sensor_type", json!("acoustic"))
        .actions(vec![("fft", "cfg-fft"), ("mfcc", "cfg-mfcc")])
        .build();
    let pipeline = Pipeline::new(vec![rule]);
    pipeline
        .config_repo
        .insert(analysis_config("cfg-fft", "fft", true));
    pipeline
        .config_repo
        .insert(analysis_config("cfg-mfcc", "mfcc", true));
    pipeline.recording_repo.insert(
        RecordingBuilder::new("rec-1")
            .feature("sensor_type", json!("acoustic"))
            .build(),
    );

    let app = pipeline.api();

    // 首次派发：每个动作一条任务
    let (status, body) = dispatch(&app, "rec-1", "acoustic-entry").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["created_task_ids"].as_array().unwrap().len(), 2);
    assert_eq!(pipeline.task_queue.queue_depth().await.unwrap(), 2);

    let claimed = pipeline.recording_repo.get("rec-1").unwrap();
    assert!(claimed
        .assigned_router_ids
        .contains(&"acoustic-entry".to_string()));

    // 工作节点消费两条任务直至完成
    let worker = pipeline.worker();
    worker.start().await.expect("启动工作节点失败");

    let mut completed = 0;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        completed = pipeline
            .log_repo
            .all_logs()
            .iter()
            .filter(|log| log.status == ExecutionStatus::Completed)
            .count();
        if completed == 2 {
            break;
        }
    }
    assert_eq!(completed, 2, "两条任务都应执行完成");
    assert_eq!(pipeline.task_queue.queue_depth().await.unwrap(), 0);
    assert_eq!(pipeline.task_queue.unacked_count().await, 0);

    // 工作节点在线可见
    assert!(pipeline.node_repo.get("pipeline-node").is_some());

    // 重复派发幂等：不产生新任务
    let (status, body) = dispatch(&app, "rec-1", "acoustic-entry").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["created_task_ids"].as_array().unwrap().len(), 0);
    assert_eq!(
        body["data"]["already_processed"],
        json!(["acoustic-entry"])
    );
    assert_eq!(pipeline.task_queue.queue_depth().await.unwrap(), 0);

    // 优雅停止后节点注销
    worker.stop().await.expect("停止工作节点失败");
    assert!(pipeline.node_repo.get("pipeline-node").is_none());
}

#[tokio::test]
async fn test_zero_publish_compensation_allows_retry() {
    let rule = RuleBuilder::new("acoustic-entry").build();
    let pipeline = Pipeline::new(vec![rule]);
    // 配置起初被禁用：唯一动作被跳过，零任务发布
    pipeline
        .config_repo
        .insert(analysis_config("cfg-fft", "fft", false));
    pipeline
        .recording_repo
        .insert(RecordingBuilder::new("rec-1").build());

    let app = pipeline.api();
    let (status, body) = dispatch(&app, "rec-1", "acoustic-entry").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["success"], false);
    assert_eq!(body["data"]["errors"].as_array().unwrap().len(), 1);
    assert_eq!(pipeline.task_queue.queue_depth().await.unwrap(), 0);

    // 占用补偿已生效：记录未被标记
    let recording = pipeline.recording_repo.get("rec-1").unwrap();
    assert!(recording.assigned_router_ids.is_empty());

    // 启用配置后重派成功
    pipeline
        .config_repo
        .insert(analysis_config("cfg-fft", "fft", true));
    let (status, body) = dispatch(&app, "rec-1", "acoustic-entry").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["success"], true);
    assert_eq!(body["data"]["created_task_ids"].as_array().unwrap().len(), 1);
}
