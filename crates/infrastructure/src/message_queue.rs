//! RabbitMQ 任务队列
//!
//! 发布走 topic exchange 并开启发布确认；消费为拉取模型
//! （`basic_get`），每次取一条，配合执行日志的状态回写实现
//! 至少一次投递。连接中断后按指数退避重建连接，退避期间的
//! 操作直接报错，由调用方（派发器置失败行、消费者下轮重试）
//! 兜底。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use lapin::options::{
    BasicAckOptions, BasicGetOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use router_core::config::MessageQueueConfig;
use router_core::{RouterError, RouterResult};
use router_domain::entities::TaskMessage;
use router_domain::messaging::{TaskDelivery, TaskQueue};

/// RabbitMQ 实现的任务队列
pub struct RabbitMqTaskQueue {
    config: MessageQueueConfig,
    state: Mutex<BrokerState>,
}

struct BrokerState {
    connection: Connection,
    channel: Channel,
    /// 下次允许重连的时刻，`None` 表示连接健康
    not_before: Option<Instant>,
    backoff: Duration,
}

impl RabbitMqTaskQueue {
    /// 建立连接并声明交换机、队列与绑定
    pub async fn connect(config: &MessageQueueConfig) -> RouterResult<Self> {
        let (connection, channel) = Self::open(config).await?;
        info!(
            "RabbitMQ 已连接: exchange={} queue={} binding={}",
            config.exchange,
            config.task_queue,
            config.binding_key()
        );
        Ok(Self {
            config: config.clone(),
            state: Mutex::new(BrokerState {
                connection,
                channel,
                not_before: None,
                backoff: Duration::from_secs(config.retry_delay_seconds),
            }),
        })
    }

    /// 建连和拓扑声明。声明是幂等的，重连时重复执行无害
    async fn open(config: &MessageQueueConfig) -> RouterResult<(Connection, Channel)> {
        let connecting = Connection::connect(&config.url, ConnectionProperties::default());
        let connection = tokio::time::timeout(
            Duration::from_secs(config.connection_timeout_seconds),
            connecting,
        )
        .await
        .map_err(|_| RouterError::MessageQueue("连接RabbitMQ超时".to_string()))?
        .map_err(|e| RouterError::MessageQueue(format!("连接RabbitMQ失败: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| RouterError::MessageQueue(format!("创建通道失败: {e}")))?;

        // 发布确认：未确认的发布在派发器侧记为 failed
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| RouterError::MessageQueue(format!("开启发布确认失败: {e}")))?;

        channel
            .exchange_declare(
                &config.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| RouterError::MessageQueue(format!("声明交换机失败: {e}")))?;

        let mut queue_args = FieldTable::default();
        if let Some(ttl_seconds) = config.message_ttl_seconds {
            queue_args.insert(
                "x-message-ttl".into(),
                AMQPValue::LongLongInt((ttl_seconds * 1000) as i64),
            );
        }
        channel
            .queue_declare(
                &config.task_queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                queue_args,
            )
            .await
            .map_err(|e| RouterError::MessageQueue(format!("声明队列失败: {e}")))?;

        channel
            .queue_bind(
                &config.task_queue,
                &config.exchange,
                &config.binding_key(),
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| RouterError::MessageQueue(format!("绑定队列失败: {e}")))?;

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| RouterError::MessageQueue(format!("设置预取数量失败: {e}")))?;

        Ok((connection, channel))
    }

    /// 取可用通道；断连时按退避节奏重建
    async fn channel(&self) -> RouterResult<Channel> {
        let mut state = self.state.lock().await;
        if state.connection.status().connected() && state.channel.status().connected() {
            return Ok(state.channel.clone());
        }

        let now = Instant::now();
        if let Some(not_before) = state.not_before {
            if now < not_before {
                return Err(RouterError::MessageQueue(
                    "RabbitMQ 连接中断，重连退避中".to_string(),
                ));
            }
        }

        match Self::open(&self.config).await {
            Ok((connection, channel)) => {
                info!("RabbitMQ 重连成功");
                state.connection = connection;
                state.channel = channel.clone();
                state.not_before = None;
                state.backoff = Duration::from_secs(self.config.retry_delay_seconds);
                Ok(channel)
            }
            Err(e) => {
                let wait = state.backoff;
                state.not_before = Some(now + wait);
                state.backoff =
                    (wait * 2).min(Duration::from_secs(self.config.max_retry_delay_seconds));
                warn!("RabbitMQ 重连失败，{}秒后再试: {}", wait.as_secs(), e);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl TaskQueue for RabbitMqTaskQueue {
    async fn publish_task(&self, routing_key: &str, task: &TaskMessage) -> RouterResult<()> {
        let payload = serde_json::to_vec(task)
            .map_err(|e| RouterError::Serialization(format!("任务序列化失败: {e}")))?;

        let channel = self.channel().await?;
        let confirm = channel
            .basic_publish(
                &self.config.exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    // 持久化消息，broker 重启不丢
                    .with_delivery_mode(2)
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| RouterError::MessageQueue(format!("发布任务失败: {e}")))?
            .await
            .map_err(|e| RouterError::MessageQueue(format!("等待发布确认失败: {e}")))?;

        if confirm.is_nack() {
            return Err(RouterError::MessageQueue(format!(
                "任务发布未被确认: {}",
                task.task_id
            )));
        }

        debug!("任务已发布: {} -> {}", task.task_id, routing_key);
        Ok(())
    }

    async fn fetch_task(&self) -> RouterResult<Option<TaskDelivery>> {
        let channel = self.channel().await?;
        let message = channel
            .basic_get(&self.config.task_queue, BasicGetOptions::default())
            .await
            .map_err(|e| RouterError::MessageQueue(format!("拉取任务失败: {e}")))?;

        let Some(delivery) = message else {
            return Ok(None);
        };

        match serde_json::from_slice::<TaskMessage>(&delivery.data) {
            Ok(task) => Ok(Some(TaskDelivery {
                delivery_tag: delivery.delivery_tag,
                task,
            })),
            Err(e) => {
                // 无法解析的消息不重新入队，避免毒消息循环
                error!("任务消息格式错误，直接拒绝: {e}");
                channel
                    .basic_nack(
                        delivery.delivery_tag,
                        BasicNackOptions {
                            requeue: false,
                            ..Default::default()
                        },
                    )
                    .await
                    .map_err(|e| RouterError::MessageQueue(format!("拒绝消息失败: {e}")))?;
                Ok(None)
            }
        }
    }

    async fn ack(&self, delivery_tag: u64) -> RouterResult<()> {
        let channel = self.channel().await?;
        channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| RouterError::MessageQueue(format!("确认消息失败: {e}")))
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> RouterResult<()> {
        let channel = self.channel().await?;
        channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    requeue,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| RouterError::MessageQueue(format!("拒绝消息失败: {e}")))
    }

    async fn queue_depth(&self) -> RouterResult<u32> {
        let channel = self.channel().await?;
        let queue = channel
            .queue_declare(
                &self.config.task_queue,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| RouterError::MessageQueue(format!("查询队列深度失败: {e}")))?;
        Ok(queue.message_count())
    }
}
