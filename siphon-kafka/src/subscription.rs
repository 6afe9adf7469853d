//! # Kafka 订阅
//!
//! 每个订阅由一个投递任务拉取消息并交给投递回调，被拒收的消息进入积压缓冲，按固定间隔重试。

use crate::context::FaultContext;
use rdkafka::{
    ClientConfig, Message,
    consumer::{Consumer, StreamConsumer},
};
use siphon::{
    Envelope, PendingBuffer,
    broker::{MessageHandler, Subscription},
    errors::BrokerError,
};
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{
    sync::Notify,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info, instrument};

const RETRY_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_PENDING_MESSAGES: i64 = 65536;
const DEFAULT_PENDING_BYTES: i64 = 64 * 1024 * 1024;

pub(crate) struct SubState {
    pub subject: String,
    pub group: String,
    consumer: StreamConsumer<FaultContext>,
    pending: PendingBuffer,
    registered: AtomicBool,
    halted: AtomicBool,
    stop: Notify,
}

impl SubState {
    pub(crate) fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// 阻塞调用：确认订阅已登记且代理可达
    pub(crate) fn confirm(&self, timeout: Duration) -> Result<(), BrokerError> {
        let assigned = self
            .consumer
            .subscription()
            .map_err(|e| BrokerError::Flush(e.to_string()))?;
        if assigned.elements_for_topic(&self.subject).is_empty() {
            return Err(BrokerError::Flush(format!("主题 {} 未登记", self.subject)));
        }
        self.consumer
            .fetch_metadata(Some(&self.subject), timeout)
            .map_err(|e| BrokerError::Flush(e.to_string()))?;
        self.registered.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// 已退订或连接已关闭
    pub(crate) fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub(crate) fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
        self.stop.notify_one();
    }
}

/// Kafka 订阅
pub struct KafkaSubscription {
    state: Arc<SubState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl KafkaSubscription {
    pub(crate) async fn launch(
        config: ClientConfig,
        context: FaultContext,
        handler: MessageHandler,
    ) -> Result<Self, BrokerError> {
        let subject = context.subject.clone();
        let group = context.group.clone();
        let failed = |message: String| BrokerError::Subscribe {
            subject: subject.clone(),
            message,
        };
        let consumer: StreamConsumer<FaultContext> = config
            .create_with_context(context)
            .map_err(|e| failed(e.to_string()))?;
        consumer
            .subscribe(&[subject.as_str()])
            .map_err(|e| failed(e.to_string()))?;

        let state = Arc::new(SubState {
            subject: subject.clone(),
            group,
            consumer,
            pending: PendingBuffer::new(DEFAULT_PENDING_MESSAGES, DEFAULT_PENDING_BYTES),
            registered: AtomicBool::new(false),
            halted: AtomicBool::new(false),
            stop: Notify::new(),
        });
        let ready = Arc::new(Notify::new());
        let task = tokio::spawn(Self::consume(
            Arc::clone(&state),
            handler,
            Arc::clone(&ready),
        ));
        ready.notified().await;
        info!("开始接收主题 {subject} 的消息");
        Ok(Self {
            state,
            task: Mutex::new(Some(task)),
        })
    }

    pub(crate) fn state(&self) -> Arc<SubState> {
        Arc::clone(&self.state)
    }

    /// 积压缓冲
    pub fn pending(&self) -> &PendingBuffer {
        &self.state.pending
    }

    #[instrument(name = "deliver_messages", skip_all, fields(subject = %state.subject))]
    async fn consume(state: Arc<SubState>, handler: MessageHandler, ready: Arc<Notify>) {
        let stopped = state.stop.notified();
        tokio::pin!(stopped);
        ready.notify_one();
        let mut retry = interval(RETRY_INTERVAL);
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = &mut stopped => {
                    debug!("收到停止信号，退出投递任务");
                    break;
                }
                _ = retry.tick() => {
                    state.pending.drain(&handler);
                }
                data = state.consumer.recv() => match data {
                    Ok(msg) => {
                        let envelope = Envelope::new(
                            msg.topic(),
                            state.group.as_str(),
                            msg.payload().unwrap_or_default().to_vec(),
                        );
                        if let Err(e) = state.pending.deliver(envelope, &handler) {
                            state.consumer.context().raise(e);
                        }
                    }
                    Err(e) => state.consumer.context().raise(BrokerError::Transport(Box::new(e))),
                }
            }
        }
    }
}

impl Subscription for KafkaSubscription {
    fn subject(&self) -> &str {
        &self.state.subject
    }

    fn group(&self) -> &str {
        &self.state.group
    }

    fn set_pending_limits(&self, messages: i64, bytes: i64) -> Result<(), BrokerError> {
        if !self.state.is_registered() {
            return Err(BrokerError::NotRegistered(self.state.subject.clone()));
        }
        self.state.pending.set_limits(messages, bytes)
    }

    async fn unsubscribe(&self) -> Result<(), BrokerError> {
        self.state.halt();
        let task = self
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            task.await
                .map_err(|e| BrokerError::Unsubscribe(e.to_string()))?;
        }
        self.state.consumer.unsubscribe();
        let dropped = self.state.pending.clear();
        if dropped > 0 {
            debug!("退订 {} 时丢弃 {dropped} 条积压消息", self.state.subject);
        }
        Ok(())
    }
}
