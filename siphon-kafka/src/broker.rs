//! # Kafka 连接

use crate::{
    config::client_config,
    context::{FaultContext, HandlerSlot},
    subscription::{KafkaSubscription, SubState},
};
use rdkafka::consumer::{BaseConsumer, Consumer};
use siphon::{
    broker::{Broker, ConnectOptions, Connection, ErrorHandler, MessageHandler},
    errors::BrokerError,
};
use std::{
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tracing::{debug, info, instrument};

/// Kafka 消息代理
#[derive(Debug, Clone)]
pub struct KafkaBroker {
    timeout: Duration,
}

impl Default for KafkaBroker {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

impl KafkaBroker {
    /// 构造函数，`timeout` 为元数据请求的超时
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Broker for KafkaBroker {
    type Connection = KafkaConnection;

    #[instrument(name = "connect_kafka", skip_all, fields(servers = ?opts.servers))]
    async fn connect(&self, opts: &ConnectOptions) -> Result<KafkaConnection, BrokerError> {
        let config = client_config(opts, "");
        let timeout = self.timeout;
        let (url, server_id) = tokio::task::spawn_blocking(move || {
            let client: BaseConsumer = config
                .create()
                .map_err(|e| BrokerError::Connect(e.to_string()))?;
            let metadata = client
                .fetch_metadata(None, timeout)
                .map_err(|e| BrokerError::Connect(e.to_string()))?;
            Ok::<_, BrokerError>((
                metadata.orig_broker_name().to_string(),
                metadata.orig_broker_id().to_string(),
            ))
        })
        .await
        .map_err(|e| BrokerError::Connect(e.to_string()))??;
        info!("成功连接 Kafka，服务器：{url}，标识：{server_id}");
        Ok(KafkaConnection::new(opts.clone(), url, server_id, timeout))
    }
}

struct ConnInner {
    opts: ConnectOptions,
    url: String,
    server_id: String,
    timeout: Duration,
    handler: HandlerSlot,
    closed: AtomicBool,
    subs: Mutex<Vec<Arc<SubState>>>,
}

/// Kafka 连接
///
/// 每个订阅持有独立的消费者客户端，连接只负责共享参数、错误回调与确认订阅。
#[derive(Clone)]
pub struct KafkaConnection {
    inner: Arc<ConnInner>,
}

impl KafkaConnection {
    pub(crate) fn new(
        opts: ConnectOptions,
        url: String,
        server_id: String,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ConnInner {
                opts,
                url,
                server_id,
                timeout,
                handler: Arc::new(RwLock::new(None)),
                closed: AtomicBool::new(false),
                subs: Mutex::new(Vec::new()),
            }),
        }
    }

    /// 仍在接收的订阅，顺带移除已退订的
    pub(crate) fn subs(&self) -> Vec<Arc<SubState>> {
        let mut subs = self.inner.subs.lock().unwrap_or_else(|e| e.into_inner());
        subs.retain(|s| !s.is_halted());
        subs.clone()
    }
}

impl Connection for KafkaConnection {
    type Subscription = KafkaSubscription;

    #[instrument(name = "subscribe_topic", skip(self, handler))]
    async fn subscribe(
        &self,
        subject: &str,
        group: &str,
        handler: MessageHandler,
    ) -> Result<KafkaSubscription, BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        let context = FaultContext {
            url: self.inner.url.clone(),
            server_id: self.inner.server_id.clone(),
            subject: subject.to_string(),
            group: group.to_string(),
            handler: Arc::clone(&self.inner.handler),
        };
        let config = client_config(&self.inner.opts, group);
        let sub = KafkaSubscription::launch(config, context, handler).await?;
        self.inner
            .subs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(sub.state());
        Ok(sub)
    }

    async fn flush(&self) -> Result<(), BrokerError> {
        let timeout = self.inner.timeout;
        for state in self.subs().into_iter().filter(|s| !s.is_registered()) {
            let confirmed = Arc::clone(&state);
            tokio::task::spawn_blocking(move || confirmed.confirm(timeout))
                .await
                .map_err(|e| BrokerError::Flush(e.to_string()))??;
            debug!("代理已确认订阅 {}", state.subject);
        }
        Ok(())
    }

    fn set_error_handler(&self, handler: ErrorHandler) {
        *self
            .inner
            .handler
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }

    async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for state in self.subs() {
            state.halt();
        }
        self.inner
            .subs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        info!("已关闭与 {} 的连接", self.inner.url);
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn connected_url(&self) -> String {
        self.inner.url.clone()
    }

    fn server_id(&self) -> String {
        self.inner.server_id.clone()
    }
}
