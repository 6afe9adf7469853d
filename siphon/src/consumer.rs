//! # **siphon** 消费者生命周期
//!
//! `start` 与 `stop` 由同一把生命周期锁串行化；分发任务与代理回调只经队列通信，不持有该锁。

use crate::{
    broker::{Broker, ConnectOptions, Connection, Subscription},
    codec::Decoder,
    config::ConsumerConfig,
    dispatcher::{self, Dispatcher, Handlers, Shutdown},
    errors::{BrokerError, ConsumerError, IngestError},
    sink::Sink,
    tls,
};
use std::sync::{
    Arc,
    atomic::{AtomicU8, Ordering},
};
use tokio::{
    sync::{Mutex, Notify},
    task::JoinHandle,
};
use tracing::{Span, debug, error, field, info, instrument, warn};

/// 生命周期状态
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// 未启动，或启动失败
    Idle = 0,
    /// 运行中
    Running = 1,
    /// 正在停止
    Stopping = 2,
    /// 已停止
    Stopped = 3,
}

impl From<u8> for LifecycleState {
    fn from(value: u8) -> Self {
        match value {
            0 => LifecycleState::Idle,
            1 => LifecycleState::Running,
            2 => LifecycleState::Stopping,
            _ => LifecycleState::Stopped,
        }
    }
}

struct Inner<C: Connection, S> {
    sink: Option<Arc<S>>,
    conn: Option<C>,
    subs: Vec<C::Subscription>,
    handlers: Option<Handlers>,
    dispatcher: Option<Dispatcher>,
    shutdown: Option<Shutdown>,
    task: Option<JoinHandle<()>>,
}

/// 推送式消费者
pub struct Consumer<B, D, S>
where
    B: Broker,
    D: Decoder,
    S: Sink,
{
    broker: B,
    config: ConsumerConfig,
    decoder: Arc<D>,
    state: AtomicU8,
    inner: Mutex<Inner<B::Connection, S>>,
}

impl<B, D, S> Consumer<B, D, S>
where
    B: Broker,
    D: Decoder,
    S: Sink,
{
    /// 构造函数
    pub fn new(broker: B, config: ConsumerConfig, decoder: D) -> Self {
        Self {
            broker,
            config,
            decoder: Arc::new(decoder),
            state: AtomicU8::new(LifecycleState::Idle as u8),
            inner: Mutex::new(Inner {
                sink: None,
                conn: None,
                subs: Vec::new(),
                handlers: None,
                dispatcher: None,
                shutdown: None,
                task: None,
            }),
        }
    }

    /// 当前生命周期状态
    pub fn state(&self) -> LifecycleState {
        self.state.load(Ordering::SeqCst).into()
    }

    /// 配置
    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// 启动消费者，调用方须在结束时调用 [`Consumer::stop`] 清理
    ///
    /// 配置未通过验证时返回错误且不建立连接；安全传输配置无效时直接终止进程。任一主题的订阅、刷新或设置积压上限失败，
    /// 本次启动即返回错误；已建立的连接与订阅保留，重试时复用。
    #[instrument(name = "start_consumer", skip_all, fields(group = %self.config.queue_group))]
    pub async fn start(&self, sink: Arc<S>) -> Result<(), ConsumerError> {
        let mut inner = self.inner.lock().await;
        match self.state() {
            LifecycleState::Idle => {}
            LifecycleState::Running => return Err(ConsumerError::AlreadyRunning),
            LifecycleState::Stopping | LifecycleState::Stopped => {
                return Err(ConsumerError::Terminated);
            }
        }
        if let Err(e) = self.config.check("consumer") {
            error!("消费者配置无效：{e}");
            return Err(e.into());
        }
        inner.sink = Some(Arc::clone(&sink));

        let transport = if self.config.secure {
            match tls::build_transport(&self.config.tls_settings()) {
                Ok(t) => Some(t),
                Err(e) => {
                    error!("构建安全传输配置失败：{e}");
                    panic!("构建安全传输配置失败：{e}");
                }
            }
        } else {
            None
        };

        let reuse = inner.conn.as_ref().is_some_and(|c| !c.is_closed());
        if reuse {
            debug!("复用已打开的连接");
        } else {
            let opts = ConnectOptions {
                servers: self.config.servers.clone(),
                secure: self.config.secure,
                transport,
                reconnect_backoff: self.config.reconnect_backoff(),
            };
            let conn = self.broker.connect(&opts).await?;
            let (handlers, dispatcher) =
                dispatcher::channel(self.config.buffer, self.config.fault_buffer);
            conn.set_error_handler(Arc::clone(&handlers.error));
            inner.subs.clear();
            inner.conn = Some(conn);
            inner.handlers = Some(handlers);
            inner.dispatcher = Some(dispatcher);
        }

        self.subscribe(&mut inner).await?;

        let Some(dispatcher) = inner.dispatcher.take() else {
            return Err(BrokerError::Closed.into());
        };
        let url = inner
            .conn
            .as_ref()
            .map(|c| c.connected_url())
            .unwrap_or_default();
        let shutdown = Shutdown::new();
        let ready = Arc::new(Notify::new());
        let waiter = Arc::clone(&ready);
        let task = tokio::spawn(dispatcher.run(
            Arc::clone(&self.decoder),
            sink,
            shutdown.clone(),
            ready,
        ));
        waiter.notified().await;
        inner.shutdown = Some(shutdown);
        inner.task = Some(task);
        self.state
            .store(LifecycleState::Running as u8, Ordering::SeqCst);
        info!(
            "成功启动消费者服务，服务器：{url}，主题：{:?}，消费组：{}",
            self.config.subjects, self.config.queue_group
        );
        Ok(())
    }

    async fn subscribe(&self, inner: &mut Inner<B::Connection, S>) -> Result<(), ConsumerError> {
        let (Some(conn), Some(handlers)) = (inner.conn.as_ref(), inner.handlers.as_ref()) else {
            return Ok(());
        };
        let group = &self.config.queue_group;
        for subject in &self.config.subjects {
            if inner.subs.iter().any(|s| s.subject() == subject) {
                continue;
            }
            let sub = conn
                .subscribe(subject, group, Arc::clone(&handlers.message))
                .await?;
            if let Err(e) = self.register(conn, &sub).await {
                if let Err(u) = sub.unsubscribe().await {
                    warn!("撤销主题 {subject} 的订阅失败：{u}");
                }
                return Err(e.into());
            }
            debug!("成功订阅主题 {subject}");
            inner.subs.push(sub);
        }
        Ok(())
    }

    async fn register(
        &self,
        conn: &B::Connection,
        sub: &<B::Connection as Connection>::Subscription,
    ) -> Result<(), BrokerError> {
        // 代理确认订阅后才能设置积压上限
        conn.flush().await?;
        sub.set_pending_limits(
            self.config.pending_message_limit,
            self.config.pending_bytes_limit,
        )
    }

    /// 停止消费者
    ///
    /// 关闭信号触发后等待分发任务退出，队列中尚未处理的消息直接丢弃；
    /// 随后退订并关闭连接。重复调用不做任何事。
    #[instrument(name = "stop_consumer", skip_all, fields(state = tracing::field::Empty))]
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        let state = self.state();
        Span::current().record("state", field::debug(&state));
        if state == LifecycleState::Stopped {
            debug!("消费者已停止");
            return;
        }

        if let Some(shutdown) = inner.shutdown.take() {
            shutdown.fire();
        }
        self.state
            .store(LifecycleState::Stopping as u8, Ordering::SeqCst);
        if let Some(task) = inner.task.take() {
            if let Err(e) = task.await {
                error!("分发任务发生错误：{e}");
            }
        }
        self.clean(&mut inner).await;
        self.state
            .store(LifecycleState::Stopped as u8, Ordering::SeqCst);
        info!("消费者已停止");
    }

    async fn clean(&self, inner: &mut Inner<B::Connection, S>) {
        for sub in inner.subs.drain(..) {
            if let Err(source) = sub.unsubscribe().await {
                error!("退订主题 {} 失败：{source}", sub.subject());
                let err = IngestError::Unsubscribe {
                    subject: sub.subject().to_string(),
                    group: sub.group().to_string(),
                    source,
                };
                if let Some(sink) = inner.sink.as_ref() {
                    sink.add_error(err);
                }
            }
        }

        if let Some(conn) = inner.conn.take() {
            if !conn.is_closed() {
                conn.close().await;
            }
        }
        inner.handlers = None;
        inner.dispatcher = None;
    }

    /// 推送式消费，无需轮询采集
    pub fn gather(&self) -> Result<(), ConsumerError> {
        Ok(())
    }
}
