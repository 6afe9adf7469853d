use crate::{
    Envelope, PendingBuffer,
    broker::{Broker, ConnectOptions, Connection, ErrorHandler, MessageHandler, Subscription},
    errors::{BrokerError, Fault},
};
use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex, MutexGuard, RwLock,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

const SERVER_ID: &str = "memory";

/// 代理操作记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// 建立连接
    Connect,
    /// 安装错误回调
    SetErrorHandler,
    /// 订阅主题
    Subscribe(String),
    /// 刷新
    Flush,
    /// 设置积压上限
    SetPendingLimits(String),
    /// 退订主题
    Unsubscribe(String),
    /// 关闭连接
    Close,
}

#[derive(Default)]
struct Script {
    fail_connect: bool,
    fail_flush: bool,
    fail_subscribe: HashSet<String>,
    fail_unsubscribe: HashSet<String>,
}

#[derive(Default)]
struct Shared {
    connects: AtomicUsize,
    ops: Mutex<Vec<Op>>,
    script: Mutex<Script>,
    connections: Mutex<Vec<MemoryConnection>>,
}

impl Shared {
    fn record(&self, op: Op) {
        lock(&self.ops).push(op);
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        lock(&self.script)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// 内存消息代理
#[derive(Clone, Default)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    /// 构造函数
    pub fn new() -> Self {
        Self::default()
    }

    /// 累计连接尝试次数
    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// 操作记录
    pub fn ops(&self) -> Vec<Op> {
        lock(&self.shared.ops).clone()
    }

    /// 最近建立的连接
    pub fn connection(&self) -> Option<MemoryConnection> {
        lock(&self.shared.connections).last().cloned()
    }

    /// 连接失败
    pub fn fail_connect(&self, fail: bool) {
        self.shared.script().fail_connect = fail;
    }

    /// 刷新失败
    pub fn fail_flush(&self, fail: bool) {
        self.shared.script().fail_flush = fail;
    }

    /// 订阅指定主题失败
    pub fn fail_subscribe(&self, subject: &str, fail: bool) {
        let mut script = self.shared.script();
        match fail {
            true => script.fail_subscribe.insert(subject.to_string()),
            false => script.fail_subscribe.remove(subject),
        };
    }

    /// 退订指定主题失败
    pub fn fail_unsubscribe(&self, subject: &str) {
        self.shared
            .script()
            .fail_unsubscribe
            .insert(subject.to_string());
    }
}

impl Broker for MemoryBroker {
    type Connection = MemoryConnection;

    async fn connect(&self, opts: &ConnectOptions) -> Result<MemoryConnection, BrokerError> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        self.shared.record(Op::Connect);
        if self.shared.script().fail_connect {
            return Err(BrokerError::Connect("连接被拒绝".to_string()));
        }
        let conn = MemoryConnection {
            inner: Arc::new(ConnInner {
                shared: Arc::clone(&self.shared),
                opts: opts.clone(),
                closed: AtomicBool::new(false),
                handler: RwLock::new(None),
                subs: Mutex::new(Vec::new()),
            }),
        };
        lock(&self.shared.connections).push(conn.clone());
        Ok(conn)
    }
}

struct ConnInner {
    shared: Arc<Shared>,
    opts: ConnectOptions,
    closed: AtomicBool,
    handler: RwLock<Option<ErrorHandler>>,
    subs: Mutex<Vec<Arc<SubInner>>>,
}

/// 内存连接
#[derive(Clone)]
pub struct MemoryConnection {
    inner: Arc<ConnInner>,
}

impl MemoryConnection {
    /// 连接参数
    pub fn options(&self) -> ConnectOptions {
        self.inner.opts.clone()
    }

    /// 向主题发布消息，在调用线程上同步投递，返回收到消息的订阅数
    pub fn publish(&self, subject: &str, payload: &[u8]) -> usize {
        let subs: Vec<_> = lock(&self.inner.subs)
            .iter()
            .filter(|s| s.subject == subject && s.active.load(Ordering::SeqCst))
            .cloned()
            .collect();
        for sub in &subs {
            let envelope = Envelope::new(subject, sub.group.clone(), payload.to_vec());
            if let Err(e) = sub.pending.deliver(envelope, &sub.handler) {
                self.raise(subject, &sub.group, e);
            }
        }
        subs.len()
    }

    /// 仍在接收的订阅数
    pub fn live(&self) -> usize {
        lock(&self.inner.subs)
            .iter()
            .filter(|s| s.active.load(Ordering::SeqCst))
            .count()
    }

    /// 重试所有订阅的积压
    pub fn drain(&self) -> usize {
        lock(&self.inner.subs)
            .iter()
            .map(|s| s.pending.drain(&s.handler))
            .sum()
    }

    /// 触发异步故障
    pub fn raise(&self, subject: &str, group: &str, error: BrokerError) {
        let handler = self
            .inner
            .handler
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(handler) = handler {
            handler(Fault::new(
                self.connected_url(),
                SERVER_ID,
                subject,
                group,
                error,
            ));
        }
    }
}

impl Connection for MemoryConnection {
    type Subscription = MemorySubscription;

    async fn subscribe(
        &self,
        subject: &str,
        group: &str,
        handler: MessageHandler,
    ) -> Result<MemorySubscription, BrokerError> {
        self.inner.shared.record(Op::Subscribe(subject.to_string()));
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        if self.inner.shared.script().fail_subscribe.contains(subject) {
            return Err(BrokerError::Subscribe {
                subject: subject.to_string(),
                message: "权限不足".to_string(),
            });
        }
        let sub = Arc::new(SubInner {
            shared: Arc::clone(&self.inner.shared),
            subject: subject.to_string(),
            group: group.to_string(),
            registered: AtomicBool::new(false),
            active: AtomicBool::new(true),
            pending: PendingBuffer::new(65536, 64 * 1024 * 1024),
            handler,
        });
        lock(&self.inner.subs).push(Arc::clone(&sub));
        Ok(MemorySubscription { inner: sub })
    }

    async fn flush(&self) -> Result<(), BrokerError> {
        self.inner.shared.record(Op::Flush);
        if self.inner.shared.script().fail_flush {
            return Err(BrokerError::Flush("超时".to_string()));
        }
        let mut subs = lock(&self.inner.subs);
        subs.retain(|s| s.active.load(Ordering::SeqCst));
        for sub in subs.iter() {
            sub.registered.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn set_error_handler(&self, handler: ErrorHandler) {
        self.inner.shared.record(Op::SetErrorHandler);
        *self
            .inner
            .handler
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }

    async fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.shared.record(Op::Close);
            for sub in lock(&self.inner.subs).iter() {
                sub.active.store(false, Ordering::SeqCst);
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn connected_url(&self) -> String {
        self.inner.opts.servers.first().cloned().unwrap_or_default()
    }

    fn server_id(&self) -> String {
        SERVER_ID.to_string()
    }
}

struct SubInner {
    shared: Arc<Shared>,
    subject: String,
    group: String,
    registered: AtomicBool,
    active: AtomicBool,
    pending: PendingBuffer,
    handler: MessageHandler,
}

/// 内存订阅
pub struct MemorySubscription {
    inner: Arc<SubInner>,
}

impl MemorySubscription {
    /// 积压缓冲
    pub fn pending(&self) -> &PendingBuffer {
        &self.inner.pending
    }
}

impl Subscription for MemorySubscription {
    fn subject(&self) -> &str {
        &self.inner.subject
    }

    fn group(&self) -> &str {
        &self.inner.group
    }

    fn set_pending_limits(&self, messages: i64, bytes: i64) -> Result<(), BrokerError> {
        if !self.inner.registered.load(Ordering::SeqCst) {
            return Err(BrokerError::NotRegistered(self.inner.subject.clone()));
        }
        self.inner.pending.set_limits(messages, bytes)?;
        self.inner
            .shared
            .record(Op::SetPendingLimits(self.inner.subject.clone()));
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<(), BrokerError> {
        let inner = &self.inner;
        inner.shared.record(Op::Unsubscribe(inner.subject.clone()));
        if inner.shared.script().fail_unsubscribe.contains(&inner.subject) {
            return Err(BrokerError::Unsubscribe("连接中断".to_string()));
        }
        inner.active.store(false, Ordering::SeqCst);
        inner.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn opts() -> ConnectOptions {
        ConnectOptions {
            servers: vec!["memory:4222".to_string()],
            secure: false,
            transport: None,
            reconnect_backoff: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn limits_before_flush_are_rejected() {
        let broker = MemoryBroker::new();
        let conn = broker.connect(&opts()).await.unwrap();
        let sub = conn
            .subscribe("telegraf", "", Arc::new(|_| Ok(())))
            .await
            .unwrap();

        let result = sub.set_pending_limits(10, 10);
        assert!(matches!(result, Err(BrokerError::NotRegistered(_))));

        conn.flush().await.unwrap();
        sub.set_pending_limits(10, 10).unwrap();
        assert_eq!(sub.pending().limits(), (10, 10));
    }

    #[tokio::test]
    async fn flush_drops_unsubscribed() {
        let broker = MemoryBroker::new();
        let conn = broker.connect(&opts()).await.unwrap();
        let stale = conn
            .subscribe("telegraf", "g", Arc::new(|_| Ok(())))
            .await
            .unwrap();
        stale.unsubscribe().await.unwrap();
        let fresh = conn
            .subscribe("telegraf", "g", Arc::new(|_| Ok(())))
            .await
            .unwrap();

        conn.flush().await.unwrap();

        assert_eq!(conn.live(), 1);
        assert_eq!(lock(&conn.inner.subs).len(), 1);
        assert!(matches!(
            stale.set_pending_limits(10, 10),
            Err(BrokerError::NotRegistered(_))
        ));
        fresh.set_pending_limits(10, 10).unwrap();
        assert_eq!(conn.publish("telegraf", b"x"), 1);
    }

    #[tokio::test]
    async fn closed_connection_stops_delivery() {
        let broker = MemoryBroker::new();
        let conn = broker.connect(&opts()).await.unwrap();
        let _sub = conn
            .subscribe("telegraf", "", Arc::new(|_| Ok(())))
            .await
            .unwrap();
        assert_eq!(conn.publish("telegraf", b"x"), 1);

        conn.close().await;
        conn.close().await;

        assert!(conn.is_closed());
        assert_eq!(conn.publish("telegraf", b"x"), 0);
        assert_eq!(
            broker.ops().iter().filter(|op| **op == Op::Close).count(),
            1
        );
    }
}
