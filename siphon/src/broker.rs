//! # **siphon** 消息代理能力
//!
//! 连接建立、断线重连与传输协议均由具体实现负责，核心只依赖以下特征。

use crate::{
    Envelope,
    errors::{BrokerError, Fault},
    tls::TransportConfig,
};
use std::{future::Future, sync::Arc, time::Duration};

/// 投递回调
///
/// 由代理的内部线程调用，不得阻塞。本地队列已满时返回 `Err`，
/// 交回的信封由代理侧的积压缓冲保留并稍后重试。
pub type MessageHandler = Arc<dyn Fn(Envelope) -> Result<(), Envelope> + Send + Sync>;

/// 错误回调，不得阻塞
pub type ErrorHandler = Arc<dyn Fn(Fault) + Send + Sync>;

/// 连接参数
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// 服务器地址列表
    pub servers: Vec<String>,
    /// 是否启用安全传输
    pub secure: bool,
    /// 安全传输配置
    pub transport: Option<TransportConfig>,
    /// 断线重连的最大退避间隔，重连次数不设上限
    pub reconnect_backoff: Duration,
}

/// 消息代理特征
pub trait Broker: Send + Sync + 'static {
    /// 连接类型
    type Connection: Connection;

    /// 建立连接
    fn connect(
        &self,
        opts: &ConnectOptions,
    ) -> impl Future<Output = Result<Self::Connection, BrokerError>> + Send;
}

/// 连接特征
pub trait Connection: Send + Sync + 'static {
    /// 订阅类型
    type Subscription: Subscription;

    /// 以消费组订阅主题，消费组为空时每个实例都收到全部消息
    fn subscribe(
        &self,
        subject: &str,
        group: &str,
        handler: MessageHandler,
    ) -> impl Future<Output = Result<Self::Subscription, BrokerError>> + Send;

    /// 等待代理确认此前的全部订阅
    fn flush(&self) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// 安装错误回调
    fn set_error_handler(&self, handler: ErrorHandler);

    /// 关闭连接，可重复调用
    fn close(&self) -> impl Future<Output = ()> + Send;

    /// 连接是否已关闭
    fn is_closed(&self) -> bool;

    /// 已连接的服务器地址
    fn connected_url(&self) -> String;

    /// 服务器标识
    fn server_id(&self) -> String;
}

/// 订阅特征
pub trait Subscription: Send + Sync + 'static {
    /// 主题
    fn subject(&self) -> &str;

    /// 消费组
    fn group(&self) -> &str;

    /// 设置积压上限，0 不合法，负数表示不限
    fn set_pending_limits(&self, messages: i64, bytes: i64) -> Result<(), BrokerError>;

    /// 退订
    fn unsubscribe(&self) -> impl Future<Output = Result<(), BrokerError>> + Send;
}
