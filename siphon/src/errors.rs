//! # **siphon** 错误定义

use std::{error::Error as StdError, io, path::PathBuf};
use thiserror::Error;

/// 消息代理错误枚举
#[derive(Debug, Error)]
pub enum BrokerError {
    /// 连接失败
    #[error("连接消息代理失败：{0}")]
    Connect(String),
    /// 连接已关闭
    #[error("连接已关闭")]
    Closed,
    /// 订阅失败
    #[error("订阅主题 {subject} 失败：{message}")]
    Subscribe {
        /// 主题
        subject: String,
        /// 错误信息
        message: String,
    },
    /// 刷新失败
    #[error("刷新连接失败：{0}")]
    Flush(String),
    /// 订阅尚未经代理确认
    #[error("订阅 {0} 尚未经代理确认")]
    NotRegistered(String),
    /// 非法的积压上限
    #[error("非法的积压上限：消息数 {messages}，字节数 {bytes}")]
    InvalidLimits {
        /// 消息数上限
        messages: i64,
        /// 字节数上限
        bytes: i64,
    },
    /// 慢消费者，积压超限被丢弃
    #[error("慢消费者，积压消息 {pending_messages} 条、{pending_bytes} 字节，丢弃消息")]
    SlowConsumer {
        /// 积压消息数
        pending_messages: usize,
        /// 积压字节数
        pending_bytes: usize,
    },
    /// 退订失败
    #[error("退订失败：{0}")]
    Unsubscribe(String),
    /// 底层传输错误
    #[error("传输错误：{0}")]
    Transport(#[source] Box<dyn StdError + Send + Sync>),
}

/// 异步故障，附带连接与订阅上下文
#[derive(Debug, Error)]
#[error("{source} url:{url} id:{server_id} sub:{subject} queue:{group}")]
pub struct Fault {
    /// 已连接的服务器地址
    pub url: String,
    /// 服务器标识
    pub server_id: String,
    /// 主题，连接级故障为空
    pub subject: String,
    /// 消费组
    pub group: String,
    /// 底层错误
    #[source]
    pub source: BrokerError,
}

impl Fault {
    /// 构造函数
    pub fn new(
        url: impl Into<String>,
        server_id: impl Into<String>,
        subject: impl Into<String>,
        group: impl Into<String>,
        source: BrokerError,
    ) -> Self {
        Self {
            url: url.into(),
            server_id: server_id.into(),
            subject: subject.into(),
            group: group.into(),
            source,
        }
    }
}

/// 安全传输配置错误
#[derive(Debug, Error)]
pub enum TlsError {
    /// 缺少文件路径
    #[error("缺少'{0}'配置")]
    MissingPath(&'static str),
    /// 文件读取失败
    #[error("读取 {path} 失败")]
    Read {
        /// 文件路径
        path: PathBuf,
        /// 底层错误
        #[source]
        source: io::Error,
    },
    /// 证书不合法
    #[error("解析 {path} 证书失败：{message}")]
    Certificate {
        /// 文件路径
        path: PathBuf,
        /// 错误信息
        message: String,
    },
    /// 私钥不合法
    #[error("解析 {path} 私钥失败：{message}")]
    PrivateKey {
        /// 文件路径
        path: PathBuf,
        /// 错误信息
        message: String,
    },
}

/// 解码错误
#[derive(Debug, Error)]
pub enum DecodeError {
    /// JSON 格式错误
    #[error("JSON 解码错误：{0}")]
    Json(#[from] serde_json::Error),
    /// 非 UTF-8 数据
    #[error("消息体不是合法的 UTF-8：{0}")]
    Utf8(#[from] std::str::Utf8Error),
    /// 时间戳越界
    #[error("时间戳 {0} 越界")]
    Timestamp(i128),
    /// 行协议格式错误
    #[error("第 {line} 行：{message}")]
    Line {
        /// 行号，从 1 开始
        line: usize,
        /// 错误信息
        message: String,
    },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 加载失败
    #[error("加载配置失败：{0}")]
    Load(#[from] config::ConfigError),
    /// 验证失败
    #[error("配置'{section}'验证失败：{message}")]
    Validation {
        /// 配置节
        section: String,
        /// 错误信息
        message: String,
    },
}

/// 启动阶段错误
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// 消息代理错误
    #[error(transparent)]
    Broker(#[from] BrokerError),
    /// 配置错误
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// 已在运行
    #[error("消费者已在运行")]
    AlreadyRunning,
    /// 已停止，不能重新启动
    #[error("消费者已停止，请创建新实例")]
    Terminated,
}

/// 运行期错误，交由下游报告
#[derive(Debug, Error)]
pub enum IngestError {
    /// 消息代理异步故障
    #[error("读取出错：{0}")]
    Fault(#[from] Fault),
    /// 消息解码失败
    #[error("主题：{subject}，错误：{source}")]
    Decode {
        /// 主题
        subject: String,
        /// 解码错误
        #[source]
        source: DecodeError,
    },
    /// 退订失败
    #[error("退订消费组 {group} 的主题 {subject} 出错：{source}")]
    Unsubscribe {
        /// 主题
        subject: String,
        /// 消费组
        group: String,
        /// 底层错误
        #[source]
        source: BrokerError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_carries_context() {
        let fault = Fault::new(
            "memory:4222",
            "memory",
            "telegraf",
            "telegraf_consumers",
            BrokerError::SlowConsumer {
                pending_messages: 3,
                pending_bytes: 12,
            },
        );

        assert_eq!(
            fault.to_string(),
            "慢消费者，积压消息 3 条、12 字节，丢弃消息 url:memory:4222 id:memory sub:telegraf queue:telegraf_consumers"
        );
        let source = fault.source().map(|e| e.to_string());
        assert_eq!(source.as_deref(), Some("慢消费者，积压消息 3 条、12 字节，丢弃消息"));

        let err = IngestError::from(fault);
        assert!(err.to_string().starts_with("读取出错：慢消费者"));
    }
}
