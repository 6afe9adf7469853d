//! # **siphon** 核心库
//!
//! 推送式订阅：连接消息代理，按消费组订阅主题，把收到的消息解码后交给下游。

#![warn(missing_docs)]

mod dispatcher;
mod pending;
mod record;

pub mod broker;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod errors;
pub mod sink;
pub mod tls;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use consumer::{Consumer, LifecycleState};
pub use pending::PendingBuffer;
pub use record::{FieldValue, Fields, Record, Tags};

/// 入站消息信封
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// 主题
    pub subject: String,
    /// 消费组，空串表示不分组
    pub group: String,
    /// 消息体
    pub payload: Vec<u8>,
}

impl Envelope {
    /// 构造函数
    pub fn new(subject: impl Into<String>, group: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            subject: subject.into(),
            group: group.into(),
            payload,
        }
    }
}
