//! # **siphon** 的 Kafka 实现
//!
//! 主题对应 Kafka topic，消费组对应 `group.id`；消费组为空时为每个订阅生成独立的组，
//! 每个实例都收到全部消息。

pub(crate) mod config;
pub(crate) mod context;

pub mod broker;
pub mod subscription;


pub use broker::{KafkaBroker, KafkaConnection};
pub use subscription::KafkaSubscription;
