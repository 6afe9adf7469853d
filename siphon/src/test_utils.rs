//! ## 测试替身
//!
//! 内存实现的消息代理与接收端，记录调用顺序并支持注入故障。

mod broker;
mod sink;

pub use broker::{MemoryBroker, MemoryConnection, MemorySubscription, Op};
pub use sink::MemorySink;
