use rdkafka::{
    client::ClientContext, consumer::ConsumerContext, error::KafkaError,
};
use siphon::{
    broker::ErrorHandler,
    errors::{BrokerError, Fault},
};
use std::sync::{Arc, RwLock};
use tracing::warn;

/// 连接共享的错误回调
pub(crate) type HandlerSlot = Arc<RwLock<Option<ErrorHandler>>>;

/// 把客户端内部错误转为故障交给错误回调
#[derive(Clone)]
pub(crate) struct FaultContext {
    pub url: String,
    pub server_id: String,
    pub subject: String,
    pub group: String,
    pub handler: HandlerSlot,
}

impl FaultContext {
    pub(crate) fn raise(&self, source: BrokerError) {
        let handler = self
            .handler
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match handler {
            Some(handler) => handler(Fault::new(
                &self.url,
                &self.server_id,
                &self.subject,
                &self.group,
                source,
            )),
            None => warn!(subject = %self.subject, "未安装错误回调，丢弃故障：{source}"),
        }
    }
}

impl ClientContext for FaultContext {
    fn error(&self, error: KafkaError, reason: &str) {
        warn!(subject = %self.subject, "客户端错误：{error}，{reason}");
        self.raise(BrokerError::Transport(Box::new(error)));
    }
}

impl ConsumerContext for FaultContext {}
