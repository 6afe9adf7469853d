//! 从 Kafka 订阅 `telegraf` 主题，把解码后的记录写入日志，Ctrl-C 退出

use siphon::{
    Consumer, Record,
    codec::FormatDecoder,
    config::ConsumerConfig,
    errors::IngestError,
    sink::Sink,
};
use siphon_kafka::KafkaBroker;
use std::{path::PathBuf, sync::Arc};
use tracing::{error, info, warn};
use tracing_appender::non_blocking;
use tracing_subscriber::{EnvFilter, fmt};

struct TracingSink;

impl Sink for TracingSink {
    fn add_record(&self, record: Record) {
        let fields: Vec<String> = record
            .fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        info!(tags = ?record.tags, "{} {} {}", record.name, fields.join(","), record.timestamp);
    }

    fn add_error(&self, error: IngestError) {
        warn!("{error}");
    }
}

#[tokio::main]
async fn main() {
    let (non_blocking, _guard) = non_blocking(std::io::stdout());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_target(false)
        .init();

    let config = match ConsumerConfig::load(PathBuf::from(env!("CARGO_MANIFEST_DIR"))) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return;
        }
    };
    let decoder = FormatDecoder::from(config.data_format);
    let consumer = Consumer::new(KafkaBroker::default(), config, decoder);
    if let Err(e) = consumer.start(Arc::new(TracingSink)).await {
        error!("启动消费者失败：{e}");
        consumer.stop().await;
        return;
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("等待退出信号失败：{e}");
    }
    consumer.stop().await;
}
