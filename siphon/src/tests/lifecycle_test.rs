use super::*;
use crate::errors::{ConsumerError, IngestError};
use std::path::PathBuf;

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_then_stop(_context: ()) {
    let broker = MemoryBroker::new();
    let consumer = consumer(&broker, config());
    let sink = Arc::new(MemorySink::new());
    assert_eq!(consumer.state(), LifecycleState::Idle);

    consumer.start(Arc::clone(&sink)).await.unwrap();
    assert_eq!(consumer.state(), LifecycleState::Running);
    assert!(consumer.gather().is_ok());

    consumer.stop().await;
    assert_eq!(consumer.state(), LifecycleState::Stopped);
    assert_eq!(
        broker.ops(),
        [
            Op::Connect,
            Op::SetErrorHandler,
            Op::Subscribe("telegraf".to_string()),
            Op::Flush,
            Op::SetPendingLimits("telegraf".to_string()),
            Op::Unsubscribe("telegraf".to_string()),
            Op::Close,
        ]
    );
    assert_eq!(connection(&broker).publish("telegraf", TWO_LINES), 0);
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_twice_is_safe(_context: ()) {
    let broker = MemoryBroker::new();
    let consumer = consumer(&broker, config());
    consumer.start(Arc::new(MemorySink::new())).await.unwrap();

    consumer.stop().await;
    let ops = broker.ops().len();
    consumer.stop().await;

    assert_eq!(consumer.state(), LifecycleState::Stopped);
    assert_eq!(broker.ops().len(), ops);
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_without_start(_context: ()) {
    let broker = MemoryBroker::new();
    let consumer = consumer(&broker, config());

    consumer.stop().await;

    assert_eq!(consumer.state(), LifecycleState::Stopped);
    assert!(broker.ops().is_empty());
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_twice_is_rejected(_context: ()) {
    let broker = MemoryBroker::new();
    let consumer = consumer(&broker, config());
    let sink = Arc::new(MemorySink::new());
    consumer.start(Arc::clone(&sink)).await.unwrap();

    let result = consumer.start(Arc::clone(&sink)).await;
    assert!(matches!(result, Err(ConsumerError::AlreadyRunning)));
    assert_eq!(broker.connects(), 1);

    consumer.stop().await;
    let result = consumer.start(sink).await;
    assert!(matches!(result, Err(ConsumerError::Terminated)));
    assert_eq!(broker.connects(), 1);
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connect_failure_leaves_idle(_context: ()) {
    let broker = MemoryBroker::new();
    let consumer = consumer(&broker, config());
    let sink = Arc::new(MemorySink::new());
    broker.fail_connect(true);

    let result = consumer.start(Arc::clone(&sink)).await;
    assert!(matches!(result, Err(ConsumerError::Broker(_))));
    assert_eq!(consumer.state(), LifecycleState::Idle);

    broker.fail_connect(false);
    consumer.start(sink).await.unwrap();
    assert_eq!(broker.connects(), 2);
    consumer.stop().await;
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reports_unsubscribe_failure(_context: ()) {
    let broker = MemoryBroker::new();
    let consumer = consumer(
        &broker,
        ConsumerConfig {
            subjects: vec!["a".to_string(), "b".to_string()],
            ..config()
        },
    );
    let sink = Arc::new(MemorySink::new());
    consumer.start(Arc::clone(&sink)).await.unwrap();
    broker.fail_unsubscribe("a");

    consumer.stop().await;

    assert!(sink.inspect_errors(|errors| {
        matches!(
            errors,
            [IngestError::Unsubscribe { subject, group, .. }]
                if subject == "a" && group == "telegraf_consumers"
        )
    }));
    let ops = broker.ops();
    assert!(ops.contains(&Op::Unsubscribe("b".to_string())));
    assert_eq!(ops.last(), Some(&Op::Close));
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[should_panic(expected = "构建安全传输配置失败")]
async fn secure_start_with_bad_files_panics(_context: ()) {
    let broker = MemoryBroker::new();
    let missing = PathBuf::from("/nonexistent/siphon");
    let consumer = consumer(
        &broker,
        ConsumerConfig {
            secure: true,
            ssl_ca: Some(missing.join("ca.pem")),
            ssl_cert: Some(missing.join("cert.pem")),
            ssl_key: Some(missing.join("key.pem")),
            ..config()
        },
    );

    let _ = consumer.start(Arc::new(MemorySink::new())).await;
}
