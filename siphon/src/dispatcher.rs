//! # **siphon** 消息分发
//!
//! 代理线程经有界队列投递信封，故障经非阻塞队列上报，单个分发任务按
//! 关闭信号、故障、信封的优先级依次处理。

use crate::{
    Envelope,
    broker::{ErrorHandler, MessageHandler},
    codec::Decoder,
    errors::{Fault, IngestError},
    sink::Sink,
};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::{
    Notify,
    mpsc::{self, error::TrySendError},
};
use tracing::{debug, info, warn};

/// 一次性关闭信号
#[derive(Clone)]
pub(crate) struct Shutdown {
    notify: Arc<Notify>,
    fired: Arc<AtomicBool>,
}

impl Shutdown {
    pub(crate) fn new() -> Self {
        Self {
            notify: Arc::new(Notify::new()),
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 触发信号，仅首次调用生效
    pub(crate) fn fire(&self) -> bool {
        if self
            .fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            self.notify.notify_waiters();
            true
        } else {
            false
        }
    }
}

/// 代理回调所持有的投递端
#[derive(Clone)]
pub(crate) struct Handlers {
    pub message: MessageHandler,
    pub error: ErrorHandler,
}

/// 分发任务所持有的接收端
pub(crate) struct Dispatcher {
    messages: mpsc::Receiver<Envelope>,
    faults: mpsc::Receiver<Fault>,
}

/// 创建信封队列与故障队列
pub(crate) fn channel(buffer: usize, fault_buffer: usize) -> (Handlers, Dispatcher) {
    let (msg_tx, messages) = mpsc::channel::<Envelope>(buffer);
    let (fault_tx, faults) = mpsc::channel::<Fault>(fault_buffer);

    let message: MessageHandler = Arc::new(move |envelope| match msg_tx.try_send(envelope) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(envelope)) => Err(envelope),
        Err(TrySendError::Closed(envelope)) => {
            debug!(subject = %envelope.subject, "分发任务已退出，丢弃消息");
            Ok(())
        }
    });
    let error: ErrorHandler = Arc::new(move |fault| {
        if let Err(e) = fault_tx.try_send(fault) {
            debug!("故障队列不可用，丢弃故障：{}", e.into_inner());
        }
    });

    (Handlers { message, error }, Dispatcher { messages, faults })
}

impl Dispatcher {
    /// 分发循环，收到关闭信号后立即退出，不再处理队列中剩余的信封
    pub(crate) async fn run<D, S>(
        mut self,
        decoder: Arc<D>,
        sink: Arc<S>,
        shutdown: Shutdown,
        ready: Arc<Notify>,
    ) where
        D: Decoder,
        S: Sink,
    {
        let notified = shutdown.notify.notified();
        tokio::pin!(notified);
        ready.notify_one();
        info!("启动消息分发任务");
        loop {
            tokio::select! {
                biased;
                _ = &mut notified => {
                    info!("收到关闭信号，退出分发任务");
                    break;
                }
                Some(fault) = self.faults.recv() => {
                    warn!("{fault}");
                    sink.add_error(IngestError::Fault(fault));
                }
                data = self.messages.recv() => match data {
                    Some(envelope) => Self::process(&*decoder, &*sink, envelope),
                    None => {
                        info!("投递端均已关闭，退出分发任务");
                        break;
                    }
                }
            }
        }
        let remaining = self.messages.len();
        if remaining > 0 {
            debug!("丢弃 {remaining} 条未处理消息");
        }
    }

    fn process<D, S>(decoder: &D, sink: &S, envelope: Envelope)
    where
        D: Decoder,
        S: Sink,
    {
        match decoder.decode(&envelope.payload) {
            Ok(records) => {
                debug!(subject = %envelope.subject, "解码得到 {} 条记录", records.len());
                for record in records {
                    sink.add_record(record);
                }
            }
            Err(source) => {
                warn!(subject = %envelope.subject, group = %envelope.group, "解码失败：{source}");
                sink.add_error(IngestError::Decode {
                    subject: envelope.subject,
                    source,
                });
            }
        }
    }
}
