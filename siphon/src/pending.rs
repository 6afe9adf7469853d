//! # **siphon** 订阅积压缓冲

use crate::{Envelope, broker::MessageHandler, errors::BrokerError};
use std::{
    collections::VecDeque,
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicI64, AtomicU64, Ordering},
    },
};
use tracing::{debug, warn};

#[derive(Default)]
struct Backlog {
    queue: VecDeque<Envelope>,
    bytes: usize,
}

/// 单个订阅的积压缓冲
///
/// 投递回调拒收的信封按序保留，超过消息数或字节数上限时丢弃新到的信封。
pub struct PendingBuffer {
    backlog: Mutex<Backlog>,
    max_messages: AtomicI64,
    max_bytes: AtomicI64,
    dropped: AtomicU64,
}

impl PendingBuffer {
    /// 构造函数
    pub fn new(max_messages: i64, max_bytes: i64) -> Self {
        Self {
            backlog: Mutex::new(Backlog::default()),
            max_messages: AtomicI64::new(max_messages),
            max_bytes: AtomicI64::new(max_bytes),
            dropped: AtomicU64::new(0),
        }
    }

    /// 设置上限
    pub fn set_limits(&self, messages: i64, bytes: i64) -> Result<(), BrokerError> {
        if messages == 0 || bytes == 0 {
            return Err(BrokerError::InvalidLimits { messages, bytes });
        }
        self.max_messages.store(messages, Ordering::Release);
        self.max_bytes.store(bytes, Ordering::Release);
        debug!("积压上限设为 {messages} 条、{bytes} 字节");
        Ok(())
    }

    /// 当前上限
    pub fn limits(&self) -> (i64, i64) {
        (
            self.max_messages.load(Ordering::Acquire),
            self.max_bytes.load(Ordering::Acquire),
        )
    }

    /// 当前积压的消息数与字节数
    pub fn pending(&self) -> (usize, usize) {
        let backlog = self.lock();
        (backlog.queue.len(), backlog.bytes)
    }

    /// 累计丢弃的消息数
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// 投递信封
    ///
    /// 积压为空时直接交给回调；否则排在积压之后，保持先后顺序。
    pub fn deliver(&self, envelope: Envelope, handler: &MessageHandler) -> Result<(), BrokerError> {
        let mut backlog = self.lock();
        Self::replay(&mut backlog, handler);
        let envelope = if backlog.queue.is_empty() {
            match handler(envelope) {
                Ok(()) => return Ok(()),
                Err(envelope) => envelope,
            }
        } else {
            envelope
        };

        let size = envelope.payload.len();
        if self.exceeds(backlog.queue.len() + 1, backlog.bytes + size) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(subject = %envelope.subject, "积压超限，丢弃消息");
            return Err(BrokerError::SlowConsumer {
                pending_messages: backlog.queue.len(),
                pending_bytes: backlog.bytes,
            });
        }
        backlog.bytes += size;
        backlog.queue.push_back(envelope);
        Ok(())
    }

    /// 重试积压，返回本次交出的信封数
    pub fn drain(&self, handler: &MessageHandler) -> usize {
        let mut backlog = self.lock();
        Self::replay(&mut backlog, handler)
    }

    /// 清空积压
    pub fn clear(&self) -> usize {
        let mut backlog = self.lock();
        let count = backlog.queue.len();
        backlog.queue.clear();
        backlog.bytes = 0;
        count
    }

    fn replay(backlog: &mut Backlog, handler: &MessageHandler) -> usize {
        let mut count = 0;
        while let Some(envelope) = backlog.queue.pop_front() {
            let size = envelope.payload.len();
            match handler(envelope) {
                Ok(()) => {
                    backlog.bytes -= size;
                    count += 1;
                }
                Err(envelope) => {
                    backlog.queue.push_front(envelope);
                    break;
                }
            }
        }
        count
    }

    fn exceeds(&self, messages: usize, bytes: usize) -> bool {
        let (max_messages, max_bytes) = self.limits();
        (max_messages > 0 && messages as u64 > max_messages as u64)
            || (max_bytes > 0 && bytes as u64 > max_bytes as u64)
    }

    fn lock(&self) -> MutexGuard<'_, Backlog> {
        self.backlog.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn gated(open: Arc<Mutex<bool>>, seen: Arc<Mutex<Vec<Vec<u8>>>>) -> MessageHandler {
        Arc::new(move |envelope: Envelope| {
            if *open.lock().unwrap() {
                seen.lock().unwrap().push(envelope.payload);
                Ok(())
            } else {
                Err(envelope)
            }
        })
    }

    fn envelope(payload: &[u8]) -> Envelope {
        Envelope::new("telegraf", "", payload.to_vec())
    }

    #[test]
    fn delivers_directly_when_handler_accepts() {
        let open = Arc::new(Mutex::new(true));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = gated(open, Arc::clone(&seen));
        let buffer = PendingBuffer::new(10, 1024);

        buffer.deliver(envelope(b"a"), &handler).unwrap();

        assert_eq!(buffer.pending(), (0, 0));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn keeps_order_across_backlog() {
        let open = Arc::new(Mutex::new(false));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = gated(Arc::clone(&open), Arc::clone(&seen));
        let buffer = PendingBuffer::new(10, 1024);

        buffer.deliver(envelope(b"1"), &handler).unwrap();
        buffer.deliver(envelope(b"2"), &handler).unwrap();
        assert_eq!(buffer.pending(), (2, 2));

        *open.lock().unwrap() = true;
        buffer.deliver(envelope(b"3"), &handler).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]);
        assert_eq!(buffer.pending(), (0, 0));
    }

    #[test]
    fn drops_when_message_limit_reached() {
        let handler = gated(Arc::new(Mutex::new(false)), Arc::new(Mutex::new(Vec::new())));
        let buffer = PendingBuffer::new(2, -1);

        buffer.deliver(envelope(b"1"), &handler).unwrap();
        buffer.deliver(envelope(b"2"), &handler).unwrap();
        let result = buffer.deliver(envelope(b"3"), &handler);

        assert!(matches!(
            result,
            Err(BrokerError::SlowConsumer {
                pending_messages: 2,
                ..
            })
        ));
        assert_eq!(buffer.dropped(), 1);
        assert_eq!(buffer.pending(), (2, 2));
    }

    #[test]
    fn drops_when_byte_limit_reached() {
        let handler = gated(Arc::new(Mutex::new(false)), Arc::new(Mutex::new(Vec::new())));
        let buffer = PendingBuffer::new(-1, 4);

        buffer.deliver(envelope(b"abc"), &handler).unwrap();
        assert!(buffer.deliver(envelope(b"de"), &handler).is_err());
        buffer.deliver(envelope(b"d"), &handler).unwrap();

        assert_eq!(buffer.pending(), (2, 4));
    }

    #[test]
    fn drain_stops_at_first_refusal() {
        let open = Arc::new(Mutex::new(false));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = gated(Arc::clone(&open), Arc::clone(&seen));
        let buffer = PendingBuffer::new(10, 1024);
        buffer.deliver(envelope(b"1"), &handler).unwrap();

        assert_eq!(buffer.drain(&handler), 0);
        *open.lock().unwrap() = true;
        assert_eq!(buffer.drain(&handler), 1);
        assert_eq!(buffer.pending(), (0, 0));
    }

    #[test]
    fn rejects_zero_limits() {
        let buffer = PendingBuffer::new(10, 10);

        assert!(buffer.set_limits(0, 10).is_err());
        assert!(buffer.set_limits(10, 0).is_err());
        buffer.set_limits(-1, 100).unwrap();
        assert_eq!(buffer.limits(), (-1, 100));
    }
}
