use crate::{Record, errors::IngestError, sink::Sink};
use std::sync::Mutex;

/// 内存接收端
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<Record>>,
    errors: Mutex<Vec<IngestError>>,
}

impl MemorySink {
    /// 构造函数
    pub fn new() -> Self {
        Self::default()
    }

    /// 已接收的记录
    pub fn records(&self) -> Vec<Record> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// 已报告错误的文本
    pub fn errors(&self) -> Vec<String> {
        self.errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|e| e.to_string())
            .collect()
    }

    /// 依次检查已报告的错误
    pub fn inspect_errors<R>(&self, f: impl FnOnce(&[IngestError]) -> R) -> R {
        f(&self.errors.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl Sink for MemorySink {
    fn add_record(&self, record: Record) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }

    fn add_error(&self, error: IngestError) {
        self.errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(error);
    }
}
