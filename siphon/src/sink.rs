//! # **siphon** 下游接收端

use crate::{Record, errors::IngestError};

/// 接收端特征
///
/// 运行期间只由分发任务单线程调用，调用缓慢会拖慢整个分发循环；
/// 停止时退订失败也经 `add_error` 上报。
pub trait Sink: Send + Sync + 'static {
    /// 接收一条记录
    fn add_record(&self, record: Record);

    /// 报告运行期错误
    fn add_error(&self, error: IngestError);
}
