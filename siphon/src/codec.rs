//! # **siphon** 消息体解码
//!
//! 整条消息要么全部解码成功，要么整体失败。

mod json;
mod line;

pub use json::JsonDecoder;
pub use line::LineDecoder;

use crate::{Record, errors::DecodeError};
use enum_dispatch::enum_dispatch;
use serde::Deserialize;

/// 解码特征，同一实例会被分发任务反复调用
#[enum_dispatch]
pub trait Decoder: Send + Sync + 'static {
    /// 把消息体解码为零到多条记录
    fn decode(&self, payload: &[u8]) -> Result<Vec<Record>, DecodeError>;
}

/// 数据格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    /// 行协议
    #[default]
    Influx,
    /// JSON
    Json,
}

/// 按配置选定的解码器
#[enum_dispatch(Decoder)]
#[derive(Debug, Clone)]
pub enum FormatDecoder {
    /// 行协议解码器
    LineDecoder,
    /// JSON 解码器
    JsonDecoder,
}

impl From<DataFormat> for FormatDecoder {
    fn from(format: DataFormat) -> Self {
        match format {
            DataFormat::Influx => LineDecoder.into(),
            DataFormat::Json => JsonDecoder.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_decoder_by_format() {
        let decoder = FormatDecoder::from(DataFormat::Json);
        assert!(matches!(decoder, FormatDecoder::JsonDecoder(_)));

        let records = FormatDecoder::from(DataFormat::Influx)
            .decode(b"cpu value=1")
            .unwrap();
        assert_eq!(records.len(), 1);
    }
}
