use super::Decoder;
use crate::{Fields, Record, Tags, errors::DecodeError};
use serde::Deserialize;
use time::OffsetDateTime;

#[derive(Deserialize)]
struct JsonRecord {
    name: String,
    fields: Fields,
    #[serde(default)]
    tags: Tags,
    timestamp: Option<i64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Payload {
    Many(Vec<JsonRecord>),
    One(JsonRecord),
}

/// JSON 解码器
///
/// 消息体为单个对象或对象数组，`timestamp` 为 Unix 纳秒。
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl Decoder for JsonDecoder {
    fn decode(&self, payload: &[u8]) -> Result<Vec<Record>, DecodeError> {
        let now = OffsetDateTime::now_utc();
        let items = match serde_json::from_slice::<Payload>(payload)? {
            Payload::Many(items) => items,
            Payload::One(item) => vec![item],
        };
        items
            .into_iter()
            .map(|item| {
                let timestamp = match item.timestamp {
                    Some(ns) => OffsetDateTime::from_unix_timestamp_nanos(ns as i128)
                        .map_err(|_| DecodeError::Timestamp(ns as i128))?,
                    None => now,
                };
                Ok(Record::new(item.name, item.fields, item.tags, timestamp))
            })
            .collect()
    }
}
