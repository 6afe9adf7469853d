use serde::Deserialize;
use std::{collections::BTreeMap, fmt};
use time::OffsetDateTime;

/// 字段集合
pub type Fields = BTreeMap<String, FieldValue>;
/// 标签集合
pub type Tags = BTreeMap<String, String>;

/// 字段值
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// 布尔
    Boolean(bool),
    /// 有符号整数
    Integer(i64),
    /// 无符号整数
    Unsigned(u64),
    /// 浮点数
    Float(f64),
    /// 字符串
    String(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Boolean(v) => write!(f, "{v}"),
            FieldValue::Integer(v) => write!(f, "{v}i"),
            FieldValue::Unsigned(v) => write!(f, "{v}u"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::String(v) => write!(f, "{v:?}"),
        }
    }
}

/// 解码后的指标记录
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// 名称
    pub name: String,
    /// 字段
    pub fields: Fields,
    /// 标签
    pub tags: Tags,
    /// 时间戳
    pub timestamp: OffsetDateTime,
}

impl Record {
    /// 构造函数
    pub fn new(name: impl Into<String>, fields: Fields, tags: Tags, timestamp: OffsetDateTime) -> Self {
        Self {
            name: name.into(),
            fields,
            tags,
            timestamp,
        }
    }
}
