//! # **siphon** 配置

use crate::{codec::DataFormat, errors::ConfigError, tls::TlsSettings};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::{path::PathBuf, time::Duration};
use validator::{Validate, ValidationError};

/// 构建分层配置：`default`、`SIPHON_ENV` 指定的环境文件、`SIPHON__` 前缀的环境变量
pub fn build_config(crate_dir: PathBuf) -> Result<Config, ConfigError> {
    let config_root = std::env::var("SIPHON_CONFIG_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| crate_dir.join("config"));
    let env = std::env::var("SIPHON_ENV").unwrap_or_else(|_| "dev".to_string());
    let config = Config::builder()
        .add_source(File::from(config_root.join("default")).required(false))
        .add_source(File::from(config_root.join(env)).required(false))
        .add_source(
            Environment::with_prefix("SIPHON")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("consumer.servers")
                .with_list_parse_key("consumer.subjects")
                .try_parsing(true),
        )
        .build()?;
    Ok(config)
}

/// 消费者配置
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_secure"))]
pub struct ConsumerConfig {
    /// 服务器地址列表
    #[validate(length(min = 1))]
    pub servers: Vec<String>,
    /// 是否启用安全传输
    pub secure: bool,
    /// 订阅的主题
    #[validate(length(min = 1))]
    pub subjects: Vec<String>,
    /// 消费组，空串表示不分组
    pub queue_group: String,
    /// CA 证书路径
    pub ssl_ca: Option<PathBuf>,
    /// 客户端证书路径
    pub ssl_cert: Option<PathBuf>,
    /// 客户端私钥路径
    pub ssl_key: Option<PathBuf>,
    /// 是否校验服务器证书链与主机名
    pub verify_host: bool,
    /// 每个订阅的积压消息数上限，负数表示不限
    #[validate(custom(function = "validate_limit"))]
    pub pending_message_limit: i64,
    /// 每个订阅的积压字节数上限，负数表示不限
    #[validate(custom(function = "validate_limit"))]
    pub pending_bytes_limit: i64,
    /// 本地信封队列容量
    #[validate(range(min = 1))]
    pub buffer: usize,
    /// 本地故障队列容量
    #[validate(range(min = 1))]
    pub fault_buffer: usize,
    /// 断线重连的最大退避毫秒数
    pub reconnect_backoff_ms: u64,
    /// 消息体格式
    pub data_format: DataFormat,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            servers: vec!["localhost:9092".to_string()],
            secure: false,
            subjects: vec!["telegraf".to_string()],
            queue_group: "telegraf_consumers".to_string(),
            ssl_ca: None,
            ssl_cert: None,
            ssl_key: None,
            verify_host: true,
            pending_message_limit: 65536,
            pending_bytes_limit: 64 * 1024 * 1024,
            buffer: 1000,
            fault_buffer: 16,
            reconnect_backoff_ms: 10_000,
            data_format: DataFormat::Influx,
        }
    }
}

impl ConsumerConfig {
    /// 从 `crate_dir/config` 加载 `consumer` 配置节并验证
    pub fn load(crate_dir: PathBuf) -> Result<Self, ConfigError> {
        let config = build_config(crate_dir)?;
        Self::from_config(&config, "consumer")
    }

    /// 从已构建的配置中读取指定配置节，缺失时使用默认值
    pub fn from_config(config: &Config, section: &str) -> Result<Self, ConfigError> {
        let cfg = match config.get::<ConsumerConfig>(section) {
            Ok(c) => c,
            Err(config::ConfigError::NotFound(_)) => ConsumerConfig::default(),
            Err(e) => return Err(e.into()),
        };
        cfg.check(section)?;
        Ok(cfg)
    }

    /// 验证配置，`section` 仅用于错误信息
    pub fn check(&self, section: &str) -> Result<(), ConfigError> {
        self.validate().map_err(|e| ConfigError::Validation {
            section: section.to_string(),
            message: e.to_string(),
        })
    }

    /// 证书文件路径
    pub fn tls_settings(&self) -> TlsSettings {
        TlsSettings {
            ca: self.ssl_ca.clone(),
            cert: self.ssl_cert.clone(),
            key: self.ssl_key.clone(),
            verify_host: self.verify_host,
        }
    }

    /// 断线重连的最大退避间隔
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

fn validate_limit(limit: i64) -> Result<(), ValidationError> {
    if limit == 0 {
        return Err(ValidationError::new("zero_limit"));
    }
    Ok(())
}

fn validate_secure(cfg: &ConsumerConfig) -> Result<(), ValidationError> {
    if cfg.secure && (cfg.ssl_ca.is_none() || cfg.ssl_cert.is_none() || cfg.ssl_key.is_none()) {
        return Err(ValidationError::new("missing_tls_paths"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> Result<ConsumerConfig, ConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap();
        ConsumerConfig::from_config(&config, "consumer")
    }

    #[test]
    fn defaults_when_section_missing() {
        let cfg = from_toml("").unwrap();

        assert_eq!(cfg.subjects, ["telegraf"]);
        assert_eq!(cfg.queue_group, "telegraf_consumers");
        assert_eq!(cfg.pending_message_limit, 65536);
        assert_eq!(cfg.pending_bytes_limit, 67108864);
        assert_eq!(cfg.buffer, 1000);
        assert!(cfg.verify_host);
        assert!(!cfg.secure);
    }

    #[test]
    fn reads_section() {
        let cfg = from_toml(
            r#"
            [consumer]
            servers = ["k1:9092", "k2:9092"]
            subjects = ["a", "b"]
            queue_group = ""
            pending_message_limit = -1
            data_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.servers.len(), 2);
        assert_eq!(cfg.subjects, ["a", "b"]);
        assert!(cfg.queue_group.is_empty());
        assert_eq!(cfg.pending_message_limit, -1);
        assert_eq!(cfg.data_format, DataFormat::Json);
        assert_eq!(cfg.fault_buffer, 16);
    }

    #[test]
    fn rejects_zero_limit() {
        let result = from_toml("[consumer]\npending_bytes_limit = 0");

        assert!(matches!(result, Err(ConfigError::Validation { .. })));

        let cfg =
            from_toml("[consumer]\npending_message_limit = -1\npending_bytes_limit = -5").unwrap();
        assert_eq!(cfg.pending_bytes_limit, -5);
    }

    #[test]
    fn rejects_empty_subjects() {
        let result = from_toml("[consumer]\nsubjects = []");

        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn secure_requires_paths() {
        let result = from_toml("[consumer]\nsecure = true\nssl_ca = \"/etc/ca.pem\"");
        assert!(matches!(result, Err(ConfigError::Validation { .. })));

        let cfg = from_toml(
            r#"
            [consumer]
            secure = true
            ssl_ca = "/etc/ca.pem"
            ssl_cert = "/etc/cert.pem"
            ssl_key = "/etc/key.pem"
            verify_host = false
            "#,
        )
        .unwrap();
        let settings = cfg.tls_settings();
        assert!(!settings.verify_host);
        assert_eq!(settings.ca, Some(PathBuf::from("/etc/ca.pem")));
    }

    #[test]
    fn loads_sample_file() {
        let cfg = ConsumerConfig::load(PathBuf::from(env!("CARGO_MANIFEST_DIR"))).unwrap();

        assert_eq!(cfg.servers, ["localhost:9092"]);
        assert_eq!(cfg.subjects, ["telegraf"]);
        assert_eq!(cfg.data_format, DataFormat::Influx);
    }
}
