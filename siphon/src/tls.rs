//! # **siphon** 安全传输
//!
//! 从客户端证书、私钥与受信 CA 文件构建传输配置。
//! 关闭主机校验必须显式配置 `verify_host = false`，默认始终校验。

use crate::errors::TlsError;
use std::{
    fmt, fs,
    io::{BufReader, Cursor},
    path::{Path, PathBuf},
};
use tracing::{info, warn};

/// 证书文件路径
#[derive(Debug, Clone)]
pub struct TlsSettings {
    /// CA 证书路径
    pub ca: Option<PathBuf>,
    /// 客户端证书路径
    pub cert: Option<PathBuf>,
    /// 客户端私钥路径
    pub key: Option<PathBuf>,
    /// 是否校验服务器证书链与主机名
    pub verify_host: bool,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            ca: None,
            cert: None,
            key: None,
            verify_host: true,
        }
    }
}

/// 已校验的传输配置（PEM 格式）
#[derive(Clone)]
pub struct TransportConfig {
    /// 客户端证书链
    pub cert_pem: String,
    /// 客户端私钥
    pub key_pem: String,
    /// 受信 CA
    pub ca_pem: String,
    /// 是否校验服务器证书链与主机名
    pub verify_host: bool,
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("cert_pem", &self.cert_pem.len())
            .field("key_pem", &"<redacted>")
            .field("ca_pem", &self.ca_pem.len())
            .field("verify_host", &self.verify_host)
            .finish()
    }
}

/// 构建传输配置，任一文件不可读或格式不合法即失败
pub fn build_transport(settings: &TlsSettings) -> Result<TransportConfig, TlsError> {
    let cert_path = settings.cert.as_deref().ok_or(TlsError::MissingPath("ssl_cert"))?;
    let key_path = settings.key.as_deref().ok_or(TlsError::MissingPath("ssl_key"))?;
    let ca_path = settings.ca.as_deref().ok_or(TlsError::MissingPath("ssl_ca"))?;

    let cert_pem = read(cert_path)?;
    let count = check_certs(cert_path, &cert_pem)?;
    let key_pem = read(key_path)?;
    check_key(key_path, &key_pem)?;
    let ca_pem = read(ca_path)?;
    let roots = check_certs(ca_path, &ca_pem)?;

    if !settings.verify_host {
        warn!("已关闭服务器证书链与主机名校验");
    }
    info!(
        cert = %cert_path.display(),
        chain = count,
        roots,
        verify_host = settings.verify_host,
        "成功加载安全传输配置"
    );

    Ok(TransportConfig {
        cert_pem,
        key_pem,
        ca_pem,
        verify_host: settings.verify_host,
    })
}

fn read(path: &Path) -> Result<String, TlsError> {
    fs::read_to_string(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn check_certs(path: &Path, pem: &str) -> Result<usize, TlsError> {
    let mut reader = BufReader::new(Cursor::new(pem.as_bytes()));
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Certificate {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    if certs.is_empty() {
        return Err(TlsError::Certificate {
            path: path.to_path_buf(),
            message: "未找到证书".to_string(),
        });
    }
    Ok(certs.len())
}

fn check_key(path: &Path, pem: &str) -> Result<(), TlsError> {
    let mut reader = BufReader::new(Cursor::new(pem.as_bytes()));
    match rustls_pemfile::private_key(&mut reader) {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(TlsError::PrivateKey {
            path: path.to_path_buf(),
            message: "未找到私钥".to_string(),
        }),
        Err(e) => Err(TlsError::PrivateKey {
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
    }
}
