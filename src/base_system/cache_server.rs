//! 缓存服务器地址校验。
//!
//! 地址无效或端口不可达时整个运行没有意义，属于启动期致命错误。

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};
use url::{Host, Url};

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("缓存服务器地址无效 `{address}`: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("无法连接缓存服务器 {address}: {reason}，请检查地址是否正确")]
    Unreachable { address: String, reason: String },
}

/// 已校验的缓存服务器地址，形如 `scheme://host:port`（无结尾斜杠）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheServer {
    base: String,
    host: String,
    port: u16,
}

impl CacheServer {
    pub fn parse(address: &str) -> Result<Self, ConfigurationError> {
        let invalid = |reason: &str| ConfigurationError::InvalidAddress {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(address.trim()).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("仅支持 http/https"));
        }
        let display_host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("缺少主机名"))?
            .to_string();
        // IPv6 在 URL 中带方括号，解析 socket 地址时需要去掉
        let host = match url.host() {
            Some(Host::Ipv6(ip)) => ip.to_string(),
            _ => display_host.clone(),
        };
        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid("缺少端口"))?;
        if url.path() != "/" && !url.path().is_empty() {
            return Err(invalid("地址不应包含路径"));
        }

        let base = match url.port() {
            Some(p) => format!("{}://{}:{}", url.scheme(), display_host, p),
            None => format!("{}://{}", url.scheme(), display_host),
        };

        Ok(Self { base, host, port })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// TCP 连通性探测。
    pub fn ensure_reachable(&self, timeout: Duration) -> Result<(), ConfigurationError> {
        let unreachable = |reason: String| ConfigurationError::Unreachable {
            address: self.base.clone(),
            reason,
        };

        let addrs = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| unreachable(e.to_string()))?
            .collect::<Vec<_>>();
        if addrs.is_empty() {
            return Err(unreachable("主机名无法解析".to_string()));
        }

        let mut last_err = None;
        for addr in addrs {
            debug!(target: "startup", "探测缓存服务器 {}", addr);
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(_) => {
                    info!(target: "startup", "缓存服务器: {}", self.base);
                    return Ok(());
                }
                Err(e) => last_err = Some(e.to_string()),
            }
        }
        Err(unreachable(last_err.unwrap_or_default()))
    }
}
