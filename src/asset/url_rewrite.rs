//! 源站地址 → 缓存服务器地址。
//!
//! `http://appldnld.apple.com/ios/x.zip` 改写为
//! `http://cache:49672/ios/x.zip?source=appldnld.apple.com`。

use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("无法改写地址 `{url}`: {reason}")]
pub struct RewriteError {
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlRewriter {
    base: String,
}

impl UrlRewriter {
    pub fn new(cache_base: &str) -> Self {
        Self {
            base: cache_base.trim().trim_end_matches('/').to_string(),
        }
    }

    /// 已经指向缓存服务器（带 `source=`）的地址原样返回。
    pub fn is_rewritten(&self, url: &str) -> bool {
        url.strip_prefix(&self.base)
            .is_some_and(|rest| rest.starts_with('/') && rest.contains("?source="))
    }

    pub fn rewrite(&self, origin: &str) -> Result<String, RewriteError> {
        let origin = origin.trim();
        if self.is_rewritten(origin) {
            return Ok(origin.to_string());
        }

        let fail = |reason: &str| RewriteError {
            url: origin.to_string(),
            reason: reason.to_string(),
        };

        let parsed = Url::parse(origin).map_err(|e| fail(&e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(fail("仅支持 http/https"));
        }
        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| fail("缺少主机名"))?;

        let source = match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let mut out = format!("{}{}?source={}", self.base, parsed.path(), source);
        if let Some(query) = parsed.query().filter(|q| !q.is_empty()) {
            out.push('&');
            out.push_str(query);
        }
        Ok(out)
    }
}
