use std::time::Duration;

use rand::Rng;
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT_ENCODING, CONNECTION, HeaderMap, HeaderValue, USER_AGENT};
use thiserror::Error;
use tracing::{debug, warn};

use crate::base_system::context::Config;
use crate::base_system::pacing::Pacer;

const DEFAULT_USER_AGENT: &str = concat!("precache/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("请求超时 {url}")]
    Timeout { url: String },
    #[error("网络错误 {url}: {reason}")]
    Network { url: String, reason: String },
    #[error("HTTP {status} {url}")]
    Status { url: String, status: u16 },
    #[error("读取响应失败 {url}: {reason}")]
    Body { url: String, reason: String },
    #[error("HTTP 客户端初始化失败: {0}")]
    Client(String),
}

impl FetchError {
    fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Network { .. } => true,
            FetchError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
            }
            FetchError::Body { .. } | FetchError::Client(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub request_timeout: Duration,
    pub download_timeout: Option<Duration>,
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub proxy: Option<String>,
    pub pacer: Pacer,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(15),
            download_timeout: None,
            connect_timeout: Duration::from_secs(5),
            max_retries: 3,
            proxy: None,
            pacer: Pacer::from_millis(1000, 5000),
        }
    }
}

impl From<&Config> for HttpConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            request_timeout: cfg.request_timeout(),
            download_timeout: cfg.download_timeout(),
            connect_timeout: cfg.connect_timeout(),
            max_retries: cfg.max_retries.max(1),
            proxy: cfg.proxy().map(str::to_string),
            pacer: Pacer::from_millis(cfg.min_wait_time, cfg.max_wait_time),
        }
    }
}

/// 清单抓取、sidecar 探测、固件查询与资源下载共用的 HTTP 客户端。
pub struct HttpClient {
    client: Client,
    config: HttpConfig,
}

impl HttpClient {
    pub fn new(config: HttpConfig) -> Result<Self, FetchError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        default_headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

        // 总超时按请求单独设置：清单用 request_timeout，大文件下载默认不限
        let mut builder = Client::builder()
            .default_headers(default_headers)
            .connect_timeout(config.connect_timeout)
            .timeout(Option::<Duration>::None);

        if let Some(proxy) = config.proxy.as_deref() {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| FetchError::Client(format!("代理地址无效 {proxy}: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// 随机冷却，在每次网络操作之后调用。
    pub fn pace(&self) {
        self.config.pacer.pause();
    }

    fn headers(user_agent: Option<&str>) -> HeaderMap {
        let ua = user_agent
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_USER_AGENT);
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(ua).unwrap_or(HeaderValue::from_static(DEFAULT_USER_AGENT)),
        );
        headers
    }

    /// 发起 GET，返回已打开的响应；调用方负责读取/丢弃。
    ///
    /// 连接错误、超时、429 与 5xx 会按退避重试，其它 HTTP 错误直接返回。
    pub fn open(&self, url: &str, user_agent: Option<&str>) -> Result<Response, FetchError> {
        self.open_with_timeout(url, user_agent, Some(self.config.request_timeout))
    }

    /// 下载大文件用：总超时取 `download_timeout`（默认不限）。
    pub fn open_download(
        &self,
        url: &str,
        user_agent: Option<&str>,
    ) -> Result<Response, FetchError> {
        self.open_with_timeout(url, user_agent, self.config.download_timeout)
    }

    fn open_with_timeout(
        &self,
        url: &str,
        user_agent: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<Response, FetchError> {
        let retries = self.config.max_retries.max(1);
        let mut backoff = 0.6f64;
        let mut last_error = None;

        for attempt in 1..=retries {
            if attempt > 1 {
                debug!("重试第 {} 次: {}", attempt, url);
            }
            match self.try_open(url, user_agent, timeout) {
                Ok(resp) => {
                    debug!("已连接 {}", url);
                    return Ok(resp);
                }
                Err(e) if e.is_transient() && attempt < retries => {
                    warn!("请求失败（将重试）: {}", e);
                    sleep_backoff(&mut backoff, 0.4);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| FetchError::Network {
            url: url.to_string(),
            reason: "no attempts made".to_string(),
        }))
    }

    fn try_open(
        &self,
        url: &str,
        user_agent: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<Response, FetchError> {
        let mut request = self.client.get(url).headers(Self::headers(user_agent));
        if let Some(t) = timeout {
            request = request.timeout(t);
        }
        let resp = request.send().map_err(|e| classify(url, &e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(resp)
    }

    pub fn get_bytes(&self, url: &str, user_agent: Option<&str>) -> Result<Vec<u8>, FetchError> {
        let resp = self.open(url, user_agent)?;
        resp.bytes()
            .map(|b| b.to_vec())
            .map_err(|e| FetchError::Body {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn get_text(&self, url: &str, user_agent: Option<&str>) -> Result<String, FetchError> {
        let resp = self.open(url, user_agent)?;
        resp.text().map_err(|e| FetchError::Body {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    /// 资源是否存在：请求成功即视为存在，不读取响应体。
    pub fn exists(&self, url: &str, user_agent: Option<&str>) -> bool {
        match self.open(url, user_agent) {
            Ok(_) => true,
            Err(e) => {
                debug!("{}", e);
                false
            }
        }
    }
}

fn classify(url: &str, err: &reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Network {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }
}

fn sleep_backoff(backoff: &mut f64, jitter_max: f64) {
    let jitter = rand::rng().random_range(0.0..=jitter_max);
    let sleep_s = (*backoff + jitter).min(3.0);
    std::thread::sleep(Duration::from_millis((sleep_s * 1000.0) as u64));
    *backoff = (*backoff * 2.0).min(3.0);
}
