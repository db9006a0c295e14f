//! 单个资源的下载状态机。
//!
//! 预缓存时响应体直接丢弃，流量只是为了让缓存服务器把资源拉下来；
//! 固件下载则写入 `<output>/<name>.part`，完成后再改名。

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use tracing::{debug, info, warn};

use super::models::{DownloadReport, DownloadState, FilesystemError, INTERRUPTED, SkipReason};
use super::progress::ProgressReporter;
use crate::asset::models::{Asset, AssetGroup};
use crate::base_system::shutdown;
use crate::network_parser::network::HttpClient;

const CHUNK_SIZE: usize = 8192;
const ELIGIBLE_EXTENSIONS: [&str; 3] = [".zip", ".ipsw", ".pkg"];

/// 只下载这几类文件；其余（如 `.xml`、`.smd`）不需要预热。
pub fn is_eligible_extension(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let lower = path.to_ascii_lowercase();
    ELIGIBLE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    pub dry_run: bool,
    pub user_agents: BTreeMap<AssetGroup, String>,
}

enum StreamError {
    Interrupted,
    Read(String),
    Fs(FilesystemError),
}

pub struct DownloadEngine<'a> {
    client: &'a HttpClient,
    options: DownloadOptions,
    should_stop: fn() -> bool,
}

impl<'a> DownloadEngine<'a> {
    pub fn new(client: &'a HttpClient, options: DownloadOptions) -> Self {
        Self {
            client,
            options,
            should_stop: shutdown::stop_requested,
        }
    }

    #[cfg(test)]
    fn with_stop_check(mut self, should_stop: fn() -> bool) -> Self {
        self.should_stop = should_stop;
        self
    }

    /// 处理一个资源。`retain_in` 为 `Some(dir)` 时把文件保存到该目录。
    ///
    /// 访问过网络的资源结束后都会随机等待一段时间；中断时不等待。
    pub fn download(&self, asset: &Asset, retain_in: Option<&Path>) -> DownloadReport {
        let mut report = DownloadReport::new(asset);

        if self.options.dry_run {
            info!(
                target: "download",
                "DRY RUN: Caching {} ({}) {}",
                asset.model, asset.version, asset.url
            );
            report.state = DownloadState::Skipped(SkipReason::DryRun);
            return report;
        }

        if !is_eligible_extension(&asset.url) {
            debug!(target: "download", "扩展名不在下载范围内，跳过: {}", asset.url);
            report.state = DownloadState::Skipped(SkipReason::IneligibleExtension);
            return report;
        }

        if (self.should_stop)() {
            report.state = DownloadState::Failed(INTERRUPTED.to_string());
            return report;
        }

        self.fetch(asset, retain_in, &mut report);

        if !report.is_interrupted() {
            self.client.pace();
        }
        report
    }

    fn fetch(&self, asset: &Asset, retain_in: Option<&Path>, report: &mut DownloadReport) {
        report.state = DownloadState::ProbeCache;
        let ua = self
            .options
            .user_agents
            .get(&asset.group)
            .map(String::as_str);

        let resp = match self.client.open_download(&asset.url, ua) {
            Ok(r) => r,
            Err(e) => {
                warn!(target: "download", "{} ({}) 下载失败: {}", asset.model, asset.version, e);
                report.state = DownloadState::Failed(e.to_string());
                return;
            }
        };

        if !resp.headers().contains_key(CONTENT_TYPE) {
            info!(
                target: "download",
                "Skipped: {} ({}) - in cache",
                asset.model, asset.version
            );
            report.state = DownloadState::Skipped(SkipReason::CachedUpstream);
            return;
        }

        let total = resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok());

        let target = match retain_in {
            Some(dir) => match prepare_target(dir, asset) {
                Ok(paths) => Some(paths),
                Err(e) => {
                    warn!(target: "download", "{}", e);
                    report.state = DownloadState::Failed(e.to_string());
                    return;
                }
            },
            None => None,
        };

        info!(
            target: "download",
            "Downloading {} ({}) {}",
            asset.model, asset.version, asset.url
        );
        report.state = DownloadState::Streaming;

        let partial = target.as_ref().map(|(part, _)| part.as_path());
        match self.stream(asset, resp, total, partial, &mut report.bytes) {
            Ok(()) => {}
            Err(err) => {
                if let Some((part, _)) = target.as_ref() {
                    let _ = fs::remove_file(part);
                }
                report.state = DownloadState::Failed(match err {
                    StreamError::Interrupted => {
                        warn!(target: "download", "已中断: {} ({})", asset.model, asset.version);
                        INTERRUPTED.to_string()
                    }
                    StreamError::Read(reason) => {
                        warn!(target: "download", "读取响应失败 {}: {}", asset.url, reason);
                        reason
                    }
                    StreamError::Fs(e) => {
                        warn!(target: "download", "{}", e);
                        e.to_string()
                    }
                });
                return;
            }
        }

        if let Some((part, dest)) = target {
            if let Err(source) = fs::rename(&part, &dest) {
                let e = FilesystemError::Rename {
                    from: part.clone(),
                    to: dest.clone(),
                    source,
                };
                warn!(target: "download", "{}", e);
                let _ = fs::remove_file(&part);
                report.state = DownloadState::Failed(e.to_string());
                return;
            }
            info!(target: "download", "已保存到 {}", dest.display());
            report.saved_to = Some(dest);
        }

        info!(
            target: "download",
            "Cached {} ({}) {}",
            asset.model, asset.version, asset.url
        );
        report.state = DownloadState::Done;
    }

    fn stream(
        &self,
        asset: &Asset,
        mut reader: impl Read,
        total: Option<u64>,
        partial: Option<&Path>,
        written: &mut u64,
    ) -> Result<(), StreamError> {
        let mut file = match partial {
            Some(path) => Some(File::create(path).map_err(|source| {
                StreamError::Fs(FilesystemError::Write {
                    path: path.to_path_buf(),
                    source,
                })
            })?),
            None => None,
        };

        let mut progress = ProgressReporter::new(asset, total);
        let mut buf = [0u8; CHUNK_SIZE];
        let result = loop {
            if (self.should_stop)() {
                break Err(StreamError::Interrupted);
            }
            let n = match reader.read(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(n) => n,
                Err(e) => break Err(StreamError::Read(e.to_string())),
            };
            if let (Some(f), Some(path)) = (file.as_mut(), partial)
                && let Err(source) = f.write_all(&buf[..n])
            {
                break Err(StreamError::Fs(FilesystemError::Write {
                    path: path.to_path_buf(),
                    source,
                }));
            }
            *written += n as u64;
            progress.inc(n as u64);
        };
        progress.finish();

        if result.is_ok()
            && let (Some(f), Some(path)) = (file.as_mut(), partial)
        {
            f.flush().map_err(|source| {
                StreamError::Fs(FilesystemError::Write {
                    path: path.to_path_buf(),
                    source,
                })
            })?;
        }
        result
    }
}

/// 建好输出目录，返回 (`.part` 路径, 最终路径)。
fn prepare_target(dir: &Path, asset: &Asset) -> Result<(PathBuf, PathBuf), FilesystemError> {
    fs::create_dir_all(dir).map_err(|source| FilesystemError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;
    let name = asset.file_name().unwrap_or(asset.model.as_str());
    let dest = dir.join(name);
    let part = dir.join(format!("{name}.part"));
    Ok((part, dest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_system::pacing::Pacer;
    use crate::network_parser::network::test_server;
    use crate::network_parser::network::{HttpClient, HttpConfig};
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Response, header};
    use axum::routing::get;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PAYLOAD_LEN: usize = 20_000;

    fn client() -> HttpClient {
        HttpClient::new(HttpConfig {
            max_retries: 1,
            pacer: Pacer::disabled(),
            ..HttpConfig::default()
        })
        .unwrap()
    }

    fn server() -> String {
        let router = Router::new()
            .route(
                "/fresh/update.zip",
                get(|| async {
                    Response::builder()
                        .header(header::CONTENT_TYPE, "application/zip")
                        .body(Body::from(vec![7u8; PAYLOAD_LEN]))
                        .unwrap()
                }),
            )
            .route(
                "/cached/update.zip",
                get(|| async { Response::builder().body(Body::from("cached")).unwrap() }),
            )
            .route(
                "/broken/update.zip",
                get(|| async {
                    Response::builder()
                        .status(500)
                        .header(header::CONTENT_TYPE, "text/plain")
                        .body(Body::from("boom"))
                        .unwrap()
                }),
            );
        test_server::spawn(router)
    }

    fn asset(url: String) -> Asset {
        Asset {
            model: "iPhone10,3".to_string(),
            version: "12.1".to_string(),
            url,
            group: AssetGroup::IPhone,
        }
    }

    #[test]
    fn eligible_extensions() {
        assert!(is_eligible_extension("http://c/x/update.zip?source=a"));
        assert!(is_eligible_extension("http://c/fw/iPhone.ipsw"));
        assert!(is_eligible_extension("http://c/macOSUpd10.13.6.pkg?source=b"));
        assert!(!is_eligible_extension("http://c/catalog.xml?source=a.zip"));
        assert!(!is_eligible_extension("http://c/macOSUpd10.13.6.smd"));
    }

    #[test]
    fn missing_content_type_means_already_cached() {
        let base = server();
        let client = client();
        let dir = tempfile::tempdir().unwrap();
        let engine = DownloadEngine::new(&client, DownloadOptions::default());

        let report = engine.download(
            &asset(format!("{base}/cached/update.zip")),
            Some(dir.path()),
        );
        assert_eq!(
            report.state,
            DownloadState::Skipped(SkipReason::CachedUpstream)
        );
        assert_eq!(report.bytes, 0);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn discarded_download_streams_everything() {
        let base = server();
        let client = client();
        let engine = DownloadEngine::new(&client, DownloadOptions::default());

        let report = engine.download(&asset(format!("{base}/fresh/update.zip")), None);
        assert_eq!(report.state, DownloadState::Done);
        assert_eq!(report.bytes, PAYLOAD_LEN as u64);
        assert!(report.saved_to.is_none());
    }

    #[test]
    fn retained_download_is_renamed_from_part_file() {
        let base = server();
        let client = client();
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("ipsw");
        let engine = DownloadEngine::new(&client, DownloadOptions::default());

        let report = engine.download(&asset(format!("{base}/fresh/update.zip")), Some(&out));
        assert_eq!(report.state, DownloadState::Done);
        let saved = report.saved_to.unwrap();
        assert_eq!(saved, out.join("update.zip"));
        assert_eq!(fs::read(&saved).unwrap().len(), PAYLOAD_LEN);
        assert!(!out.join("update.zip.part").exists());
    }

    #[test]
    fn server_error_is_failed() {
        let base = server();
        let client = client();
        let engine = DownloadEngine::new(&client, DownloadOptions::default());

        let report = engine.download(&asset(format!("{base}/broken/update.zip")), None);
        assert!(matches!(report.state, DownloadState::Failed(_)));
    }

    #[test]
    fn dry_run_and_ineligible_never_touch_the_network() {
        let client = client();
        let dry = DownloadEngine::new(
            &client,
            DownloadOptions {
                dry_run: true,
                ..DownloadOptions::default()
            },
        );
        // 端口 9 上没有服务，真的发请求会失败
        let report = dry.download(&asset("http://127.0.0.1:9/a/update.zip".to_string()), None);
        assert_eq!(report.state, DownloadState::Skipped(SkipReason::DryRun));

        let engine = DownloadEngine::new(&client, DownloadOptions::default());
        let report = engine.download(&asset("http://127.0.0.1:9/a/index.xml".to_string()), None);
        assert_eq!(
            report.state,
            DownloadState::Skipped(SkipReason::IneligibleExtension)
        );
    }

    #[test]
    fn stop_flag_removes_partial_file() {
        let base = server();
        let client = client();
        let dir = tempfile::tempdir().unwrap();
        // 第三次检查时置位：下载前一次、首块前一次，第二块前中断
        static CHECKS: AtomicUsize = AtomicUsize::new(0);
        fn stop_mid_stream() -> bool {
            CHECKS.fetch_add(1, Ordering::SeqCst) >= 2
        }
        let engine = DownloadEngine::new(&client, DownloadOptions::default())
            .with_stop_check(stop_mid_stream);

        let report = engine.download(&asset(format!("{base}/fresh/update.zip")), Some(dir.path()));
        assert!(report.is_interrupted());
        assert!(report.bytes > 0);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
