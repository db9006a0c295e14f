//! 预缓存主流程。
//!
//! 一次运行：先按固定顺序拉取全部清单（OTA → 应用列表 → 软件更新目录）建立资源登记表，
//! 之后按型号/分组选择资源交给下载引擎；固件按需查询。

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::asset::models::{Asset, AssetGroup};
use crate::asset::registry::{AssetRegistry, Registration};
use crate::asset::url_rewrite::UrlRewriter;
use crate::asset::version::meets_floor;
use crate::base_system::context::Config;
use crate::base_system::shutdown;
use crate::download::engine::{DownloadEngine, DownloadOptions};
use crate::download::models::RunSummary;
use crate::feed_parser::eligibility::infer_category;
use crate::feed_parser::ota::{OtaDecision, evaluate, parse_ota_manifest};
use crate::feed_parser::{ParseError, app_catalog, firmware, sucatalog};
use crate::network_parser::network::{FetchError, HttpClient, HttpConfig};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

#[derive(Debug, Clone)]
pub struct FeedOutcome {
    pub feed: String,
    pub registered: usize,
    pub error: Option<String>,
}

/// 一次清单拉取的结果：每个源登记了多少条、哪些源失败。
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub feeds: Vec<FeedOutcome>,
    pub total_assets: usize,
}

impl IngestReport {
    fn record(&mut self, feed: &str, result: Result<usize, FeedError>) {
        let outcome = match result {
            Ok(registered) => {
                info!(target: "ingest", "{} 登记 {} 条", feed, registered);
                FeedOutcome {
                    feed: feed.to_string(),
                    registered,
                    error: None,
                }
            }
            Err(e) => {
                warn!(target: "ingest", "清单处理失败 {}: {}", feed, e);
                FeedOutcome {
                    feed: feed.to_string(),
                    registered: 0,
                    error: Some(e.to_string()),
                }
            }
        };
        self.feeds.push(outcome);
    }

    pub fn failed(&self) -> impl Iterator<Item = &FeedOutcome> {
        self.feeds.iter().filter(|f| f.error.is_some())
    }
}

pub struct Precache {
    config: Config,
    client: HttpClient,
    registry: AssetRegistry,
}

impl Precache {
    pub fn new(config: Config, cache_base: &str) -> Result<Self> {
        let client =
            HttpClient::new(HttpConfig::from(&config)).context("初始化 HTTP 客户端失败")?;
        let registry = AssetRegistry::new(UrlRewriter::new(cache_base));
        Ok(Self {
            config,
            client,
            registry,
        })
    }

    /// 拉取全部清单并建立登记表。单个源失败只记录，不影响其他源。
    pub fn ingest(&mut self) -> IngestReport {
        let mut report = IngestReport::default();

        for feed in self.config.ota_feeds.clone() {
            info!(target: "ingest", "处理 OTA 清单: {}", feed);
            let result = self.ingest_ota_feed(&feed);
            report.record(&feed, result);
            self.client.pace();
        }

        let app_catalog_url = self.config.app_catalog_url.clone();
        if !app_catalog_url.trim().is_empty() {
            info!(target: "ingest", "处理应用列表: {}", app_catalog_url);
            let result = self.ingest_app_catalog(&app_catalog_url);
            report.record(&app_catalog_url, result);
            self.client.pace();
        }

        let catalog_url = self.config.software_catalog_url.clone();
        if !catalog_url.trim().is_empty() {
            info!(target: "ingest", "处理软件更新目录: {}", catalog_url);
            let result = self.ingest_software_catalog(&catalog_url);
            report.record(&catalog_url, result);
            self.client.pace();
        }

        report.total_assets = self.registry.len();
        info!(target: "ingest", "共登记 {} 条资源", report.total_assets);
        report
    }

    fn ingest_ota_feed(&mut self, url: &str) -> Result<usize, FeedError> {
        let bytes = self.client.get_bytes(url, None)?;
        let records = parse_ota_manifest(&bytes)?;

        self.registry.note_models(
            records
                .iter()
                .flat_map(|r| r.supported_devices.iter().cloned()),
        );

        let mut added = 0;
        for record in &records {
            match evaluate(record) {
                OtaDecision::Accept(item) => {
                    if self
                        .registry
                        .add(&item.model, &item.version, &item.url, item.group)
                        == Registration::Added
                    {
                        added += 1;
                    }
                }
                OtaDecision::Reject(reason) => {
                    debug!(target: "ingest", "跳过 {:?}: {:?}", record.device(), reason);
                }
            }
        }
        Ok(added)
    }

    fn ingest_app_catalog(&mut self, url: &str) -> Result<usize, FeedError> {
        let bytes = self.client.get_bytes(url, None)?;
        let entries = app_catalog::parse_app_catalog(&bytes)?;
        let added = entries
            .iter()
            .filter(|e| {
                self.registry.add(&e.name, &e.version, &e.url, e.group) == Registration::Added
            })
            .count();
        Ok(added)
    }

    fn ingest_software_catalog(&mut self, url: &str) -> Result<usize, FeedError> {
        let bytes = self.client.get_bytes(url, None)?;
        let packages = sucatalog::parse_catalog(&bytes)?;
        debug!(target: "ingest", "软件更新目录共 {} 个包", packages.len());

        let mut added = 0;
        for package_url in packages {
            if shutdown::stop_requested() {
                break;
            }
            if let Some(candidate) = sucatalog::candidate(&package_url) {
                added += self.ingest_update_package(&candidate);
            }
        }
        Ok(added)
    }

    /// 处理一个候选更新包，返回新登记条数。
    fn ingest_update_package(&mut self, candidate: &sucatalog::PackageCandidate) -> usize {
        let sidecar = self
            .client
            .get_bytes(&candidate.sidecar_url, None)
            .map_err(FeedError::from)
            .and_then(|bytes| Ok(sucatalog::parse_sidecar_version(&bytes)?));
        let declared = match sidecar {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(target: "ingest", "sidecar 不可用，改用文件名中的版本: {}", e);
                None
            }
        };
        self.client.pace();

        let Some(version) = sucatalog::resolve_version(declared.as_deref(), &candidate.basename)
        else {
            warn!(target: "ingest", "无法确定版本，跳过 {}", candidate.basename);
            return 0;
        };

        match meets_floor(&version, candidate.product.floor) {
            Ok(true) => {}
            Ok(false) => {
                debug!(
                    target: "ingest",
                    "{} 版本 {} 低于 {}，跳过",
                    candidate.basename, version, candidate.product.floor
                );
                return 0;
            }
            Err(e) => {
                warn!(target: "ingest", "{}: {}", candidate.basename, e);
                return 0;
            }
        }

        let mut added = 0;
        for (name, sibling_url) in candidate.siblings() {
            let exists = self.client.exists(&sibling_url, None);
            self.client.pace();
            if exists
                && self
                    .registry
                    .add(&name, &version, &sibling_url, AssetGroup::Updates)
                    == Registration::Added
            {
                added += 1;
            }
        }

        if self.registry.add(
            &candidate.basename,
            &version,
            &candidate.url,
            AssetGroup::Updates,
        ) == Registration::Added
        {
            added += 1;
        }
        added
    }

    pub fn list_assets(&self, groups: &[AssetGroup]) -> Vec<(AssetGroup, Vec<String>)> {
        self.registry.listing(groups)
    }

    fn engine(&self) -> DownloadEngine<'_> {
        let user_agents: BTreeMap<AssetGroup, String> = AssetGroup::ALL
            .into_iter()
            .filter_map(|g| self.config.user_agent_for(g).map(|ua| (g, ua.to_string())))
            .collect();
        DownloadEngine::new(
            &self.client,
            DownloadOptions {
                dry_run: self.config.dry_run,
                user_agents,
            },
        )
    }

    /// 按型号（精确匹配）和分组挑选资源，同一资源只下载一次，顺序为命令行给出的顺序。
    pub fn cache_assets(&self, models: &[String], groups: &[AssetGroup]) -> RunSummary {
        if !models.is_empty() {
            info!(target: "download", "开始预缓存，型号: {}", models.join(", "));
        }
        if !groups.is_empty() {
            let names: Vec<&str> = groups.iter().map(|g| g.as_str()).collect();
            info!(target: "download", "开始预缓存，分组: {}", names.join(", "));
        }

        let selected = select_assets(self.registry.assets(), models, groups);
        if selected.is_empty() {
            warn!(target: "download", "没有匹配的资源");
        }
        run_batch(&self.engine(), &selected, None)
    }

    /// 查询并下载固件，文件保存在 `output_dir`。每次调用前清空上一次的固件列表。
    pub fn cache_firmware(
        &mut self,
        models: &[String],
        groups: &[AssetGroup],
        output_dir: &Path,
    ) -> RunSummary {
        self.registry.clear_firmware();

        let mut targets: Vec<String> = models.to_vec();
        for group in groups {
            let matched: Vec<String> = self
                .registry
                .known_models()
                .filter(|m| infer_category(m) == Some(*group))
                .map(str::to_string)
                .collect();
            if matched.is_empty() {
                warn!(target: "firmware", "分组 {} 下没有已知型号", group);
            }
            targets.extend(matched);
        }

        for model in &targets {
            if shutdown::stop_requested() {
                break;
            }
            if let Err(e) = self.lookup_firmware(model) {
                warn!(target: "firmware", "查询 {} 固件失败: {}", model, e);
            }
            self.client.pace();
        }

        info!(target: "firmware", "固件保存目录: {}", output_dir.display());
        let firmware = self.registry.firmware().to_vec();
        run_batch(&self.engine(), &firmware, Some(output_dir))
    }

    fn lookup_firmware(&mut self, model: &str) -> Result<(), FeedError> {
        let api = self.config.firmware_api_base.as_str();
        let url = self
            .client
            .get_text(&firmware::latest_url_endpoint(api, model), None)?;
        let url = firmware::parse_plain(&url, "url")?;
        let version = self
            .client
            .get_text(&firmware::latest_version_endpoint(api, model), None)?;
        let version = firmware::parse_plain(&version, "version")?;

        debug!(target: "firmware", "{} 最新固件 {} {}", model, version, url);
        self.registry
            .add(model, &version, &url, AssetGroup::Firmware);
        Ok(())
    }
}

fn select_assets(assets: &[Asset], models: &[String], groups: &[AssetGroup]) -> Vec<Asset> {
    let mut seen = HashSet::new();
    let by_model = models
        .iter()
        .flat_map(|m| assets.iter().filter(move |a| a.model == *m));
    let by_group = groups
        .iter()
        .flat_map(|g| assets.iter().filter(move |a| a.group == *g));
    by_model
        .chain(by_group)
        .filter(|a| seen.insert(*a))
        .cloned()
        .collect()
}

fn run_batch(
    engine: &DownloadEngine<'_>,
    assets: &[Asset],
    retain_in: Option<&Path>,
) -> RunSummary {
    let mut summary = RunSummary::default();
    for asset in assets {
        let report = engine.download(asset, retain_in);
        debug_assert!(report.state.is_terminal());
        summary.push(report);
        if summary.interrupted {
            warn!(target: "download", "收到中断信号，停止剩余下载");
            break;
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::models::{DownloadState, SkipReason};
    use crate::feed_parser::plist_xml;
    use crate::network_parser::network::test_server;
    use axum::Router;
    use axum::body::Body;
    use axum::extract::Path as UrlPath;
    use axum::http::{Response, StatusCode, header};
    use axum::routing::get;
    use std::sync::{Arc, OnceLock};

    fn ota_item(release: &str, device: &str, version: &str, path: &str) -> String {
        format!(
            r#"<dict>
  <key>ReleaseType</key><string>{release}</string>
  <key>SupportedDevices</key><array><string>{device}</string></array>
  <key>__BaseURL</key><string>http://appldnld.apple.com/</string>
  <key>__RelativePath</key><string>{path}</string>
  <key>OSVersion</key><string>{version}</string>
  <key>__CanUseLocalCacheServer</key><true/>
</dict>"#
        )
    }

    fn ota_feed() -> Vec<u8> {
        plist_xml(&format!(
            "<dict><key>Assets</key><array>{}{}{}</array></dict>",
            ota_item("Public", "iPhone10,3", "12.1", "ios/update-a.zip"),
            ota_item("Public", "AppleTV5,3", "12.1", "tv/update-b.zip"),
            ota_item("Beta", "iPhone10,3", "12.2", "ios/update-beta.zip"),
        ))
    }

    fn app_catalog() -> Vec<u8> {
        plist_xml(
            r#"<dict>
  <key>Xcode</key>
  <dict>
    <key>version</key><string>10.1</string>
    <key>url</key><string>http://osxapps.itunes.apple.com/apps/Xcode.pkg</string>
    <key>type</key><string>app</string>
  </dict>
</dict>"#,
        )
    }

    fn software_catalog(base: &str) -> Vec<u8> {
        plist_xml(&format!(
            r#"<dict><key>Products</key><dict>
  <key>041-1</key><dict><key>Packages</key><array>
    <dict><key>URL</key><string>{base}/su/041-1/macOSUpd10.13.6.pkg</string></dict>
  </array></dict>
  <key>041-2</key><dict><key>Packages</key><array>
    <dict><key>URL</key><string>{base}/su/041-2/OSXUpd10.11.5.pkg</string></dict>
  </array></dict>
</dict></dict>"#
        ))
    }

    fn zip_body(content_type: bool) -> Response<Body> {
        let mut builder = Response::builder();
        if content_type {
            builder = builder.header(header::CONTENT_TYPE, "application/octet-stream");
        }
        builder.body(Body::from(vec![1u8; 4096])).unwrap()
    }

    fn spawn_upstream() -> String {
        // 目录里的包地址指向服务自身，端口要等启动后才知道
        let own_base: Arc<OnceLock<String>> = Arc::new(OnceLock::new());
        let catalog_base = Arc::clone(&own_base);
        let router = Router::new()
            .route("/feeds/ios.xml", get(|| async { ota_feed() }))
            .route("/feeds/missing.xml", get(|| async { StatusCode::NOT_FOUND }))
            .route("/apps.plist", get(|| async { app_catalog() }))
            .route(
                "/catalog.sucatalog",
                get(move || {
                    let base = catalog_base.get().cloned().unwrap_or_default();
                    async move { software_catalog(&base) }
                }),
            )
            .route(
                "/su/041-1/macOSUpd10.13.6.smd",
                get(|| async {
                    plist_xml(
                        "<dict><key>CFBundleShortVersionString</key><string>10.13.6</string></dict>",
                    )
                }),
            )
            .route("/su/041-1/FirmwareUpdate.pkg", get(|| async { "fw" }))
            .route(
                "/api/:model/latest/url",
                get(|UrlPath(model): UrlPath<String>| async move {
                    if model.starts_with("Unknown") {
                        return Err(StatusCode::NOT_FOUND);
                    }
                    Ok(format!("http://updates.cdn-apple.com/fw/{model}.ipsw\n"))
                }),
            )
            .route("/api/:model/latest/version", get(|| async { "12.1.4" }))
            .route("/ios/update-a.zip", get(|| async { zip_body(true) }))
            .route("/tv/update-b.zip", get(|| async { zip_body(false) }))
            .route("/fw/:file", get(|| async { zip_body(true) }));
        let base = test_server::spawn(router);
        own_base.set(base.clone()).unwrap();
        base
    }

    fn config(base: &str) -> Config {
        Config {
            min_wait_time: 0,
            max_wait_time: 0,
            max_retries: 1,
            ota_feeds: vec![
                format!("{base}/feeds/ios.xml"),
                format!("{base}/feeds/ios.xml"),
                format!("{base}/feeds/missing.xml"),
            ],
            app_catalog_url: format!("{base}/apps.plist"),
            software_catalog_url: format!("{base}/catalog.sucatalog"),
            firmware_api_base: format!("{base}/api"),
            ..Config::default()
        }
    }

    fn session(base: &str, cfg: Config) -> Precache {
        let mut precache = Precache::new(cfg, base).unwrap();
        precache.ingest();
        precache
    }

    #[test]
    fn repeated_feed_is_deduplicated() {
        let base = spawn_upstream();
        let mut precache = Precache::new(config(&base), &base).unwrap();
        let report = precache.ingest();

        assert_eq!(report.feeds[0].registered, 2);
        assert_eq!(report.feeds[1].registered, 0);
        assert!(report.feeds[1].error.is_none());
        let failed: Vec<_> = report.failed().collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].feed.ends_with("/feeds/missing.xml"));

        let iphone = precache
            .registry
            .assets()
            .iter()
            .filter(|a| a.model == "iPhone10,3")
            .count();
        assert_eq!(iphone, 1);

        let listing = precache.list_assets(&[AssetGroup::IPhone]);
        assert_eq!(listing, vec![(AssetGroup::IPhone, vec!["iPhone10,3".to_string()])]);
    }

    #[test]
    fn ingests_app_catalog_and_software_updates() {
        let base = spawn_upstream();
        let precache = session(&base, config(&base));
        let assets = precache.registry.assets();

        let xcode = assets.iter().find(|a| a.model == "Xcode").unwrap();
        assert_eq!(xcode.group, AssetGroup::App);
        assert!(xcode.url.ends_with("/apps/Xcode.pkg?source=osxapps.itunes.apple.com"));

        let updates: Vec<&str> = assets
            .iter()
            .filter(|a| a.group == AssetGroup::Updates)
            .map(|a| a.model.as_str())
            .collect();
        assert_eq!(
            updates,
            vec!["macOSUpd10.13.6-Firmware", "macOSUpd10.13.6"]
        );
        assert!(
            assets
                .iter()
                .filter(|a| a.group == AssetGroup::Updates)
                .all(|a| a.version == "10.13.6")
        );
    }

    #[test]
    fn caches_selected_assets_once() {
        let base = spawn_upstream();
        let precache = session(&base, config(&base));

        let summary = precache.cache_assets(
            &["iPhone10,3".to_string(), "Nope1,1".to_string()],
            &[AssetGroup::IPhone, AssetGroup::AppleTv],
        );
        assert_eq!(summary.reports.len(), 2);
        assert_eq!(summary.done(), 1);
        assert_eq!(summary.reports[0].asset.model, "iPhone10,3");
        assert_eq!(
            summary.reports[1].state,
            DownloadState::Skipped(SkipReason::CachedUpstream)
        );
    }

    #[test]
    fn dry_run_reports_without_downloading() {
        let base = spawn_upstream();
        let cfg = Config {
            dry_run: true,
            ..config(&base)
        };
        let precache = session(&base, cfg);

        let summary = precache.cache_assets(&[], &[AssetGroup::IPhone, AssetGroup::App]);
        assert_eq!(summary.reports.len(), 2);
        assert!(
            summary
                .reports
                .iter()
                .all(|r| r.state == DownloadState::Skipped(SkipReason::DryRun))
        );
    }

    #[test]
    fn firmware_by_model_and_group_is_saved() {
        let base = spawn_upstream();
        let mut precache = session(&base, config(&base));
        let out = tempfile::tempdir().unwrap();

        let summary = precache.cache_firmware(
            &["iPhone10,3".to_string()],
            &[AssetGroup::AppleTv],
            out.path(),
        );
        assert_eq!(summary.done(), 2);
        assert_eq!(precache.registry.firmware().len(), 2);
        assert!(out.path().join("iPhone10,3.ipsw").exists());
        assert!(out.path().join("AppleTV5,3.ipsw").exists());

        // 再次调用先清空上一次的固件列表
        let summary = precache.cache_firmware(&["iPhone10,3".to_string()], &[], out.path());
        assert_eq!(summary.reports.len(), 1);
        assert_eq!(precache.registry.firmware().len(), 1);
    }

    #[test]
    fn failed_firmware_lookup_skips_only_that_model() {
        let base = spawn_upstream();
        let mut precache = session(&base, config(&base));
        let out = tempfile::tempdir().unwrap();

        let summary = precache.cache_firmware(
            &["Unknown9,9".to_string(), "iPhone10,3".to_string()],
            &[],
            out.path(),
        );
        assert_eq!(summary.reports.len(), 1);
        assert_eq!(summary.done(), 1);
        let firmware = precache.registry.firmware();
        assert_eq!(firmware.len(), 1);
        assert_eq!(firmware[0].model, "iPhone10,3");
        assert!(out.path().join("iPhone10,3.ipsw").exists());
        assert!(!out.path().join("Unknown9,9.ipsw").exists());
    }
}
