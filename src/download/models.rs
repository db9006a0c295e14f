//! 下载相关的数据模型：单个资源的状态、结果以及整批运行的汇总。

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::asset::models::Asset;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// 响应没有 `Content-Type`：缓存服务器已有该资源。
    CachedUpstream,
    IneligibleExtension,
    DryRun,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::CachedUpstream => "in cache",
            SkipReason::IneligibleExtension => "ineligible extension",
            SkipReason::DryRun => "dry run",
        })
    }
}

/// `Pending → ProbeCache → Streaming → Done`，`Skipped` / `Failed` 为另外两个终态。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadState {
    Pending,
    ProbeCache,
    Streaming,
    Done,
    Skipped(SkipReason),
    Failed(String),
}

impl DownloadState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadState::Done | DownloadState::Skipped(_) | DownloadState::Failed(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum FilesystemError {
    #[error("创建目录失败 {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("写入文件失败 {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("重命名失败 {from} -> {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub const INTERRUPTED: &str = "interrupted";

#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub asset: Asset,
    pub state: DownloadState,
    pub bytes: u64,
    pub saved_to: Option<PathBuf>,
}

impl DownloadReport {
    pub fn new(asset: &Asset) -> Self {
        Self {
            asset: asset.clone(),
            state: DownloadState::Pending,
            bytes: 0,
            saved_to: None,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(&self.state, DownloadState::Failed(reason) if reason == INTERRUPTED)
    }
}

/// 一次 `cache_assets` / `cache_firmware` 的汇总。
#[derive(Debug, Default)]
pub struct RunSummary {
    pub reports: Vec<DownloadReport>,
    pub interrupted: bool,
}

impl RunSummary {
    pub fn push(&mut self, report: DownloadReport) {
        if report.is_interrupted() {
            self.interrupted = true;
        }
        self.reports.push(report);
    }

    pub fn done(&self) -> usize {
        self.count(|s| matches!(s, DownloadState::Done))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, DownloadState::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, DownloadState::Failed(_)))
    }

    pub fn bytes(&self) -> u64 {
        self.reports.iter().map(|r| r.bytes).sum()
    }

    fn count(&self, pred: impl Fn(&DownloadState) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(&r.state)).count()
    }
}
