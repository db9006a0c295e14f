//! 下载进度文本与 CLI 进度条。

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::asset::models::Asset;

const SUFFIXES: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// 以 1024 为底、保留两位小数（`1536` → `1.50KB`）。
pub fn human_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    let mut idx = 0;
    while size > 1024.0 && idx < SUFFIXES.len() - 1 {
        size /= 1024.0;
        idx += 1;
    }
    format!("{:.2}{}", size, SUFFIXES[idx])
}

/// `Caching: <model> (<version>) [<pct>% of <size>]`；长度未知时只显示已下载量。
pub fn format_progress(model: &str, version: &str, downloaded: u64, total: Option<u64>) -> String {
    match total.filter(|t| *t > 0) {
        Some(total) => {
            let pct = downloaded as f64 / total as f64 * 100.0;
            format!(
                "Caching: {} ({}) [{:.2}% of {}]",
                model,
                version,
                pct,
                human_size(total)
            )
        }
        None => format!(
            "Caching: {} ({}) [{}]",
            model,
            version,
            human_size(downloaded)
        ),
    }
}

/// 单个资源的进度行，画在 stderr 上；非终端时不显示。
pub(crate) struct ProgressReporter<'a> {
    asset: &'a Asset,
    downloaded: u64,
    total: Option<u64>,
    bar: ProgressBar,
}

impl<'a> ProgressReporter<'a> {
    pub(crate) fn new(asset: &'a Asset, total: Option<u64>) -> Self {
        let bar = ProgressBar::with_draw_target(total, ProgressDrawTarget::stderr());
        bar.set_style(
            ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        let reporter = Self {
            asset,
            downloaded: 0,
            total,
            bar,
        };
        reporter.redraw();
        reporter
    }

    pub(crate) fn inc(&mut self, n: u64) {
        self.downloaded += n;
        self.bar.inc(n);
        self.redraw();
    }

    fn redraw(&self) {
        self.bar.set_message(format_progress(
            &self.asset.model,
            &self.asset.version,
            self.downloaded,
            self.total,
        ));
    }

    pub(crate) fn finish(self) {
        self.bar.finish_and_clear();
    }
}
