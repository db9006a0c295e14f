//! 命令行输出与输入文件读取。

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::asset::models::AssetGroup;
use crate::download::models::{DownloadState, RunSummary};
use crate::download::progress::human_size;
use crate::precache::IngestReport;

/// 读取型号列表文件：每行一个型号，`#` 之后为注释，空行忽略。
pub fn read_models_file(path: &Path) -> Result<Vec<String>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("读取型号列表失败: {}", path.display()))?;
    Ok(parse_models(&text))
}

fn parse_models(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// 指定了分组时只列型号；否则按展示顺序逐组列出。
pub fn render_listing(listing: &[(AssetGroup, Vec<String>)], filtered: bool) -> String {
    let mut out = String::new();
    for (group, models) in listing {
        if !filtered {
            out.push_str(&format!("Group: {group}\n"));
        }
        for model in models {
            if filtered {
                out.push_str(&format!("{model}\n"));
            } else {
                out.push_str(&format!("  {model}\n"));
            }
        }
    }
    out
}

pub fn print_listing(listing: &[(AssetGroup, Vec<String>)], filtered: bool) {
    print!("{}", render_listing(listing, filtered));
}

pub fn render_ingest_report(report: &IngestReport) -> String {
    let mut out = format!("已登记资源: {}\n", report.total_assets);
    for feed in &report.feeds {
        if feed.error.is_none() {
            out.push_str(&format!("  {} (+{})\n", feed.feed, feed.registered));
        }
    }
    for feed in report.failed() {
        out.push_str(&format!(
            "  清单不可用: {} ({})\n",
            feed.feed,
            feed.error.as_deref().unwrap_or_default()
        ));
    }
    out
}

pub fn print_ingest_report(report: &IngestReport) {
    print!("{}", render_ingest_report(report));
}

pub fn render_summary(label: &str, summary: &RunSummary) -> String {
    let mut out = format!(
        "{label}: 完成 {}，跳过 {}，失败 {}，共传输 {}\n",
        summary.done(),
        summary.skipped(),
        summary.failed(),
        human_size(summary.bytes())
    );
    for report in &summary.reports {
        let line = match &report.state {
            DownloadState::Skipped(reason) => {
                format!("  Skipped: {} ({}) - {}", report.asset.model, report.asset.version, reason)
            }
            DownloadState::Failed(reason) => {
                format!("  Failed: {} ({}) - {}", report.asset.model, report.asset.version, reason)
            }
            DownloadState::Done => match &report.saved_to {
                Some(path) => format!(
                    "  Cached: {} ({}) -> {}",
                    report.asset.model,
                    report.asset.version,
                    path.display()
                ),
                None => format!("  Cached: {} ({})", report.asset.model, report.asset.version),
            },
            _ => continue,
        };
        out.push_str(&line);
        out.push('\n');
    }
    if summary.interrupted {
        out.push_str("已中断，剩余资源未处理\n");
    }
    out
}

pub fn print_summary(label: &str, summary: &RunSummary) {
    print!("{}", render_summary(label, summary));
}
