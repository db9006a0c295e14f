//! Apple 软件更新预缓存工具。
//!
//! 汇总 OTA 清单、应用列表、macOS 软件更新目录与固件查询接口中的资源，
//! 把下载地址改写到局域网缓存服务器上并逐个拉取，让缓存服务器提前存好。
//!
//! 代码结构（读代码入口）：
//! - `base_system`：配置/日志/中断/请求节奏/缓存服务器校验
//! - `network_parser`：共用的 HTTP 客户端
//! - `feed_parser`：各类上游清单解析与资格判断
//! - `asset`：资源模型、登记表、版本与地址改写
//! - `download`：下载状态机与进度
//! - `precache`：主流程编排
//! - `ui`：命令行输出

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use clap::{CommandFactory, Parser};

mod asset;
mod base_system;
mod download;
mod feed_parser;
mod network_parser;
mod precache;
mod ui;

use asset::models::AssetGroup;
use base_system::cache_server::CacheServer;
use base_system::config::load_or_create;
use base_system::context::Config;
use base_system::logging::{LogOptions, LogSystem};
use precache::Precache;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "precache")]
#[command(about = "Precache Apple OTA updates, apps and installers on a local caching server")]
#[command(disable_version_flag = true)]
struct Cli {
    /// 列出可缓存的资源
    #[arg(
        short = 'l',
        long,
        default_value_t = false,
        conflicts_with_all = ["model", "models_file", "cache_group", "firmware", "cache_firmware_group"]
    )]
    list: bool,

    /// 列表只显示这些分组（配合 --list）
    #[arg(long, num_args = 1.., requires = "list")]
    filter_group: Vec<AssetGroup>,

    /// 按型号预缓存（如 iPhone10,3 AppleTV5,3 Xcode）
    #[arg(short = 'm', long, num_args = 1..)]
    model: Vec<String>,

    /// 从文件读取型号，每行一个，# 开头为注释
    #[arg(long)]
    models_file: Option<PathBuf>,

    /// 按分组预缓存（AppleTV iPad iPhone iPod Watch app installer updates）
    #[arg(short = 'g', long, num_args = 1..)]
    cache_group: Vec<AssetGroup>,

    /// 按型号下载最新固件
    #[arg(short = 'i', long, num_args = 1..)]
    firmware: Vec<String>,

    /// 按分组下载最新固件
    #[arg(long, num_args = 1..)]
    cache_firmware_group: Vec<AssetGroup>,

    /// 固件保存目录
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// 缓存服务器地址（如 http://10.0.0.2:49672）
    #[arg(short = 'c', long)]
    cache_server: Option<String>,

    /// 只显示将要缓存的资源，不下载
    #[arg(short = 'n', long, default_value_t = false)]
    dry_run: bool,

    /// 启用调试日志输出
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// 数据目录路径（用于存放 precache.yml 和 logs）
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// 显示版本信息后退出
    #[arg(short = 'v', long, default_value_t = false)]
    version: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("precache v{}", VERSION);
        return Ok(());
    }

    let data_dir = cli.data_dir.as_deref();
    let _log = init_logging(cli.debug, data_dir)?;

    let mut config =
        load_or_create::<Config>(None, data_dir).map_err(|e| anyhow!(e.to_string()))?;
    apply_overrides(&mut config, &cli);

    let mut models = cli.model.clone();
    if let Some(path) = cli.models_file.as_deref() {
        models.extend(ui::noui::read_models_file(path)?);
    }

    let wants_assets = !models.is_empty() || !cli.cache_group.is_empty();
    let wants_firmware = !cli.firmware.is_empty() || !cli.cache_firmware_group.is_empty();
    if !cli.list && !wants_assets && !wants_firmware {
        Cli::command().print_help()?;
        return Ok(());
    }

    let server = CacheServer::parse(config.cache_server_url())
        .and_then(|s| s.ensure_reachable(config.connect_timeout()).map(|()| s))
        .map_err(|e| {
            error!(target: "startup", "{}", e);
            e
        })?;

    println!("precache version {}", VERSION);
    println!("Caching Server: {}", server.base());
    println!("Processing feeds. This may take a few moments.");
    info!(target: "startup", "当前版本: v{}，缓存服务器: {}", VERSION, server.base());

    let output_dir = cli
        .output
        .clone()
        .unwrap_or_else(|| config.output_dir_path());
    let mut session = Precache::new(config, server.base())?;
    let report = session.ingest();
    ui::noui::print_ingest_report(&report);

    if cli.list {
        let listing = session.list_assets(&cli.filter_group);
        ui::noui::print_listing(&listing, !cli.filter_group.is_empty());
        return Ok(());
    }

    if wants_assets {
        let summary = session.cache_assets(&models, &cli.cache_group);
        ui::noui::print_summary("预缓存", &summary);
        if summary.interrupted {
            return Ok(());
        }
    }

    if wants_firmware {
        let summary =
            session.cache_firmware(&cli.firmware, &cli.cache_firmware_group, &output_dir);
        ui::noui::print_summary("固件", &summary);
    }

    Ok(())
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(server) = cli.cache_server.as_deref() {
        config.cache_server = server.trim().to_string();
    }
    if cli.dry_run {
        config.dry_run = true;
    }
    if let Some(output) = cli.output.as_deref() {
        config.output_dir = output.display().to_string();
    }
}

fn init_logging(debug: bool, base_dir: Option<&Path>) -> Result<LogSystem> {
    let opts = LogOptions {
        debug,
        use_color: true,
        archive_on_exit: true,
        console: true,
    };
    LogSystem::init_with_base(opts, base_dir).map_err(|e| anyhow!(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn list_conflicts_with_caching_flags() {
        assert!(Cli::try_parse_from(["precache", "--list", "-m", "iPhone10,3"]).is_err());
        assert!(Cli::try_parse_from(["precache", "--list", "--firmware", "iPad7,5"]).is_err());
        let cli =
            Cli::try_parse_from(["precache", "--list", "--filter-group", "iPhone", "app"]).unwrap();
        assert_eq!(cli.filter_group, vec![AssetGroup::IPhone, AssetGroup::App]);
    }

    #[test]
    fn unknown_group_is_rejected() {
        assert!(Cli::try_parse_from(["precache", "-g", "Mac"]).is_err());
    }

    #[test]
    fn overrides_replace_config_values() {
        let cli = Cli::try_parse_from([
            "precache",
            "-c",
            "http://10.0.0.2:49672",
            "--dry-run",
            "-g",
            "updates",
        ])
        .unwrap();
        let mut config = Config::default();
        apply_overrides(&mut config, &cli);
        assert_eq!(config.cache_server, "http://10.0.0.2:49672");
        assert!(config.dry_run);
        assert_eq!(cli.cache_group, vec![AssetGroup::Updates]);
    }
}
