//! 统一的资源模型。
//!
//! 各个上游清单解析后都落到 [`Asset`]，下载与列表只认这一种结构。

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// 资源分组（固定枚举）。字符串形式与上游/命令行使用的拼写完全一致。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AssetGroup {
    AppleTv,
    IPad,
    IPhone,
    IPod,
    Watch,
    App,
    Installer,
    Updates,
    Firmware,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("未知分组: {0}")]
pub struct UnknownGroup(pub String);

impl AssetGroup {
    pub const ALL: [AssetGroup; 9] = [
        AssetGroup::AppleTv,
        AssetGroup::IPad,
        AssetGroup::IPhone,
        AssetGroup::IPod,
        AssetGroup::Watch,
        AssetGroup::App,
        AssetGroup::Installer,
        AssetGroup::Updates,
        AssetGroup::Firmware,
    ];

    /// `--list` 的展示顺序（固件不预先枚举，不在其中）。
    pub const DISPLAY_ORDER: [AssetGroup; 8] = [
        AssetGroup::AppleTv,
        AssetGroup::IPad,
        AssetGroup::IPhone,
        AssetGroup::IPod,
        AssetGroup::Watch,
        AssetGroup::App,
        AssetGroup::Installer,
        AssetGroup::Updates,
    ];

    /// 可以按分组查询固件的设备类别。
    pub const DEVICE_GROUPS: [AssetGroup; 5] = [
        AssetGroup::AppleTv,
        AssetGroup::IPad,
        AssetGroup::IPhone,
        AssetGroup::IPod,
        AssetGroup::Watch,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AssetGroup::AppleTv => "AppleTV",
            AssetGroup::IPad => "iPad",
            AssetGroup::IPhone => "iPhone",
            AssetGroup::IPod => "iPod",
            AssetGroup::Watch => "Watch",
            AssetGroup::App => "app",
            AssetGroup::Installer => "installer",
            AssetGroup::Updates => "updates",
            AssetGroup::Firmware => "firmware",
        }
    }

    pub fn is_device(self) -> bool {
        Self::DEVICE_GROUPS.contains(&self)
    }
}

impl fmt::Display for AssetGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetGroup {
    type Err = UnknownGroup;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|g| g.as_str() == trimmed)
            .ok_or_else(|| UnknownGroup(trimmed.to_string()))
    }
}

/// 一条可下载资源。构造时 `url` 已经改写为经缓存服务器的地址。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Asset {
    pub model: String,
    pub version: String,
    pub url: String,
    pub group: AssetGroup,
}

impl Asset {
    /// URL 路径最后一段（去掉查询串），作为本地文件名。
    pub fn file_name(&self) -> Option<&str> {
        let path = self.url.split(['?', '#']).next().unwrap_or_default();
        path.rsplit('/').next().filter(|s| !s.is_empty())
    }
}
