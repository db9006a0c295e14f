//! OTA 条目的资格判断。都是纯函数，输入是解码后的 [`OtaRecord`]。

use crate::asset::models::AssetGroup;

pub use crate::asset::version::extract_numeric_version;

/// OTA 清单里一个 `Assets` 条目中我们关心的字段。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OtaRecord {
    pub release_type: Option<String>,
    pub supported_devices: Vec<String>,
    pub real_update_url: Option<String>,
    pub base_url: Option<String>,
    pub relative_path: Option<String>,
    pub os_version: Option<String>,
    pub can_use_local_cache: Option<bool>,
}

impl OtaRecord {
    pub fn device(&self) -> Option<&str> {
        self.supported_devices.first().map(String::as_str)
    }

    /// 优先 `RealUpdateURL`，否则拼接 `__BaseURL + __RelativePath`。
    pub fn asset_url(&self) -> Option<String> {
        if let Some(url) = self.real_update_url.as_deref() {
            return Some(url.to_string());
        }
        match (self.base_url.as_deref(), self.relative_path.as_deref()) {
            (Some(base), Some(rel)) => Some(format!("{base}{rel}")),
            _ => None,
        }
    }
}

/// 设备标识子串 → 分组。按顺序匹配，先命中者生效。
pub const CATEGORY_TABLE: [(&str, AssetGroup); 5] = [
    ("Watch", AssetGroup::Watch),
    ("TV", AssetGroup::AppleTv),
    ("iPad", AssetGroup::IPad),
    ("iPhone", AssetGroup::IPhone),
    ("iPod", AssetGroup::IPod),
];

/// `ReleaseType` 含 `Beta`（包括 `PublicBeta`）。
pub fn is_beta(record: &OtaRecord) -> bool {
    record
        .release_type
        .as_deref()
        .is_some_and(|t| t.contains("Beta"))
}

/// 只有显式为 true 才算可缓存。
pub fn is_cacheable(record: &OtaRecord) -> bool {
    record.can_use_local_cache == Some(true)
}

pub fn is_malformed_version(version: &str) -> bool {
    version.chars().any(char::is_alphabetic)
}

pub fn infer_category(device: &str) -> Option<AssetGroup> {
    CATEGORY_TABLE
        .iter()
        .find(|(needle, _)| device.contains(needle))
        .map(|(_, group)| *group)
}
