//! 全局配置结构（Config）与默认值。
//!
//! 该模块同时提供生成 `precache.yml` 的字段元信息。

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::{ConfigSpec, FieldMeta};
use crate::asset::models::AssetGroup;

/// 未探测到缓存服务器时的回退地址。
pub const FALLBACK_CACHE_SERVER: &str = "http://localhost:49672";

const MESU_ASSETS: &str = "http://mesu.apple.com/assets";
const MOBILE_ASSET_PATH: &str =
    "com_apple_MobileAsset_SoftwareUpdate/com_apple_MobileAsset_SoftwareUpdate.xml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // 缓存服务器
    #[serde(default)]
    pub cache_server: String,
    #[serde(default = "default_false")]
    pub dry_run: bool,
    #[serde(default)]
    pub output_dir: String,

    // 网络配置
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default)]
    pub download_timeout: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_min_wait_time")]
    pub min_wait_time: u64,
    #[serde(default = "default_max_wait_time")]
    pub max_wait_time: u64,
    #[serde(default)]
    pub proxy: String,

    // 更新源
    #[serde(default = "default_ota_feeds")]
    pub ota_feeds: Vec<String>,
    #[serde(default = "default_app_catalog_url")]
    pub app_catalog_url: String,
    #[serde(default = "default_software_catalog_url")]
    pub software_catalog_url: String,
    #[serde(default = "default_firmware_api_base")]
    pub firmware_api_base: String,

    // 各分组下载时使用的 User-Agent
    #[serde(default = "default_user_agents")]
    pub user_agents: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_server: String::new(),
            dry_run: default_false(),
            output_dir: String::new(),
            request_timeout: default_request_timeout(),
            download_timeout: 0,
            connect_timeout: default_connect_timeout(),
            max_retries: default_max_retries(),
            min_wait_time: default_min_wait_time(),
            max_wait_time: default_max_wait_time(),
            proxy: String::new(),
            ota_feeds: default_ota_feeds(),
            app_catalog_url: default_app_catalog_url(),
            software_catalog_url: default_software_catalog_url(),
            firmware_api_base: default_firmware_api_base(),
            user_agents: default_user_agents(),
        }
    }
}

impl ConfigSpec for Config {
    const FILE_NAME: &'static str = "precache.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 15] = [
            FieldMeta {
                name: "cache_server",
                description: "缓存服务器地址（如 http://10.0.0.2:49672），留空使用 http://localhost:49672",
            },
            FieldMeta {
                name: "dry_run",
                description: "仅显示将要缓存的内容，不发起下载",
            },
            FieldMeta {
                name: "output_dir",
                description: "固件（IPSW）保存目录，留空使用系统临时目录下的 precache",
            },
            FieldMeta {
                name: "request_timeout",
                description: "清单/元数据请求超时时间（秒）",
            },
            FieldMeta {
                name: "download_timeout",
                description: "单个资源下载的总超时（秒），0 表示不限制",
            },
            FieldMeta {
                name: "connect_timeout",
                description: "连接超时时间（秒）",
            },
            FieldMeta {
                name: "max_retries",
                description: "网络请求最大尝试次数",
            },
            FieldMeta {
                name: "min_wait_time",
                description: "两次请求之间的最小随机间隔, 单位ms",
            },
            FieldMeta {
                name: "max_wait_time",
                description: "两次请求之间的最大随机间隔, 单位ms",
            },
            FieldMeta {
                name: "proxy",
                description: "HTTP 代理（如 http://127.0.0.1:8080），留空不使用",
            },
            FieldMeta {
                name: "ota_feeds",
                description: "OTA 更新清单地址（按顺序处理）",
            },
            FieldMeta {
                name: "app_catalog_url",
                description: "可缓存应用列表（plist）地址",
            },
            FieldMeta {
                name: "software_catalog_url",
                description: "macOS 软件更新目录（sucatalog）地址",
            },
            FieldMeta {
                name: "firmware_api_base",
                description: "固件查询接口前缀",
            },
            FieldMeta {
                name: "user_agents",
                description: "按分组指定下载时的 User-Agent",
            },
        ];
        &FIELDS
    }

    fn validate(&self) -> Result<(), String> {
        if self.max_wait_time < self.min_wait_time {
            return Err(format!(
                "max_wait_time ({}) 不能小于 min_wait_time ({})",
                self.max_wait_time, self.min_wait_time
            ));
        }
        if self.ota_feeds.iter().any(|f| f.trim().is_empty()) {
            return Err("ota_feeds 中存在空地址".to_string());
        }
        if self.max_retries == 0 {
            return Err("max_retries 至少为 1".to_string());
        }
        Ok(())
    }
}

impl Config {
    pub fn cache_server_url(&self) -> &str {
        let trimmed = self.cache_server.trim();
        if trimmed.is_empty() {
            FALLBACK_CACHE_SERVER
        } else {
            trimmed
        }
    }

    pub fn output_dir_path(&self) -> PathBuf {
        if self.output_dir.trim().is_empty() {
            std::env::temp_dir().join("precache")
        } else {
            PathBuf::from(self.output_dir.trim())
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout.max(1))
    }

    pub fn download_timeout(&self) -> Option<Duration> {
        (self.download_timeout > 0).then(|| Duration::from_secs(self.download_timeout))
    }

    pub fn connect_timeout(&self) -> Duration {
        if self.connect_timeout <= 0.0 {
            return Duration::from_secs(5);
        }
        Duration::from_millis((self.connect_timeout * 1000.0).round() as u64)
    }

    pub fn proxy(&self) -> Option<&str> {
        Some(self.proxy.trim()).filter(|p| !p.is_empty())
    }

    pub fn user_agent_for(&self, group: AssetGroup) -> Option<&str> {
        self.user_agents
            .get(group.as_str())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }
}

fn default_false() -> bool {
    false
}

fn default_request_timeout() -> u64 {
    15
}

fn default_connect_timeout() -> f64 {
    5.0
}

fn default_max_retries() -> u32 {
    3
}

fn default_min_wait_time() -> u64 {
    1000
}

fn default_max_wait_time() -> u64 {
    5000
}

fn default_ota_feeds() -> Vec<String> {
    vec![
        format!("{MESU_ASSETS}/watch/{MOBILE_ASSET_PATH}"),
        format!("{MESU_ASSETS}/tv/{MOBILE_ASSET_PATH}"),
        format!("{MESU_ASSETS}/{MOBILE_ASSET_PATH}"),
    ]
}

fn default_app_catalog_url() -> String {
    "https://raw.githubusercontent.com/primalcurve/precache/master/com.github.krypted.precache.apps-list.plist".to_string()
}

fn default_software_catalog_url() -> String {
    "https://swscan.apple.com/content/catalogs/others/index-10.14-10.13-10.12-10.11-10.10-10.9-mountainlion-lion-snowleopard-leopard.merged-1.sucatalog".to_string()
}

fn default_firmware_api_base() -> String {
    "https://api.ipsw.me/v2.1".to_string()
}

fn default_user_agents() -> BTreeMap<String, String> {
    let store = "MacAppStore/3.0 (Macintosh; OS X 10.14.6; 18G103) AppleWebKit/14607.3.9";
    let device = "com.apple.appstored";
    BTreeMap::from([
        (AssetGroup::App.as_str().to_string(), store.to_string()),
        (AssetGroup::Installer.as_str().to_string(), store.to_string()),
        (
            AssetGroup::Updates.as_str().to_string(),
            "Software%20Update (unknown version) CFNetwork/978.0.7 Darwin/18.7.0 (x86_64)"
                .to_string(),
        ),
        (
            AssetGroup::Firmware.as_str().to_string(),
            "com.apple.appstored iOS/12.1.4".to_string(),
        ),
        (AssetGroup::Watch.as_str().to_string(), device.to_string()),
        (AssetGroup::AppleTv.as_str().to_string(), device.to_string()),
        (AssetGroup::IPad.as_str().to_string(), device.to_string()),
        (AssetGroup::IPhone.as_str().to_string(), device.to_string()),
        (AssetGroup::IPod.as_str().to_string(), device.to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cache_server_falls_back() {
        let cfg = Config::default();
        assert_eq!(cfg.cache_server_url(), FALLBACK_CACHE_SERVER);

        let cfg = Config {
            cache_server: " http://10.0.0.2:49672 ".to_string(),
            ..Config::default()
        };
        assert_eq!(cfg.cache_server_url(), "http://10.0.0.2:49672");
    }

    #[test]
    fn wait_range_must_be_ordered() {
        let cfg = Config {
            min_wait_time: 500,
            max_wait_time: 100,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn every_group_has_a_default_user_agent() {
        let cfg = Config::default();
        for group in AssetGroup::ALL {
            assert!(cfg.user_agent_for(group).is_some(), "{group} 缺少 UA");
        }
    }

    #[test]
    fn zero_download_timeout_means_unbounded() {
        let cfg = Config::default();
        assert_eq!(cfg.download_timeout(), None);
        let cfg = Config {
            download_timeout: 30,
            ..Config::default()
        };
        assert_eq!(cfg.download_timeout(), Some(Duration::from_secs(30)));
    }
}
