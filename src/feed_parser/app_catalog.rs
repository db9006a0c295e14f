//! 可缓存应用列表：`名称 → {version, url, type}` 形式的 plist 字典。

use plist::Value;
use tracing::warn;

use super::{ParseError, opt_string, read_plist, root_dict};
use crate::asset::models::AssetGroup;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppEntry {
    pub name: String,
    pub version: String,
    pub url: String,
    pub group: AssetGroup,
}

/// 文档本身损坏时返回错误；单个条目缺字段或分组未知只跳过该条目。
pub fn parse_app_catalog(bytes: &[u8]) -> Result<Vec<AppEntry>, ParseError> {
    let value = read_plist(bytes)?;
    let root = root_dict(&value)?;

    let mut entries = Vec::with_capacity(root.len());
    for (name, value) in root.iter() {
        match entry_from_value(name, value) {
            Ok(entry) => entries.push(entry),
            Err(reason) => warn!(target: "ingest", "应用列表条目 {} 无效，跳过: {}", name, reason),
        }
    }
    Ok(entries)
}

fn entry_from_value(name: &str, value: &Value) -> Result<AppEntry, String> {
    let dict = value
        .as_dictionary()
        .ok_or_else(|| "条目不是字典".to_string())?;
    let field = |key: &'static str| opt_string(dict, key).ok_or_else(|| format!("缺少 {key}"));

    let version = field("version")?;
    let url = field("url")?;
    let group = field("type")?
        .parse::<AssetGroup>()
        .map_err(|e| e.to_string())?;
    if group == AssetGroup::Firmware {
        return Err("firmware 只能通过固件接口登记".to_string());
    }

    Ok(AppEntry {
        name: name.trim().to_string(),
        version,
        url,
        group,
    })
}
