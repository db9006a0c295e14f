//! macOS 软件更新目录（swscan `.sucatalog`）。
//!
//! 目录结构为 `Products → <id> → Packages[] → URL`。这里只做纯解析与筛选，
//! 拉取 `.smd` sidecar 和探测同目录附属包由调用方完成。

use plist::Value;
use tracing::debug;

use super::eligibility::{extract_numeric_version, is_malformed_version};
use super::{ParseError, dict_field, opt_string, read_plist, root_dict};

const SEED_KEYWORDS: [&str; 3] = ["TechPreview", "ForSeed", "Beta"];

/// 可缓存的更新包前缀及其最低版本。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateProduct {
    pub prefix: &'static str,
    pub floor: &'static str,
    pub has_siblings: bool,
}

pub const PRODUCTS: [UpdateProduct; 2] = [
    UpdateProduct {
        prefix: "macOSUpd",
        floor: "10.12.0",
        has_siblings: true,
    },
    UpdateProduct {
        prefix: "OSXUpd",
        floor: "10.11.6",
        has_siblings: false,
    },
];

const SIBLINGS: [(&str, &str); 2] = [
    ("Firmware", "FirmwareUpdate.pkg"),
    ("FullBundle", "FullBundleUpdate.pkg"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageCandidate {
    pub url: String,
    pub basename: String,
    pub sidecar_url: String,
    pub product: UpdateProduct,
}

/// 目录中的全部包地址，按产品出现顺序。缺少 `Packages` 的产品忽略。
pub fn parse_catalog(bytes: &[u8]) -> Result<Vec<String>, ParseError> {
    let value = read_plist(bytes)?;
    let root = root_dict(&value)?;
    let products = dict_field(root, "Products")?;

    let urls = products
        .values()
        .filter_map(Value::as_dictionary)
        .filter_map(|product| product.get("Packages").and_then(Value::as_array))
        .flatten()
        .filter_map(Value::as_dictionary)
        .filter_map(|pkg| opt_string(pkg, "URL"))
        .collect();
    Ok(urls)
}

/// 包地址 → 候选项。前缀不认识或文件名带预览/种子关键字的返回 `None`。
pub fn candidate(package_url: &str) -> Option<PackageCandidate> {
    let (stem_url, basename) = split_package_url(package_url)?;
    if SEED_KEYWORDS.iter().any(|k| basename.contains(k)) {
        return None;
    }
    let product = PRODUCTS
        .iter()
        .find(|p| basename.starts_with(p.prefix))
        .copied()?;

    Some(PackageCandidate {
        url: package_url.to_string(),
        basename: basename.to_string(),
        sidecar_url: format!("{stem_url}.smd"),
        product,
    })
}

/// 返回 (去掉扩展名的完整地址, 文件名主干)。
fn split_package_url(url: &str) -> Option<(&str, &str)> {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let (dir, file) = path.rsplit_once('/')?;
    let stem = match file.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem,
        _ => file,
    };
    if stem.is_empty() {
        return None;
    }
    let stem_url_len = dir.len() + 1 + stem.len();
    Some((&path[..stem_url_len], stem))
}

/// sidecar 中的 `CFBundleShortVersionString`。
pub fn parse_sidecar_version(bytes: &[u8]) -> Result<String, ParseError> {
    let value = read_plist(bytes)?;
    let root = root_dict(&value)?;
    opt_string(root, "CFBundleShortVersionString")
        .ok_or(ParseError::MissingField("CFBundleShortVersionString"))
}

/// 优先使用 sidecar 声明的版本；取不到或含数字与 `.` 以外的字符时退回文件名里最长的数字片段。
pub fn resolve_version(sidecar_version: Option<&str>, basename: &str) -> Option<String> {
    match sidecar_version.map(str::trim) {
        Some(v) if is_plain_numeric(v) => Some(v.trim_end_matches('.').to_string()),
        Some(v) => {
            let why = if is_malformed_version(v) {
                "含字母"
            } else {
                "含非数字字符"
            };
            debug!(target: "ingest", "{} 的声明版本 {:?} {}，改用文件名中的版本", basename, v, why);
            extract_numeric_version(basename)
        }
        None => extract_numeric_version(basename),
    }
}

fn is_plain_numeric(version: &str) -> bool {
    version.bytes().any(|b| b.is_ascii_digit())
        && version.bytes().all(|b| b.is_ascii_digit() || b == b'.')
}

impl PackageCandidate {
    /// 同目录下的附属包：(登记名, 地址)。只有 macOSUpd 有。
    pub fn siblings(&self) -> Vec<(String, String)> {
        if !self.product.has_siblings {
            return Vec::new();
        }
        let path = self.url.split(['?', '#']).next().unwrap_or_default();
        let Some((dir, _)) = path.rsplit_once('/') else {
            return Vec::new();
        };
        SIBLINGS
            .iter()
            .map(|(suffix, file)| {
                (
                    format!("{}-{}", self.basename, suffix),
                    format!("{dir}/{file}"),
                )
            })
            .collect()
    }
}
