//! 版本号处理：按分量整数比较，以及从文件名兜底提取数字版本。

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

static RE_NUMERIC_RUN: OnceLock<Regex> = OnceLock::new();

fn re_numeric_run() -> &'static Regex {
    RE_NUMERIC_RUN.get_or_init(|| Regex::new(r"[\d.]+").expect("compile RE_NUMERIC_RUN"))
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("无法解析版本号 `{0}`")]
pub struct VersionParseError(pub String);

/// 点分整数版本，比较时缺失的尾部分量按 0 处理（`10.12 == 10.12.0`）。
#[derive(Debug, Clone)]
pub struct DottedVersion {
    parts: Vec<u64>,
}

impl DottedVersion {
    fn significant(&self) -> &[u64] {
        let end = self
            .parts
            .iter()
            .rposition(|p| *p != 0)
            .map_or(0, |i| i + 1);
        &self.parts[..end]
    }
}

impl FromStr for DottedVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_end_matches('.');
        if trimmed.is_empty() {
            return Err(VersionParseError(s.to_string()));
        }
        let parts = trimmed
            .split('.')
            .map(|p| p.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| VersionParseError(s.to_string()))?;
        Ok(Self { parts })
    }
}

impl PartialEq for DottedVersion {
    fn eq(&self, other: &Self) -> bool {
        self.significant() == other.significant()
    }
}

impl Eq for DottedVersion {}

impl Ord for DottedVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            let a = self.parts.get(i).copied().unwrap_or(0);
            let b = other.parts.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                non_eq => return non_eq,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for DottedVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for DottedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .parts
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(".");
        f.write_str(&joined)
    }
}

/// `remote >= floor`，两边都必须是合法的点分整数版本。
pub fn meets_floor(remote: &str, floor: &str) -> Result<bool, VersionParseError> {
    let remote: DottedVersion = remote.parse()?;
    let floor: DottedVersion = floor.parse()?;
    Ok(remote >= floor)
}

/// 点分组件数量（`"9.9.10.1"` → 4）。
pub fn component_count(version: &str) -> usize {
    version.split('.').count()
}

/// 取文本中最长的数字/点连续片段，去掉首尾多余的点；长度相同时取靠前的一个。
pub fn extract_numeric_version(text: &str) -> Option<String> {
    let mut best: Option<&str> = None;
    for m in re_numeric_run().find_iter(text) {
        let run = m.as_str().trim_matches('.');
        if !run.chars().any(|c| c.is_ascii_digit()) {
            continue;
        }
        if best.is_none_or(|b| run.len() > b.len()) {
            best = Some(run);
        }
    }
    best.map(str::to_string)
}

/// 文件名/自然排序用的比较：数字片段按数值比较。
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut ai = a.chars().peekable();
    let mut bi = b.chars().peekable();
    loop {
        match (ai.peek().copied(), bi.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ca), Some(cb)) if ca.is_ascii_digit() && cb.is_ascii_digit() => {
                let na = take_number(&mut ai);
                let nb = take_number(&mut bi);
                let ord = na
                    .trim_start_matches('0')
                    .len()
                    .cmp(&nb.trim_start_matches('0').len())
                    .then_with(|| na.trim_start_matches('0').cmp(nb.trim_start_matches('0')));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(ca), Some(cb)) => {
                if ca != cb {
                    return ca.cmp(&cb);
                }
                ai.next();
                bi.next();
            }
        }
    }
}

fn take_number(it: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut out = String::new();
    while let Some(c) = it.peek().copied() {
        if !c.is_ascii_digit() {
            break;
        }
        out.push(c);
        it.next();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> DottedVersion {
        s.parse().unwrap()
    }

    #[test]
    fn compares_componentwise_not_lexically() {
        assert!(v("10.9.10") > v("10.9.2"));
        assert!(v("10.12.0") >= v("10.11.6"));
        assert!(v("10.11.5") < v("10.11.6"));
    }

    #[test]
    fn missing_trailing_components_count_as_zero() {
        assert_eq!(v("10.12"), v("10.12.0"));
        assert!(meets_floor("10.12", "10.12.0").unwrap());
    }

    #[test]
    fn floor_check_rejects_garbage() {
        assert!(meets_floor("10.12 beta", "10.12.0").is_err());
        assert!(meets_floor("", "10.12.0").is_err());
        assert!(!meets_floor("10.11.5", "10.11.6").unwrap());
    }

    #[test]
    fn trailing_dot_is_tolerated() {
        assert_eq!(v("10.13.6."), v("10.13.6"));
    }

    #[test]
    fn extracts_numeric_run() {
        assert_eq!(extract_numeric_version("10.12 beta").as_deref(), Some("10.12"));
        assert_eq!(
            extract_numeric_version("macOSUpd10.13.6").as_deref(),
            Some("10.13.6")
        );
        assert_eq!(
            extract_numeric_version("macOSUpdCombo10.12.6.").as_deref(),
            Some("10.12.6")
        );
        assert_eq!(
            extract_numeric_version("OSXUpd10.11.6Supp2").as_deref(),
            Some("10.11.6")
        );
        assert_eq!(extract_numeric_version("Update.pkg"), None);
    }

    #[test]
    fn counts_components() {
        assert_eq!(component_count("9.9.10.1"), 4);
        assert_eq!(component_count("12.1"), 2);
    }

    #[test]
    fn natural_order_puts_numbers_in_value_order() {
        let mut models = vec!["iPhone10,1", "iPhone9,1", "iPhone9,10", "iPad2,1"];
        models.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(models, vec!["iPad2,1", "iPhone9,1", "iPhone9,10", "iPhone10,1"]);
    }
}
