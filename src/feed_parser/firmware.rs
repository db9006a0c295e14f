//! 固件查询接口：`<base>/<model>/latest/url` 与 `<base>/<model>/latest/version`，
//! 两者都返回纯文本。

use super::ParseError;

pub fn latest_url_endpoint(api_base: &str, model: &str) -> String {
    format!("{}/{}/latest/url", api_base.trim_end_matches('/'), model.trim())
}

pub fn latest_version_endpoint(api_base: &str, model: &str) -> String {
    format!(
        "{}/{}/latest/version",
        api_base.trim_end_matches('/'),
        model.trim()
    )
}

/// 纯文本响应去掉首尾空白，空响应视为缺失。
pub fn parse_plain(body: &str, field: &'static str) -> Result<String, ParseError> {
    let value = body.trim();
    if value.is_empty() {
        return Err(ParseError::MissingField(field));
    }
    Ok(value.to_string())
}
