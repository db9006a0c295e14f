//! 上游清单解析。
//!
//! 每种清单一个子模块，统一把 plist/文本解码成中间记录；是否登记由
//! [`eligibility`] 中的纯函数判断，登记本身交给 `asset::registry`。

pub mod app_catalog;
pub mod eligibility;
pub mod firmware;
pub mod ota;
pub mod sucatalog;

use std::io::Cursor;

use plist::{Dictionary, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("plist 解析失败: {0}")]
    Plist(#[from] plist::Error),
    #[error("缺少字段 `{0}`")]
    MissingField(&'static str),
    #[error("字段 `{field}` 类型不符，期望 {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
}

pub(crate) fn read_plist(bytes: &[u8]) -> Result<Value, ParseError> {
    Ok(Value::from_reader(Cursor::new(bytes))?)
}

pub(crate) fn root_dict(value: &Value) -> Result<&Dictionary, ParseError> {
    value.as_dictionary().ok_or(ParseError::WrongType {
        field: "<root>",
        expected: "dict",
    })
}

pub(crate) fn dict_field<'a>(
    dict: &'a Dictionary,
    field: &'static str,
) -> Result<&'a Dictionary, ParseError> {
    dict.get(field)
        .ok_or(ParseError::MissingField(field))?
        .as_dictionary()
        .ok_or(ParseError::WrongType {
            field,
            expected: "dict",
        })
}

pub(crate) fn array_field<'a>(
    dict: &'a Dictionary,
    field: &'static str,
) -> Result<&'a [Value], ParseError> {
    dict.get(field)
        .ok_or(ParseError::MissingField(field))?
        .as_array()
        .map(Vec::as_slice)
        .ok_or(ParseError::WrongType {
            field,
            expected: "array",
        })
}

/// 取字符串字段；空白字符串按缺失处理。
pub(crate) fn opt_string(dict: &Dictionary, field: &str) -> Option<String> {
    dict.get(field)
        .and_then(Value::as_string)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
pub(crate) fn plist_xml(body: &str) -> Vec<u8> {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
{body}
</plist>"#
    )
    .into_bytes()
}
