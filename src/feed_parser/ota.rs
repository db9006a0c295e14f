//! OTA 更新清单（mesu `com_apple_MobileAsset_SoftwareUpdate.xml`）。

use plist::{Dictionary, Value};
use tracing::debug;

use super::eligibility::{OtaRecord, infer_category, is_beta, is_cacheable};
use super::{ParseError, array_field, opt_string, read_plist, root_dict};
use crate::asset::models::AssetGroup;
use crate::asset::version::component_count;

/// 通过全部检查、可以登记的一条 OTA 资源（URL 仍是源站地址）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaAsset {
    pub model: String,
    pub version: String,
    pub url: String,
    pub group: AssetGroup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Beta,
    NoDevice,
    NoUrl,
    NoVersion,
    UnknownCategory,
    TooManyComponents,
    NotCacheable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtaDecision {
    Accept(OtaAsset),
    Reject(RejectReason),
}

/// 解码整个清单；`Assets` 中不是字典的元素直接忽略。
pub fn parse_ota_manifest(bytes: &[u8]) -> Result<Vec<OtaRecord>, ParseError> {
    let value = read_plist(bytes)?;
    let root = root_dict(&value)?;
    let items = array_field(root, "Assets")?;
    Ok(items
        .iter()
        .filter_map(Value::as_dictionary)
        .map(record_from_dict)
        .collect())
}

fn record_from_dict(dict: &Dictionary) -> OtaRecord {
    let supported_devices = dict
        .get("SupportedDevices")
        .and_then(Value::as_array)
        .map(|devices| {
            devices
                .iter()
                .filter_map(Value::as_string)
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let real_update_url = dict
        .get("RealUpdateAttributes")
        .and_then(Value::as_dictionary)
        .and_then(|attrs| opt_string(attrs, "RealUpdateURL"));

    OtaRecord {
        release_type: opt_string(dict, "ReleaseType"),
        supported_devices,
        real_update_url,
        base_url: opt_string(dict, "__BaseURL"),
        relative_path: opt_string(dict, "__RelativePath"),
        os_version: opt_string(dict, "OSVersion"),
        can_use_local_cache: dict
            .get("__CanUseLocalCacheServer")
            .and_then(Value::as_boolean),
    }
}

/// 按固定顺序检查一条记录，第一个不满足的条件即为拒绝原因。
///
/// 9.9.x.y 这类四段版本是 iOS 10 的过渡包，体积大且不会被设备请求，
/// 除 Watch 外一律不要。
pub fn evaluate(record: &OtaRecord) -> OtaDecision {
    if is_beta(record) {
        return OtaDecision::Reject(RejectReason::Beta);
    }
    let Some(device) = record.device() else {
        return OtaDecision::Reject(RejectReason::NoDevice);
    };
    let Some(url) = record.asset_url() else {
        return OtaDecision::Reject(RejectReason::NoUrl);
    };
    let Some(version) = record.os_version.as_deref() else {
        return OtaDecision::Reject(RejectReason::NoVersion);
    };
    let Some(group) = infer_category(device) else {
        debug!(target: "ingest", "无法识别设备类别: {}", device);
        return OtaDecision::Reject(RejectReason::UnknownCategory);
    };
    let is_watch = group == AssetGroup::Watch;
    if component_count(version) >= 4 && !is_watch {
        return OtaDecision::Reject(RejectReason::TooManyComponents);
    }
    if !is_watch && !is_cacheable(record) {
        return OtaDecision::Reject(RejectReason::NotCacheable);
    }

    OtaDecision::Accept(OtaAsset {
        model: device.to_string(),
        version: version.to_string(),
        url,
        group,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed_parser::plist_xml;

    fn item(release: &str, device: &str, version: &str, cacheable: bool) -> String {
        format!(
            r#"<dict>
  <key>ReleaseType</key><string>{release}</string>
  <key>SupportedDevices</key><array><string>{device}</string></array>
  <key>__BaseURL</key><string>http://appldnld.apple.com/</string>
  <key>__RelativePath</key><string>ios/{device}/{version}.zip</string>
  <key>OSVersion</key><string>{version}</string>
  <key>__CanUseLocalCacheServer</key><{cacheable}/>
</dict>"#
        )
    }

    fn manifest(items: &[String]) -> Vec<u8> {
        plist_xml(&format!(
            "<dict><key>Assets</key><array>{}</array></dict>",
            items.concat()
        ))
    }

    fn decisions(items: &[String]) -> Vec<OtaDecision> {
        parse_ota_manifest(&manifest(items))
            .unwrap()
            .iter()
            .map(evaluate)
            .collect()
    }

    #[test]
    fn decodes_record_fields() {
        let records = parse_ota_manifest(&manifest(&[item("Public", "iPhone9,1", "12.1", true)]))
            .unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.device(), Some("iPhone9,1"));
        assert_eq!(r.os_version.as_deref(), Some("12.1"));
        assert_eq!(r.can_use_local_cache, Some(true));
        assert_eq!(
            r.asset_url().as_deref(),
            Some("http://appldnld.apple.com/ios/iPhone9,1/12.1.zip")
        );
    }

    #[test]
    fn accepts_cacheable_release() {
        let d = decisions(&[item("Public", "iPad7,5", "12.1", true)]);
        match &d[0] {
            OtaDecision::Accept(a) => {
                assert_eq!(a.model, "iPad7,5");
                assert_eq!(a.version, "12.1");
                assert_eq!(a.group, AssetGroup::IPad);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn betas_are_excluded_even_for_watch() {
        let d = decisions(&[
            item("Beta", "iPhone9,1", "12.2", true),
            item("PublicBeta", "iPhone9,1", "12.2", true),
            item("Beta", "Watch3,4", "5.2", false),
        ]);
        assert!(
            d.iter()
                .all(|x| *x == OtaDecision::Reject(RejectReason::Beta))
        );
    }

    #[test]
    fn four_component_versions_only_for_watch() {
        let d = decisions(&[
            item("Public", "iPhone8,1", "9.9.10.1", true),
            item("Public", "Watch2,3", "9.9.10.1", false),
        ]);
        assert_eq!(d[0], OtaDecision::Reject(RejectReason::TooManyComponents));
        assert!(matches!(d[1], OtaDecision::Accept(_)));
    }

    #[test]
    fn non_watch_must_be_cacheable() {
        let d = decisions(&[
            item("Public", "AppleTV5,3", "12.1", false),
            item("Public", "Watch3,4", "5.1.2", false),
        ]);
        assert_eq!(d[0], OtaDecision::Reject(RejectReason::NotCacheable));
        assert!(matches!(d[1], OtaDecision::Accept(_)));
    }

    #[test]
    fn missing_fields_are_rejected_in_order() {
        let bare = OtaRecord::default();
        assert_eq!(evaluate(&bare), OtaDecision::Reject(RejectReason::NoDevice));

        let mut r = OtaRecord {
            supported_devices: vec!["iPhone9,1".to_string()],
            ..OtaRecord::default()
        };
        assert_eq!(evaluate(&r), OtaDecision::Reject(RejectReason::NoUrl));

        r.real_update_url = Some("http://a.apple.com/x.zip".to_string());
        assert_eq!(evaluate(&r), OtaDecision::Reject(RejectReason::NoVersion));

        r.supported_devices = vec!["HomePod1,1".to_string()];
        r.os_version = Some("12.1".to_string());
        assert_eq!(
            evaluate(&r),
            OtaDecision::Reject(RejectReason::UnknownCategory)
        );
    }

    #[test]
    fn malformed_document_is_an_error() {
        assert!(parse_ota_manifest(b"not a plist").is_err());
        let no_assets = plist_xml("<dict><key>Other</key><string>x</string></dict>");
        assert!(matches!(
            parse_ota_manifest(&no_assets),
            Err(ParseError::MissingField("Assets"))
        ));
    }
}
