//! 资源登记表。
//!
//! 一次运行只构建一次：通用资源列表按结构去重；固件列表单独存放、只追加，
//! 每次固件操作前清空；另有一份已知设备型号集合，用于按分组查询固件。

use std::collections::{BTreeSet, HashSet};

use tracing::{debug, warn};

use super::models::{Asset, AssetGroup};
use super::url_rewrite::UrlRewriter;
use super::version::natural_cmp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Added,
    Duplicate,
    Rejected,
}

#[derive(Debug)]
pub struct AssetRegistry {
    rewriter: UrlRewriter,
    assets: Vec<Asset>,
    seen: HashSet<Asset>,
    firmware: Vec<Asset>,
    known_models: BTreeSet<String>,
}

impl AssetRegistry {
    pub fn new(rewriter: UrlRewriter) -> Self {
        Self {
            rewriter,
            assets: Vec::new(),
            seen: HashSet::new(),
            firmware: Vec::new(),
            known_models: BTreeSet::new(),
        }
    }

    /// 登记一条资源。`origin_url` 在这里改写为缓存地址，之后不再保留源站地址。
    pub fn add(
        &mut self,
        model: &str,
        version: &str,
        origin_url: &str,
        group: AssetGroup,
    ) -> Registration {
        let url = match self.rewriter.rewrite(origin_url) {
            Ok(u) => u,
            Err(e) => {
                warn!(target: "ingest", "跳过 {}: {}", model, e);
                return Registration::Rejected;
            }
        };
        let asset = Asset {
            model: model.trim().to_string(),
            version: version.trim().to_string(),
            url,
            group,
        };

        if group == AssetGroup::Firmware {
            debug!(target: "ingest", "固件登记 {} {}", asset.model, asset.url);
            self.firmware.push(asset);
            return Registration::Added;
        }

        if group.is_device() {
            self.known_models.insert(asset.model.clone());
        }

        if !self.seen.insert(asset.clone()) {
            debug!(target: "ingest", "重复，跳过 {} {}", asset.model, asset.url);
            return Registration::Duplicate;
        }
        debug!(target: "ingest", "登记 {} {}", asset.model, asset.url);
        self.assets.push(asset);
        Registration::Added
    }

    pub fn note_models<I, S>(&mut self, models: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for model in models {
            let model = model.into();
            let model = model.trim();
            if !model.is_empty() {
                self.known_models.insert(model.to_string());
            }
        }
    }

    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }

    pub fn firmware(&self) -> &[Asset] {
        &self.firmware
    }

    pub fn clear_firmware(&mut self) {
        self.firmware.clear();
    }

    pub fn known_models(&self) -> impl Iterator<Item = &str> {
        self.known_models.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    /// 按 (分组, 型号) 去重后分组列出，型号自然排序。
    ///
    /// `groups` 为空时按固定展示顺序列出全部分组（含空分组）。
    pub fn listing(&self, groups: &[AssetGroup]) -> Vec<(AssetGroup, Vec<String>)> {
        let order: Vec<AssetGroup> = if groups.is_empty() {
            AssetGroup::DISPLAY_ORDER.to_vec()
        } else {
            groups.to_vec()
        };

        order
            .into_iter()
            .map(|group| {
                let mut models: Vec<String> = self
                    .assets
                    .iter()
                    .filter(|a| a.group == group)
                    .map(|a| a.model.clone())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                models.sort_by(|a, b| natural_cmp(a, b));
                (group, models)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> AssetRegistry {
        AssetRegistry::new(UrlRewriter::new("http://cache:49672"))
    }

    #[test]
    fn identical_assets_are_stored_once() {
        let mut reg = registry();
        let url = "http://appldnld.apple.com/ios/update.zip";
        assert_eq!(
            reg.add("iPhone9,1", "12.1", url, AssetGroup::IPhone),
            Registration::Added
        );
        assert_eq!(
            reg.add("iPhone9,1", "12.1", url, AssetGroup::IPhone),
            Registration::Duplicate
        );
        assert_eq!(reg.len(), 1);

        // 任一字段不同就不算重复
        reg.add("iPhone9,1", "12.1.1", url, AssetGroup::IPhone);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn stored_urls_are_rewritten() {
        let mut reg = registry();
        reg.add(
            "Xcode",
            "10.1",
            "http://osxapps.itunes.apple.com/x/Xcode.pkg",
            AssetGroup::App,
        );
        let asset = &reg.assets()[0];
        assert_eq!(
            asset.url,
            "http://cache:49672/x/Xcode.pkg?source=osxapps.itunes.apple.com"
        );
    }

    #[test]
    fn invalid_origin_is_rejected() {
        let mut reg = registry();
        assert_eq!(
            reg.add("Broken", "1.0", "not a url", AssetGroup::App),
            Registration::Rejected
        );
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn firmware_is_kept_apart_and_not_deduplicated() {
        let mut reg = registry();
        let url = "http://updates.cdn-apple.com/fw/iPhone.ipsw";
        reg.add("iPhone9,1", "12.1", url, AssetGroup::Firmware);
        reg.add("iPhone9,1", "12.1", url, AssetGroup::Firmware);
        assert_eq!(reg.firmware().len(), 2);
        assert_eq!(reg.len(), 0);

        reg.clear_firmware();
        assert!(reg.firmware().is_empty());
    }

    #[test]
    fn device_models_are_tracked() {
        let mut reg = registry();
        reg.add("iPad7,5", "12.1", "http://a.apple.com/a.zip", AssetGroup::IPad);
        reg.add("Pages", "7.3", "http://a.apple.com/p.pkg", AssetGroup::App);
        reg.note_models(["Watch3,1", " "]);
        let models: Vec<&str> = reg.known_models().collect();
        assert_eq!(models, vec!["Watch3,1", "iPad7,5"]);
    }

    #[test]
    fn listing_groups_in_display_order() {
        let mut reg = registry();
        reg.add("iPhone10,1", "12.1", "http://a.apple.com/1.zip", AssetGroup::IPhone);
        reg.add("iPhone9,1", "12.1", "http://a.apple.com/2.zip", AssetGroup::IPhone);
        reg.add("iPhone9,1", "12.0", "http://a.apple.com/3.zip", AssetGroup::IPhone);
        reg.add("AppleTV5,3", "12.1", "http://a.apple.com/4.zip", AssetGroup::AppleTv);

        let listing = reg.listing(&[]);
        assert_eq!(listing.len(), AssetGroup::DISPLAY_ORDER.len());
        assert_eq!(listing[0], (AssetGroup::AppleTv, vec!["AppleTV5,3".to_string()]));
        let iphone = listing
            .iter()
            .find(|(g, _)| *g == AssetGroup::IPhone)
            .unwrap();
        assert_eq!(iphone.1, vec!["iPhone9,1".to_string(), "iPhone10,1".to_string()]);

        let filtered = reg.listing(&[AssetGroup::IPhone]);
        assert_eq!(filtered.len(), 1);
    }
}
