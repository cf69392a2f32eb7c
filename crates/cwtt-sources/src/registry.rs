//! Entity registry: the YAML list of restaurants, district sensor services
//! and keyword groups the collectors track.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

use crate::naver::split_keywords;
use crate::{catchtable, naver, seoul, EntitySpec};

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestaurantEntry {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub chef: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DistrictEntry {
    /// Seoul Open Data service identifier, e.g. `IotVdata018`.
    pub service: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeywordGroupEntry {
    pub name: String,
    /// Comma-separated keyword list, as entered by hand.
    pub keywords: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntityRegistry {
    #[serde(default)]
    pub restaurants: Vec<RestaurantEntry>,
    #[serde(default)]
    pub districts: Vec<DistrictEntry>,
    #[serde(default)]
    pub keyword_groups: Vec<KeywordGroupEntry>,
}

impl EntityRegistry {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Enabled entities for one source, malformed entries skipped with a
    /// warning.
    pub fn entities_for(&self, source_id: &str) -> Vec<EntitySpec> {
        match source_id {
            catchtable::SOURCE_ID => self
                .restaurants
                .iter()
                .filter(|r| r.enabled)
                .filter_map(|r| {
                    if r.url.trim().is_empty() {
                        warn!(name = %r.name, "skipping restaurant without a feed url");
                        return None;
                    }
                    let mut params = BTreeMap::from([("url".to_string(), r.url.clone())]);
                    if let Some(chef) = &r.chef {
                        params.insert("chef".to_string(), chef.clone());
                    }
                    if let Some(category) = &r.category {
                        params.insert("category".to_string(), category.clone());
                    }
                    Some(EntitySpec {
                        entity_key: r.url.clone(),
                        display_name: r.name.clone(),
                        params,
                    })
                })
                .collect(),
            seoul::SOURCE_ID => self
                .districts
                .iter()
                .filter(|d| d.enabled)
                .map(|d| EntitySpec {
                    entity_key: d.service.clone(),
                    display_name: d.service.clone(),
                    params: BTreeMap::from([("service".to_string(), d.service.clone())]),
                })
                .collect(),
            naver::SOURCE_ID => self
                .keyword_groups
                .iter()
                .filter(|g| g.enabled)
                .filter_map(|g| {
                    let keywords = split_keywords(&g.keywords);
                    if keywords.is_empty() {
                        warn!(name = %g.name, "skipping keyword group with no keywords");
                        return None;
                    }
                    Some(EntitySpec {
                        entity_key: g.name.clone(),
                        display_name: g.name.clone(),
                        params: BTreeMap::from([(
                            "keywords".to_string(),
                            keywords.join(","),
                        )]),
                    })
                })
                .collect(),
            other => {
                warn!(source_id = other, "no registry section for source");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
restaurants:
  - name: 떡산
    url: https://app.catchtable.co.kr/ct/shop/tteoksan?type=DINING
    chef: 트리플스타
    category: 한식
  - name: 미등록집
    url: ""
districts:
  - service: IotVdata018
keyword_groups:
  - name: 흑백요리사
    keywords: "흑백요리사, 흑백요리사2 ,흑백요리사"
  - name: 빈그룹
    keywords: " , "
  - name: 꺼진그룹
    keywords: "비활성"
    enabled: false
"#;

    #[test]
    fn registry_parses_and_filters_per_source() {
        let registry: EntityRegistry = serde_yaml::from_str(SAMPLE).unwrap();

        let restaurants = registry.entities_for(catchtable::SOURCE_ID);
        assert_eq!(restaurants.len(), 1);
        assert_eq!(restaurants[0].display_name, "떡산");
        assert_eq!(restaurants[0].param("chef"), Some("트리플스타"));

        let districts = registry.entities_for(seoul::SOURCE_ID);
        assert_eq!(districts.len(), 1);
        assert_eq!(districts[0].entity_key, "IotVdata018");

        let groups = registry.entities_for(naver::SOURCE_ID);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].param("keywords"), Some("흑백요리사,흑백요리사2"));
    }

    #[test]
    fn unknown_source_has_no_entities() {
        let registry = EntityRegistry::default();
        assert!(registry.entities_for("youtube-comments").is_empty());
    }

    #[test]
    fn load_surfaces_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(EntityRegistry::load(&dir.path().join("entities.yaml")).is_err());
    }
}
