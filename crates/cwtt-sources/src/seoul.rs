//! Seoul Open Data floating-population adapter (IoT visitor-count service).
//!
//! Windowed JSON pages at `/{key}/json/{service}/{start}/{end}/`; an
//! `INFO-200` result code marks a drained window. District names arrive
//! romanized and are translated back to Korean.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use cwtt_core::{CursorKind, CursorValue, NaturalKey, RawRecord};
use cwtt_storage::HttpFetcher;
use reqwest::header::HeaderMap;
use serde_json::Value;
use tracing::warn;

use crate::{json_field_string, EntitySpec, PageOutcome, PageSource, SourceError};

pub const SOURCE_ID: &str = "seoul-population";
pub const DEFAULT_BASE_URL: &str = "http://openapi.seoul.go.kr:8088";

const GU_MAPPING: &[(&str, &str)] = &[
    ("gangnam-gu", "강남구"),
    ("gangdong-gu", "강동구"),
    ("gangbuk-gu", "강북구"),
    ("gangseo-gu", "강서구"),
    ("gwanak-gu", "관악구"),
    ("gwangjin-gu", "광진구"),
    ("guro-gu", "구로구"),
    ("geumcheon-gu", "금천구"),
    ("nowon-gu", "노원구"),
    ("dobong-gu", "도봉구"),
    ("dongdaemun-gu", "동대문구"),
    ("dongjak-gu", "동작구"),
    ("mapo-gu", "마포구"),
    ("seodaemun-gu", "서대문구"),
    ("seocho-gu", "서초구"),
    ("seongdong-gu", "성동구"),
    ("seongbuk-gu", "성북구"),
    ("songpa-gu", "송파구"),
    ("yangcheon-gu", "양천구"),
    ("yeongdeungpo-gu", "영등포구"),
    ("yongsan-gu", "용산구"),
    ("eunpyeong-gu", "은평구"),
    ("jongno-gu", "종로구"),
    ("jung-gu", "중구"),
    ("jungnang-gu", "중랑구"),
];

/// Translate a romanized district name to Korean; unknown names pass through.
pub fn translate_district(name: &str) -> String {
    let normalized = name.to_ascii_lowercase().replace(' ', "");
    GU_MAPPING
        .iter()
        .find(|(roman, _)| *roman == normalized)
        .map(|(_, korean)| korean.to_string())
        .unwrap_or_else(|| name.to_string())
}

/// The service reports local timestamps in two near-identical formats.
pub fn parse_sensing_time(raw: &str) -> Option<DateTime<Utc>> {
    for format in ["%Y-%m-%d_%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

#[derive(Debug, Clone)]
pub struct SeoulPopulationSource {
    api_key: String,
    base_url: String,
}

impl SeoulPopulationSource {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn page_url(&self, service: &str, start: u64, end: u64) -> String {
        format!(
            "{}/{}/json/{}/{}/{}/",
            self.base_url, self.api_key, service, start, end
        )
    }

    /// Defensive payload parse. Missing-key tolerance mirrors the upstream's
    /// habit of reshaping responses: unknown shapes skip the window instead of
    /// failing the run.
    pub fn parse_page(
        entity: &EntitySpec,
        service: &str,
        body: &Value,
        collected_at: DateTime<Utc>,
    ) -> PageOutcome {
        if let Some(rows) = body
            .get(service)
            .and_then(|s| s.get("row"))
            .and_then(Value::as_array)
        {
            if rows.is_empty() {
                return PageOutcome::Exhausted;
            }
            let records = rows
                .iter()
                .filter_map(|row| Self::parse_row(entity, row, collected_at))
                .collect::<Vec<_>>();
            if records.is_empty() {
                // Rows existed but none carried a usable timestamp.
                warn!(entity = %entity.entity_key, "page had rows but no parsable sensing times");
                return PageOutcome::Unavailable;
            }
            return PageOutcome::Records(records);
        }

        let result_code = body
            .get("RESULT")
            .and_then(|r| r.get("CODE"))
            .and_then(Value::as_str);
        if result_code == Some("INFO-200") {
            return PageOutcome::Exhausted;
        }

        warn!(entity = %entity.entity_key, "unrecognized payload shape from seoul api");
        PageOutcome::Unavailable
    }

    fn parse_row(
        entity: &EntitySpec,
        row: &Value,
        collected_at: DateTime<Utc>,
    ) -> Option<RawRecord> {
        let sensing_raw = row
            .get("SENSING_TIME")
            .or_else(|| row.get("REG_DTTM"))
            .map(json_field_string)?;
        let sensing_time = parse_sensing_time(&sensing_raw)?;
        let sensing_text = sensing_time.format("%Y-%m-%d %H:%M:%S").to_string();

        let district = row
            .get("ADMINISTRATIVE_DISTRICT")
            .map(json_field_string)
            .unwrap_or_default();
        let autonomous = row
            .get("AUTONOMOUS_DISTRICT")
            .map(json_field_string)
            .unwrap_or_default();

        let payload = BTreeMap::from([
            ("sensing_time".to_string(), sensing_text.clone()),
            (
                "autonomous_district".to_string(),
                translate_district(&autonomous),
            ),
            ("administrative_district".to_string(), district.clone()),
            (
                "visitor_count".to_string(),
                row.get("VISITOR_COUNT")
                    .map(json_field_string)
                    .unwrap_or_else(|| "0".to_string()),
            ),
            (
                "reg_dttm".to_string(),
                row.get("REG_DTTM").map(json_field_string).unwrap_or_default(),
            ),
        ]);

        Some(RawRecord {
            entity_key: entity.entity_key.clone(),
            natural_key: NaturalKey::from_parts(&[&entity.entity_key, &sensing_text, &district]),
            ordering: CursorValue::Timestamp(sensing_time),
            payload,
            collected_at,
        })
    }
}

#[async_trait]
impl PageSource for SeoulPopulationSource {
    fn source_id(&self) -> &'static str {
        SOURCE_ID
    }

    fn cursor_kind(&self) -> CursorKind {
        CursorKind::Timestamp
    }

    async fn fetch_page(
        &self,
        http: &HttpFetcher,
        entity: &EntitySpec,
        window_start: u64,
        window_end: u64,
    ) -> Result<PageOutcome, SourceError> {
        let service = entity
            .param("service")
            .ok_or_else(|| SourceError::MissingParam {
                entity: entity.entity_key.clone(),
                param: "service".to_string(),
            })?
            .to_string();
        let url = self.page_url(&service, window_start, window_end);

        let response = match http.get(SOURCE_ID, &url, HeaderMap::new()).await {
            Ok(response) => response,
            Err(err) => {
                warn!(entity = %entity.entity_key, window_start, window_end, error = %err, "seoul page fetch failed, skipping window");
                return Ok(PageOutcome::Unavailable);
            }
        };

        let body: Value = match response.json() {
            Ok(body) => body,
            Err(err) => {
                warn!(entity = %entity.entity_key, error = %err, "seoul payload was not json");
                return Ok(PageOutcome::Unavailable);
            }
        };

        Ok(Self::parse_page(entity, &service, &body, Utc::now()))
    }
}
