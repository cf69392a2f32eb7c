//! Naver DataLab search-trend adapter.
//!
//! One POST per keyword group returning daily relative-ratio points for a
//! date range; not offset-paginated, so the fetch window narrows to a single
//! page and the cutoff filter drops days already collected.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use cwtt_core::{CursorKind, CursorValue, FetchWindow, NaturalKey, RawRecord};
use cwtt_storage::HttpFetcher;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{json, Value};
use tracing::warn;

use crate::{json_field_string, EntitySpec, PageOutcome, PageSource, SourceError};

pub const SOURCE_ID: &str = "naver-trend";
pub const DATALAB_URL: &str = "https://openapi.naver.com/v1/datalab/search";

/// Split a hand-entered comma-separated keyword list, trimming blanks and
/// dropping duplicates while keeping first-seen order.
pub fn split_keywords(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for keyword in raw.split(',') {
        let keyword = keyword.trim();
        if keyword.is_empty() || out.iter().any(|k| k == keyword) {
            continue;
        }
        out.push(keyword.to_string());
    }
    out
}

#[derive(Debug, Clone)]
pub struct NaverTrendSource {
    client_id: String,
    client_secret: String,
    url: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
}

impl NaverTrendSource {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            url: DATALAB_URL.to_string(),
            start_date,
            end_date,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(id) = HeaderValue::from_str(&self.client_id) {
            headers.insert("X-Naver-Client-Id", id);
        }
        if let Ok(secret) = HeaderValue::from_str(&self.client_secret) {
            headers.insert("X-Naver-Client-Secret", secret);
        }
        headers
    }

    fn request_body(&self, entity: &EntitySpec, keywords: &[String]) -> Value {
        json!({
            "startDate": self.start_date.format("%Y-%m-%d").to_string(),
            "endDate": self.end_date.format("%Y-%m-%d").to_string(),
            "timeUnit": "date",
            "keywordGroups": [{
                "groupName": entity.entity_key,
                "keywords": keywords,
            }],
        })
    }

    /// Pull the daily data points out of a DataLab response.
    pub fn parse_page(
        entity: &EntitySpec,
        body: &Value,
        collected_at: DateTime<Utc>,
    ) -> PageOutcome {
        let Some(data) = body
            .get("results")
            .and_then(Value::as_array)
            .and_then(|results| results.first())
            .and_then(|group| group.get("data"))
            .and_then(Value::as_array)
        else {
            warn!(entity = %entity.entity_key, "unrecognized payload shape from datalab");
            return PageOutcome::Unavailable;
        };

        if data.is_empty() {
            return PageOutcome::Exhausted;
        }

        let records = data
            .iter()
            .filter_map(|point| {
                let period = point.get("period").map(json_field_string)?;
                let day = NaiveDate::parse_from_str(&period, "%Y-%m-%d").ok()?;
                let ratio = point.get("ratio").map(json_field_string).unwrap_or_default();
                Some(RawRecord {
                    entity_key: entity.entity_key.clone(),
                    natural_key: NaturalKey::from_parts(&[&entity.entity_key, &period]),
                    ordering: CursorValue::Timestamp(
                        day.and_time(chrono::NaiveTime::MIN).and_utc(),
                    ),
                    payload: BTreeMap::from([
                        ("period".to_string(), period),
                        ("ratio".to_string(), ratio),
                        ("group_name".to_string(), entity.display_name.clone()),
                    ]),
                    collected_at,
                })
            })
            .collect::<Vec<_>>();

        if records.is_empty() {
            warn!(entity = %entity.entity_key, "datalab data points had no parsable periods");
            return PageOutcome::Unavailable;
        }
        PageOutcome::Records(records)
    }
}

#[async_trait]
impl PageSource for NaverTrendSource {
    fn source_id(&self) -> &'static str {
        SOURCE_ID
    }

    fn cursor_kind(&self) -> CursorKind {
        CursorKind::Timestamp
    }

    fn fetch_window(&self, defaults: FetchWindow) -> FetchWindow {
        // One request covers the whole date range.
        FetchWindow::new(defaults.start_offset, defaults.batch_size, 1)
    }

    async fn fetch_page(
        &self,
        http: &HttpFetcher,
        entity: &EntitySpec,
        _window_start: u64,
        _window_end: u64,
    ) -> Result<PageOutcome, SourceError> {
        let keywords = entity
            .param("keywords")
            .map(split_keywords)
            .unwrap_or_default();
        if keywords.is_empty() {
            return Err(SourceError::MissingParam {
                entity: entity.entity_key.clone(),
                param: "keywords".to_string(),
            });
        }

        let body = self.request_body(entity, &keywords);
        let response = match http
            .post_json(SOURCE_ID, &self.url, self.headers(), &body)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(entity = %entity.entity_key, error = %err, "datalab request failed, skipping entity this run");
                return Ok(PageOutcome::Unavailable);
            }
        };

        let payload: Value = match response.json() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(entity = %entity.entity_key, error = %err, "datalab payload was not json");
                return Ok(PageOutcome::Unavailable);
            }
        };

        Ok(Self::parse_page(entity, &payload, Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entity() -> EntitySpec {
        EntitySpec {
            entity_key: "흑백요리사".to_string(),
            display_name: "흑백요리사".to_string(),
            params: BTreeMap::from([("keywords".to_string(), "흑백요리사,셰프".to_string())]),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 20, 6, 0, 0).single().unwrap()
    }

    #[test]
    fn keyword_splitting_trims_and_dedups() {
        assert_eq!(
            split_keywords("흑백요리사, 흑백요리사2 ,흑백요리사,,  셰프 "),
            vec!["흑백요리사", "흑백요리사2", "셰프"]
        );
        assert!(split_keywords(" , ").is_empty());
    }

    #[test]
    fn daily_points_become_records_keyed_by_period() {
        let body = json!({
            "results": [{
                "title": "흑백요리사",
                "data": [
                    {"period": "2025-12-10", "ratio": 41.2},
                    {"period": "2025-12-11", "ratio": 100}
                ]
            }]
        });

        let PageOutcome::Records(records) = NaverTrendSource::parse_page(&entity(), &body, now())
        else {
            panic!("expected records");
        };
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].natural_key.as_str(), "흑백요리사|2025-12-10");
        assert_eq!(records[0].payload["ratio"], "41.2");
        assert_eq!(
            records[1].ordering,
            CursorValue::Timestamp(Utc.with_ymd_and_hms(2025, 12, 11, 0, 0, 0).single().unwrap())
        );
    }

    #[test]
    fn empty_data_is_exhausted_and_bad_shape_is_unavailable() {
        let empty = json!({"results": [{"data": []}]});
        assert!(matches!(
            NaverTrendSource::parse_page(&entity(), &empty, now()),
            PageOutcome::Exhausted
        ));

        let odd = json!({"errorCode": "SE01"});
        assert!(matches!(
            NaverTrendSource::parse_page(&entity(), &odd, now()),
            PageOutcome::Unavailable
        ));
    }

    #[test]
    fn window_narrows_to_one_page() {
        let source = NaverTrendSource::new(
            "id",
            "secret",
            NaiveDate::from_ymd_opt(2025, 12, 9).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 20).unwrap(),
        );
        let window = source.fetch_window(FetchWindow::new(1, 1000, 100));
        assert_eq!(window.max_batches, 1);
    }
}
