//! CatchTable restaurant review-feed adapter.
//!
//! Newest-first JSON pages per restaurant; the feed URL is derived from the
//! shop URL (`/review` path + newest-first sort). Review dates arrive either
//! absolute (`2025.12.10`) or relative (`3일 전`, `어제`, `오늘`) and are
//! normalized to absolute days.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use cwtt_core::{CursorKind, CursorValue, FetchWindow, NaturalKey, RawRecord};
use cwtt_storage::{HttpFetcher, RawPayloadStore};
use reqwest::header::HeaderMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{json_field_string, EntitySpec, PageOutcome, PageSource, SourceError};

pub const SOURCE_ID: &str = "catchtable-review";

/// Turn a shop URL into its newest-first review feed URL.
///
/// `https://app.catchtable.co.kr/ct/shop/tteoksan?type=DINING`
/// -> `https://app.catchtable.co.kr/ct/shop/tteoksan/review?type=DINING&sortingFilter=D`
pub fn review_feed_url(url: &str) -> String {
    if url.contains("/review") {
        return format!("{url}&sortingFilter=D");
    }

    if let Some((base, query)) = url.split_once('?') {
        let base = base.trim_end_matches('/');
        format!("{base}/review?{query}&sortingFilter=D")
    } else {
        let base = url.trim_end_matches('/');
        format!("{base}/review?sortingFilter=D")
    }
}

/// Normalize a review date string to a UTC day. Unparsable strings fall back
/// to `today` so the record is still collected rather than silently lost.
pub fn parse_review_date(raw: &str, today: DateTime<Utc>) -> DateTime<Utc> {
    let trimmed = raw.trim();
    let midnight = |date: NaiveDate| date.and_time(chrono::NaiveTime::MIN).and_utc();
    let today_day = midnight(today.date_naive());

    if trimmed.contains("시간 전") || trimmed.contains("분 전") || trimmed.contains("방금") {
        return today_day;
    }
    if trimmed.contains("오늘") {
        return today_day;
    }
    if trimmed.contains("어제") {
        return today_day - Duration::days(1);
    }
    if let Some(days_raw) = trimmed.strip_suffix("일 전") {
        if let Ok(days) = days_raw.trim().parse::<i64>() {
            return today_day - Duration::days(days);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y.%m.%d") {
        return midnight(date);
    }

    debug!(raw = trimmed, "unparsable review date, treating as today");
    today_day
}

#[derive(Debug, Clone, Default)]
pub struct CatchTableReviewSource;

impl CatchTableReviewSource {
    pub fn new() -> Self {
        Self
    }

    fn page_url(entity: &EntitySpec, page: u64) -> Option<String> {
        entity
            .param("url")
            .map(|url| format!("{}&page={page}", review_feed_url(url)))
    }

    pub fn parse_page(
        entity: &EntitySpec,
        body: &Value,
        collected_at: DateTime<Utc>,
    ) -> PageOutcome {
        let Some(reviews) = body.get("reviews").and_then(Value::as_array) else {
            warn!(entity = %entity.display_name, "unrecognized payload shape from review feed");
            return PageOutcome::Unavailable;
        };

        if reviews.is_empty() {
            return PageOutcome::Exhausted;
        }

        let records = reviews
            .iter()
            .map(|review| Self::parse_review(entity, review, collected_at))
            .collect::<Vec<_>>();
        PageOutcome::Records(records)
    }

    fn parse_review(entity: &EntitySpec, review: &Value, collected_at: DateTime<Utc>) -> RawRecord {
        let reviewer = review
            .get("reviewer")
            .map(json_field_string)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "Unknown".to_string());
        let rating = review.get("rating").map(json_field_string).unwrap_or_default();
        let content = review.get("content").map(json_field_string).unwrap_or_default();
        let date_raw = review.get("date").map(json_field_string).unwrap_or_default();

        let review_day = parse_review_date(&date_raw, collected_at);
        let day_text = review_day.format("%Y.%m.%d").to_string();
        let content_hash = RawPayloadStore::sha256_hex(content.as_bytes());

        RawRecord {
            entity_key: entity.entity_key.clone(),
            natural_key: NaturalKey::from_parts(&[
                entity.entity_key.as_str(),
                reviewer.as_str(),
                day_text.as_str(),
                &content_hash[..16],
            ]),
            ordering: CursorValue::Timestamp(review_day),
            payload: BTreeMap::from([
                ("restaurant".to_string(), entity.display_name.clone()),
                ("reviewer".to_string(), reviewer),
                ("rating".to_string(), rating),
                ("review_date".to_string(), day_text),
                ("content".to_string(), content),
                (
                    "chef".to_string(),
                    entity.param("chef").unwrap_or_default().to_string(),
                ),
                (
                    "category".to_string(),
                    entity.param("category").unwrap_or_default().to_string(),
                ),
            ]),
            collected_at,
        }
    }
}

#[async_trait]
impl PageSource for CatchTableReviewSource {
    fn source_id(&self) -> &'static str {
        SOURCE_ID
    }

    fn cursor_kind(&self) -> CursorKind {
        CursorKind::Timestamp
    }

    fn fetch_window(&self, defaults: FetchWindow) -> FetchWindow {
        // The feed paginates by page number, not row offset.
        FetchWindow::new(1, 1, defaults.max_batches)
    }

    async fn fetch_page(
        &self,
        http: &HttpFetcher,
        entity: &EntitySpec,
        window_start: u64,
        _window_end: u64,
    ) -> Result<PageOutcome, SourceError> {
        let url = Self::page_url(entity, window_start).ok_or_else(|| SourceError::MissingParam {
            entity: entity.entity_key.clone(),
            param: "url".to_string(),
        })?;

        let response = match http.get(SOURCE_ID, &url, HeaderMap::new()).await {
            Ok(response) => response,
            Err(err) => {
                warn!(entity = %entity.display_name, page = window_start, error = %err, "review page fetch failed, skipping rest of feed this run");
                return Ok(PageOutcome::Unavailable);
            }
        };

        let body: Value = match response.json() {
            Ok(body) => body,
            Err(err) => {
                warn!(entity = %entity.display_name, error = %err, "review payload was not json");
                return Ok(PageOutcome::Unavailable);
            }
        };

        Ok(Self::parse_page(entity, &body, Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn entity() -> EntitySpec {
        EntitySpec {
            entity_key: "https://app.catchtable.co.kr/ct/shop/tteoksan?type=DINING".to_string(),
            display_name: "떡산".to_string(),
            params: BTreeMap::from([
                (
                    "url".to_string(),
                    "https://app.catchtable.co.kr/ct/shop/tteoksan?type=DINING".to_string(),
                ),
                ("chef".to_string(), "트리플스타".to_string()),
            ]),
        }
    }

    fn today() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 12, 9, 30, 0).single().unwrap()
    }

    #[test]
    fn feed_url_inserts_review_path_and_sort() {
        assert_eq!(
            review_feed_url("https://app.catchtable.co.kr/ct/shop/tteoksan?type=DINING"),
            "https://app.catchtable.co.kr/ct/shop/tteoksan/review?type=DINING&sortingFilter=D"
        );
        assert_eq!(
            review_feed_url("https://app.catchtable.co.kr/ct/shop/tteoksan/"),
            "https://app.catchtable.co.kr/ct/shop/tteoksan/review?sortingFilter=D"
        );
        assert_eq!(
            review_feed_url("https://app.catchtable.co.kr/ct/shop/tteoksan/review?type=DINING"),
            "https://app.catchtable.co.kr/ct/shop/tteoksan/review?type=DINING&sortingFilter=D"
        );
    }

    #[test]
    fn relative_dates_normalize_against_today() {
        let day = |y, m, d| Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).single().unwrap();
        assert_eq!(parse_review_date("2025.12.09", today()), day(2025, 12, 9));
        assert_eq!(parse_review_date("3일 전", today()), day(2025, 12, 9));
        assert_eq!(parse_review_date("어제", today()), day(2025, 12, 11));
        assert_eq!(parse_review_date("오늘", today()), day(2025, 12, 12));
        assert_eq!(parse_review_date("5시간 전", today()), day(2025, 12, 12));
        assert_eq!(parse_review_date("방금", today()), day(2025, 12, 12));
        // Unparsable dates are still collected, pinned to today.
        assert_eq!(parse_review_date("????", today()), day(2025, 12, 12));
    }

    #[test]
    fn reviews_get_stable_natural_keys() {
        let body = json!({
            "reviews": [
                {"reviewer": "미식가123", "rating": "5", "date": "2025.12.10", "content": "인생 떡볶이"},
                {"reviewer": "미식가123", "rating": "5", "date": "2025.12.10", "content": "재방문 후기"}
            ]
        });

        let PageOutcome::Records(records) =
            CatchTableReviewSource::parse_page(&entity(), &body, today())
        else {
            panic!("expected records");
        };
        assert_eq!(records.len(), 2);
        // Same reviewer + same day, different content -> distinct keys.
        assert_ne!(records[0].natural_key, records[1].natural_key);
        assert_eq!(records[0].payload["restaurant"], "떡산");
        assert_eq!(records[0].payload["chef"], "트리플스타");
    }

    #[test]
    fn empty_feed_is_exhausted() {
        let body = json!({"reviews": []});
        assert!(matches!(
            CatchTableReviewSource::parse_page(&entity(), &body, today()),
            PageOutcome::Exhausted
        ));
        let odd = json!({"items": []});
        assert!(matches!(
            CatchTableReviewSource::parse_page(&entity(), &odd, today()),
            PageOutcome::Unavailable
        ));
    }
}
