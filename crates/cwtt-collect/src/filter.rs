//! Cutoff/dedup filter: decides which incoming records are genuinely new and
//! when the fetch loop has scanned back into already-collected territory.

use std::collections::HashSet;

use cwtt_core::{Admission, CursorValue, NaturalKey, RawRecord};

/// Per-entity admission filter for one run.
///
/// The cutoff is inclusive: a record ordered at or before the checkpoint is
/// stale. The seen-key set is seeded from the local sink so that records
/// appended by a run whose checkpoint write was lost are still rejected on
/// the next run.
#[derive(Debug)]
pub struct CutoffFilter {
    cutoff: Option<CursorValue>,
    seen: HashSet<NaturalKey>,
    stop_threshold: u32,
    consecutive_already_collected: u32,
    high_water: Option<CursorValue>,
    accepted: u64,
    rejected_seen: u64,
    rejected_stale: u64,
}

impl CutoffFilter {
    pub fn new(cutoff: Option<CursorValue>, stop_threshold: u32, seen: HashSet<NaturalKey>) -> Self {
        Self {
            cutoff,
            seen,
            stop_threshold,
            consecutive_already_collected: 0,
            high_water: None,
            accepted: 0,
            rejected_seen: 0,
            rejected_stale: 0,
        }
    }

    pub fn admit(&mut self, record: &RawRecord) -> Admission {
        if let Some(cutoff) = self.cutoff {
            if record.ordering <= cutoff {
                self.rejected_stale += 1;
                self.consecutive_already_collected += 1;
                return Admission::RejectStale;
            }
        }

        // Records tied on the ordering value are disambiguated here by the
        // natural key, never merged.
        if self.seen.contains(&record.natural_key) {
            self.rejected_seen += 1;
            self.consecutive_already_collected += 1;
            return Admission::RejectSeen;
        }

        self.seen.insert(record.natural_key.clone());
        self.consecutive_already_collected = 0;
        self.accepted += 1;
        self.high_water = Some(match self.high_water {
            Some(current) => current.max(record.ordering),
            None => record.ordering,
        });
        Admission::Accept
    }

    /// True once enough consecutive already-collected records have been seen.
    pub fn should_stop(&self) -> bool {
        self.stop_threshold > 0 && self.consecutive_already_collected >= self.stop_threshold
    }

    /// Checkpoint value to persist, `None` when nothing was accepted (the
    /// checkpoint stays untouched, keeping its advance monotonic).
    pub fn next_checkpoint(&self) -> Option<CursorValue> {
        self.high_water
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn rejected_seen(&self) -> u64 {
        self.rejected_seen
    }

    pub fn rejected_stale(&self) -> u64 {
        self.rejected_stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn record(day: u32, key: &str) -> RawRecord {
        let ts = Utc.with_ymd_and_hms(2025, 12, day, 0, 0, 0).single().unwrap();
        RawRecord {
            entity_key: "A".to_string(),
            natural_key: NaturalKey::from_parts(&["A", key]),
            ordering: CursorValue::Timestamp(ts),
            payload: BTreeMap::new(),
            collected_at: ts,
        }
    }

    fn boundary(day: u32) -> Option<CursorValue> {
        Some(CursorValue::Timestamp(
            Utc.with_ymd_and_hms(2025, 12, day, 0, 0, 0).single().unwrap(),
        ))
    }

    #[test]
    fn default_boundary_is_an_inclusive_cutoff() {
        // Checkpoint absent for entity A, fallback boundary 2025-12-09.
        let mut filter = CutoffFilter::new(boundary(9), 3, HashSet::new());

        assert_eq!(filter.admit(&record(10, "r1")), Admission::Accept);
        assert_eq!(filter.admit(&record(9, "r2")), Admission::RejectStale);
        assert_eq!(filter.admit(&record(8, "r3")), Admission::RejectStale);
        assert_eq!(filter.accepted(), 1);
        assert_eq!(filter.next_checkpoint(), boundary(10));
    }

    #[test]
    fn rerun_with_advanced_checkpoint_accepts_nothing() {
        let mut filter = CutoffFilter::new(boundary(10), 3, HashSet::new());

        for (day, key) in [(10, "r1"), (9, "r2"), (8, "r3")] {
            assert_eq!(filter.admit(&record(day, key)), Admission::RejectStale);
        }
        assert_eq!(filter.accepted(), 0);
        assert_eq!(filter.next_checkpoint(), None);
    }

    #[test]
    fn duplicate_keys_within_a_run_are_rejected_seen() {
        let mut filter = CutoffFilter::new(boundary(9), 3, HashSet::new());

        assert_eq!(filter.admit(&record(10, "r1")), Admission::Accept);
        assert_eq!(filter.admit(&record(10, "r1")), Admission::RejectSeen);
        // Tied ordering, different key: still accepted.
        assert_eq!(filter.admit(&record(10, "r2")), Admission::Accept);
    }

    #[test]
    fn seeded_keys_survive_a_lost_checkpoint() {
        let seed = HashSet::from([NaturalKey::from_parts(&["A", "r1"])]);
        let mut filter = CutoffFilter::new(boundary(9), 3, seed);

        assert_eq!(filter.admit(&record(10, "r1")), Admission::RejectSeen);
        assert_eq!(filter.rejected_seen(), 1);
    }

    #[test]
    fn stop_fires_after_threshold_consecutive_already_collected() {
        let mut filter = CutoffFilter::new(boundary(9), 3, HashSet::new());

        filter.admit(&record(10, "r1"));
        assert!(!filter.should_stop());
        filter.admit(&record(9, "s1"));
        filter.admit(&record(9, "s2"));
        assert!(!filter.should_stop());
        filter.admit(&record(8, "s3"));
        assert!(filter.should_stop());
    }

    #[test]
    fn accept_resets_the_consecutive_counter() {
        let mut filter = CutoffFilter::new(boundary(9), 3, HashSet::new());

        filter.admit(&record(9, "s1"));
        filter.admit(&record(9, "s2"));
        filter.admit(&record(11, "r1"));
        filter.admit(&record(9, "s3"));
        filter.admit(&record(9, "s4"));
        assert!(!filter.should_stop());
        filter.admit(&record(9, "s5"));
        assert!(filter.should_stop());
    }

    #[test]
    fn high_water_is_the_max_accepted_ordering() {
        let mut filter = CutoffFilter::new(boundary(9), 3, HashSet::new());

        filter.admit(&record(11, "r1"));
        filter.admit(&record(13, "r2"));
        filter.admit(&record(12, "r3"));
        assert_eq!(filter.next_checkpoint(), boundary(13));
    }

    #[test]
    fn count_cursors_filter_the_same_way() {
        let mut filter = CutoffFilter::new(Some(CursorValue::Count(40)), 1, HashSet::new());
        let mut counted = record(10, "c1");
        counted.ordering = CursorValue::Count(41);
        assert_eq!(filter.admit(&counted), Admission::Accept);

        let mut stale = record(10, "c2");
        stale.ordering = CursorValue::Count(40);
        assert_eq!(filter.admit(&stale), Admission::RejectStale);
        assert!(filter.should_stop());
        assert_eq!(filter.next_checkpoint(), Some(CursorValue::Count(41)));
    }
}
