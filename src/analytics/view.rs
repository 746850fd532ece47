//! In-memory materialized view of click buckets.
//!
//! Indexed by shortcode, then hour, so every read view walks only the hours of
//! the requested range instead of re-scanning recorded clicks.

use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::analytics::models::{BucketKey, ClickDimensions};

type HourBuckets = BTreeMap<i64, HashMap<ClickDimensions, u64>>;

/// Which shortcodes a read covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeFilter {
    All,
    /// The caller's own links
    Only(HashSet<String>),
    One(String),
}

#[derive(Default)]
pub struct ClickIndex {
    by_shortcode: DashMap<String, HourBuckets>,
}

impl ClickIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `count` clicks under `key`
    pub fn apply(&self, key: &BucketKey, count: u64) {
        if count == 0 {
            return;
        }
        let mut hours = self.by_shortcode.entry(key.shortcode.clone()).or_default();
        *hours
            .entry(key.hour)
            .or_default()
            .entry(key.dims.clone())
            .or_insert(0) += count;
    }

    /// Replace the view with persisted buckets
    pub fn load(&self, buckets: Vec<(BucketKey, u64)>) {
        self.by_shortcode.clear();
        for (key, count) in &buckets {
            self.apply(key, *count);
        }
    }

    pub fn remove_shortcode(&self, shortcode: &str) {
        self.by_shortcode.remove(shortcode);
    }

    /// Visit every bucket in scope whose hour lies in `[from_hour, to_hour)`
    pub fn fold<F>(&self, scope: &ScopeFilter, from_hour: i64, to_hour: i64, mut visit: F)
    where
        F: FnMut(&str, i64, &ClickDimensions, u64),
    {
        if from_hour >= to_hour {
            return;
        }

        let mut visit_hours = |shortcode: &str, hours: &HourBuckets| {
            for (hour, dims) in hours.range(from_hour..to_hour) {
                for (dim, count) in dims {
                    visit(shortcode, *hour, dim, *count);
                }
            }
        };

        match scope {
            ScopeFilter::One(code) => {
                if let Some(hours) = self.by_shortcode.get(code) {
                    visit_hours(code.as_str(), hours.value());
                }
            }
            ScopeFilter::Only(codes) => {
                for code in codes {
                    if let Some(hours) = self.by_shortcode.get(code) {
                        visit_hours(code.as_str(), hours.value());
                    }
                }
            }
            ScopeFilter::All => {
                for entry in self.by_shortcode.iter() {
                    visit_hours(entry.key().as_str(), entry.value());
                }
            }
        }
    }

    pub fn shortcode_count(&self) -> usize {
        self.by_shortcode.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: &str, hour: i64, is_bot: bool) -> BucketKey {
        BucketKey {
            shortcode: code.to_string(),
            hour,
            dims: ClickDimensions {
                is_bot,
                ..Default::default()
            },
        }
    }

    fn total(index: &ClickIndex, scope: &ScopeFilter, from: i64, to: i64) -> u64 {
        let mut sum = 0;
        index.fold(scope, from, to, |_, _, _, c| sum += c);
        sum
    }

    #[test]
    fn apply_merges_identical_keys() {
        let index = ClickIndex::new();
        index.apply(&key("a", 0, false), 1);
        index.apply(&key("a", 0, false), 2);
        index.apply(&key("a", 0, true), 1);

        let mut buckets = 0;
        index.fold(&ScopeFilter::All, 0, 3600, |_, _, _, _| buckets += 1);
        assert_eq!(buckets, 2);
        assert_eq!(total(&index, &ScopeFilter::All, 0, 3600), 4);
    }

    #[test]
    fn fold_respects_scope_and_range() {
        let index = ClickIndex::new();
        index.apply(&key("a", 0, false), 1);
        index.apply(&key("a", 3600, false), 1);
        index.apply(&key("b", 3600, false), 5);

        assert_eq!(total(&index, &ScopeFilter::One("a".into()), 0, 7200), 2);
        assert_eq!(total(&index, &ScopeFilter::All, 3600, 7200), 6);
        let only_b = ScopeFilter::Only(["b".to_string()].into_iter().collect());
        assert_eq!(total(&index, &only_b, 0, 7200), 5);
        assert_eq!(total(&index, &ScopeFilter::One("missing".into()), 0, 7200), 0);
    }

    #[test]
    fn remove_and_load_replace_content() {
        let index = ClickIndex::new();
        index.apply(&key("a", 0, false), 1);
        index.remove_shortcode("a");
        assert_eq!(index.shortcode_count(), 0);

        index.apply(&key("x", 0, false), 9);
        index.load(vec![(key("b", 0, false), 3)]);
        assert_eq!(total(&index, &ScopeFilter::All, 0, 3600), 3);
    }
}
