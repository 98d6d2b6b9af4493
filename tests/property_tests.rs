//! Property-based tests for span resolution, histogram extraction and
//! category aggregation
//!
//! Random operation sets are generated in memory; each property checks an
//! invariant that must hold for any store contents.

mod utils;

use perfc_trace::aggregate::{AttributionOutcome, CategoryAggregator};
use perfc_trace::call_tree::CallTreeBuilder;
use perfc_trace::category::CategoryTable;
use perfc_trace::diagnostics::Diagnostics;
use perfc_trace::event::StateType;
use perfc_trace::histogram::{self, HistogramOptions, SortOrder};
use perfc_trace::span::{resolve_events, Resolution};
use perfc_trace::store::FnTagPattern;
use proptest::prelude::*;
use std::collections::HashSet;
use utils::Fixture;

/// (start, duration, has_init, has_finish) per opid 1..=n
fn operations() -> impl Strategy<Value = Vec<(i64, i64, bool, bool)>> {
    prop::collection::vec((0i64..10_000, 0i64..5_000, any::<bool>(), any::<bool>()), 1..40)
}

fn fixture_from(ops: &[(i64, i64, bool, bool)]) -> Fixture {
    let mut fx = Fixture::new();
    for (i, &(start, duration, has_init, has_finish)) in ops.iter().enumerate() {
        let opid = i as i64 + 1;
        if has_init {
            fx.state(opid, "read", None, StateType::Init, start);
        }
        if has_finish {
            fx.state(opid, "read", None, StateType::Finish, start + duration);
        }
    }
    fx
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_span_duration_is_finish_minus_init(t0 in -1_000_000i64..1_000_000, d in 0i64..1_000_000) {
        let mut fx = Fixture::new();
        fx.op(1, "read", None, t0, t0 + d);
        match resolve_events(1, &fx.states) {
            Resolution::Complete(span) => prop_assert_eq!(span.duration(), d),
            Resolution::Incomplete(diag) => prop_assert!(false, "unexpected {}", diag),
        }
    }

    #[test]
    fn prop_histogram_contains_exactly_complete_ids(ops in operations()) {
        let fx = fixture_from(&ops);
        let store = fx.store();
        let result = histogram::extract(&store, &HistogramOptions::new("read"));

        let complete: HashSet<i64> = ops
            .iter()
            .enumerate()
            .filter(|(_, op)| op.2 && op.3)
            .map(|(i, _)| i as i64 + 1)
            .collect();

        match result {
            Ok(hist) => {
                let rows: HashSet<i64> = hist.rows.iter().map(|r| r.opid).collect();
                prop_assert_eq!(&rows, &complete);
                prop_assert_eq!(hist.diagnostics.skipped_spans(), hist.selected - hist.rows.len());
                for row in &hist.rows {
                    prop_assert!(row.duration >= 0);
                    prop_assert!(!hist.diagnostics.mentions(row.opid));
                }
            }
            // Only possible when no opid has any state row
            Err(_) => prop_assert!(ops.iter().all(|op| !op.2 && !op.3)),
        }
    }

    #[test]
    fn prop_sorted_histogram_is_permutation_and_ordered(ops in operations()) {
        let store = fixture_from(&ops).store();
        let plain = histogram::extract(&store, &HistogramOptions::new("read"));
        let sorted = histogram::extract(&store, &HistogramOptions::new("read").with_sort(SortOrder::Asc));

        if let (Ok(plain), Ok(sorted)) = (plain, sorted) {
            let mut expected = plain.rows.clone();
            expected.sort_by_key(|r| r.duration);
            prop_assert_eq!(&sorted.rows, &expected);
            prop_assert!(sorted.rows.windows(2).all(|w| w[0].duration <= w[1].duration));
        }
    }

    #[test]
    fn prop_limit_caps_selection(ops in operations(), limit in 1usize..20) {
        let store = fixture_from(&ops).store();
        if let Ok(hist) = histogram::extract(&store, &HistogramOptions::new("read").with_limit(limit)) {
            prop_assert!(hist.selected <= limit);
            prop_assert!(hist.rows.len() <= hist.selected);
        }
    }

    #[test]
    fn prop_buckets_sum_counted_attributions(
        children in prop::collection::vec((0usize..4, 0i64..500, 0i64..3), 0..25)
    ) {
        const TAGS: [&str; 4] = ["CFS", "KVS", "DSAL", "OTHER"];
        let mut fx = Fixture::new();
        fx.op(1, "read", None, 0, 10_000);
        for (i, &(tag, duration, parent)) in children.iter().enumerate() {
            let opid = i as i64 + 2;
            // parent 0 = root, otherwise an earlier child if one exists
            let dst = if parent == 0 || opid - parent < 2 { 1 } else { opid - parent };
            fx.op(opid, "child", Some(TAGS[tag]), 0, duration);
            fx.map(opid, dst, 1, Some(TAGS[tag]));
        }
        let store = fx.store();
        let table = CategoryTable::default_table().unwrap();
        let mut diagnostics = Diagnostics::new();
        let breakdown = CategoryAggregator::new(&store, &table)
            .aggregate(1, &mut diagnostics)
            .unwrap()
            .unwrap();

        let mut counted_per_tag = std::collections::HashMap::new();
        for bucket in &breakdown.buckets {
            let sum: i64 = breakdown
                .attributions
                .iter()
                .filter(|a| matches!(&a.outcome, AttributionOutcome::Counted { category } if *category == bucket.name))
                .map(|a| a.duration)
                .sum();
            prop_assert_eq!(bucket.duration, sum);
        }
        // Every child shares clearance 1, so each tag is counted at most once
        for a in &breakdown.attributions {
            if let AttributionOutcome::Counted { category } = &a.outcome {
                *counted_per_tag.entry(category.clone()).or_insert(0) += 1;
            }
        }
        prop_assert!(counted_per_tag.values().all(|&n| n <= 1));
    }

    #[test]
    fn prop_call_tree_parents_are_acyclic(
        links in prop::collection::vec((1i64..8, 1i64..8, 1i64..8), 0..20)
    ) {
        let mut fx = Fixture::new();
        for opid in 1..8 {
            fx.op(opid, "op", None, 0, 100);
        }
        for &(src, dst, clr) in &links {
            fx.map(src, dst, clr, None);
        }
        let store = fx.store();
        let tree = CallTreeBuilder::new(&store).build(1).unwrap();

        // Walking parent links from any operation terminates at the root
        for op in tree.operations() {
            let mut current = op.span.opid;
            let mut steps = 0;
            while let Some(parent) = tree.operation(current).and_then(|o| o.parent) {
                current = parent;
                steps += 1;
                prop_assert!(steps <= tree.operations().len());
            }
            prop_assert_eq!(current, 1);
        }
        // Every operation has exactly one init and one finish node
        prop_assert_eq!(tree.node_count(), tree.operations().len() * 2);
    }

    #[test]
    fn prop_like_pattern_never_panics(pattern in "[a-z_%.*?()\\[\\]]{1,12}", tag in "[a-z_]{0,12}") {
        if let Ok(p) = FnTagPattern::new(&pattern) {
            let _ = p.matches(&tag);
            prop_assert_eq!(p.as_str(), pattern.as_str());
        }
    }
}
