//! Property tests for merge order independence, idempotent ingestion,
//! serialization and left-to-right expression evaluation.

use luma_ortho::{BucketExpr, BucketedState, OrthConfig, SetOperator};
use proptest::prelude::*;
use roaring::RoaringBitmap;

/// Rows of (bucket, element) over a small key space so buckets collide.
fn rows() -> impl Strategy<Value = Vec<(u8, u32)>> {
    prop::collection::vec((0u8..6, 0u32..512), 0..200)
}

fn build(rows: &[(u8, u32)]) -> BucketedState<String> {
    let mut state = BucketedState::new();
    for (key, element) in rows {
        state.insert(&format!("g{}", key), *element);
    }
    state
}

fn operator() -> impl Strategy<Value = SetOperator> {
    prop_oneof![
        Just(SetOperator::Intersect),
        Just(SetOperator::Union),
        Just(SetOperator::Difference),
    ]
}

proptest! {
    #[test]
    fn prop_merge_order_is_irrelevant(rows in rows(), cuts in prop::collection::vec(0usize..200, 0..6)) {
        let mut bounds: Vec<usize> = cuts.into_iter().map(|c| c.min(rows.len())).collect();
        bounds.push(0);
        bounds.push(rows.len());
        bounds.sort_unstable();
        let parts: Vec<BucketedState<String>> = bounds
            .windows(2)
            .map(|w| build(&rows[w[0]..w[1]]))
            .collect();

        let mut forward = BucketedState::new();
        for part in &parts {
            forward.merge(part);
        }
        let mut backward = BucketedState::new();
        for part in parts.iter().rev() {
            backward.merge(part);
        }
        // ((p0 + p1) + (p2 + p3)) ...
        let mut level = parts.clone();
        while level.len() > 1 {
            level = level
                .chunks(2)
                .map(|pair| {
                    let mut merged = pair[0].clone();
                    if let Some(right) = pair.get(1) {
                        merged.merge_owned(right.clone());
                    }
                    merged
                })
                .collect();
        }
        let tree = level.pop().unwrap_or_default();

        let direct = build(&rows);
        prop_assert_eq!(&forward, &direct);
        prop_assert_eq!(&backward, &direct);
        prop_assert_eq!(&tree, &direct);
    }

    #[test]
    fn prop_add_is_idempotent(rows in rows()) {
        let once = build(&rows);
        let mut twice = once.clone();
        for (key, element) in &rows {
            twice.insert(&format!("g{}", key), *element);
        }
        twice.merge(&once);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn prop_serialization_roundtrip(rows in rows()) {
        let state = build(&rows);
        let bytes = state.to_bytes().unwrap();
        let decoded = BucketedState::<String>::deserialize(&bytes, 4096).unwrap();
        prop_assert_eq!(decoded.to_bytes().unwrap(), bytes);
        prop_assert_eq!(decoded, state);
    }

    #[test]
    fn prop_integer_keys_roundtrip(rows in prop::collection::vec((any::<i64>(), any::<u32>()), 0..64)) {
        let mut state = BucketedState::<i64>::new();
        for (key, element) in &rows {
            state.insert(key, *element);
        }
        let bytes = state.to_bytes().unwrap();
        prop_assert_eq!(BucketedState::<i64>::deserialize(&bytes, 4096).unwrap(), state);
    }

    #[test]
    fn prop_flat_chain_folds_left(
        rows in rows(),
        first in 0u8..7,
        rest in prop::collection::vec((operator(), 0u8..7), 0..12),
    ) {
        // g6 never receives rows.
        let state = build(&rows);
        let mut source = format!("g{}", first);
        let mut expected = state.get(&format!("g{}", first)).into_owned();
        for (op, key) in &rest {
            source.push(op.symbol());
            source.push_str(&format!("g{}", key));
            op.apply(&mut expected, &state.get(&format!("g{}", key)));
        }

        let expr = BucketExpr::<String>::parse(&source, &OrthConfig::default()).unwrap();
        prop_assert_eq!(expr.evaluate(&state), expected);
    }

    #[test]
    fn prop_display_reparses_to_same_result(
        rows in rows(),
        first in 0u8..6,
        rest in prop::collection::vec((operator(), 0u8..6), 0..8),
    ) {
        let state = build(&rows);
        let mut source = format!("g{}", first);
        for (op, key) in &rest {
            source.push(op.symbol());
            source.push_str(&format!("g{}", key));
        }

        let config = OrthConfig::default();
        let expr = BucketExpr::<String>::parse(&source, &config).unwrap();
        let reparsed = BucketExpr::<String>::parse(&expr.to_string(), &config).unwrap();
        prop_assert_eq!(reparsed.evaluate(&state), expr.evaluate(&state));
    }
}

#[test]
fn test_empty_state_evaluates_to_empty() {
    let expr = BucketExpr::<String>::parse("a|b&c", &OrthConfig::default()).unwrap();
    assert_eq!(expr.evaluate(&BucketedState::new()), RoaringBitmap::new());
}
