//! Property-based tests using proptest.
//!
//! These tests verify invariants that should hold for all inputs,
//! helping catch edge cases that unit tests might miss.

use proptest::prelude::*;

use manifest_sync::cursor::{Cursor, Cursors, PublicSchemaReference};
use manifest_sync::resilience::RetryConfig;

fn schema() -> PublicSchemaReference {
    PublicSchemaReference::new("svc-a", "accounts", 1)
}

/// Strategy for transaction ids of the shape the engine sees.
fn transaction_id() -> impl Strategy<Value = String> {
    "[0-9a-f]{1,12}".prop_map(|s| format!("tx-{s}"))
}

// =============================================================================
// Cursor Monotonicity Properties
// =============================================================================

proptest! {
    /// After any sequence of advances, the cursor holds the
    /// lexicographic maximum of everything it was advanced with.
    #[test]
    fn cursor_holds_maximum_of_advances(ids in prop::collection::vec(transaction_id(), 1..20)) {
        let reference = schema();
        let mut cursors = Cursors::from_cursors(vec![Cursor::empty(reference.clone())]);
        for id in &ids {
            cursors.advance(&reference, id);
        }
        let expected = ids.iter().max().unwrap();
        prop_assert_eq!(
            cursors.get(&reference).unwrap().transaction_id.as_ref(),
            Some(expected)
        );
    }

    /// Advancing never moves a cursor backwards, at any intermediate
    /// step.
    #[test]
    fn cursor_never_regresses(ids in prop::collection::vec(transaction_id(), 1..20)) {
        let reference = schema();
        let mut cursors = Cursors::from_cursors(vec![Cursor::empty(reference.clone())]);
        let mut high: Option<String> = None;
        for id in &ids {
            cursors.advance(&reference, id);
            let current = cursors.get(&reference).unwrap().transaction_id.clone();
            prop_assert!(current >= high, "cursor went backwards");
            high = current;
        }
    }

    /// Duplicate cursors collapse to the furthest position regardless
    /// of their order in the input.
    #[test]
    fn duplicate_cursors_keep_furthest(mut ids in prop::collection::vec(transaction_id(), 1..10)) {
        let reference = schema();
        let expected = ids.iter().max().cloned();

        let forward: Vec<Cursor> = ids
            .iter()
            .map(|id| Cursor::new(reference.clone(), Some(id.clone())))
            .collect();
        let forward = Cursors::from_cursors(forward);

        ids.reverse();
        let reversed: Vec<Cursor> = ids
            .iter()
            .map(|id| Cursor::new(reference.clone(), Some(id.clone())))
            .collect();
        let reversed = Cursors::from_cursors(reversed);

        prop_assert_eq!(forward.get(&reference).unwrap().transaction_id.clone(), expected.clone());
        prop_assert_eq!(reversed.get(&reference).unwrap().transaction_id.clone(), expected);
    }

    /// Cursors for different schemas advance independently.
    #[test]
    fn cursors_are_independent_per_schema(
        a_ids in prop::collection::vec(transaction_id(), 1..10),
        b_ids in prop::collection::vec(transaction_id(), 1..10),
    ) {
        let a = PublicSchemaReference::new("svc-a", "accounts", 1);
        let b = PublicSchemaReference::new("svc-a", "accounts", 2);
        let mut cursors = Cursors::from_cursors(vec![
            Cursor::empty(a.clone()),
            Cursor::empty(b.clone()),
        ]);
        for id in &a_ids {
            cursors.advance(&a, id);
        }
        for id in &b_ids {
            cursors.advance(&b, id);
        }
        prop_assert_eq!(
            cursors.get(&a).unwrap().transaction_id.as_ref(),
            a_ids.iter().max()
        );
        prop_assert_eq!(
            cursors.get(&b).unwrap().transaction_id.as_ref(),
            b_ids.iter().max()
        );
    }
}

// =============================================================================
// Retry Backoff Properties
// =============================================================================

proptest! {
    /// Delays never exceed the configured maximum.
    #[test]
    fn retry_delay_is_bounded(attempt in 1u32..64) {
        let config = RetryConfig::default();
        prop_assert!(config.delay_for_attempt(attempt) <= config.max_delay);
    }

    /// The schedule is non-decreasing across attempts.
    #[test]
    fn retry_delay_is_monotone(attempt in 1u32..63) {
        let config = RetryConfig::default();
        prop_assert!(
            config.delay_for_attempt(attempt) <= config.delay_for_attempt(attempt + 1)
        );
    }
}
