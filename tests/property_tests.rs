//! Property-based tests for cart line identity and checkout pricing.
//!
//! These tests use proptest to verify invariants across a wide range of inputs,
//! helping to catch edge cases that unit tests might miss.

use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

use reczone_api::services::carts::{line_key, normalized_member_ids};
use reczone_api::services::pricing::{expected_total, total_in_cents, within_tolerance};

// Strategies for generating test data
fn member_id_strategy() -> impl Strategy<Value = Uuid> {
    any::<u128>().prop_map(Uuid::from_u128)
}

fn member_set_strategy() -> impl Strategy<Value = Vec<Uuid>> {
    prop::collection::vec(member_id_strategy(), 1..6)
}

fn money_strategy() -> impl Strategy<Value = Decimal> {
    // Whole cents up to $50,000.00
    (0i64..5_000_000).prop_map(|cents| Decimal::new(cents, 2))
}

// Property: a line is addressed by its item and member set, not by input order
proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn line_key_ignores_member_order(
        item in member_id_strategy(),
        members in member_set_strategy(),
        rotation in 0usize..8,
    ) {
        let reversed: Vec<Uuid> = members.iter().rev().copied().collect();
        prop_assert_eq!(
            line_key(item, &members),
            line_key(item, &reversed),
            "reversing the members changed the key"
        );

        let rotated = rotate(&members, rotation);
        prop_assert_eq!(
            line_key(item, &members),
            line_key(item, &rotated),
            "rotating the members changed the key"
        );
    }

    #[test]
    fn line_key_collapses_duplicate_members(
        item in member_id_strategy(),
        members in member_set_strategy(),
    ) {
        let mut doubled = members.clone();
        doubled.extend_from_slice(&members);
        prop_assert_eq!(
            line_key(item, &members),
            line_key(item, &doubled),
            "listing a member twice changed the key"
        );
    }

    #[test]
    fn line_key_changes_with_the_member_set(
        item in member_id_strategy(),
        members in member_set_strategy(),
        extra in member_id_strategy(),
    ) {
        prop_assume!(!members.contains(&extra));
        let mut grown = members.clone();
        grown.push(extra);
        prop_assert_ne!(
            line_key(item, &members),
            line_key(item, &grown),
            "adding a member did not change the key"
        );
    }

    #[test]
    fn line_key_changes_with_the_item(
        item_a in member_id_strategy(),
        item_b in member_id_strategy(),
        members in member_set_strategy(),
    ) {
        prop_assume!(item_a != item_b);
        prop_assert_ne!(
            line_key(item_a, &members),
            line_key(item_b, &members),
            "two different items produced the same key"
        );
    }

    #[test]
    fn line_key_is_the_item_joined_with_normalized_members(
        item in member_id_strategy(),
        members in member_set_strategy(),
    ) {
        let mut expected = item.to_string();
        for member in normalized_member_ids(&members) {
            expected.push(':');
            expected.push_str(&member.to_string());
        }
        prop_assert_eq!(line_key(item, &members), expected);
    }
}

// Property: member normalization sorts, deduplicates, and loses nobody
proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn normalized_member_ids_are_strictly_sorted(members in member_set_strategy()) {
        let normalized = normalized_member_ids(&members);
        for pair in normalized.windows(2) {
            prop_assert!(
                pair[0] < pair[1],
                "normalized ids are not strictly increasing: {} then {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn normalizing_twice_changes_nothing(members in member_set_strategy()) {
        let once = normalized_member_ids(&members);
        let twice = normalized_member_ids(&once);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn normalization_keeps_every_distinct_member(members in member_set_strategy()) {
        let normalized = normalized_member_ids(&members);
        for member in &members {
            prop_assert!(
                normalized.contains(member),
                "member {} was dropped during normalization",
                member
            );
        }
        for member in &normalized {
            prop_assert!(
                members.contains(member),
                "member {} appeared out of nowhere",
                member
            );
        }
    }
}

// Property: the processing fee rounds to whole cents and never shrinks a total
proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn fee_never_reduces_a_subtotal(subtotal in money_strategy()) {
        let total = expected_total(subtotal);
        prop_assert!(
            total >= subtotal,
            "total {} fell below subtotal {}",
            total,
            subtotal
        );
    }

    #[test]
    fn fee_is_monotonic(a in money_strategy(), b in money_strategy()) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(
            expected_total(low) <= expected_total(high),
            "a larger subtotal produced a smaller total"
        );
    }

    #[test]
    fn expected_total_lands_on_whole_cents(subtotal in money_strategy()) {
        let total = expected_total(subtotal);
        prop_assert_eq!(
            total,
            total.round_dp(2),
            "total {} is not a whole number of cents",
            total
        );
    }

    #[test]
    fn gateway_cents_match_the_decimal_total(subtotal in money_strategy()) {
        let total = expected_total(subtotal);
        let cents = total_in_cents(total);
        prop_assert!(cents.is_ok(), "total {} did not convert to cents", total);
        if let Ok(cents) = cents {
            prop_assert!(cents >= 0, "cents went negative: {}", cents);
            prop_assert_eq!(
                Decimal::new(cents, 2),
                total,
                "cents {} do not round-trip to the total {}",
                cents,
                total
            );
        }
    }
}

// Property: the submitted-total tolerance is exactly one cent, in both directions
proptest! {
    #[test]
    fn drift_within_one_cent_is_tolerated(
        subtotal in money_strategy(),
        drift_cents in -5i64..=5,
    ) {
        let expected = expected_total(subtotal);
        let submitted = expected + Decimal::new(drift_cents, 2);
        let accepted = within_tolerance(submitted, expected);
        prop_assert_eq!(
            accepted,
            drift_cents.abs() <= 1,
            "drift of {} cents: accepted={}",
            drift_cents,
            accepted
        );
    }

    #[test]
    fn tolerance_is_symmetric(a in money_strategy(), b in money_strategy()) {
        prop_assert_eq!(within_tolerance(a, b), within_tolerance(b, a));
    }

    #[test]
    fn a_total_always_matches_itself(subtotal in money_strategy()) {
        let expected = expected_total(subtotal);
        prop_assert!(within_tolerance(expected, expected));
    }
}

// Helper functions

fn rotate(members: &[Uuid], by: usize) -> Vec<Uuid> {
    if members.is_empty() {
        return Vec::new();
    }
    let split = by % members.len();
    let mut rotated = members[split..].to_vec();
    rotated.extend_from_slice(&members[..split]);
    rotated
}
