//! Algebraic laws of the allocation algebra, checked over generated inputs.

use proptest::prelude::*;
use quantflow::engine::types::Allocation;
use quantflow::engine::weighting::{normalize, turnover_fraction, WEIGHT_EPSILON};

const TICKERS: [&str; 5] = ["SPY", "QQQ", "TLT", "GLD", "IWM"];

fn allocation_strategy() -> impl Strategy<Value = Allocation> {
    proptest::collection::vec((0usize..TICKERS.len(), -0.5f64..2.0), 0..6).prop_map(|entries| {
        let mut allocation = Allocation::default();
        for (idx, weight) in entries {
            *allocation.entry(TICKERS[idx].to_string()).or_insert(0.0) += weight;
        }
        allocation
    })
}

proptest! {
    #[test]
    fn normalize_bounds_mass_and_sign(mut allocation in allocation_strategy()) {
        normalize(&mut allocation);
        let total: f64 = allocation.values().sum();
        prop_assert!(total <= 1.0 + WEIGHT_EPSILON, "total {total}");
        for weight in allocation.values() {
            prop_assert!(*weight >= 0.0);
        }
    }

    #[test]
    fn normalize_is_idempotent(mut allocation in allocation_strategy()) {
        normalize(&mut allocation);
        let once = allocation.clone();
        normalize(&mut allocation);
        prop_assert_eq!(once, allocation);
    }

    #[test]
    fn turnover_is_zero_on_self(mut allocation in allocation_strategy()) {
        normalize(&mut allocation);
        prop_assert!(turnover_fraction(&allocation, &allocation).abs() < 1e-12);
    }

    #[test]
    fn turnover_is_symmetric(
        mut a in allocation_strategy(),
        mut b in allocation_strategy(),
    ) {
        normalize(&mut a);
        normalize(&mut b);
        let forward = turnover_fraction(&a, &b);
        let backward = turnover_fraction(&b, &a);
        prop_assert!((forward - backward).abs() < 1e-12);
        prop_assert!((0.0..=1.0 + 1e-12).contains(&forward));
    }
}
