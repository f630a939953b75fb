use proptest::prelude::*;
use widget_sync::sequencer::Sequencer;

fn permutation() -> impl Strategy<Value = Vec<u64>> {
    (1u64..40).prop_flat_map(|n| Just((0..n).collect::<Vec<u64>>()).prop_shuffle())
}

proptest! {
    #[test]
    fn any_arrival_order_is_released_in_sequence(order in permutation()) {
        let mut seq = Sequencer::new(order.len());
        let mut released = Vec::new();
        for n in &order {
            let out = seq.push(*n, *n);
            prop_assert!(!out.duplicate);
            prop_assert!(out.skipped.is_none());
            released.extend(out.ready);
        }
        let expected: Vec<u64> = (0..order.len() as u64).collect();
        prop_assert_eq!(released, expected);
        prop_assert_eq!(seq.pending(), 0);
    }

    #[test]
    fn releases_are_increasing_and_unique(
        arrivals in prop::collection::vec(0u64..30, 0..80),
        max_pending in 1usize..8,
    ) {
        let mut seq = Sequencer::new(max_pending);
        let mut released: Vec<u64> = Vec::new();
        for n in arrivals {
            let out = seq.push(n, n);
            prop_assert!(seq.pending() <= max_pending);
            released.extend(out.ready);
        }
        prop_assert!(released.windows(2).all(|w| w[0] < w[1]), "{:?}", released);
    }
}
