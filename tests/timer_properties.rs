// tests/timer_properties.rs

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;
use std::time::{Duration, Instant};

use proptest::prelude::*;

use procmux::reactor::{EventLoop, SelectLoop};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    // Timers scheduled against one base instant fire in deadline order, ties
    // in insertion order, and cancelled ones never fire.
    #[test]
    fn timers_fire_in_deadline_order_and_cancelled_ones_never_fire(
        delays in proptest::collection::vec(0u64..20, 1..12),
        cancel_mask in proptest::collection::vec(any::<bool>(), 12),
    ) {
        let mut event_loop = SelectLoop::select();
        let fired = Rc::new(RefCell::new(Vec::new()));
        let base = Instant::now();

        let mut cancelled = BTreeSet::new();
        for (index, delay) in delays.iter().enumerate() {
            let sink = Rc::clone(&fired);
            let id = event_loop.at(
                base + Duration::from_millis(*delay),
                Box::new(move |_, _| sink.borrow_mut().push(index)),
            );
            if cancel_mask[index] {
                prop_assert!(event_loop.cancel_timer(id));
                cancelled.insert(index);
            }
        }

        event_loop.run();

        let mut expected: Vec<usize> = (0..delays.len())
            .filter(|index| !cancelled.contains(index))
            .collect();
        expected.sort_by_key(|&index| delays[index]);

        prop_assert_eq!(fired.borrow().clone(), expected);
        prop_assert_eq!(event_loop.timer_count(), 0);
    }
}
