// tests/reactor_timers.rs

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use procmux::errors::ProcmuxError;
use procmux::platform::PlatformCapabilities;
use procmux::reactor::{create_loop, EventLoop, LoopBackend, TimerId};
use procmux_test_utils::{init_tracing, timed};

/// Every backend available on this host.
fn loops() -> Vec<Box<dyn EventLoop>> {
    init_tracing();
    let caps = PlatformCapabilities::detect();
    let mut loops = vec![create_loop(&caps, LoopBackend::Select).unwrap()];
    if caps.has_native_events() {
        loops.push(create_loop(&caps, LoopBackend::Native).unwrap());
    }
    loops
}

#[test]
fn one_shot_timer_fires_once_after_its_delay() {
    for mut event_loop in loops() {
        let fired = Rc::new(Cell::new(0));
        let counter = Rc::clone(&fired);
        event_loop.after(
            Duration::from_millis(30),
            Box::new(move |_, _| counter.set(counter.get() + 1)),
        );

        let ((), elapsed) = timed(|| event_loop.run());

        assert_eq!(fired.get(), 1, "backend {}", event_loop.backend());
        assert!(elapsed >= Duration::from_millis(30), "fired too early: {elapsed:?}");
    }
}

#[test]
fn cancelled_timer_never_fires() {
    for mut event_loop in loops() {
        let fired = Rc::new(Cell::new(false));
        let flag = Rc::clone(&fired);
        let id = event_loop.after(Duration::from_millis(20), Box::new(move |_, _| flag.set(true)));

        assert!(event_loop.is_timer_active(id));
        assert!(event_loop.cancel_timer(id));
        assert!(!event_loop.is_timer_active(id));
        assert!(!event_loop.cancel_timer(id), "second cancel is a no-op");

        let ((), elapsed) = timed(|| event_loop.run());
        assert!(!fired.get());
        assert!(elapsed < Duration::from_millis(20), "run waited for a cancelled timer");
    }
}

#[test]
fn cancelling_a_fired_one_shot_is_a_noop() {
    for mut event_loop in loops() {
        let id = event_loop.immediately(Box::new(|_, _| {}));
        event_loop.run();

        assert!(!event_loop.is_timer_active(id));
        assert!(!event_loop.cancel_timer(id));
    }
}

#[test]
fn periodic_timer_can_cancel_itself() {
    for mut event_loop in loops() {
        let fired = Rc::new(Cell::new(0));
        let counter = Rc::clone(&fired);
        event_loop
            .repeat(
                Duration::from_millis(5),
                Box::new(move |lp: &mut dyn EventLoop, id: TimerId| {
                    counter.set(counter.get() + 1);
                    if counter.get() == 3 {
                        assert!(lp.cancel_timer(id));
                    }
                }),
            )
            .unwrap();

        event_loop.run();
        assert_eq!(fired.get(), 3);
    }
}

#[test]
fn periodic_timer_fires_about_once_per_interval() {
    for mut event_loop in loops() {
        let fired = Rc::new(Cell::new(0));
        let counter = Rc::clone(&fired);
        event_loop
            .repeat(
                Duration::from_millis(10),
                Box::new(move |_, _| counter.set(counter.get() + 1)),
            )
            .unwrap();
        event_loop.after(
            Duration::from_millis(105),
            Box::new(|lp: &mut dyn EventLoop, _| lp.stop()),
        );

        event_loop.run();

        // floor(105 / 10) at most; re-arming after each callback only adds delay.
        let count = fired.get();
        assert!(count <= 10, "fired {count} times");
        assert!(count >= 5, "fired {count} times");
    }
}

#[test]
fn periodic_firings_are_spaced_by_the_interval() {
    for mut event_loop in loops() {
        let stamps = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&stamps);
        event_loop
            .repeat(
                Duration::from_millis(15),
                Box::new(move |lp: &mut dyn EventLoop, id: TimerId| {
                    sink.borrow_mut().push(Instant::now());
                    if sink.borrow().len() == 4 {
                        lp.cancel_timer(id);
                    }
                }),
            )
            .unwrap();

        event_loop.run();

        let stamps = stamps.borrow();
        assert_eq!(stamps.len(), 4);
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(15));
        }
    }
}

#[test]
fn zero_interval_periodic_timer_is_rejected() {
    for mut event_loop in loops() {
        match event_loop.repeat(Duration::ZERO, Box::new(|_, _| {})) {
            Err(ProcmuxError::ConfigError(msg)) => assert!(msg.contains("interval")),
            other => panic!("expected ConfigError, got {other:?}"),
        }
    }
}

#[test]
fn timers_due_together_fire_in_deadline_then_insertion_order() {
    for mut event_loop in loops() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let when = Instant::now();

        for (label, due) in [
            ("late", when + Duration::from_millis(10)),
            ("first", when),
            ("second", when),
        ] {
            let sink = Rc::clone(&order);
            event_loop.at(due, Box::new(move |_, _| sink.borrow_mut().push(label)));
        }
        let sink = Rc::clone(&order);
        event_loop.immediately(Box::new(move |_, _| sink.borrow_mut().push("immediate")));

        event_loop.run();
        assert_eq!(*order.borrow(), vec!["first", "second", "immediate", "late"]);
    }
}

#[test]
fn stop_from_a_callback_ends_run_with_timers_still_pending() {
    for mut event_loop in loops() {
        let fired = Rc::new(Cell::new(0));
        let counter = Rc::clone(&fired);
        let periodic = event_loop
            .repeat(
                Duration::from_millis(5),
                Box::new(move |lp: &mut dyn EventLoop, _| {
                    counter.set(counter.get() + 1);
                    lp.stop();
                }),
            )
            .unwrap();

        event_loop.run();

        assert_eq!(fired.get(), 1);
        assert!(event_loop.is_timer_active(periodic));
        assert!(event_loop.cancel_timer(periodic));
    }
}

#[test]
fn tick_does_not_block_on_future_timers() {
    for mut event_loop in loops() {
        let id = event_loop.after(Duration::from_secs(3600), Box::new(|_, _| {}));

        let ((), elapsed) = timed(|| event_loop.tick());

        assert!(elapsed < Duration::from_millis(500));
        assert!(event_loop.is_timer_active(id));
    }
}

#[test]
fn callbacks_can_schedule_more_timers() {
    for mut event_loop in loops() {
        let fired = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&fired);
        event_loop.immediately(Box::new(move |lp: &mut dyn EventLoop, _| {
            sink.borrow_mut().push("outer");
            let inner = Rc::clone(&sink);
            lp.after(
                Duration::from_millis(5),
                Box::new(move |_, _| inner.borrow_mut().push("inner")),
            );
        }));

        event_loop.run();
        assert_eq!(*fired.borrow(), vec!["outer", "inner"]);
    }
}
