// tests/reactor_streams.rs

use std::cell::{Cell, RefCell};
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::rc::Rc;
use std::time::Duration;

use procmux::errors::ProcmuxError;
use procmux::platform::PlatformCapabilities;
use procmux::reactor::{create_loop, EventLoop, LoopBackend};
use procmux_test_utils::{init_tracing, timed};

fn loops() -> Vec<Box<dyn EventLoop>> {
    init_tracing();
    let caps = PlatformCapabilities::detect();
    let mut loops = vec![create_loop(&caps, LoopBackend::Select).unwrap()];
    if caps.has_native_events() {
        loops.push(create_loop(&caps, LoopBackend::Native).unwrap());
    }
    loops
}

fn pipe() -> (File, File) {
    let (reader, writer) = nix::unistd::pipe().unwrap();
    (File::from(reader), File::from(writer))
}

#[test]
fn readable_callback_receives_written_data() {
    for mut event_loop in loops() {
        let (mut reader, mut writer) = pipe();
        writer.write_all(b"ping").unwrap();

        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&received);
        let fd = reader.as_raw_fd();
        event_loop
            .on_readable(
                fd,
                Box::new(move |lp: &mut dyn EventLoop, fd| {
                    let mut buf = [0u8; 16];
                    let n = reader.read(&mut buf).unwrap();
                    sink.borrow_mut().extend_from_slice(&buf[..n]);
                    lp.off_readable(fd);
                }),
            )
            .unwrap();

        event_loop.run();
        assert_eq!(received.borrow().as_slice(), b"ping");
    }
}

#[test]
fn registering_the_same_stream_twice_keeps_the_first_callback() {
    for mut event_loop in loops() {
        let (reader, mut writer) = pipe();
        writer.write_all(b"x").unwrap();
        let fd = reader.as_raw_fd();

        let first = Rc::new(Cell::new(0));
        let second = Rc::new(Cell::new(0));
        let first_hits = Rc::clone(&first);
        let second_hits = Rc::clone(&second);

        event_loop
            .on_readable(
                fd,
                Box::new(move |lp: &mut dyn EventLoop, fd| {
                    first_hits.set(first_hits.get() + 1);
                    lp.off(fd);
                }),
            )
            .unwrap();
        event_loop
            .on_readable(
                fd,
                Box::new(move |lp: &mut dyn EventLoop, fd| {
                    second_hits.set(second_hits.get() + 1);
                    lp.off(fd);
                }),
            )
            .unwrap();

        event_loop.run();
        assert_eq!(first.get(), 1);
        assert_eq!(second.get(), 0);
        drop(reader);
    }
}

#[test]
fn writable_callback_fires_for_an_empty_pipe() {
    for mut event_loop in loops() {
        let (mut reader, writer) = pipe();
        let fd = writer.as_raw_fd();
        let mut writer = Some(writer);

        event_loop
            .on_writable(
                fd,
                Box::new(move |lp: &mut dyn EventLoop, fd| {
                    lp.off_writable(fd);
                    if let Some(mut pipe) = writer.take() {
                        pipe.write_all(b"pong").unwrap();
                    }
                }),
            )
            .unwrap();

        event_loop.run();

        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "pong");
    }
}

#[test]
fn read_callback_stays_registered_until_removed() {
    for mut event_loop in loops() {
        let (mut reader, writer) = pipe();
        let fd = reader.as_raw_fd();
        let chunks = Rc::new(Cell::new(0));
        let counter = Rc::clone(&chunks);

        // Two separate writes, delivered by timers.
        let writer = Rc::new(RefCell::new(Some(writer)));
        for (delay, payload) in [(5u64, b"a"), (15u64, b"b")] {
            let pipe = Rc::clone(&writer);
            event_loop.after(
                Duration::from_millis(delay),
                Box::new(move |_, _| {
                    if let Some(pipe) = pipe.borrow_mut().as_mut() {
                        pipe.write_all(payload).unwrap();
                    }
                }),
            );
        }
        let closer = Rc::clone(&writer);
        event_loop.after(
            Duration::from_millis(25),
            Box::new(move |_, _| {
                closer.borrow_mut().take();
            }),
        );

        event_loop
            .on_readable(
                fd,
                Box::new(move |lp: &mut dyn EventLoop, fd| {
                    let mut buf = [0u8; 8];
                    match reader.read(&mut buf).unwrap() {
                        0 => lp.off_readable(fd),
                        _ => counter.set(counter.get() + 1),
                    }
                }),
            )
            .unwrap();

        event_loop.run();
        assert_eq!(chunks.get(), 2);
    }
}

#[test]
fn off_removes_both_directions() {
    for mut event_loop in loops() {
        let (reader, mut writer) = pipe();
        writer.write_all(b"x").unwrap();
        let fired = Rc::new(Cell::new(0));

        let read_hits = Rc::clone(&fired);
        event_loop
            .on_readable(
                reader.as_raw_fd(),
                Box::new(move |_, _| read_hits.set(read_hits.get() + 1)),
            )
            .unwrap();
        let write_hits = Rc::clone(&fired);
        event_loop
            .on_writable(
                writer.as_raw_fd(),
                Box::new(move |_, _| write_hits.set(write_hits.get() + 1)),
            )
            .unwrap();

        event_loop.off(reader.as_raw_fd());
        event_loop.off(writer.as_raw_fd());

        let ((), elapsed) = timed(|| event_loop.run());
        assert_eq!(fired.get(), 0);
        assert!(elapsed < Duration::from_millis(500));
    }
}

#[test]
fn stop_interrupts_a_loop_with_live_streams() {
    for mut event_loop in loops() {
        let (reader, _writer) = pipe();
        event_loop
            .on_readable(reader.as_raw_fd(), Box::new(|_, _| {}))
            .unwrap();
        event_loop.after(
            Duration::from_millis(10),
            Box::new(|lp: &mut dyn EventLoop, _| lp.stop()),
        );

        let ((), elapsed) = timed(|| event_loop.run());
        assert!(elapsed >= Duration::from_millis(10));
        assert!(elapsed < Duration::from_secs(2));
        event_loop.off(reader.as_raw_fd());
    }
}

#[test]
fn negative_descriptors_are_rejected() {
    for mut event_loop in loops() {
        match event_loop.on_readable(-1, Box::new(|_, _| {})) {
            Err(ProcmuxError::ConfigError(msg)) => assert!(msg.contains("invalid descriptor")),
            other => panic!("expected ConfigError, got {other:?}"),
        }
    }
}

#[test]
fn native_backend_is_refused_without_support() {
    let caps = PlatformCapabilities::posix().with_native_events(false);
    match create_loop(&caps, LoopBackend::Native) {
        Err(ProcmuxError::Unsupported(_)) => {}
        Err(other) => panic!("expected Unsupported, got {other:?}"),
        Ok(_) => panic!("expected Unsupported, got a loop"),
    }

    let fallback = create_loop(&caps, LoopBackend::Auto).unwrap();
    assert_eq!(fallback.backend(), LoopBackend::Select);
}
