// tests/result_buffer.rs

use std::str::FromStr;

use procmux::errors::ProcmuxError;
use procmux::process::{ProcessResult, StreamKind, UNKNOWN_EXIT_CODE};

#[test]
fn unknown_code_is_replaced_but_real_code_is_kept() {
    let mut result = ProcessResult::new("true");
    result.set_code(UNKNOWN_EXIT_CODE);
    result.set_code(0);
    assert_eq!(result.code(), Some(0));

    let mut result = ProcessResult::new("false");
    result.set_code(5);
    result.set_code(UNKNOWN_EXIT_CODE);
    result.set_code(3);
    assert_eq!(result.code(), Some(5));
}

#[test]
fn latest_output_returns_only_the_delta() {
    let mut result = ProcessResult::new("cmd");
    result.accumulate(StreamKind::Stdout, b"foo");
    assert_eq!(result.latest_output(), b"foo");
    assert_eq!(result.latest_output(), b"");

    result.accumulate(StreamKind::Stdout, b"bar");
    assert_eq!(result.latest_output(), b"bar");
    assert_eq!(result.output(), b"foobar");
}

#[test]
fn streams_are_kept_apart() {
    let mut result = ProcessResult::new("cmd");
    result.accumulate(StreamKind::Stderr, b"oops");
    result.accumulate(StreamKind::Stdout, b"ok");

    assert_eq!(result.output_text(), "ok");
    assert_eq!(result.errors_text(), "oops");
    assert_eq!(result.latest_errors(), b"oops");
    assert_eq!(result.latest_errors(), b"");
}

#[test]
fn code_text_follows_the_exit_code_table() {
    let mut result = ProcessResult::new("cmd");
    assert_eq!(result.code_text(), None);

    result.set_code(2);
    assert_eq!(result.code_text(), Some("Misuse of shell builtins"));

    let mut killed = ProcessResult::new("cmd");
    killed.set_code(137);
    assert_eq!(killed.code_text(), Some("Kill (terminate immediately)"));

    let mut odd = ProcessResult::new("cmd");
    odd.set_code(42);
    assert_eq!(odd.code_text(), Some("Unknown error"));
}

#[test]
fn a_fresh_result_is_neither_complete_nor_successful() {
    let result = ProcessResult::new("cmd");
    assert!(!result.is_started());
    assert!(!result.is_running());
    assert!(!result.is_complete());
    assert!(!result.is_successful());
}

#[test]
fn stream_kind_parses_short_and_long_names() {
    assert_eq!(StreamKind::from_str("out").unwrap(), StreamKind::Stdout);
    assert_eq!(StreamKind::from_str("STDERR").unwrap(), StreamKind::Stderr);
    assert_eq!(StreamKind::Stdout.to_string(), "out");

    match StreamKind::from_str("stdin") {
        Err(ProcmuxError::ConfigError(msg)) => assert!(msg.contains("stdin")),
        other => panic!("expected ConfigError, got {other:?}"),
    }
}
