// tests/process_execute.rs

use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use procmux::errors::ProcmuxError;
use procmux::platform::PlatformCapabilities;
use procmux::process::{ProcessBuilder, StreamKind};
use procmux_test_utils::builders::{fast_settings, file_stdout_shell, shell, sigchild_shell};
use procmux_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn stdin_is_echoed_back_by_cat() -> TestResult {
    init_tracing();
    let result = shell("cat").execute(b"foo\n", |_, _| {}, None)?;

    assert_eq!(result.output(), b"foo\n");
    assert_eq!(result.code(), Some(0));
    assert!(result.is_complete());
    assert!(result.is_successful());
    Ok(())
}

#[test]
fn non_zero_exit_is_reported_with_its_description() -> TestResult {
    init_tracing();
    let result = shell("exit 2").execute(b"", |_, _| {}, None)?;

    assert_eq!(result.code(), Some(2));
    assert!(result.is_complete());
    assert!(!result.is_successful());
    assert_eq!(result.code_text(), Some("Misuse of shell builtins"));
    Ok(())
}

#[test]
fn missing_command_maps_to_127() -> TestResult {
    init_tracing();
    let result = shell("definitely-not-an-installed-command-xyz").execute(b"", |_, _| {}, None)?;

    assert_eq!(result.code(), Some(127));
    assert_eq!(result.code_text(), Some("Command not found"));
    assert!(!result.errors().is_empty());
    Ok(())
}

#[test]
fn callback_sees_each_stream_separately() -> TestResult {
    init_tracing();
    let mut out = Vec::new();
    let mut err = Vec::new();

    let result = shell("printf out; printf err >&2").execute(
        b"",
        |kind, bytes| match kind {
            StreamKind::Stdout => out.extend_from_slice(bytes),
            StreamKind::Stderr => err.extend_from_slice(bytes),
        },
        None,
    )?;

    assert_eq!(out, b"out");
    assert_eq!(err, b"err");
    assert_eq!(result.output(), b"out");
    assert_eq!(result.errors(), b"err");
    Ok(())
}

#[test]
fn arguments_reach_the_process_verbatim() -> TestResult {
    init_tracing();
    let result = shell("printf '%s|'")
        .arg("a b")
        .arg("it's")
        .arg("$HOME")
        .execute(b"", |_, _| {}, None)?;

    assert_eq!(result.output_text(), "a b|it's|$HOME|");
    Ok(())
}

#[test]
fn named_arguments_are_joined_with_equals() -> TestResult {
    init_tracing();
    let result = shell("echo")
        .named_arg("--name", "x y")
        .execute(b"", |_, _| {}, None)?;

    assert_eq!(result.output_text(), "--name=x y\n");
    Ok(())
}

#[test]
fn environment_and_working_directory_are_applied() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;

    let result = shell("printf '%s:' \"$GREETING\"; pwd")
        .env("GREETING", "hello")
        .current_dir(dir.path())
        .execute(b"", |_, _| {}, None)?;

    let text = result.output_text();
    let (greeting, cwd) = text.split_once(':').ok_or("missing separator")?;
    assert_eq!(greeting, "hello");
    assert_eq!(Path::new(cwd.trim()).canonicalize()?, dir.path().canonicalize()?);
    Ok(())
}

#[test]
fn large_output_is_fully_collected() -> TestResult {
    init_tracing();
    let result = shell("head -c 300000 /dev/zero").execute(b"", |_, _| {}, None)?;
    assert_eq!(result.output().len(), 300_000);
    Ok(())
}

#[test]
fn large_input_is_written_with_backpressure() -> TestResult {
    init_tracing();
    let input = vec![b'z'; 500_000];
    let result = shell("wc -c").execute(&input, |_, _| {}, None)?;

    assert_eq!(result.output_text().trim(), "500000");
    Ok(())
}

#[test]
fn file_backed_stdout_captures_everything() -> TestResult {
    init_tracing();
    let result = file_stdout_shell("head -c 200000 /dev/zero; printf done >&2")
        .execute(b"", |_, _| {}, None)?;

    assert_eq!(result.output().len(), 200_000);
    assert_eq!(result.errors(), b"done");
    assert_eq!(result.code(), Some(0));
    Ok(())
}

#[test]
fn sigchild_shim_recovers_the_exit_code() -> TestResult {
    init_tracing();
    let result = sigchild_shell("printf hi; exit 3").execute(b"", |_, _| {}, None)?;

    assert_eq!(result.output(), b"hi");
    assert_eq!(result.code(), Some(3));
    Ok(())
}

#[test]
fn sigchild_shim_keeps_descriptor_three_away_from_the_command() -> TestResult {
    init_tracing();
    let result = sigchild_shell("echo 99 >&3; exit 0").execute(b"", |_, _| {}, None)?;

    assert_eq!(result.code(), Some(0));
    Ok(())
}

#[test]
fn pipeline_feeds_upstream_output_into_downstream_input() -> TestResult {
    init_tracing();
    let upstream = shell("cat");
    let downstream = shell("tr a-z A-Z").pipe_from(upstream);

    let mut seen = Vec::new();
    let result = downstream.execute(b"hello", |_, bytes| seen.extend_from_slice(bytes), None)?;

    assert_eq!(result.output(), b"HELLO");
    assert_eq!(seen, b"HELLO");
    Ok(())
}

#[test]
fn piped_builders_cannot_be_spawned() {
    init_tracing();
    let builder = shell("cat").pipe_from(shell("echo hi"));

    match builder.spawn(b"") {
        Err(ProcmuxError::Unsupported(msg)) => assert!(msg.contains("piped")),
        other => panic!("expected Unsupported, got {other:?}"),
    }
}

#[test]
fn missing_shell_is_a_spawn_failure() {
    init_tracing();
    let caps = Arc::new(PlatformCapabilities::posix().with_shell("/nonexistent/procmux-shell"));
    let builder = ProcessBuilder::new("true", caps).settings(fast_settings());

    match builder.execute(b"", |_, _| {}, None) {
        Err(ProcmuxError::SpawnFailure { command, .. }) => assert_eq!(command, "true"),
        other => panic!("expected SpawnFailure, got {other:?}"),
    }
}
