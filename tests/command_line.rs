// tests/command_line.rs

use std::sync::Arc;

use procmux::errors::ProcmuxError;
use procmux::platform::PlatformCapabilities;
use procmux::process::escape::{escape_argument, escape_posix, escape_windows};
use procmux::process::spec::{sigchild_wrap, windows_wrap};
use procmux::process::{ProcessBuilder, ProcessSpec};
use procmux_test_utils::builders::{posix_caps, shell};

#[test]
fn posix_arguments_are_single_quoted() {
    assert_eq!(escape_posix("plain"), "'plain'");
    assert_eq!(escape_posix(""), "''");
    assert_eq!(escape_posix("it's"), r"'it'\''s'");
    assert_eq!(escape_posix("$HOME; rm -rf /"), "'$HOME; rm -rf /'");
}

#[test]
fn windows_arguments_follow_cmd_rules() {
    assert_eq!(escape_windows(""), "\"\"");
    assert_eq!(escape_windows("a b"), "\"a b\"");
    assert_eq!(escape_windows("say \"hi\""), "\"say \\\"hi\\\"\"");
    assert_eq!(escape_windows("%PATH%"), "^%\"PATH\"^%");
    assert_eq!(escape_windows(r"C:\dir\"), "\"C:\\dir\\\\\"");
}

#[test]
fn escaping_dispatches_on_the_os_family() {
    let posix = PlatformCapabilities::posix();
    let windows = PlatformCapabilities::windows();
    assert_eq!(escape_argument("x y", &posix), "'x y'");
    assert_eq!(escape_argument("x y", &windows), "\"x y\"");
}

#[test]
fn positional_and_named_arguments_are_rendered_in_order() {
    let builder = shell("git")
        .arg("commit")
        .arg("a message")
        .named_arg("--author", "Jane Doe");

    assert_eq!(
        builder.command_line().unwrap(),
        "git 'commit' 'a message' --author='Jane Doe'"
    );
    assert_eq!(builder.to_string(), builder.command_line().unwrap());
}

#[test]
fn sigchild_shim_reports_the_code_on_descriptor_three() {
    let builder = shell("exit 3").sigchild(true);
    assert_eq!(
        builder.command_line().unwrap(),
        "(exit 3) 3>/dev/null; code=$?; echo $code >&3; exit $code"
    );
    assert_eq!(builder.command_line().unwrap(), sigchild_wrap("exit 3"));
}

#[test]
fn windows_family_wraps_for_cmd() {
    let caps = Arc::new(PlatformCapabilities::windows());
    let builder = ProcessBuilder::new("dir", caps).arg("C:\\Program Files");

    assert_eq!(
        builder.command_line().unwrap(),
        "cmd /V:ON /E:ON /C \"dir \"C:\\Program Files\"\""
    );
    assert_eq!(windows_wrap("ver"), "cmd /V:ON /E:ON /C \"ver\"");
}

#[test]
fn malformed_specs_are_rejected_before_spawning() {
    let cases = [
        ProcessBuilder::new("   ", posix_caps()),
        shell("echo").named_arg("", "x"),
        shell("echo").named_arg("bad name", "x"),
        shell("echo").named_arg("a=b", "x"),
        shell("echo").env("A=B", "x"),
        shell("echo").current_dir("/definitely/not/a/dir"),
    ];

    for builder in cases {
        match builder.command_line() {
            Err(ProcmuxError::ConfigError(_)) => {}
            other => panic!("expected ConfigError for {:?}, got {other:?}", builder.spec()),
        }
        match builder.spawn(b"") {
            Err(ProcmuxError::ConfigError(_)) => {}
            other => panic!("expected ConfigError, got {other:?}"),
        }
    }
}

#[test]
fn windows_shim_and_sigchild_cannot_be_combined() {
    let mut spec = ProcessSpec::new("ver");
    spec.compat.windows_shim = true;
    spec.compat.sigchild = true;

    match spec.validate() {
        Err(ProcmuxError::ConfigError(msg)) => assert!(msg.contains("POSIX-only")),
        other => panic!("expected ConfigError, got {other:?}"),
    }
}
