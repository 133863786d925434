// src/process/exit_codes.rs

//! Human-readable descriptions for POSIX exit codes.
//!
//! Codes above 128 follow the shell convention `128 + signal number`.

/// Description for `code`, if the table documents it.
pub fn describe(code: i32) -> Option<&'static str> {
    let text = match code {
        0 => "OK",
        1 => "General error",
        2 => "Misuse of shell builtins",

        126 => "Invoked command cannot execute",
        127 => "Command not found",
        128 => "Invalid exit argument",

        129 => "Hangup",
        130 => "Interrupt",
        131 => "Quit and dump core",
        132 => "Illegal instruction",
        133 => "Trace/breakpoint trap",
        134 => "Process aborted",
        135 => "Bus error: \"access to undefined portion of memory object\"",
        136 => "Floating point exception: \"erroneous arithmetic operation\"",
        137 => "Kill (terminate immediately)",
        138 => "User-defined 1",
        139 => "Segmentation violation",
        140 => "User-defined 2",
        141 => "Write to pipe with no one reading",
        142 => "Signal raised by alarm",
        143 => "Termination (request to terminate)",
        // 144 is not defined
        145 => "Child process terminated, stopped (or continued*)",
        146 => "Continue if stopped",
        147 => "Stop executing temporarily",
        148 => "Terminal stop signal",
        149 => "Background process attempting to read from tty (\"in\")",
        150 => "Background process attempting to write to tty (\"out\")",
        151 => "Urgent data available on socket",
        152 => "CPU time limit exceeded",
        153 => "File size limit exceeded",
        154 => "Signal raised by timer counting virtual time: \"virtual timer expired\"",
        155 => "Profiling timer expired",
        // 156 is not defined
        157 => "Pollable event",
        // 158 is not defined
        159 => "Bad syscall",
        _ => return None,
    };
    Some(text)
}

/// Like [`describe`], with a generic fallback.
pub fn describe_or_unknown(code: i32) -> &'static str {
    describe(code).unwrap_or("Unknown error")
}
