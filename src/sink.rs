//! Execution-trace output sink
//!
//! Destination for the human-readable traces of remote command execution:
//! either the console, or a per-session log file with a console echo. This is
//! separate from diagnostic logging (the `log` facade): the sink carries the
//! remote output itself.

use regex::Regex;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static ANSI_RE: OnceLock<Regex> = OnceLock::new();

/// Strip ANSI escape sequences from terminal output.
///
/// Interactive shells and `top` decorate output with cursor and color
/// controls; everything downstream (report parsing, probe parsing) wants the
/// plain text.
pub fn clean_ansi(text: &str) -> String {
    let re = ANSI_RE.get_or_init(|| {
        Regex::new(r"\x1B(?:\[[0-9;?]*[ -/]*[@-~]|\][^\x07]*\x07)").expect("static regex")
    });
    re.replace_all(text, "").into_owned()
}

/// Trace destination for one session's command execution
pub struct OutputSink {
    file: Option<File>,
    path: Option<PathBuf>,
    quiet: bool,
}

impl OutputSink {
    /// Sink that writes to the console only
    pub fn console() -> Self {
        Self {
            file: None,
            path: None,
            quiet: false,
        }
    }

    /// Sink that discards console output (used by background samplers)
    pub fn quiet() -> Self {
        Self {
            file: None,
            path: None,
            quiet: true,
        }
    }

    /// Sink backed by a log file.
    ///
    /// Falls back to console-only when the file cannot be opened; a broken
    /// log path must not prevent the session from running.
    pub fn to_file<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match File::create(path) {
            Ok(file) => Self {
                file: Some(file),
                path: Some(path.to_path_buf()),
                quiet: true,
            },
            Err(e) => {
                log::warn!(
                    "cannot open log file {}: {}, falling back to console",
                    path.display(),
                    e
                );
                Self::console()
            }
        }
    }

    /// Path of the backing log file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write one trace line
    pub fn write(&mut self, message: &str) {
        self.write_raw(message);
        self.write_raw("\n");
    }

    /// Write a chunk without a trailing newline (real-time streaming)
    pub fn write_raw(&mut self, chunk: &str) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.write_all(chunk.as_bytes());
            let _ = file.flush();
        }
        if !self.quiet {
            print!("{}", chunk);
            let _ = std::io::stdout().flush();
        }
    }

    pub fn print_header(&mut self, what: &str) {
        self.write(&format!("\n=== executing {} ===", what));
    }

    pub fn print_footer(&mut self, interrupted: bool) {
        if interrupted {
            self.write("\n=== interrupted by caller ===");
        } else {
            self.write("\n=== done ===");
        }
    }

    pub fn print_output(&mut self, output: &str) {
        if !output.is_empty() {
            self.write(output);
        }
    }

    pub fn print_error(&mut self, error: &str) {
        if !error.is_empty() {
            self.write(&format!("stderr:\n{}", error));
        }
    }

    pub fn print_exit_status(&mut self, status: i32) {
        self.write(&format!("exit status: {}", status));
    }
}
