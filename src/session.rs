//! Remote session and command execution
//!
//! One [`SshSession`] owns one transport connection to a host and exposes
//! three execution modes:
//!
//! - **blocking**: a fresh exec channel per call, fully drained, with exit
//!   status. No shell state (cwd, exported vars) persists across calls;
//!   every call starts from the login shell's default state. This is an
//!   intentional property of the mode, not a defect.
//! - **real-time**: a pty-backed exec channel streamed chunk-by-chunk to the
//!   [`OutputSink`], with cooperative interruption.
//! - **in-session**: a command written into the single persistent interactive
//!   shell, collected until a prompt suffix appears or a timeout elapses.
//!   State *does* persist across calls; multi-step procedures (bind NICs,
//!   cd, write configs, launch the generator) rely on this.
//!
//! Once a session is opened persistent, the [`Executor`] facade always routes
//! through the interactive shell; the real-time mode only applies to
//! non-persistent sessions.

use crate::defaults;
use crate::error::{AppError, Result};
use crate::sink::OutputSink;
use ssh2::{Channel, Session};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of one fully-drained remote command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    /// Non-zero exit is data for the caller to interpret, never an error here
    pub exit_status: i32,
}

impl ExecutionResult {
    pub fn ok(stdout: String) -> Self {
        Self {
            stdout,
            stderr: String::new(),
            exit_status: 0,
        }
    }
}

/// Connection parameters plus the prompt-detection knobs for the
/// persistent-shell mode.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Prompt suffixes accepted as end-of-command markers.
    pub prompts: Vec<String>,
    /// Hard fallback when no prompt suffix is seen.
    pub shell_timeout: Duration,
}

impl SessionConfig {
    pub fn new(host: &str, port: u16, username: &str, password: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            username: username.to_string(),
            password: password.to_string(),
            prompts: defaults::SHELL_PROMPTS.iter().map(|p| p.to_string()).collect(),
            shell_timeout: defaults::SHELL_TIMEOUT,
        }
    }
}

/// The single-command execution seam.
///
/// The monitor, the pair runner and the orchestrator talk to remote hosts
/// exclusively through this trait, which keeps them testable against scripted
/// fakes.
pub trait Executor: Send {
    /// Execute one command through the session's routing policy
    fn execute(&mut self, command: &str) -> Result<ExecutionResult>;

    /// Execute with an explicit output-collection timeout.
    ///
    /// Only meaningful for persistent sessions; the blocking mode's effective
    /// bound is the remote command's own duration.
    fn execute_with_timeout(&mut self, command: &str, timeout: Duration) -> Result<ExecutionResult>;

    /// Release the remote shell (if any) and the transport. Idempotent.
    fn close(&mut self);
}

/// Opens executors; one implementation per transport (SSH, scripted fakes)
pub trait Connector: Send + Sync {
    fn connect(&self, persistent: bool) -> Result<Box<dyn Executor>>;
}

/// Check whether accumulated shell output ends in one of the accepted
/// prompt suffixes. A prompt waits for input, so it is never followed by a
/// newline; only the raw tail is matched.
pub fn ends_with_prompt(output: &str, prompts: &[String]) -> bool {
    prompts.iter().any(|p| output.ends_with(p.as_str()))
}

/// One transport connection to a remote host
pub struct SshSession {
    config: SessionConfig,
    sink: OutputSink,
    transport: Option<Session>,
    shell: Option<Channel>,
    persistent: bool,
}

impl SshSession {
    pub fn new(config: SessionConfig, sink: OutputSink) -> Self {
        Self {
            config,
            sink,
            transport: None,
            shell: None,
            persistent: false,
        }
    }

    /// Establish the transport; if `persistent`, also open the one
    /// interactive shell and discard the login banner.
    pub fn connect(&mut self, persistent: bool) -> Result<()> {
        let addr = (self.config.host.as_str(), self.config.port);
        let tcp = TcpStream::connect(addr).map_err(|e| {
            AppError::connection(format!(
                "cannot reach {}:{}: {}",
                self.config.host, self.config.port, e
            ))
        })?;

        let mut transport = Session::new()?;
        transport.set_tcp_stream(tcp);
        transport.handshake().map_err(|e| {
            AppError::connection(format!("SSH handshake with {} failed: {}", self.config.host, e))
        })?;
        transport
            .userauth_password(&self.config.username, &self.config.password)
            .map_err(|e| {
                AppError::connection(format!(
                    "authentication as {}@{} failed: {}",
                    self.config.username, self.config.host, e
                ))
            })?;

        log::info!("connected to {}@{}:{}", self.config.username, self.config.host, self.config.port);

        self.transport = Some(transport);
        self.persistent = persistent;
        if persistent {
            self.start_shell()?;
        }
        Ok(())
    }

    /// At most one interactive shell per session
    fn start_shell(&mut self) -> Result<()> {
        if self.shell.is_some() {
            return Ok(());
        }
        let transport = self.require_transport()?;
        let mut shell = transport.channel_session()?;
        shell.request_pty("xterm", None, None)?;
        shell.shell()?;

        // let the login banner and first prompt arrive, then discard them
        std::thread::sleep(defaults::BANNER_WAIT);
        let transport = self.require_transport()?;
        transport.set_blocking(false);
        let mut scratch = [0u8; 4096];
        loop {
            match shell.read(&mut scratch) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
        transport.set_blocking(true);

        self.shell = Some(shell);
        Ok(())
    }

    fn require_transport(&self) -> Result<&Session> {
        self.transport
            .as_ref()
            .ok_or_else(|| AppError::connection("session is not connected"))
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// Run one command on a fresh channel, drain both streams, wait for exit.
    pub fn execute_blocking(&mut self, command: &str) -> Result<ExecutionResult> {
        self.sink.print_header(command);
        let transport = self.require_transport()?;
        let mut channel = transport.channel_session()?;
        channel.exec(command)?;

        let mut stdout = String::new();
        channel.read_to_string(&mut stdout)?;
        let mut stderr = String::new();
        channel.stderr().read_to_string(&mut stderr)?;

        channel.wait_close()?;
        let exit_status = channel.exit_status()?;

        self.sink.print_output(&stdout);
        self.sink.print_error(&stderr);
        self.sink.print_exit_status(exit_status);

        Ok(ExecutionResult {
            stdout,
            stderr,
            exit_status,
        })
    }

    /// Run one command on a pty channel, streaming output to the sink as it
    /// arrives. When `interrupt` becomes true, an interrupt byte (0x03) is
    /// written to the remote process and reading stops. Returns whether the
    /// run was interrupted; output is not buffered.
    pub fn execute_realtime(&mut self, command: &str, interrupt: Arc<AtomicBool>) -> Result<bool> {
        self.sink.print_header(command);
        let transport = self.require_transport()?;
        let mut channel = transport.channel_session()?;
        channel.request_pty("xterm", None, None)?;
        channel.exec(command)?;

        transport.set_blocking(false);
        let mut buf = [0u8; 1024];
        let mut was_interrupted = false;

        loop {
            if interrupt.load(Ordering::SeqCst) {
                was_interrupted = true;
                let _ = channel.write_all(b"\x03");
                let _ = channel.flush();
                break;
            }
            match channel.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = String::from_utf8_lossy(&buf[..n]);
                    self.sink.write_raw(&chunk);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if channel.eof() {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    let transport = self.require_transport()?;
                    transport.set_blocking(true);
                    return Err(AppError::connection(format!("realtime read failed: {}", e)));
                }
            }
        }

        let transport = self.require_transport()?;
        transport.set_blocking(true);
        if !was_interrupted {
            let _ = channel.wait_close();
        }
        self.sink.print_footer(was_interrupted);
        Ok(was_interrupted)
    }

    /// Write a command into the persistent shell and collect output until a
    /// prompt suffix appears or the timeout elapses.
    ///
    /// Detection is a best-effort heuristic over the configured prompt set;
    /// a sentinel-echo handshake would be more robust but the timeout is the
    /// guaranteed bound either way.
    pub fn execute_in_session(&mut self, command: &str, timeout: Duration) -> Result<String> {
        let mut shell = self.shell.take().ok_or_else(|| {
            AppError::session("in-session execution requires a persistent session")
        })?;
        let prompts = self.config.prompts.clone();

        let collected = (|| -> Result<String> {
            shell.write_all(command.as_bytes())?;
            shell.write_all(b"\n")?;
            shell.flush()?;

            self.require_transport()?.set_blocking(false);

            let mut output = String::new();
            let mut buf = [0u8; 4096];
            let started = Instant::now();

            loop {
                match shell.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let chunk = String::from_utf8_lossy(&buf[..n]);
                        output.push_str(&chunk);
                        if ends_with_prompt(&chunk, &prompts) {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(e) => {
                        return Err(AppError::connection(format!("shell read failed: {}", e)))
                    }
                }
                if started.elapsed() > timeout {
                    log::debug!(
                        "in-session command did not reach a prompt within {:?}",
                        timeout
                    );
                    break;
                }
                std::thread::sleep(defaults::POLL_INTERVAL);
            }
            Ok(output)
        })();

        // the shell survives failed commands; only close() drops it
        self.shell = Some(shell);
        if let Some(transport) = self.transport.as_ref() {
            transport.set_blocking(true);
        }

        let output = collected?;
        self.sink.print_output(&output);
        Ok(output)
    }
}

impl Executor for SshSession {
    fn execute(&mut self, command: &str) -> Result<ExecutionResult> {
        self.execute_with_timeout(command, self.config.shell_timeout)
    }

    fn execute_with_timeout(&mut self, command: &str, timeout: Duration) -> Result<ExecutionResult> {
        if self.persistent {
            let output = self.execute_in_session(command, timeout)?;
            Ok(ExecutionResult::ok(output))
        } else {
            self.execute_blocking(command)
        }
    }

    fn close(&mut self) {
        if let Some(mut shell) = self.shell.take() {
            let _ = shell.send_eof();
            let _ = shell.close();
        }
        if let Some(transport) = self.transport.take() {
            let _ = transport.disconnect(None, "closing", None);
            log::info!("closed session to {}", self.config.host);
        }
        self.persistent = false;
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens [`SshSession`]s against one configured host. Every session gets its
/// own numbered trace file under the log directory so concurrent sessions
/// never interleave in one file.
pub struct SshConnector {
    config: SessionConfig,
    log_dir: Option<std::path::PathBuf>,
    label: String,
    opened: std::sync::atomic::AtomicUsize,
}

impl SshConnector {
    pub fn new(config: SessionConfig, log_dir: Option<std::path::PathBuf>, label: &str) -> Self {
        Self {
            config,
            log_dir,
            label: label.to_string(),
            opened: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

impl Connector for SshConnector {
    fn connect(&self, persistent: bool) -> Result<Box<dyn Executor>> {
        let sink = match &self.log_dir {
            Some(dir) => {
                let n = self.opened.fetch_add(1, Ordering::SeqCst);
                OutputSink::to_file(dir.join(format!("{}_session{}.log", self.label, n)))
            }
            None => OutputSink::quiet(),
        };
        let mut session = SshSession::new(self.config.clone(), sink);
        session.connect(persistent)?;
        Ok(Box::new(session))
    }
}
