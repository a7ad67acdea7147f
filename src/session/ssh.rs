//! SSH transport for switch CLIs
//!
//! Uses `tokio::process::Command` with `sshpass` for password-based SSH,
//! keeping an interactive `ssh -tt` shell open for the whole session so that
//! privileged mode and configuration mode survive between commands.

use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::error::SessionError;
use crate::models::{DeviceDescriptor, Platform};
use crate::session::transport::{Connector, SendMode, Transport};

/// sshpass exit code for a rejected password
const SSHPASS_BAD_PASSWORD: i32 = 5;

/// Grace period for the remote shell to exit after `exit`
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Poll slice used to drain output in timing mode
const DRAIN_SLICE: Duration = Duration::from_millis(100);

fn prompt_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[\w.\-@/:]+(\([\w.\-/ ]+\))?[>#] ?$").expect("valid prompt regex")
    })
}

fn password_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)password: ?$").expect("valid password regex"))
}

/// Last line of the buffer, where a prompt would sit
fn tail_line(buffer: &str) -> &str {
    buffer.rsplit(['\n', '\r']).next().unwrap_or("")
}

pub fn is_prompt(line: &str) -> bool {
    prompt_re().is_match(line)
}

fn is_password_prompt(line: &str) -> bool {
    password_re().is_match(line)
}

/// Strip the command echo and the trailing prompt from raw channel output
pub fn clean_output(raw: &str, command: &str) -> String {
    let normalized = raw.replace("\r\n", "\n").replace('\r', "");
    let mut lines: Vec<&str> = normalized.lines().collect();

    if let Some(last) = lines.last() {
        if is_prompt(last) {
            lines.pop();
        }
    }
    if let Some(first) = lines.first() {
        if !command.is_empty() && first.trim_end().ends_with(command) {
            lines.remove(0);
        }
    }

    lines.join("\n").trim_matches('\n').trim_end().to_string()
}

/// Classify why ssh exited before presenting a prompt
pub fn classify_exit(code: Option<i32>, stderr: &str) -> SessionError {
    let detail = stderr.trim();
    let lower = detail.to_lowercase();

    if code == Some(SSHPASS_BAD_PASSWORD)
        || lower.contains("permission denied")
        || lower.contains("authentication failed")
    {
        let detail = if detail.is_empty() {
            "password rejected"
        } else {
            detail
        };
        return SessionError::Auth(detail.to_string());
    }

    if detail.is_empty() {
        SessionError::Connect(match code {
            Some(c) => format!("ssh exited with code {}", c),
            None => "ssh terminated by signal".to_string(),
        })
    } else {
        SessionError::Connect(detail.to_string())
    }
}

/// Raw channel bytes; decoded only once a response is complete, so a
/// multi-byte character split across two reads stays intact
#[derive(Debug, Default)]
struct OutputBuffer {
    bytes: Vec<u8>,
}

impl OutputBuffer {
    fn extend(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    /// Last line of the buffer, or `None` while it ends inside a character
    fn tail_line(&self) -> Option<String> {
        // line breaks are ASCII and never occur inside a UTF-8 sequence
        let start = self
            .bytes
            .iter()
            .rposition(|b| *b == b'\n' || *b == b'\r')
            .map_or(0, |i| i + 1);
        let line = &self.bytes[start..];
        match std::str::from_utf8(line) {
            Ok(text) => Some(text.to_string()),
            Err(e) if e.error_len().is_none() => None,
            Err(_) => Some(String::from_utf8_lossy(line).into_owned()),
        }
    }

    fn take(&mut self) -> String {
        let bytes = std::mem::take(&mut self.bytes);
        match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }
    }
}

// ============================================================================
// Settings / Connector
// ============================================================================

#[derive(Debug, Clone)]
pub struct SshSettings {
    pub ssh_binary: String,
    pub sshpass_binary: String,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub strict_host_key_checking: bool,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            ssh_binary: "ssh".to_string(),
            sshpass_binary: "sshpass".to_string(),
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(30),
            strict_host_key_checking: false,
        }
    }
}

/// Opens one `ssh` child process per session
pub struct SshConnector {
    settings: SshSettings,
}

impl SshConnector {
    pub fn new(settings: SshSettings) -> Self {
        Self { settings }
    }

    fn build_command(&self, device: &DeviceDescriptor) -> Command {
        let connect_timeout = device
            .conn_timeout_secs()
            .unwrap_or(self.settings.connect_timeout.as_secs());
        let host_key_policy = if self.settings.strict_host_key_checking {
            "yes"
        } else {
            "no"
        };

        let mut command = Command::new(&self.settings.sshpass_binary);
        command
            .arg("-e")
            .arg(&self.settings.ssh_binary)
            .arg("-tt")
            .arg("-o")
            .arg(format!("StrictHostKeyChecking={}", host_key_policy))
            .arg("-o")
            .arg(format!("ConnectTimeout={}", connect_timeout))
            .arg("-o")
            .arg("NumberOfPasswordPrompts=1")
            .arg("-o")
            .arg("LogLevel=ERROR");
        if !self.settings.strict_host_key_checking {
            command.arg("-o").arg("UserKnownHostsFile=/dev/null");
        }
        command
            .arg("-p")
            .arg(device.ssh_port().to_string())
            .arg(format!("{}@{}", device.username, device.host))
            .env("SSHPASS", &device.password)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, device: &DeviceDescriptor) -> Result<Box<dyn Transport>, SessionError> {
        let mut child = self.build_command(device).spawn().map_err(|e| {
            SessionError::Connect(format!("SSH spawn failed: {} (is sshpass installed?)", e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SessionError::Connect("ssh stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SessionError::Connect("ssh stdout unavailable".to_string()))?;

        tracing::debug!(
            "[SSH] Spawned session to {}@{}:{}",
            device.username,
            device.host,
            device.ssh_port()
        );

        Ok(Box::new(SshTransport {
            host: device.host.clone(),
            platform: device.platform,
            child,
            stdin,
            stdout,
            buffer: OutputBuffer::default(),
            last_prompt: String::new(),
            command_timeout: self.settings.command_timeout,
            in_config_mode: false,
        }))
    }
}

// ============================================================================
// Transport
// ============================================================================

enum ReadError {
    /// Remote side closed the channel
    Closed { code: Option<i32>, stderr: String },
    Io(std::io::Error),
    Timeout(Duration),
}

impl std::fmt::Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadError::Closed { stderr, .. } if !stderr.trim().is_empty() => {
                write!(f, "connection closed: {}", stderr.trim())
            }
            ReadError::Closed { .. } => write!(f, "connection closed by device"),
            ReadError::Io(e) => write!(f, "I/O error: {}", e),
            ReadError::Timeout(d) => write!(f, "no prompt within {}s", d.as_secs()),
        }
    }
}

struct SshTransport {
    host: String,
    platform: Platform,
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    buffer: OutputBuffer,
    last_prompt: String,
    command_timeout: Duration,
    in_config_mode: bool,
}

impl SshTransport {
    async fn write_line(&mut self, line: &str) -> Result<(), ReadError> {
        self.stdin
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .map_err(ReadError::Io)?;
        self.stdin.flush().await.map_err(ReadError::Io)
    }

    /// Read until the tail line satisfies `done`, returning everything read
    async fn read_until(&mut self, done: fn(&str) -> bool) -> Result<String, ReadError> {
        let limit = self.command_timeout;
        match tokio::time::timeout(limit, self.read_until_inner(done)).await {
            Ok(result) => result,
            Err(_) => Err(ReadError::Timeout(limit)),
        }
    }

    async fn read_until_inner(&mut self, done: fn(&str) -> bool) -> Result<String, ReadError> {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(tail) = self.buffer.tail_line() {
                if done(&tail) {
                    self.last_prompt = tail.trim_end().to_string();
                    return Ok(self.buffer.take());
                }
            }

            let n = self.stdout.read(&mut chunk).await.map_err(ReadError::Io)?;
            if n == 0 {
                return Err(self.closed_error().await);
            }
            self.buffer.extend(&chunk[..n]);
        }
    }

    /// Collect whatever the device prints during `delay`
    async fn drain_for(&mut self, delay: Duration) -> Result<String, ReadError> {
        let mut chunk = [0u8; 4096];
        let deadline = tokio::time::Instant::now() + delay;

        while tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(DRAIN_SLICE, self.stdout.read(&mut chunk)).await {
                Ok(Ok(0)) => return Err(self.closed_error().await),
                Ok(Ok(n)) => self.buffer.extend(&chunk[..n]),
                Ok(Err(e)) => return Err(ReadError::Io(e)),
                Err(_) => {}
            }
        }

        if let Some(tail) = self.buffer.tail_line() {
            if is_prompt(&tail) {
                self.last_prompt = tail.trim_end().to_string();
            }
        }
        Ok(self.buffer.take())
    }

    async fn closed_error(&mut self) -> ReadError {
        let code = match tokio::time::timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => status.code(),
            _ => None,
        };
        let mut stderr = String::new();
        if let Some(mut pipe) = self.child.stderr.take() {
            let _ = tokio::time::timeout(EXIT_GRACE, pipe.read_to_string(&mut stderr)).await;
        }
        ReadError::Closed { code, stderr }
    }

    fn privileged(&self) -> bool {
        self.last_prompt.ends_with('#')
    }

    async fn exchange(&mut self, command: &str) -> Result<String, ReadError> {
        self.write_line(command).await?;
        let raw = self.read_until(is_prompt).await?;
        Ok(clean_output(&raw, command))
    }

    fn execution_error(&self, command: &str, err: ReadError) -> SessionError {
        SessionError::execution(command, format!("{} ({})", err, self.host))
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn authenticate(&mut self) -> Result<(), SessionError> {
        match self.read_until(is_prompt).await {
            Ok(_) => {}
            Err(ReadError::Closed { code, stderr }) => return Err(classify_exit(code, &stderr)),
            Err(e) => return Err(SessionError::Connect(e.to_string())),
        }
        tracing::debug!("[SSH] {} logged in at prompt '{}'", self.host, self.last_prompt);

        let paging = self.platform.disable_paging_command();
        self.exchange(paging)
            .await
            .map_err(|e| self.execution_error(paging, e))?;
        Ok(())
    }

    async fn enable(&mut self, secret: &str) -> Result<(), SessionError> {
        if self.privileged() {
            return Ok(());
        }

        let prompt_or_password = |line: &str| is_prompt(line) || is_password_prompt(line);

        self.write_line("enable")
            .await
            .map_err(|e| SessionError::Privilege(e.to_string()))?;
        let mut reply = self
            .read_until(prompt_or_password)
            .await
            .map_err(|e| SessionError::Privilege(e.to_string()))?;

        if is_password_prompt(tail_line(&reply)) {
            self.write_line(secret)
                .await
                .map_err(|e| SessionError::Privilege(e.to_string()))?;
            reply = self
                .read_until(prompt_or_password)
                .await
                .map_err(|e| SessionError::Privilege(e.to_string()))?;
        }

        if is_password_prompt(tail_line(&reply)) || !self.privileged() {
            // Leave the retry prompt so the shell is usable for `exit`
            let _ = self.write_line("").await;
            let detail = clean_output(&reply, "");
            return Err(SessionError::Privilege(if detail.is_empty() {
                "enable secret rejected".to_string()
            } else {
                detail
            }));
        }
        Ok(())
    }

    async fn set_config_mode(&mut self, enabled: bool) -> Result<(), SessionError> {
        if enabled == self.in_config_mode {
            return Ok(());
        }
        let command = if enabled {
            self.platform.enter_config_command()
        } else {
            self.platform.exit_config_command()
        };

        let output = self
            .exchange(command)
            .await
            .map_err(|e| self.execution_error(command, e))?;

        let now_in_config = self.last_prompt.contains("(config");
        if now_in_config != enabled {
            return Err(SessionError::execution(
                command,
                format!("unexpected prompt '{}': {}", self.last_prompt, output),
            ));
        }
        self.in_config_mode = enabled;
        Ok(())
    }

    async fn send_command(&mut self, command: &str, mode: SendMode) -> Result<String, SessionError> {
        match mode {
            SendMode::ExpectPrompt => self
                .exchange(command)
                .await
                .map_err(|e| self.execution_error(command, e)),
            SendMode::Timing(delay) => {
                self.write_line(command)
                    .await
                    .map_err(|e| self.execution_error(command, e))?;
                let raw = self
                    .drain_for(delay)
                    .await
                    .map_err(|e| self.execution_error(command, e))?;
                Ok(clean_output(&raw, command))
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), SessionError> {
        if self.in_config_mode {
            let _ = self.write_line(self.platform.exit_config_command()).await;
        }
        let _ = self.write_line("exit").await;
        let _ = self.stdin.shutdown().await;

        match tokio::time::timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                tracing::debug!("[SSH] {} did not exit, killing", self.host);
                let _ = self.child.start_kill();
            }
        }
        tracing::debug!("[SSH] Closed session to {}", self.host);
        Ok(())
    }

    fn abort(&mut self) {
        let _ = self.child.start_kill();
    }
}
