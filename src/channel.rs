use crate::error::TransportError;
use regex::Regex;
use std::io::{ErrorKind, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::LazyLock;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

/// 30 seconds per device command
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const CLOSE_GRACE: Duration = Duration::from_secs(3);

/// One command at a time to the device, full response back.
pub trait CommandChannel {
    fn send(&mut self, command: &str) -> Result<String, TransportError>;
}

static PROMPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[^\s>#]+[>#][ \t]*\z").expect("prompt regex"));

static PROMPT_OR_PASSWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)(?:^[^\s>#]+[>#]|(?i:password):)[ \t]*\z").expect("password regex")
});

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// ssh client executable, "ssh" unless overridden.
    pub ssh_command: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Handed to `sshpass -e` when set; otherwise key authentication only.
    pub password: Option<String>,
    pub enable_password: Option<String>,
    pub timeout: Duration,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            ssh_command: "ssh".to_string(),
            host: host.into(),
            port,
            username: username.into(),
            password: None,
            enable_password: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Fail fast if the client programs this config needs are not installed.
    pub fn preflight(&self) -> Result<(), TransportError> {
        let mut needed = vec![self.ssh_command.as_str()];
        if self.password.is_some() {
            needed.push("sshpass");
        }
        for program in needed {
            if let Err(e) = which::which(program) {
                return Err(TransportError::Spawn {
                    command: program.to_string(),
                    source: std::io::Error::new(ErrorKind::NotFound, e.to_string()),
                });
            }
        }
        Ok(())
    }

    fn command(&self) -> Command {
        let mut cmd = match &self.password {
            Some(password) => {
                let mut c = Command::new("sshpass");
                c.arg("-e").arg(&self.ssh_command).env("SSHPASS", password);
                c
            }
            None => {
                let mut c = Command::new(&self.ssh_command);
                c.args(["-o", "BatchMode=yes"]);
                c
            }
        };
        cmd.arg("-tt")
            .arg("-p")
            .arg(self.port.to_string())
            .arg(format!("{}@{}", self.username, self.host));
        cmd
    }
}

/// Interactive CLI session over the system ssh client.
pub struct SshSession {
    child: Child,
    stdin: ChildStdin,
    output: Receiver<Vec<u8>>,
    reader: Option<JoinHandle<()>>,
    buffer: String,
    timeout: Duration,
}

impl SshSession {
    pub fn open(config: &SessionConfig) -> Result<Self, TransportError> {
        info!("Connecting to {}@{}:{}", config.username, config.host, config.port);
        let mut child = config
            .command()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| TransportError::Spawn {
                command: config.ssh_command.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(TransportError::Closed)?;
        let mut stdout = child.stdout.take().ok_or(TransportError::Closed)?;
        let (tx, rx) = mpsc::channel();
        let reader = thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match stdout.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let mut session = Self {
            child,
            stdin,
            output: rx,
            reader: Some(reader),
            buffer: String::new(),
            timeout: config.timeout,
        };

        let banner = session.read_until(&PROMPT)?;
        if banner.trim_end().ends_with('>') {
            match &config.enable_password {
                Some(secret) => session.enable(secret)?,
                None => warn!("Session is unprivileged; packet-tracer may be refused"),
            }
        }
        session.send("terminal pager 0")?;
        info!("Connected to {}", config.host);
        Ok(session)
    }

    fn enable(&mut self, secret: &str) -> Result<(), TransportError> {
        self.write_line("enable")?;
        self.read_until(&PROMPT_OR_PASSWORD)?;
        self.write_line(secret)?;
        let reply = self.read_until(&PROMPT_OR_PASSWORD)?;
        if reply.trim_end().ends_with('#') {
            debug!("Privileged mode entered");
            Ok(())
        } else {
            Err(TransportError::Rejected("enable password not accepted".to_string()))
        }
    }

    fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        self.stdin.write_all(line.as_bytes())?;
        self.stdin.write_all(b"\n")?;
        self.stdin.flush()?;
        Ok(())
    }

    /// Reads until `pattern` matches the tail of the buffered output and
    /// returns everything up to and including the match.
    fn read_until(&mut self, pattern: &Regex) -> Result<String, TransportError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(m) = pattern.find(&self.buffer) {
                let end = m.end();
                return Ok(self.buffer.drain(..end).collect());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout(self.timeout));
            }
            match self.output.recv_timeout(remaining) {
                Ok(chunk) => {
                    let text = String::from_utf8_lossy(&chunk).replace('\r', "");
                    self.buffer.push_str(&text);
                }
                Err(RecvTimeoutError::Timeout) => return Err(TransportError::Timeout(self.timeout)),
                Err(RecvTimeoutError::Disconnected) => return Err(TransportError::Closed),
            }
        }
    }

    pub fn close(mut self) -> Result<(), TransportError> {
        // The device may already be gone; exit is best effort.
        let _ = self.write_line("exit");
        match self.child.wait_timeout(CLOSE_GRACE)? {
            Some(status) => debug!("ssh exited with {}", status),
            None => {
                warn!("ssh did not exit after {} s, killing it", CLOSE_GRACE.as_secs());
                self.child.kill()?;
                self.child.wait()?;
            }
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        Ok(())
    }
}

/// Drops the echoed command line and the trailing prompt.
fn strip_echo_and_prompt(raw: &str, command: &str) -> String {
    let mut lines: Vec<&str> = raw.lines().collect();
    if lines.last().is_some_and(|l| PROMPT.is_match(l)) {
        lines.pop();
    }
    if lines.first().is_some_and(|l| l.trim_end().ends_with(command.trim())) {
        lines.remove(0);
    }
    lines.join("\n")
}

impl CommandChannel for SshSession {
    fn send(&mut self, command: &str) -> Result<String, TransportError> {
        debug!("-> {}", command);
        self.write_line(command)?;
        let raw = self.read_until(&PROMPT)?;
        Ok(strip_echo_and_prompt(&raw, command))
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_matches_only_at_the_end() {
        assert!(PROMPT.is_match("Type help\nfw01# "));
        assert!(PROMPT.is_match("fw01/ctx>"));
        assert!(!PROMPT.is_match("fw01# show run\nmore output"));
        assert!(PROMPT_OR_PASSWORD.is_match("enable\nPassword: "));
    }

    #[test]
    fn strips_echo_and_prompt() {
        let raw = "packet-tracer input inside tcp 1.1.1.1 1024 2.2.2.2 80 detail\nPhase: 1\nAction: allow\nfw01# ";
        let body = strip_echo_and_prompt(raw, "packet-tracer input inside tcp 1.1.1.1 1024 2.2.2.2 80 detail");
        assert_eq!(body, "Phase: 1\nAction: allow");
    }

    #[test]
    fn password_selects_sshpass() {
        let mut cfg = SessionConfig::new("fw01", 2222, "admin");
        assert_eq!(cfg.command().get_program(), "ssh");
        cfg.password = Some("secret".to_string());
        let cmd = cfg.command();
        assert_eq!(cmd.get_program(), "sshpass");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, ["-e", "ssh", "-tt", "-p", "2222", "admin@fw01"]);
    }
}
