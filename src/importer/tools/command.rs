//! Blocking process execution with captured output and a deadline.

use std::ffi::OsStr;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::{ToolError, ToolResult};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Captured result of a finished process
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Stdout followed by stderr, for adapters that scan both streams.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// A program invocation with a timeout.
#[derive(Debug)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ToolCommand {
    pub fn new(program: &str, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string_lossy().into_owned());
        }
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Runs to completion and returns the output whatever the exit status.
    pub fn output(&self) -> ToolResult<CommandOutput> {
        debug!("Running {} {}", self.program, self.args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ToolError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // Drain both pipes on their own threads so a chatty child never blocks.
        let stdout_reader = spawn_reader(child.stdout.take());
        let stderr_reader = spawn_reader(child.stderr.take());

        let status = self.wait_with_deadline(&mut child)?;

        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = stderr_reader.join().unwrap_or_default();

        Ok(CommandOutput { status, stdout, stderr })
    }

    /// Runs to completion and fails on a non-zero exit.
    pub fn run(&self) -> ToolResult<CommandOutput> {
        let output = self.output()?;
        if output.success() {
            Ok(output)
        } else {
            Err(ToolError::Failed {
                program: self.program.clone(),
                status: output.status.code(),
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    fn wait_with_deadline(&self, child: &mut Child) -> ToolResult<ExitStatus> {
        let started = Instant::now();
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if started.elapsed() >= self.timeout {
                warn!(
                    "{} exceeded its {}s timeout, killing it",
                    self.program,
                    self.timeout.as_secs()
                );
                let _ = child.kill();
                let _ = child.wait();
                return Err(ToolError::Timeout {
                    program: self.program.clone(),
                    secs: self.timeout.as_secs(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buffer);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_captures_stdout_and_status() {
        let output = ToolCommand::new("sh", Duration::from_secs(10))
            .args(["-c", "echo hello; echo oops 1>&2; exit 3"])
            .output()
            .unwrap();

        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
        assert_eq!(output.status.code(), Some(3));
        assert!(output.combined().contains("hello"));
    }

    #[test]
    fn test_run_fails_on_non_zero_exit() {
        let result = ToolCommand::new("sh", Duration::from_secs(10))
            .args(["-c", "echo broken 1>&2; exit 1"])
            .run();

        match result {
            Err(ToolError::Failed { status, stderr, .. }) => {
                assert_eq!(status, Some(1));
                assert_eq!(stderr, "broken");
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[test]
    fn test_timeout_kills_child() {
        let started = Instant::now();
        let result = ToolCommand::new("sleep", Duration::from_millis(200)).arg("5").output();

        assert!(matches!(result, Err(ToolError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let result = ToolCommand::new("definitely-not-a-program", Duration::from_secs(1)).output();
        assert!(matches!(result, Err(ToolError::Spawn { .. })));
    }
}
