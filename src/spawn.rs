use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Child;
use tokio::process::ChildStderr;
use tokio::process::ChildStdin;
use tokio::process::ChildStdout;
use tokio::process::Command;

use crate::errors::SpawnError;

/// Launch descriptor for a new session.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub command: String,
    pub cwd: PathBuf,
    pub scope_key: Option<String>,
    pub backgrounded: bool,
}

impl LaunchSpec {
    pub fn new(command: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            cwd: cwd.into(),
            scope_key: None,
            backgrounded: true,
        }
    }

    pub fn scope_key(mut self, scope_key: impl Into<String>) -> Self {
        self.scope_key = Some(scope_key.into());
        self
    }

    pub fn backgrounded(mut self, backgrounded: bool) -> Self {
        self.backgrounded = backgrounded;
        self
    }
}

pub(crate) struct LaunchedProcess {
    pub child: Child,
    pub pid: Option<u32>,
    pub stdin: Option<ChildStdin>,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
}

/// Spawns `command` through the platform shell with piped stdio. The child is
/// killed if its handle is dropped before it exits, so an aborted wait task
/// cannot leak the process.
pub(crate) fn launch_shell(command: &str, cwd: &Path) -> Result<LaunchedProcess, SpawnError> {
    let mut cmd = shell_command(command);
    cmd.current_dir(cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(SpawnError::create_session)?;
    let pid = child.id();
    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    Ok(LaunchedProcess {
        child,
        pid,
        stdin,
        stdout,
        stderr,
    })
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

/// Maps a terminating signal number to its conventional name.
#[cfg(unix)]
pub(crate) fn signal_name(signal: i32) -> String {
    match signal {
        libc::SIGHUP => "SIGHUP".to_string(),
        libc::SIGINT => "SIGINT".to_string(),
        libc::SIGQUIT => "SIGQUIT".to_string(),
        libc::SIGABRT => "SIGABRT".to_string(),
        libc::SIGKILL => "SIGKILL".to_string(),
        libc::SIGSEGV => "SIGSEGV".to_string(),
        libc::SIGPIPE => "SIGPIPE".to_string(),
        libc::SIGTERM => "SIGTERM".to_string(),
        other => format!("SIG{other}"),
    }
}
