//! Contract between the extractor and whatever carries its commands to the
//! target: an SSH session, a bound listener or a connect-back shell.

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;

/// Outcome of one remote command.
///
/// Raw tubes cannot separate the streams nor observe the remote exit status;
/// they report everything as stdout with an exit code of `0`, or `-1` when
/// the command produced no output at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub exit_code: i32,
}

impl CommandResult {
    /// True when stdout carries no usable line.
    pub fn stdout_is_blank(&self) -> bool {
        self.stdout.iter().all(|line| line.is_empty())
    }
}

/// An abstract command channel on the target host.
///
/// `send` blocks on remote I/O; several reconnaissance commands (`find`
/// sweeps, batched `ldd`) may take tens of seconds.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, cmd: &str) -> Result<CommandResult>;

    async fn upload(&mut self, local: &Path, remote: &str) -> Result<()>;

    async fn download(&mut self, remote: &str, local: &Path) -> Result<()>;
}
