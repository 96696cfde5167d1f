//! SSH transport built on the system `ssh` client.
//!
//! Every `send` runs one exec channel, so unlike the raw tubes this
//! transport reports real exit codes and keeps stderr separate. File
//! transfer goes through `scp`.

use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use micronix_core::error::MicronixErr;
use micronix_core::error::Result;
use micronix_core::transport::CommandResult;
use micronix_core::transport::Transport;
use tokio::process::Command;
use tracing::debug;
use tracing::info;

pub struct SshTransport {
    target: String,
    port: u16,
    user: String,
    private_key: PathBuf,
}

impl SshTransport {
    pub fn new(target: &str, port: u16, user: &str, private_key: &Path) -> Result<Self> {
        if !private_key.exists() {
            return Err(MicronixErr::Transport(format!(
                "private key {} does not exist",
                private_key.display()
            )));
        }

        Ok(Self {
            target: target.to_string(),
            port,
            user: user.to_string(),
            private_key: private_key.to_path_buf(),
        })
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.target)
    }

    fn ssh_command(&self) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-i")
            .arg(&self.private_key)
            .arg("-p")
            .arg(self.port.to_string())
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg(self.destination());
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn scp_command(&self) -> Command {
        let mut cmd = Command::new("scp");
        cmd.arg("-i")
            .arg(&self.private_key)
            .arg("-P")
            .arg(self.port.to_string())
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new");
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn send(&mut self, cmd: &str) -> Result<CommandResult> {
        debug!(">> {cmd}");

        let output = self
            .ssh_command()
            .arg(cmd)
            .output()
            .await
            .map_err(|e| MicronixErr::Transport(format!("could not spawn ssh: {e}")))?;

        Ok(CommandResult {
            stdout: split_lines(&output.stdout),
            stderr: split_lines(&output.stderr),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn upload(&mut self, local: &Path, remote: &str) -> Result<()> {
        if !local.exists() {
            return Err(MicronixErr::Transport(format!(
                "local file {} does not exist",
                local.display()
            )));
        }

        info!("uploading {} to {remote}", local.display());

        let status = self
            .scp_command()
            .arg(local)
            .arg(format!("{}:{remote}", self.destination()))
            .status()
            .await
            .map_err(|e| MicronixErr::Transport(format!("could not spawn scp: {e}")))?;

        if !status.success() {
            return Err(MicronixErr::Transport(format!(
                "scp upload exited with {status}"
            )));
        }

        Ok(())
    }

    async fn download(&mut self, remote: &str, local: &Path) -> Result<()> {
        info!("downloading {remote} to {}", local.display());

        let status = self
            .scp_command()
            .arg(format!("{}:{remote}", self.destination()))
            .arg(local)
            .status()
            .await
            .map_err(|e| MicronixErr::Transport(format!("could not spawn scp: {e}")))?;

        if !status.success() {
            return Err(MicronixErr::Transport(format!(
                "scp download exited with {status}"
            )));
        }

        Ok(())
    }
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn rejects_a_missing_private_key() {
        let err = SshTransport::new("203.0.113.7", 22, "admin", Path::new("/nonexistent/key"));
        assert!(err.is_err());
    }

    #[test]
    fn splits_output_and_drops_empty_lines() {
        assert_eq!(
            split_lines(b"one\n\ntwo\n"),
            vec!["one".to_string(), "two".to_string()]
        );
        assert!(split_lines(b"").is_empty());
    }
}
