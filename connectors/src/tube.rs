//! Raw TCP tube transports.
//!
//! A tube is a bare shell on the other end of a socket: no framing, no exit
//! codes, stdout and stderr interleaved, and the shell happily echoes
//! prompts and the commands it receives. Every command therefore gets a
//! sentinel appended so the reader knows where its output ends, and the
//! received lines are scrubbed of ANSI escapes, the captured prompt, the
//! connect-time MOTD and the echo of the command itself.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use micronix_core::error::MicronixErr;
use micronix_core::error::Result;
use micronix_core::transport::CommandResult;
use micronix_core::transport::Transport;
use regex_lite::Regex;
use similar::TextDiff;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::tcp::OwnedWriteHalf;
use tracing::debug;
use tracing::info;

/// Marker echoed after every command so the reader knows where output ends.
const END_COMMAND_DELIMITER: &str = "hHx2qkEndOfCommandMarker";

/// Similarity above which a received line is taken to be the echo of the
/// command we just sent.
const ECHO_SIMILARITY_THRESHOLD: f32 = 0.87;

/// How long to wait for the connection banner before assuming there is none.
const BANNER_TIMEOUT: Duration = Duration::from_secs(1);

/// An unresponsive remote fails the run after this long without a line.
const READ_TIMEOUT: Duration = Duration::from_secs(120);

/// MOTD some shells print when they come up without a tty.
const JOB_CONTROL_MOTD: &str = "can't access tty; job control turned off";

static ANSI_ESCAPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[expect(clippy::unwrap_used)]
    let re = Regex::new(r"\x1b(\[.*?[@-~]|\].*?(\x07|\x1b\\))").unwrap();
    re
});

fn strip_ansi(line: &str) -> String {
    ANSI_ESCAPE_RE.replace_all(line, "").into_owned()
}

/// True when `line` ends with something close enough to `full_cmd` to be its
/// echo. The comparison runs on the tail of the line because some shells
/// prepend their prompt to the echoed command.
fn is_echoed_command(full_cmd: &str, line: &str) -> bool {
    let cmd_chars = full_cmd.chars().count();
    let chars: Vec<char> = line.chars().collect();
    let start = chars.len().saturating_sub(cmd_chars);
    let tail: String = chars[start..].iter().collect();

    TextDiff::from_chars(full_cmd, tail.as_str()).ratio() > ECHO_SIMILARITY_THRESHOLD
}

/// A line-oriented shell over a TCP stream, either accepted on a bound port
/// or connected to a listener the target exposes.
pub struct TubeTransport {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    /// Shell prompt captured from the banner; stripped from returned lines.
    prompt: Option<String>,
}

impl TubeTransport {
    /// Binds `port` and waits for a single connect-back shell.
    pub async fn listen(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|e| MicronixErr::Transport(format!("could not bind port {port}: {e}")))?;

        info!("waiting for connections on port {port}");
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| MicronixErr::Transport(format!("error while waiting for connections: {e}")))?;
        info!("connection established from {peer}");

        Ok(Self::from_stream(stream).await)
    }

    /// Connects to a shell already bound on the target.
    pub async fn connect(target: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((target, port)).await.map_err(|e| {
            MicronixErr::Transport(format!("could not connect to {target}:{port}: {e}"))
        })?;

        Ok(Self::from_stream(stream).await)
    }

    async fn from_stream(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        let mut tube = Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            prompt: None,
        };
        tube.read_banner().await;
        tube
    }

    /// The first bytes a shell sends are its banner and prompt; remember
    /// them so they can be stripped from command output later.
    async fn read_banner(&mut self) {
        let mut buf = vec![0u8; 4096];

        if let Ok(Ok(n)) = tokio::time::timeout(BANNER_TIMEOUT, self.reader.read(&mut buf)).await {
            let banner = String::from_utf8_lossy(&buf[..n]).trim().to_string();
            if !banner.is_empty() {
                debug!("captured prompt {banner:?}");
                self.prompt = Some(banner);
            }
        }
    }

    /// Reads lines until the sentinel or EOF, stripping ANSI escapes.
    async fn recv_until_delimiter(&mut self) -> Result<Vec<String>> {
        let mut lines = Vec::new();

        loop {
            let mut line = String::new();
            let read = tokio::time::timeout(READ_TIMEOUT, self.reader.read_line(&mut line))
                .await
                .map_err(|_| {
                    MicronixErr::Transport("timed out waiting for command output".to_string())
                })?;

            match read {
                Ok(0) => break,
                Ok(_) => {
                    let line = strip_ansi(line.trim_end_matches(['\r', '\n']));
                    if line.trim() == END_COMMAND_DELIMITER {
                        break;
                    }
                    lines.push(line);
                }
                Err(e) => {
                    return Err(MicronixErr::Transport(format!("read failed: {e}")));
                }
            }
        }

        Ok(lines)
    }
}

#[async_trait]
impl Transport for TubeTransport {
    async fn send(&mut self, cmd: &str) -> Result<CommandResult> {
        let full_cmd = format!("{cmd}; echo {END_COMMAND_DELIMITER}");
        debug!(">> {full_cmd}");

        self.writer
            .write_all(full_cmd.as_bytes())
            .await
            .map_err(|e| MicronixErr::Transport(format!("write failed: {e}")))?;
        self.writer
            .write_all(b"\n")
            .await
            .map_err(|e| MicronixErr::Transport(format!("write failed: {e}")))?;

        let mut lines = self.recv_until_delimiter().await?;

        // Everything up to and including the prompt line belongs to the shell,
        // not to the command.
        if let Some(prompt) = self.prompt.clone() {
            if let Some(index) = lines.iter().position(|line| line.contains(prompt.as_str())) {
                lines.drain(..=index);
            }
        }

        if let Some(index) = lines.iter().position(|line| line.contains(JOB_CONTROL_MOTD)) {
            lines.drain(..=index);
        }

        // The tube echoes the command we just wrote.
        if let Some(index) = lines
            .iter()
            .position(|line| is_echoed_command(&full_cmd, line))
        {
            lines.drain(..=index);
        }

        if lines.is_empty() || (lines.len() == 1 && lines[0].is_empty()) {
            return Ok(CommandResult {
                stdout: Vec::new(),
                stderr: Vec::new(),
                exit_code: -1,
            });
        }

        // Strip default PS1s from the first line, if any.
        for ps1 in ["$ ", "# "] {
            if let Some(stripped) = lines[0].strip_prefix(ps1) {
                lines[0] = stripped.to_string();
            }
        }

        let stdout: Vec<String> = lines.into_iter().filter(|line| !line.is_empty()).collect();

        Ok(CommandResult {
            stdout,
            stderr: Vec::new(),
            exit_code: 0,
        })
    }

    async fn upload(&mut self, _local: &Path, _remote: &str) -> Result<()> {
        Err(MicronixErr::Transport(
            "file transfer is not supported over a raw tube".to_string(),
        ))
    }

    async fn download(&mut self, _remote: &str, _local: &Path) -> Result<()> {
        Err(MicronixErr::Transport(
            "file transfer is not supported over a raw tube".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use tokio::net::TcpListener as TestListener;

    #[test]
    fn strips_color_codes() {
        assert_eq!(strip_ansi("\x1b[31mroot\x1b[0m"), "root");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn detects_an_echoed_command() {
        let full_cmd = "id; echo hHx2qkEndOfCommandMarker";
        assert!(is_echoed_command(full_cmd, full_cmd));
        assert!(is_echoed_command(full_cmd, &format!("$ {full_cmd}")));
        assert!(!is_echoed_command(full_cmd, "uid=1000(alice) gid=1000(alice)"));
    }

    /// A scripted fake shell on the other end of a loopback socket: echoes
    /// the command line back, prints canned output, then the sentinel.
    async fn fake_shell(listener: TestListener, banner: &str, reply: &[&str]) {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();

        write_half.write_all(banner.as_bytes()).await.unwrap();

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();

        // Echo like a pty would, then answer.
        write_half.write_all(line.as_bytes()).await.unwrap();
        for l in reply {
            write_half.write_all(l.as_bytes()).await.unwrap();
            write_half.write_all(b"\n").await.unwrap();
        }
        write_half
            .write_all(format!("{END_COMMAND_DELIMITER}\n").as_bytes())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn send_strips_echo_and_returns_output_lines() {
        let listener = TestListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let shell = tokio::spawn(async move {
            fake_shell(listener, "$ ", &["uid=1000(alice) gid=1000(alice)"]).await;
        });

        let mut tube = TubeTransport::connect("127.0.0.1", port).await.unwrap();
        let result = tube.send("id").await.unwrap();

        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, vec!["uid=1000(alice) gid=1000(alice)".to_string()]);

        shell.await.unwrap();
    }

    #[tokio::test]
    async fn empty_output_reports_a_failed_exit_code() {
        let listener = TestListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let shell = tokio::spawn(async move {
            fake_shell(listener, "$ ", &[]).await;
        });

        let mut tube = TubeTransport::connect("127.0.0.1", port).await.unwrap();
        let result = tube.send("true").await.unwrap();

        assert_eq!(result.exit_code, -1);
        assert!(result.stdout.is_empty());

        shell.await.unwrap();
    }
}
