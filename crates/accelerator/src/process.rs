//! Launching the accelerator command and pumping its output lines.
//!
//! stdout and stderr are each read line by line on their own task and
//! funnelled into one channel. The channel closes once both streams hit
//! EOF, which the manager treats as the process having exited.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// Which output stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputLine {
    pub stream: StreamKind,
    pub text: String,
}

/// A spawned launch command and the receiving end of its output.
pub struct LaunchedProcess {
    pub child: Child,
    pub lines: mpsc::UnboundedReceiver<OutputLine>,
}

/// Spawn `argv` with piped output and start the line pumps.
///
/// The child is created with `kill_on_drop(true)` so dropping it tears
/// the process down.
pub fn spawn(argv: &[String]) -> std::io::Result<LaunchedProcess> {
    let (program, args) = argv.split_first().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty launch command")
    })?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let (tx, rx) = mpsc::unbounded_channel();

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pump_lines(stdout, StreamKind::Stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pump_lines(stderr, StreamKind::Stderr, tx.clone()));
    }
    drop(tx);

    tracing::info!(program = %program, pid = ?child.id(), "Launched accelerator command");

    Ok(LaunchedProcess { child, lines: rx })
}

/// Forward each line of `reader` until EOF, a read error, or the
/// receiver going away.
pub async fn pump_lines<R>(reader: R, stream: StreamKind, tx: mpsc::UnboundedSender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(text)) => {
                if tx.send(OutputLine { stream, text }).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(stream = stream.as_str(), error = %e, "Failed to read process output");
                break;
            }
        }
    }
}
