//! Subprocess supervision for the external transcoder and downloader.
//!
//! Both tools report progress only through their console output, so a running
//! process is exposed as a finite stream of text lines plus an exit status.

use crate::error::{Result, TransmuteError};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Exit status of a supervised process. `code` is `None` when the process was
/// terminated by a signal or its status could not be observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(
        &self,
        executable: &str,
        args: &[String],
        working_dir: Option<&Path>,
    ) -> Result<Box<dyn ProcessHandle>>;
}

#[async_trait]
pub trait ProcessHandle: Send {
    /// Next line of combined stdout/stderr, `None` once both streams closed.
    async fn next_line(&mut self) -> Option<String>;

    async fn wait(&mut self) -> ProcessExit;

    /// Terminates the process and reaps it. Calling this after the process
    /// has exited, or more than once, is a no-op.
    async fn kill(&mut self);
}

/// Launches real OS processes through `tokio::process`.
#[derive(Debug, Default, Clone)]
pub struct SystemLauncher;

#[async_trait]
impl ProcessLauncher for SystemLauncher {
    async fn launch(
        &self,
        executable: &str,
        args: &[String],
        working_dir: Option<&Path>,
    ) -> Result<Box<dyn ProcessHandle>> {
        let mut cmd = command(executable);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        debug!("Command: {} {}", executable, args.join(" "));

        let mut child = cmd.spawn().map_err(|source| TransmuteError::Spawn {
            executable: executable.to_string(),
            source,
        })?;

        let (tx, rx) = mpsc::channel(256);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(stderr, tx));
        }

        Ok(Box::new(SystemProcess {
            child,
            lines: rx,
            exit: None,
        }))
    }
}

fn command(program: &str) -> Command {
    let mut cmd = Command::new(program);
    configure_for_background(&mut cmd);
    cmd
}

#[cfg(windows)]
fn configure_for_background(cmd: &mut Command) {
    // keep the tools from flashing a console window
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn configure_for_background(_cmd: &mut Command) {}

/// Splits a byte stream into lines on `\n` or `\r`. The transcoder rewrites
/// its status line in place with `\r`, so both count as terminators.
async fn pump_lines<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::Sender<String>) {
    let mut chunk = [0u8; 4096];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let read = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("Process stream closed with error: {}", e);
                break;
            }
        };

        for &byte in &chunk[..read] {
            if byte == b'\n' || byte == b'\r' {
                if !pending.is_empty() {
                    let line = String::from_utf8_lossy(&pending).into_owned();
                    pending.clear();
                    if tx.send(line).await.is_err() {
                        return;
                    }
                }
            } else {
                pending.push(byte);
            }
        }
    }

    if !pending.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&pending).into_owned()).await;
    }
}

struct SystemProcess {
    child: Child,
    lines: mpsc::Receiver<String>,
    exit: Option<ProcessExit>,
}

#[async_trait]
impl ProcessHandle for SystemProcess {
    async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    async fn wait(&mut self) -> ProcessExit {
        if let Some(exit) = self.exit {
            return exit;
        }
        let exit = match self.child.wait().await {
            Ok(status) => ProcessExit {
                code: status.code(),
            },
            Err(e) => {
                warn!("Failed to observe process exit: {}", e);
                ProcessExit { code: None }
            }
        };
        self.exit = Some(exit);
        exit
    }

    async fn kill(&mut self) {
        if self.exit.is_some() {
            return;
        }
        if let Err(e) = self.child.start_kill() {
            // InvalidInput here means the process already exited
            debug!("start_kill: {}", e);
        }
        self.wait().await;
        self.lines.close();
    }
}
