// src/core/process.rs

//! Supervises a single child process invocation: spawns it with a clean
//! environment, streams its stdout/stderr into the log as it runs, and
//! tolerates cancellation via the server's shutdown broadcast.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::core::errors::GatewayError;

/// Default cap on the number of characters of combined stdout/stderr
/// retained for an error message, used when no explicit cap is configured.
pub const DEFAULT_OUTPUT_TRUNCATE_CHARS: usize = 1000;

/// The outcome of a completed (non-cancelled) child process run.
#[derive(Debug)]
pub struct ProcessOutput {
    pub success: bool,
    pub code: Option<i32>,
    /// Combined stdout+stderr, truncated to the caller's configured cap.
    pub combined_output: String,
}

/// Runs `command` to completion, streaming each line of stdout/stderr into
/// the trace log as it's produced. If `shutdown_rx` fires before the child
/// exits, the child is killed and `Err(GatewayError::Transcode)` is
/// returned describing the cancellation. The captured combined output is
/// truncated past `truncate_chars` characters with a trailing ellipsis.
pub async fn run(
    mut command: Command,
    shutdown_rx: &mut broadcast::Receiver<()>,
    truncate_chars: usize,
) -> Result<ProcessOutput, GatewayError> {
    command
        .kill_on_drop(true)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(GatewayError::from)?;
    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");

    let combined = std::sync::Arc::new(tokio::sync::Mutex::new(String::new()));

    let stdout_task = tokio::spawn(stream_lines("stdout", stdout, combined.clone()));
    let stderr_task = tokio::spawn(stream_lines("stderr", stderr, combined.clone()));

    tokio::select! {
        status = child.wait() => {
            let status = status.map_err(GatewayError::from)?;
            let _ = stdout_task.await;
            let _ = stderr_task.await;
            let combined_output = truncate(&combined.lock().await, truncate_chars);
            Ok(ProcessOutput {
                success: status.success(),
                code: status.code(),
                combined_output,
            })
        }
        _ = shutdown_rx.recv() => {
            warn!("shutdown received mid-transcode, killing child process");
            let _ = child.kill().await;
            let _ = child.wait().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(GatewayError::Transcode("transcode cancelled by shutdown".to_string()))
        }
    }
}

/// Runs `command`, returning `Err` if the process exits with a non-zero
/// status, embedding the binary name, exit code, and captured output in
/// the error.
pub async fn run_and_throw_on_failure(
    command: Command,
    shutdown_rx: &mut broadcast::Receiver<()>,
    truncate_chars: usize,
) -> Result<ProcessOutput, GatewayError> {
    let program = command.as_std().get_program().to_string_lossy().into_owned();
    let output = run(command, shutdown_rx, truncate_chars).await?;
    if !output.success {
        return Err(GatewayError::Transcode(format!(
            "{program} exited with code {:?}: {}",
            output.code, output.combined_output
        )));
    }
    Ok(output)
}

async fn stream_lines<R>(label: &'static str, reader: R, combined: std::sync::Arc<tokio::sync::Mutex<String>>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!(target: "transcoder", "{label}: {line}");
                let mut buf = combined.lock().await;
                if !buf.is_empty() {
                    buf.push('\n');
                }
                buf.push_str(&line);
            }
            Ok(None) => break,
            Err(e) => {
                info!("error reading {label} from child process: {e}");
                break;
            }
        }
    }
}

fn truncate(s: &str, truncate_chars: usize) -> String {
    if s.chars().count() <= truncate_chars {
        return s.to_string();
    }
    let truncated: String = s.chars().take(truncate_chars).collect();
    format!("{truncated}...")
}
