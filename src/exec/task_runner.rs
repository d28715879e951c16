// src/exec/task_runner.rs

//! Runs a single remote request against the built-in local services.
//!
//! Only the `local` location is served. Services:
//!
//! | service   | request                 | result                    |
//! |-----------|-------------------------|---------------------------|
//! | `DELAY`   | `DELAY <ms>`            | empty, after the delay    |
//! | `ECHO`    | `ECHO <text>`           | `<text>`                  |
//! | `PROCESS` | `START COMMAND <cmd>`   | stdout; rc = exit code    |
//!
//! An unknown service completes with rc 2 and a malformed request with
//! rc 7. A location other than `local` fails to start.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::engine::{JobEvent, RemoteRequest, RequestId, RequestOutcome};

pub const RC_UNKNOWN_SERVICE: i32 = 2;
pub const RC_INVALID_REQUEST: i32 = 7;

/// Serve `request` and report the outcome on `job_tx`.
///
/// If the cancel channel fires first, the work is abandoned (a running
/// process is killed) and **no** completion is sent.
pub async fn run_request(
    id: RequestId,
    request: RemoteRequest,
    job_tx: mpsc::Sender<JobEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    info!(
        request = id,
        location = %request.location,
        service = %request.service,
        "serving remote request"
    );

    let outcome = tokio::select! {
        outcome = serve(&request) => outcome,
        _ = &mut cancel_rx => {
            info!(request = id, "request cancelled");
            return;
        }
    };

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(request = id, error = %err, "request execution error");
            RequestOutcome::StartFailed(format!("{err:#}"))
        }
    };
    debug!(request = id, ?outcome, "request complete");

    if job_tx
        .send(JobEvent::RequestCompleted { id, outcome })
        .await
        .is_err()
    {
        debug!(request = id, "job finished before the request completed");
    }
}

async fn serve(request: &RemoteRequest) -> Result<RequestOutcome> {
    if !request.location.eq_ignore_ascii_case("local") {
        return Ok(RequestOutcome::StartFailed(format!(
            "no route to location '{}'",
            request.location
        )));
    }

    let text = request.request.trim();
    let (verb, rest) = split_word(text);

    let outcome = match request.service.to_ascii_uppercase().as_str() {
        "DELAY" if verb.eq_ignore_ascii_case("DELAY") => match rest.parse::<u64>() {
            Ok(ms) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                completed(0, "")
            }
            Err(_) => completed(RC_INVALID_REQUEST, format!("invalid delay '{rest}'")),
        },
        "ECHO" if verb.eq_ignore_ascii_case("ECHO") => completed(0, rest),
        "PROCESS" => {
            let (command_kw, command) = split_word(rest);
            if verb.eq_ignore_ascii_case("START")
                && command_kw.eq_ignore_ascii_case("COMMAND")
                && !command.is_empty()
            {
                run_process(command).await?
            } else {
                completed(RC_INVALID_REQUEST, format!("invalid request '{text}'"))
            }
        }
        "DELAY" | "ECHO" => completed(RC_INVALID_REQUEST, format!("invalid request '{text}'")),
        other => {
            warn!(service = other, "unknown service");
            completed(RC_UNKNOWN_SERVICE, format!("unknown service '{other}'"))
        }
    };
    Ok(outcome)
}

async fn run_process(command: &str) -> Result<RequestOutcome> {
    // Build a shell command appropriate for the platform.
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        c
    };

    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = cmd
        .output()
        .await
        .with_context(|| format!("running process '{command}'"))?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    for line in stderr.lines() {
        debug!(command, "stderr: {}", line);
    }

    let code = output.status.code().unwrap_or(-1);
    info!(command, exit_code = code, "process exited");
    Ok(completed(
        code,
        String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
    ))
}

fn completed(rc: i32, result: impl Into<String>) -> RequestOutcome {
    RequestOutcome::Completed {
        rc,
        result: result.into(),
    }
}

fn split_word(text: &str) -> (&str, &str) {
    match text.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (text, ""),
    }
}
