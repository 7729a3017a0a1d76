// External tool invocation: ip / wg / nft, with context cancellation.
//
// Generalizes the synchronous `shell_cmd` helper into an async runner so a
// canceled apply can kill in-flight children instead of leaking them.

use std::process::Output;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum ShellError {
    #[error("empty command")]
    Empty,
    #[error("io error running `{0}`: {1}")]
    Io(String, std::io::Error),
    #[error("canceled: {0}")]
    Canceled(String),
    #[error("`{cmd}` failed: {output}")]
    Failed { cmd: String, output: String },
}

pub type ShellResult<T> = Result<T, ShellError>;

fn join(args: &[&str]) -> String {
    args.join(" ")
}

/// Run a command to completion, killing the child if `token` is canceled.
/// Returns the raw `Output` on a zero exit, an error carrying the full
/// command line and captured combined stdout/stderr otherwise.
pub async fn run(token: &CancellationToken, args: &[&str]) -> ShellResult<Output> {
    if args.is_empty() {
        return Err(ShellError::Empty);
    }
    let cmdline = join(args);
    log::debug!("[+] {cmdline}");

    let mut child = Command::new(args[0])
        .args(&args[1..])
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .map_err(|e| ShellError::Io(cmdline.clone(), e))?;

    let output = tokio::select! {
        res = child.wait_with_output() => res.map_err(|e| ShellError::Io(cmdline.clone(), e))?,
        _ = token.cancelled() => {
            return Err(ShellError::Canceled(cmdline));
        }
    };

    if !output.status.success() {
        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout).trim(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
        log::warn!("[+] {cmdline} -> {combined}");
        return Err(ShellError::Failed {
            cmd: cmdline,
            output: combined,
        });
    }

    Ok(output)
}

/// Like `run`, but callers only care about whether it succeeded (probing
/// for existing kernel state, e.g. "does this link already exist").
pub async fn ok(token: &CancellationToken, args: &[&str]) -> bool {
    run(token, args).await.is_ok()
}

/// Run and return stdout as a lossily-decoded string, for callers that
/// need to parse output (`ip rule show`, `nft list table ...`).
pub async fn output(token: &CancellationToken, args: &[&str]) -> ShellResult<String> {
    let out = run(token, args).await?;
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_rejects_empty_command() {
        let token = CancellationToken::new();
        let err = run(&token, &[]).await.unwrap_err();
        assert!(matches!(err, ShellError::Empty));
    }

    #[tokio::test]
    async fn run_reports_nonzero_exit() {
        let token = CancellationToken::new();
        let err = run(&token, &["false"]).await.unwrap_err();
        assert!(matches!(err, ShellError::Failed { .. }));
    }

    #[tokio::test]
    async fn run_succeeds_on_zero_exit() {
        let token = CancellationToken::new();
        let out = run(&token, &["true"]).await.unwrap();
        assert!(out.status.success());
    }

    #[tokio::test]
    async fn output_captures_stdout() {
        let token = CancellationToken::new();
        let s = output(&token, &["echo", "hello"]).await.unwrap();
        assert_eq!(s.trim(), "hello");
    }
}
