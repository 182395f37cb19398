//! Runs local processes (ssh, scp, kubectl) and turns failures into errors.

use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::{io::AsyncWriteExt, process::Command};

/// Run `program` with `args`, feeding `stdin` if given, and return its stdout.
pub(crate) async fn run(program: &str, args: &[String], stdin: Option<&str>) -> Result<String> {
    tracing::trace!(program, ?args, "Running process");

    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .context(format!("Failed to spawn {}", program))?;

    if let Some(input) = stdin {
        let mut pipe = child
            .stdin
            .take()
            .context(format!("Failed to open stdin of {}", program))?;
        pipe.write_all(input.as_bytes())
            .await
            .context(format!("Failed to write to stdin of {}", program))?;
        // Close stdin so the child sees end of input.
        drop(pipe);
    }

    let output = child
        .wait_with_output()
        .await
        .context(format!("Failed to wait for {}", program))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("{} exited with {}: {}", program, output.status, stderr.trim());
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
