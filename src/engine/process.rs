//! Process-tree termination.
//!
//! Engines are started as process-group leaders on unix so helper processes they
//! fork (interpreter workers, shell wrappers) go down with them.

use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Make the child lead its own process group.
pub(crate) fn isolate(command: &mut Command) {
    #[cfg(unix)]
    command.process_group(0);
    #[cfg(not(unix))]
    let _ = command;
}

async fn signal_tree(pid: u32, force: bool) -> std::io::Result<bool> {
    #[cfg(unix)]
    let mut command = {
        let mut command = Command::new("kill");
        command
            .arg(if force { "-KILL" } else { "-TERM" })
            .arg("--")
            .arg(format!("-{pid}"));
        command
    };
    #[cfg(windows)]
    let mut command = {
        let mut command = Command::new("taskkill");
        command.args(["/PID", &pid.to_string(), "/T"]);
        if force {
            command.arg("/F");
        }
        command
    };

    let status = command
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await?;
    Ok(status.success())
}

/// Ask the whole tree to exit, then force it after `grace`.
pub(crate) async fn terminate_tree(child: &mut Child, grace: Duration) {
    let Some(pid) = child.id() else {
        // Already reaped.
        return;
    };

    match signal_tree(pid, false).await {
        Ok(true) => debug!(pid, "sent polite termination to process tree"),
        Ok(false) => debug!(pid, "process tree already gone"),
        Err(e) => warn!(pid, error = %e, "failed to signal process tree"),
    }

    if let Ok(Ok(status)) = tokio::time::timeout(grace, child.wait()).await {
        debug!(pid, ?status, "engine process exited");
        return;
    }

    warn!(pid, "engine ignored termination request, killing");
    if let Err(e) = signal_tree(pid, true).await {
        warn!(pid, error = %e, "failed to force-kill process tree");
    }
    let _ = child.kill().await;
}
