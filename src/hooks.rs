use crate::error::{Result, SupervisorError};
use std::io::Read;
use std::process::{Child, Command, Output, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Runs a pre/post processing command through the platform shell.
pub fn run_hook(command: &str, timeout: Duration) -> Result<()> {
    let fail = |reason: String| SupervisorError::Hook {
        command: command.to_string(),
        reason,
    };

    info!("running hook: {command}");
    let mut cmd = shell(command);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| fail(format!("spawn: {e}")))?;

    let output = wait_with_timeout(&mut child, timeout).map_err(fail)?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        debug!("hook stdout: {}", stdout.trim());
    }
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(fail(format!("{}; stderr: {}", output.status, stderr.trim())));
    }
    Ok(())
}

#[cfg(unix)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(not(unix))]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> std::result::Result<Output, String> {
    // Both pipes are read concurrently so a chatty hook cannot fill one and stall.
    let stdout = spawn_reader(child.stdout.take());
    let stderr = spawn_reader(child.stderr.take());

    let deadline = Instant::now() + timeout;
    loop {
        let status = child.try_wait().map_err(|e| format!("try_wait: {e}"))?;
        if let Some(status) = status {
            // A background process of the hook may still hold the pipes; stop
            // collecting at the deadline and leave the readers behind.
            return Ok(Output {
                status,
                stdout: collect(&stdout, deadline, "stdout"),
                stderr: collect(&stderr, deadline, "stderr"),
            });
        }

        if Instant::now() > deadline {
            warn!("hook timed out after {:?}", timeout);
            let _ = child.kill();
            let _ = child.wait();
            return Err(format!("exceeded timeout ({timeout:?})"));
        }

        std::thread::sleep(Duration::from_millis(50));
    }
}

fn spawn_reader<R: Read + Send + 'static>(reader: Option<R>) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut r) = reader {
            let _ = r.read_to_end(&mut buf);
        }
        let _ = tx.send(buf);
    });
    rx
}

fn collect(rx: &Receiver<Vec<u8>>, deadline: Instant, name: &str) -> Vec<u8> {
    let left = deadline.saturating_duration_since(Instant::now());
    match rx.recv_timeout(left) {
        Ok(buf) => buf,
        Err(RecvTimeoutError::Timeout) => {
            warn!("hook {name} still held open at the timeout; output dropped");
            Vec::new()
        }
        Err(RecvTimeoutError::Disconnected) => Vec::new(),
    }
}
