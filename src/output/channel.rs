//! One-way pipe from a worker to the supervisor.
//!
//! The write end keeps close-on-exec in the supervisor, so workers of other
//! sessions and unrelated children never inherit it. Only the worker gets a
//! copy, mapped onto [`WORKER_CHANNEL_FD`] at spawn, and that descriptor
//! number is what the worker receives as its handle. Anything the worker
//! itself spawns may still inherit it and delay end-of-stream until it exits.
//! The supervisor must drop its own copy of the write end right after launch
//! or the read end never sees EOF.

use super::drain::LineDrain;
use std::io::{PipeReader, PipeWriter};

/// Descriptor the write end occupies inside the worker.
#[cfg(unix)]
pub const WORKER_CHANNEL_FD: std::os::fd::RawFd = 3;

pub struct OutputChannel {
    reader: PipeReader,
    client: Option<PipeWriter>,
}

impl OutputChannel {
    pub fn create() -> std::io::Result<Self> {
        ensure_supported()?;
        let (reader, writer) = std::io::pipe()?;
        Ok(Self {
            reader,
            client: Some(writer),
        })
    }

    /// Opaque handle string the worker uses to attach as the writer.
    pub fn client_handle_string(&self) -> Option<String> {
        self.client.as_ref().map(|_| handle_string())
    }

    /// The supervisor-side write end, to be mapped into the worker at spawn.
    #[cfg(unix)]
    pub fn client_fd(&self) -> Option<std::os::fd::RawFd> {
        use std::os::fd::AsRawFd;
        self.client.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Drops the supervisor's copy of the write end.
    pub fn release_client_handle(&mut self) {
        self.client = None;
    }

    pub fn is_client_handle_released(&self) -> bool {
        self.client.is_none()
    }

    pub fn into_drain(mut self) -> LineDrain {
        self.release_client_handle();
        LineDrain::spawn("channel", self.reader)
    }
}

#[cfg(unix)]
fn ensure_supported() -> std::io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn ensure_supported() -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "worker output channel requires a unix host",
    ))
}

#[cfg(unix)]
fn handle_string() -> String {
    WORKER_CHANNEL_FD.to_string()
}

#[cfg(not(unix))]
fn handle_string() -> String {
    String::new()
}

/// Makes `fd` available as [`WORKER_CHANNEL_FD`] in the child `cmd` spawns,
/// without clearing close-on-exec on the supervisor's copy.
#[cfg(unix)]
pub fn map_into_child(cmd: &mut std::process::Command, fd: std::os::fd::RawFd) {
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};
    use nix::unistd::dup2;
    use std::os::unix::process::CommandExt;

    // SAFETY: the hook runs in the forked child before exec and only calls
    // dup2 and fcntl, which are async-signal-safe and touch no shared state.
    unsafe {
        cmd.pre_exec(move || {
            if fd == WORKER_CHANNEL_FD {
                // dup2 onto itself keeps close-on-exec; clear it instead.
                fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty()))?;
            } else {
                dup2(fd, WORKER_CHANNEL_FD)?;
            }
            Ok(())
        });
    }
}

/// Worker side: opens the channel named by `handle` for writing.
#[cfg(unix)]
pub fn attach_writer(handle: &str) -> std::io::Result<std::fs::File> {
    let fd: u32 = handle.trim().parse().map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("bad output channel handle: {handle:?}"),
        )
    })?;
    std::fs::OpenOptions::new()
        .write(true)
        .open(format!("/dev/fd/{fd}"))
}

#[cfg(not(unix))]
pub fn attach_writer(handle: &str) -> std::io::Result<std::fs::File> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        format!("cannot attach output channel {handle:?} on this host"),
    ))
}
