//! Non-blocking line draining for worker pipes.
//!
//! Each stream gets a reader thread that performs the blocking reads and
//! hands complete lines over a channel. The thread is the in-flight read: it
//! is carried across monitor ticks instead of being restarted, so nothing is
//! read twice or dropped. Draining only ever does `try_recv`.

use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::time::{Duration, Instant};
use tracing::debug;

enum ReadEvent {
    Line(String),
    Failed(std::io::Error),
}

pub struct LineDrain {
    name: &'static str,
    rx: Option<Receiver<ReadEvent>>,
}

impl LineDrain {
    pub fn spawn<R: Read + Send + 'static>(name: &'static str, reader: R) -> Self {
        let (tx, rx) = mpsc::channel();
        std::thread::Builder::new()
            .name(format!("drain-{name}"))
            .spawn(move || read_lines(reader, tx))
            .map(|_| Self { name, rx: Some(rx) })
            .unwrap_or_else(|err| {
                debug!(stream = name, "could not start reader thread: {err}");
                Self { name, rx: None }
            })
    }

    /// A drain with nothing behind it.
    pub fn closed(name: &'static str) -> Self {
        Self { name, rx: None }
    }

    /// True once the stream reached end-of-stream or failed and every line
    /// already read has been handed out.
    pub fn is_finished(&self) -> bool {
        self.rx.is_none()
    }

    /// Returns the complete lines buffered so far without blocking.
    pub fn drain_available_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        let Some(rx) = &self.rx else {
            return lines;
        };
        let mut finished = false;
        loop {
            match rx.try_recv() {
                Ok(ReadEvent::Line(line)) => lines.push(line),
                Ok(ReadEvent::Failed(err)) => {
                    debug!(stream = self.name, "stream read failed: {err}");
                    finished = true;
                    break;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    finished = true;
                    break;
                }
            }
        }
        if finished {
            self.rx = None;
        }
        lines
    }

    /// After the writer is gone: collects what is left, waiting at most
    /// `budget` for end-of-stream.
    pub fn drain_remaining(&mut self, budget: Duration) -> Vec<String> {
        let deadline = Instant::now() + budget;
        let mut lines = self.drain_available_lines();
        while let Some(rx) = self.rx.as_ref() {
            let wait = deadline.saturating_duration_since(Instant::now());
            if wait.is_zero() {
                break;
            }
            let finished = match rx.recv_timeout(wait) {
                Ok(ReadEvent::Line(line)) => {
                    lines.push(line);
                    false
                }
                Ok(ReadEvent::Failed(err)) => {
                    debug!(stream = self.name, "stream read failed: {err}");
                    true
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => true,
            };
            if finished {
                self.rx = None;
            }
        }
        lines
    }
}

fn read_lines<R: Read>(reader: R, tx: mpsc::Sender<ReadEvent>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => return,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                if tx.send(ReadEvent::Line(line)).is_err() {
                    return;
                }
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                // Broken pipe and friends end the stream; whatever was sent stays.
                let _ = tx.send(ReadEvent::Failed(err));
                return;
            }
        }
    }
}
