//! I/O relay tasks.
//!
//! The reader task drains the shell, assembles lines, echoes a masked copy
//! to the console, classifies each line and forwards the resulting signals
//! to the driver over a single FIFO queue. The optional operator task copies
//! local input to the shell during an interactive handoff. Neither task
//! shares mutable state with the driver; the driver publishes its phase on a
//! watch channel and everything else flows through the queue.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, trace};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};

use super::console::Console;
use super::phase::Phase;
use crate::channel::{LineBuffer, LineClassifier, Signal};
use crate::credential::Credential;
use crate::transport::{ChannelEvent, ShellReader, ShellWriter};

/// Message from a relay task to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RelayEvent {
    /// A classified signal.
    Signal(Signal),

    /// The remote process reported its exit status.
    RemoteExit(u32),

    /// The remote closed the channel (or the reader stopped).
    RemoteClosed,

    /// The operator typed the exit keyword.
    OperatorExit,
}

/// Drains the shell and classifies its output.
pub(crate) struct ReaderTask {
    pub(crate) reader: ShellReader,
    pub(crate) lines: LineBuffer,
    pub(crate) classifier: LineClassifier,
    pub(crate) credential: Credential,
    pub(crate) console: Arc<dyn Console>,
    pub(crate) phase: watch::Receiver<Phase>,
    pub(crate) events: mpsc::UnboundedSender<RelayEvent>,
    pub(crate) partial_flush: Duration,
}

impl ReaderTask {
    pub(crate) async fn run(mut self) {
        let mut last_output = Instant::now();

        loop {
            let wake = self.next_wake(last_output);

            tokio::select! {
                event = self.reader.recv() => match event {
                    Some(ChannelEvent::Output(bytes)) => {
                        let now = Instant::now();
                        last_output = now;
                        trace!("reader: {} bytes", bytes.len());
                        for line in self.lines.push(&bytes) {
                            if !self.handle_line(&line, now) {
                                return;
                            }
                        }
                        self.classifier.touch(now);
                    }
                    Some(ChannelEvent::ExitStatus(code)) => {
                        debug!("remote exit status {}", code);
                        if self.events.send(RelayEvent::RemoteExit(code)).is_err() {
                            return;
                        }
                    }
                    Some(ChannelEvent::Closed) | None => {
                        if let Some(line) = self.lines.take_partial() {
                            self.handle_line(&line, Instant::now());
                        }
                        let _ = self.events.send(RelayEvent::RemoteClosed);
                        return;
                    }
                },
                _ = sleep_until(wake) => {
                    let now = Instant::now();
                    if self.lines.has_partial() && now >= last_output + self.partial_flush {
                        if let Some(line) = self.lines.take_partial() {
                            if !self.handle_line(&line, now) {
                                return;
                            }
                        }
                    }
                    if now >= self.classifier.next_quiet_check() {
                        let phase = *self.phase.borrow();
                        if let Some(signal) = self.classifier.check_quiet(phase, now) {
                            info!("assuming hidden credential prompt after silence");
                            self.console
                                .marker("no output for a while; assuming a password prompt");
                            if self.events.send(RelayEvent::Signal(signal)).is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    fn next_wake(&self, last_output: Instant) -> Instant {
        let quiet = self.classifier.next_quiet_check();
        if self.lines.has_partial() {
            quiet.min(last_output + self.partial_flush)
        } else {
            quiet
        }
    }

    /// Echo, classify and forward one line. Returns false once the driver is gone.
    fn handle_line(&mut self, line: &str, now: Instant) -> bool {
        if self.credential.appears_in(line) {
            debug!("masking credential echoed by the remote");
        }
        let masked = self.credential.mask(line);
        self.console.line(&masked);

        let phase = *self.phase.borrow();
        for signal in self.classifier.classify(&masked, phase, now) {
            info!("recognized {}", signal.kind);
            self.console.marker(&format!("detected {}", signal.kind));
            if self.events.send(RelayEvent::Signal(signal)).is_err() {
                return false;
            }
        }
        true
    }
}

/// Copy operator input to the shell until the exit keyword or end of input.
pub(crate) async fn operator_input<R>(
    input: R,
    writer: ShellWriter,
    exit_keyword: String,
    events: mpsc::UnboundedSender<RelayEvent>,
) where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("operator input closed");
                return;
            }
            Err(e) => {
                debug!("operator input error: {}", e);
                return;
            }
        };

        if let Err(e) = writer.write_line(&line).await {
            debug!("operator relay stopped: {}", e);
            return;
        }

        if line.trim() == exit_keyword {
            let _ = events.send(RelayEvent::OperatorExit);
            return;
        }
    }
}
