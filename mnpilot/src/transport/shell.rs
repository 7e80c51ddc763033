//! Interactive shell channel.
//!
//! A russh channel is driven by a single pump task. The pump owns the channel
//! and multiplexes two directions: write requests coming from a
//! [`ShellWriter`] (each acknowledged once the bytes are on the wire), and
//! incoming messages forwarded to the [`ShellReader`] as [`ChannelEvent`]s.
//! Stdout and stderr are merged, as a terminal would show them.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::Stream;
use log::trace;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use secrecy::zeroize::Zeroizing;
use tokio::sync::{mpsc, oneshot};

use crate::error::ChannelError;

/// Depth of the event and write queues between the pump and its handles.
const QUEUE_DEPTH: usize = 256;

/// Something that happened on the remote end of the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Raw terminal output.
    Output(Bytes),

    /// The remote process reported its exit status.
    ExitStatus(u32),

    /// The remote closed the channel.
    Closed,
}

pub(crate) struct WriteRequest {
    pub(crate) data: Zeroizing<Vec<u8>>,
    pub(crate) ack: oneshot::Sender<Result<(), ChannelError>>,
}

/// Write half of the shell channel.
///
/// Cheap to clone. The driver and the operator-input task each hold one,
/// but only one of them writes in any given phase.
#[derive(Clone)]
pub struct ShellWriter {
    tx: mpsc::Sender<WriteRequest>,
}

impl ShellWriter {
    /// Write raw bytes and wait until they have been handed to the transport.
    ///
    /// The buffer is zeroized once the pump drops it.
    pub async fn write(&self, data: Zeroizing<Vec<u8>>) -> Result<(), ChannelError> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(WriteRequest { data, ack })
            .await
            .map_err(|_| ChannelError::Closed)?;
        done.await.map_err(|_| ChannelError::Closed)?
    }

    /// Write `line` followed by a newline.
    pub async fn write_line(&self, line: &str) -> Result<(), ChannelError> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        self.write(Zeroizing::new(buf)).await
    }

    /// Whether the pump behind this writer has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Read half of the shell channel: a lazy, unbounded stream of events that
/// ends when the remote closes or the pump stops.
pub struct ShellReader {
    rx: mpsc::Receiver<ChannelEvent>,
}

impl ShellReader {
    /// Receive the next event.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.rx.recv().await
    }
}

impl Stream for ShellReader {
    type Item = ChannelEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// The remote-facing side of a shell channel.
///
/// The SSH pump holds one of these; so do scripted stubs in tests.
pub(crate) struct RemoteEnd {
    pub(crate) requests: mpsc::Receiver<WriteRequest>,
    pub(crate) events: mpsc::Sender<ChannelEvent>,
}

/// An interactive channel with a PTY and a running shell.
pub struct ShellChannel {
    writer: ShellWriter,
    reader: ShellReader,
}

impl ShellChannel {
    /// Create a channel and the remote end that serves it.
    pub(crate) fn pair() -> (Self, RemoteEnd) {
        let (write_tx, write_rx) = mpsc::channel(QUEUE_DEPTH);
        let (event_tx, event_rx) = mpsc::channel(QUEUE_DEPTH);
        let channel = Self {
            writer: ShellWriter { tx: write_tx },
            reader: ShellReader { rx: event_rx },
        };
        let remote = RemoteEnd {
            requests: write_rx,
            events: event_tx,
        };
        (channel, remote)
    }

    /// Wrap an open russh channel, spawning the pump task that drives it.
    ///
    /// The pump runs detached and stops when every writer has been dropped
    /// or the remote closes.
    pub(crate) fn spawn(channel: Channel<Msg>) -> Self {
        let (shell, remote) = Self::pair();
        tokio::spawn(pump(channel, remote));
        shell
    }

    /// Split into independently owned halves.
    pub fn split(self) -> (ShellWriter, ShellReader) {
        (self.writer, self.reader)
    }
}

async fn pump(mut channel: Channel<Msg>, mut remote: RemoteEnd) {
    loop {
        tokio::select! {
            request = remote.requests.recv() => match request {
                Some(WriteRequest { data, ack }) => {
                    let result = channel.data(&data[..]).await.map_err(ChannelError::Ssh);
                    drop(data);
                    let _ = ack.send(result);
                }
                None => {
                    trace!("shell pump: all writers dropped, closing channel");
                    let _ = channel.eof().await;
                    let _ = channel.close().await;
                    break;
                }
            },
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { ref data }) => {
                    let _ = remote
                        .events
                        .send(ChannelEvent::Output(Bytes::copy_from_slice(data)))
                        .await;
                }
                Some(ChannelMsg::ExtendedData { ref data, .. }) => {
                    let _ = remote
                        .events
                        .send(ChannelEvent::Output(Bytes::copy_from_slice(data)))
                        .await;
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    trace!("shell pump: exit status {}", exit_status);
                    let _ = remote.events.send(ChannelEvent::ExitStatus(exit_status)).await;
                }
                Some(ChannelMsg::Close) | None => {
                    trace!("shell pump: remote closed channel");
                    let _ = remote.events.send(ChannelEvent::Closed).await;
                    break;
                }
                Some(other) => {
                    trace!("shell pump: ignoring {:?}", other);
                }
            },
        }
    }
}
