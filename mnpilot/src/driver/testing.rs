//! Scripted in-memory transport for driver and transfer tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};

use crate::error::{ChannelError, Result};
use crate::transport::{ChannelEvent, ExecOutput, ShellChannel, Transport};

/// Something the fake remote does.
#[derive(Debug, Clone)]
pub(crate) enum Action {
    Output(&'static str),
    Exit(u32),
    Close,
    Delay(Duration),
}

/// How the fake remote shell reacts to writes.
#[derive(Debug, Clone, Default)]
pub(crate) struct Script {
    /// Echo every write back as output, like a PTY with echo on.
    pub(crate) echo: bool,

    /// Reject the n-th write (1-based) and every one after it.
    pub(crate) fail_writes_from: Option<usize>,

    /// Each rule fires once, on the first write containing its trigger.
    pub(crate) rules: Vec<(&'static str, Vec<Action>)>,
}

impl Script {
    pub(crate) fn on(mut self, trigger: &'static str, actions: Vec<Action>) -> Self {
        self.rules.push((trigger, actions));
        self
    }

    pub(crate) fn echo(mut self) -> Self {
        self.echo = true;
        self
    }

    pub(crate) fn fail_writes_from(mut self, n: usize) -> Self {
        self.fail_writes_from = Some(n);
        self
    }
}

type ExecFn = dyn Fn(&str) -> ExecOutput + Send + Sync;

/// A transport whose shell is played by a [`Script`].
pub(crate) struct StubTransport {
    script: Script,
    exec: Box<ExecFn>,
    pub(crate) closes: Arc<AtomicUsize>,
    pub(crate) writes: Arc<Mutex<Vec<(Instant, String)>>>,
    pub(crate) commands: Arc<Mutex<Vec<String>>>,
    pub(crate) files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl StubTransport {
    pub(crate) fn new(script: Script) -> Self {
        Self {
            script,
            exec: Box::new(|_| ExecOutput {
                exit_status: Some(0),
                ..Default::default()
            }),
            closes: Arc::new(AtomicUsize::new(0)),
            writes: Arc::new(Mutex::new(Vec::new())),
            commands: Arc::new(Mutex::new(Vec::new())),
            files: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub(crate) fn with_exec(
        mut self,
        exec: impl Fn(&str) -> ExecOutput + Send + Sync + 'static,
    ) -> Self {
        self.exec = Box::new(exec);
        self
    }

    /// Everything written to the shell, in order.
    pub(crate) fn written(writes: &Mutex<Vec<(Instant, String)>>) -> Vec<String> {
        writes.lock().unwrap().iter().map(|(_, w)| w.clone()).collect()
    }
}

pub(crate) fn ok_output(stdout: &str) -> ExecOutput {
    ExecOutput {
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
        exit_status: Some(0),
    }
}

impl Transport for StubTransport {
    async fn open_shell(&mut self, _width: u32, _height: u32) -> Result<ShellChannel> {
        let (shell, remote) = ShellChannel::pair();
        let script = self.script.clone();
        let writes = self.writes.clone();
        tokio::spawn(async move {
            let mut requests = remote.requests;
            let events = remote.events;
            let mut rules: VecDeque<_> = script.rules.into_iter().collect();
            let mut count = 0;

            while let Some(request) = requests.recv().await {
                count += 1;
                if script.fail_writes_from.is_some_and(|n| count >= n) {
                    let _ = request
                        .ack
                        .send(Err(ChannelError::WriteFailed("broken pipe".into())));
                    continue;
                }

                let text = String::from_utf8_lossy(&request.data).into_owned();
                writes.lock().unwrap().push((Instant::now(), text.clone()));
                let _ = request.ack.send(Ok(()));

                if script.echo {
                    let echoed = Bytes::from(text.clone().into_bytes());
                    let _ = events.send(ChannelEvent::Output(echoed)).await;
                }

                let Some(pos) = rules.iter().position(|(t, _)| text.contains(t)) else {
                    continue;
                };
                let Some((_, actions)) = rules.remove(pos) else {
                    continue;
                };
                if !perform(&events, actions).await {
                    return;
                }
            }
        });
        Ok(shell)
    }

    async fn exec(&mut self, command: &str) -> Result<ExecOutput> {
        self.commands.lock().unwrap().push(command.to_string());
        Ok((self.exec)(command))
    }

    async fn write_file(&mut self, contents: &[u8], remote_path: &str) -> Result<()> {
        self.files
            .lock()
            .unwrap()
            .insert(remote_path.to_string(), contents.to_vec());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Play actions. Returns false once the channel has been closed.
async fn perform(events: &mpsc::Sender<ChannelEvent>, actions: Vec<Action>) -> bool {
    for action in actions {
        match action {
            Action::Output(text) => {
                let output = ChannelEvent::Output(Bytes::from_static(text.as_bytes()));
                let _ = events.send(output).await;
            }
            Action::Exit(code) => {
                let _ = events.send(ChannelEvent::ExitStatus(code)).await;
            }
            Action::Close => {
                let _ = events.send(ChannelEvent::Closed).await;
                return false;
            }
            Action::Delay(d) => sleep(d).await,
        }
    }
    true
}
