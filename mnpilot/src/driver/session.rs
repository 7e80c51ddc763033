//! Remote session and its driver state machine.
//!
//! A [`Session`] owns the transport and the credential for one remote run.
//! [`Session::run`] opens the shell, types the privileged command and then
//! reacts to signals from the reader task until the run ends, closing the
//! transport exactly once on every path.

use std::io;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use secrecy::zeroize::Zeroizing;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until, timeout};

use super::config::{Mode, SessionConfig};
use super::console::Console;
use super::phase::{Phase, PhaseTracker};
use super::relay::{ReaderTask, RelayEvent, operator_input};
use super::report::{SessionReport, TerminationReason};
use crate::channel::{LineBuffer, LineClassifier, Signal, SignalKind};
use crate::error::{ChannelError, Error, SessionError, SessionErrorKind, TransportError};
use crate::transfer::{SimulationPlan, upload_artifacts};
use crate::transport::{ShellWriter, SshTransport, Transport};

/// Stand-in for a deadline too far out to represent.
const FAR_DEADLINE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Source of operator keystrokes for interactive mode.
pub type OperatorInput = Box<dyn AsyncBufRead + Unpin + Send>;

/// Requests an early, non-fatal end to a running session.
///
/// Cloneable and idempotent: any number of holders may cancel, any number
/// of times; the session still closes exactly once.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Ask the session to terminate.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// One remote run over an authenticated transport.
pub struct Session<T: Transport = SshTransport> {
    id: String,
    config: Arc<SessionConfig>,
    transport: Option<T>,
    cancel: CancelHandle,
}

impl Session<SshTransport> {
    /// Connect and authenticate. Failures are fatal and not retried.
    pub async fn open(config: SessionConfig) -> Result<Self, SessionError> {
        info!(
            "connecting to {}@{}",
            config.ssh.username,
            config.ssh.socket_addr()
        );
        let transport = SshTransport::connect(config.ssh.clone())
            .await
            .map_err(|e| SessionError::new(Phase::Idle, connect_kind(e)))?;
        Ok(Self::with_transport(config, transport))
    }
}

impl<T: Transport> Session<T> {
    /// Wrap an already connected transport.
    pub fn with_transport(config: SessionConfig, transport: T) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let id = format!(
            "{}@{}-{}",
            config.ssh.username,
            config.ssh.socket_addr(),
            millis
        );
        Self {
            id,
            config: Arc::new(config),
            transport: Some(transport),
            cancel: CancelHandle::new(),
        }
    }

    /// Session identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The configuration this session was built from.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Handle for requesting an early end (e.g. from a Ctrl-C handler).
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Whether the transport is still open.
    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Copy the driver script and topology document to the remote host.
    ///
    /// Must be called before [`run`](Self::run); a failure here is reported
    /// before any escalation attempt and closes the transport.
    pub async fn upload(&mut self, plan: &SimulationPlan) -> Result<(), SessionError> {
        let transport = self.transport.as_mut().ok_or_else(|| {
            SessionError::new(Phase::Closed, SessionErrorKind::Channel(ChannelError::Closed))
        })?;
        if let Err(e) = upload_artifacts(transport, plan).await {
            warn!("session {} upload failed: {}", self.id, e);
            self.close_transport().await;
            return Err(SessionError::new(Phase::Idle, SessionErrorKind::Upload(e)));
        }
        Ok(())
    }

    /// Close the transport without running. Idempotent.
    pub async fn close(mut self) {
        self.close_transport().await;
    }

    /// Drive the remote run to completion.
    ///
    /// `input` supplies operator keystrokes in interactive mode; stdin is
    /// used when it is `None`.
    pub async fn run(
        mut self,
        console: Arc<dyn Console>,
        input: Option<OperatorInput>,
    ) -> Result<SessionReport, SessionError> {
        let started = Instant::now();
        let deadline = started
            .checked_add(self.config.deadline)
            .unwrap_or_else(|| started + FAR_DEADLINE);
        let mut phases = PhaseTracker::new();

        let outcome = self
            .drive(&mut phases, console.clone(), input, deadline)
            .await;

        self.close_transport().await;
        phases.advance(Phase::Closed);

        match outcome {
            Ok(done) => {
                info!("session {} closed: {}", self.id, done.reason);
                console.marker(&format!("session closed ({})", done.reason));
                Ok(SessionReport {
                    id: self.id.clone(),
                    phases: phases.history().to_vec(),
                    reason: done.reason,
                    exit_status: done.exit_status,
                    secret_writes: done.secret_writes,
                    elapsed: started.elapsed(),
                })
            }
            Err(err) => {
                warn!("session {} failed: {}", self.id, err);
                console.marker(&format!("session failed: {}", err.kind));
                Err(err)
            }
        }
    }

    async fn drive(
        &mut self,
        phases: &mut PhaseTracker,
        console: Arc<dyn Console>,
        input: Option<OperatorInput>,
        deadline: Instant,
    ) -> Result<Finished, SessionError> {
        let config = self.config.clone();
        let transport = self.transport.as_mut().ok_or_else(|| {
            SessionError::new(Phase::Idle, SessionErrorKind::Channel(ChannelError::Closed))
        })?;

        let shell = transport
            .open_shell(config.ssh.terminal_width, config.ssh.terminal_height)
            .await
            .map_err(|e| SessionError::new(Phase::Idle, channel_kind(e)))?;
        let (writer, reader) = shell.split();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let reader_task = ReaderTask {
            reader,
            lines: LineBuffer::new(),
            classifier: LineClassifier::new(&config.classifier(), Instant::now()),
            credential: config.credential.clone(),
            console: console.clone(),
            phase: phases.subscribe(),
            events: events_tx.clone(),
            partial_flush: config.timing.partial_flush,
        };
        let reader_handle = tokio::spawn(reader_task.run());

        let mut driver = SessionDriver {
            config,
            phases,
            writer,
            console,
            events_tx,
            operator_input: input,
            operator_task: None,
            logout_sent: false,
            transport_lost: false,
            exit_status: None,
            secret_writes: 0,
        };

        let result = driver
            .run(events_rx, self.cancel.subscribe(), deadline)
            .await;

        driver.terminate().await;
        let drain = driver.config.timing.drain;
        driver.shutdown_tasks();
        drop(driver);

        if timeout(drain, reader_handle).await.is_err() {
            debug!("reader did not drain within {:?}", drain);
        }

        result
    }

    async fn close_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                debug!("transport close: {}", e);
            }
        }
    }
}

/// Result of a non-fatal run.
struct Finished {
    reason: TerminationReason,
    exit_status: Option<u32>,
    secret_writes: usize,
}

/// The phase state machine. Sole writer to the shell except during an
/// interactive handoff.
struct SessionDriver<'a> {
    config: Arc<SessionConfig>,
    phases: &'a mut PhaseTracker,
    writer: ShellWriter,
    console: Arc<dyn Console>,
    events_tx: mpsc::UnboundedSender<RelayEvent>,
    operator_input: Option<OperatorInput>,
    operator_task: Option<JoinHandle<()>>,
    logout_sent: bool,
    transport_lost: bool,
    exit_status: Option<u32>,
    secret_writes: usize,
}

/// What handling one event decided.
enum Step {
    Continue,
    Finish(TerminationReason),
}

impl SessionDriver<'_> {
    fn phase(&self) -> Phase {
        self.phases.current()
    }

    async fn run(
        &mut self,
        mut events: mpsc::UnboundedReceiver<RelayEvent>,
        mut cancel: watch::Receiver<bool>,
        deadline: Instant,
    ) -> Result<Finished, SessionError> {
        self.start().await?;

        let deadline_timer = sleep_until(deadline);
        tokio::pin!(deadline_timer);

        loop {
            let step = tokio::select! {
                biased;

                _ = cancelled(&mut cancel) => {
                    info!("operator interrupt in {}", self.phase());
                    self.console.marker("interrupted; terminating");
                    Step::Finish(TerminationReason::Interrupted)
                }
                _ = &mut deadline_timer => {
                    return Err(self.timed_out());
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await?,
                    None => self.remote_closed()?,
                },
            };

            if let Step::Finish(reason) = step {
                return Ok(Finished {
                    reason,
                    exit_status: self.exit_status,
                    secret_writes: self.secret_writes,
                });
            }
        }
    }

    /// Idle: type the privileged command followed by a blank line, which
    /// makes sudo flush its prompt right away.
    async fn start(&mut self) -> Result<(), SessionError> {
        sleep(self.config.timing.shell_ready).await;
        let command = self.config.command.clone();
        info!("executing: {}", command);
        self.console.marker(&format!("executing: {}", command));
        self.send(&format!("{}\n", command), false).await?;
        self.phases.advance(Phase::AwaitingEscalation);
        Ok(())
    }

    async fn handle_event(&mut self, event: RelayEvent) -> Result<Step, SessionError> {
        match event {
            RelayEvent::Signal(signal) => self.handle_signal(signal).await,
            RelayEvent::RemoteExit(code) => {
                self.exit_status = Some(code);
                Ok(Step::Continue)
            }
            RelayEvent::RemoteClosed => self.remote_closed(),
            RelayEvent::OperatorExit => {
                if self.phase() == Phase::InteractiveHandoff {
                    info!("operator left the sub-REPL");
                    self.operator_task = None;
                    Ok(Step::Finish(TerminationReason::OperatorExit))
                } else {
                    Ok(Step::Continue)
                }
            }
        }
    }

    async fn handle_signal(&mut self, signal: Signal) -> Result<Step, SessionError> {
        loop {
            let phase = self.phase();
            debug!("signal {} in {}", signal.kind, phase);

            match (phase, signal.kind) {
                (Phase::AwaitingEscalation, SignalKind::CredentialPrompt) => {
                    sleep(self.config.timing.grace).await;
                    let secret = self.config.credential.line_bytes();
                    self.write(secret, true).await?;
                    self.secret_writes += 1;
                    self.phases.advance(Phase::Authenticated);
                    if self.config.sub_repl.is_none() {
                        self.phases.advance(Phase::Executing);
                    }
                    return Ok(Step::Continue);
                }
                (_, SignalKind::CredentialPrompt) => {
                    warn!("credential prompt in {}; not re-authenticating", phase);
                    return Ok(Step::Continue);
                }
                (Phase::AwaitingEscalation, _) => {
                    info!("{} before any password prompt; escalation not required", signal.kind);
                    self.phases.advance(Phase::Authenticated);
                }
                (Phase::Authenticated | Phase::Executing, SignalKind::SubsessionEntered) => {
                    return self.enter_subsession().await;
                }
                (Phase::Authenticated, _) => {
                    self.phases.advance(Phase::Executing);
                }
                (Phase::Executing | Phase::InteractiveHandoff, SignalKind::TaskComplete) => {
                    self.console.marker("simulation finished; logging out");
                    self.logout().await?;
                    return Ok(Step::Finish(TerminationReason::TaskComplete));
                }
                _ => {
                    debug!("ignoring {} in {}", signal.kind, phase);
                    return Ok(Step::Continue);
                }
            }
        }
    }

    async fn enter_subsession(&mut self) -> Result<Step, SessionError> {
        match self.config.mode {
            Mode::Automated => {
                let exit = self.config.exit_keyword().to_string();
                sleep(self.config.timing.settle).await;
                self.send(&exit, false).await?;
                self.phases.advance(Phase::Executing);
            }
            Mode::Interactive => {
                self.phases.advance(Phase::InteractiveHandoff);
                self.console.marker(&format!(
                    "sub-REPL ready; type commands or '{}' to quit",
                    self.config.exit_keyword()
                ));
                let input = self
                    .operator_input
                    .take()
                    .unwrap_or_else(|| Box::new(BufReader::new(tokio::io::stdin())));
                self.operator_task = Some(tokio::spawn(operator_input(
                    input,
                    self.writer.clone(),
                    self.config.exit_keyword().to_string(),
                    self.events_tx.clone(),
                )));
            }
        }
        Ok(Step::Continue)
    }

    fn remote_closed(&mut self) -> Result<Step, SessionError> {
        let phase = self.phase();
        let status = self.exit_status;
        self.transport_lost = true;

        if phase >= Phase::Authenticated {
            if status.is_some_and(|s| self.config.benign_exit_codes.contains(&s)) {
                info!("remote exited with benign status {:?}", status);
                return Ok(Step::Finish(TerminationReason::BenignInterruptExit));
            }
            if status == Some(0) {
                if self.config.mode == Mode::Automated {
                    self.phases.advance(Phase::AutomatedCompletion);
                }
                return Ok(Step::Finish(TerminationReason::RemoteExited));
            }
        }

        Err(SessionError::new(
            phase,
            SessionErrorKind::TransportClosedEarly {
                exit_status: status,
            },
        ))
    }

    fn timed_out(&mut self) -> SessionError {
        let phase = self.phase();
        let kind = if phase <= Phase::AwaitingEscalation {
            SessionErrorKind::EscalationTimeout
        } else {
            SessionErrorKind::ExecutionTimeout
        };
        warn!("deadline reached in {}", phase);
        self.console.marker(&format!("timeout: {}", kind));
        SessionError::new(phase, kind)
    }

    async fn logout(&mut self) -> Result<(), SessionError> {
        let logout = self.config.logout_command.clone();
        sleep(self.config.timing.settle).await;
        self.send(&logout, false).await?;
        self.logout_sent = true;
        sleep(self.config.timing.settle).await;
        Ok(())
    }

    /// Terminating: best-effort logout, then stop the operator relay.
    async fn terminate(&mut self) {
        self.phases.advance(Phase::Terminating);
        if self.logout_sent || self.transport_lost || self.writer.is_closed() {
            return;
        }
        if let Err(e) = self.logout().await {
            debug!("best-effort logout failed: {}", e);
        }
    }

    fn shutdown_tasks(&mut self) {
        if let Some(task) = self.operator_task.take() {
            task.abort();
        }
    }

    async fn send(&mut self, line: &str, hidden: bool) -> Result<(), SessionError> {
        let mut buf = Zeroizing::new(Vec::with_capacity(line.len() + 1));
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        self.write(buf, hidden).await
    }

    async fn write(&mut self, data: Zeroizing<Vec<u8>>, hidden: bool) -> Result<(), SessionError> {
        if hidden {
            debug!("write: <hidden>");
        } else {
            debug!("write: {:?}", String::from_utf8_lossy(&data).trim_end());
        }

        match self.writer.write(data).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let phase = self.phase();
                warn!("transport lost in {}: {}", phase, e);
                self.transport_lost = true;
                self.console.marker("transport lost");
                Err(SessionError::new(phase, SessionErrorKind::Write(e)))
            }
        }
    }
}

fn connect_kind(err: Error) -> SessionErrorKind {
    match err {
        Error::Transport(e) => SessionErrorKind::Connect(e),
        Error::Channel(e) => SessionErrorKind::Channel(e),
        other => SessionErrorKind::Connect(TransportError::Io(io::Error::other(other.to_string()))),
    }
}

/// Resolves once cancellation is requested. Never resolves if every
/// handle is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn channel_kind(err: Error) -> SessionErrorKind {
    match err {
        Error::Channel(e) => SessionErrorKind::Channel(e),
        Error::Transport(e) => {
            SessionErrorKind::Channel(ChannelError::PtyOpenFailed(e.to_string()))
        }
        other => SessionErrorKind::Channel(ChannelError::PtyOpenFailed(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::driver::builder::SessionBuilder;
    use crate::driver::console::CaptureConsole;
    use crate::driver::testing::{Action, Script, StubTransport};

    const SECRET: &str = "s3cret";
    const COMMAND: &str = "sudo python3 /tmp/mininet-script.py /tmp/input-topo.json";

    fn config(mode: Mode, deadline: Duration) -> SessionConfig {
        SessionBuilder::new("192.168.64.5")
            .username("alice")
            .password(SECRET)
            .command(COMMAND)
            .mode(mode)
            .deadline(deadline)
            .build()
            .unwrap()
    }

    fn prompt_then(after_secret: Vec<Action>) -> Script {
        Script::default()
            .on("sudo python3", vec![Action::Output("[sudo] password for alice: ")])
            .on(SECRET, after_secret)
    }

    struct Run {
        result: Result<SessionReport, SessionError>,
        console: CaptureConsole,
        writes: Vec<String>,
        write_times: Vec<Instant>,
        closes: usize,
    }

    async fn run_with(
        script: Script,
        config: SessionConfig,
        input: Option<OperatorInput>,
    ) -> Run {
        let stub = StubTransport::new(script);
        let closes = stub.closes.clone();
        let writes = stub.writes.clone();
        let console = CaptureConsole::new();
        let session = Session::with_transport(config, stub);

        let result = session.run(Arc::new(console.clone()), input).await;

        let recorded = writes.lock().unwrap().clone();
        Run {
            result,
            console,
            writes: recorded.iter().map(|(_, w)| w.clone()).collect(),
            write_times: recorded.iter().map(|(t, _)| *t).collect(),
            closes: closes.load(Ordering::SeqCst),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path_phases() {
        let script = prompt_then(vec![
            Action::Output("\r\n*** Creating network\r\n"),
            Action::Output("completed in 3 seconds\r\n"),
        ])
        .on("exit", vec![Action::Exit(0), Action::Close]);

        let run = run_with(script, config(Mode::Automated, Duration::from_secs(120)), None).await;
        let report = run.result.unwrap();

        assert_eq!(
            report.phases,
            vec![
                Phase::Idle,
                Phase::AwaitingEscalation,
                Phase::Authenticated,
                Phase::Executing,
                Phase::Terminating,
                Phase::Closed,
            ]
        );
        assert_eq!(report.reason, TerminationReason::TaskComplete);
        assert_eq!(report.secret_writes, 1);
        assert_eq!(run.writes[0], format!("{}\n\n", COMMAND));
        assert_eq!(run.writes[1], format!("{}\n", SECRET));
        assert_eq!(run.writes[2], "exit\n");
        assert_eq!(run.writes.len(), 3);
        assert_eq!(run.closes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_prompt_answered_within_window() {
        let start = Instant::now();
        let script = prompt_then(vec![Action::Output("completed in 1 seconds\n")]);

        let run = run_with(script, config(Mode::Automated, Duration::from_secs(120)), None).await;
        let report = run.result.unwrap();

        let secret_writes: Vec<_> = run
            .writes
            .iter()
            .zip(&run.write_times)
            .filter(|(w, _)| w.contains(SECRET))
            .collect();
        assert_eq!(secret_writes.len(), 1);
        assert!(*secret_writes[0].1 - start < Duration::from_millis(3500));
        assert!(report.visited(Phase::Authenticated));
    }

    #[tokio::test(start_paused = true)]
    async fn test_echoed_secret_is_masked() {
        let script = prompt_then(vec![Action::Output("completed in 2 seconds\n")]).echo();

        let run = run_with(script, config(Mode::Automated, Duration::from_secs(120)), None).await;
        run.result.unwrap();

        let transcript = run.console.transcript();
        assert!(!transcript.contains(SECRET));
        assert!(transcript.contains(crate::credential::MASK));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_prompt_falls_back_to_quiet_period() {
        let script = Script::default()
            .on(SECRET, vec![Action::Output("completed in 1 seconds\n")]);

        let run = run_with(script, config(Mode::Automated, Duration::from_secs(120)), None).await;
        let report = run.result.unwrap();

        assert_eq!(report.secret_writes, 1);
        assert_eq!(report.reason, TerminationReason::TaskComplete);
        assert!(run.console.transcript().contains("assuming a password prompt"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalation_timeout() {
        let run = run_with(
            Script::default(),
            config(Mode::Automated, Duration::from_secs(2)),
            None,
        )
        .await;

        let err = run.result.unwrap_err();
        assert!(matches!(err.kind, SessionErrorKind::EscalationTimeout));
        assert_eq!(err.phase, Phase::AwaitingEscalation);
        assert!(!run.writes.iter().any(|w| w.contains(SECRET)));
        assert_eq!(run.closes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execution_timeout() {
        let script = prompt_then(vec![Action::Output("*** Creating network\n")]);

        let run = run_with(script, config(Mode::Automated, Duration::from_secs(10)), None).await;

        let err = run.result.unwrap_err();
        assert!(matches!(err.kind, SessionErrorKind::ExecutionTimeout));
        assert_eq!(err.phase, Phase::Authenticated);
        assert_eq!(run.closes, 1);
        assert!(run.console.transcript().contains("timeout"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_is_fatal() {
        let script = Script::default()
            .on("sudo python3", vec![Action::Output("[sudo] password for alice:\n")])
            .fail_writes_from(2);

        let run = run_with(script, config(Mode::Automated, Duration::from_secs(120)), None).await;

        let err = run.result.unwrap_err();
        assert!(matches!(err.kind, SessionErrorKind::Write(_)));
        assert_eq!(err.phase, Phase::AwaitingEscalation);
        assert!(!err.to_string().contains(SECRET));
        assert_eq!(run.writes.len(), 1);
        assert_eq!(run.closes, 1);
        assert!(run.console.transcript().contains("transport lost"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_benign_exit_status() {
        let script = prompt_then(vec![
            Action::Output("^C\n"),
            Action::Delay(Duration::from_millis(200)),
            Action::Exit(130),
            Action::Close,
        ]);

        let run = run_with(script, config(Mode::Automated, Duration::from_secs(120)), None).await;
        let report = run.result.unwrap();

        assert_eq!(report.reason, TerminationReason::BenignInterruptExit);
        assert_eq!(report.exit_status, Some(130));
        assert_eq!(run.closes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_close_is_fatal() {
        let script = Script::default().on("sudo python3", vec![Action::Close]);

        let run = run_with(script, config(Mode::Automated, Duration::from_secs(120)), None).await;

        let err = run.result.unwrap_err();
        assert!(matches!(
            err.kind,
            SessionErrorKind::TransportClosedEarly { exit_status: None }
        ));
        assert_eq!(err.phase, Phase::AwaitingEscalation);
        assert_eq!(run.closes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_automated_leaves_sub_repl() {
        let script = prompt_then(vec![Action::Output("*** Starting CLI:\nmininet> ")])
            .on(
                "exit",
                vec![Action::Output(
                    "*** Stopping 1 controllers\n*** Done\ncompleted in 5.2 seconds\n",
                )],
            )
            .on("exit", vec![Action::Exit(0), Action::Close]);

        let run = run_with(script, config(Mode::Automated, Duration::from_secs(120)), None).await;
        let report = run.result.unwrap();

        assert_eq!(report.reason, TerminationReason::TaskComplete);
        assert!(report.visited(Phase::Executing));
        assert!(!report.visited(Phase::InteractiveHandoff));
        assert_eq!(run.writes[2], "exit\n");
        assert_eq!(run.writes[3], "exit\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_interactive_handoff_until_operator_exit() {
        let script = prompt_then(vec![Action::Output("*** Starting CLI:\nmininet> ")])
            .on(
                "pingall",
                vec![Action::Output("*** Results: 0% dropped (2/2 received)\nmininet> ")],
            );
        let input: OperatorInput = Box::new(&b"pingall\nexit\n"[..]);

        let run = run_with(
            script,
            config(Mode::Interactive, Duration::from_secs(120)),
            Some(input),
        )
        .await;
        let report = run.result.unwrap();

        assert_eq!(report.reason, TerminationReason::OperatorExit);
        assert!(report.visited(Phase::InteractiveHandoff));
        assert!(run.writes.contains(&"pingall\n".to_string()));
        assert!(run.console.transcript().contains("0% dropped"));
        assert_eq!(run.closes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_cancels_close_once() {
        let script = prompt_then(vec![Action::Output("*** Creating network\n")]);
        let stub = StubTransport::new(script);
        let closes = stub.closes.clone();
        let writes = stub.writes.clone();
        let session =
            Session::with_transport(config(Mode::Automated, Duration::from_secs(120)), stub);

        let cancel = session.cancel_handle();
        for delay in [1500, 1600, 1600] {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(delay)).await;
                cancel.cancel();
            });
        }

        let report = session
            .run(Arc::new(CaptureConsole::new()), None)
            .await
            .unwrap();

        assert!(cancel.is_cancelled());
        assert_eq!(report.reason, TerminationReason::Interrupted);
        assert_eq!(report.phases.iter().filter(|p| **p == Phase::Closed).count(), 1);
        assert_eq!(report.phases.last(), Some(&Phase::Closed));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(StubTransport::written(&writes).last().map(String::as_str), Some("exit\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_sub_repl_completes_at_shell_prompt() {
        let config = SessionBuilder::new("192.168.64.5")
            .username("alice")
            .password(SECRET)
            .command(COMMAND)
            .without_sub_repl()
            .build()
            .unwrap();
        let script = prompt_then(vec![
            Action::Output("\n*** Creating network\n"),
            Action::Output("alice@vm:~$ "),
        ]);

        let run = run_with(script, config, None).await;
        let report = run.result.unwrap();

        assert_eq!(report.reason, TerminationReason::TaskComplete);
        assert_eq!(
            report.phases,
            vec![
                Phase::Idle,
                Phase::AwaitingEscalation,
                Phase::Authenticated,
                Phase::Executing,
                Phase::Terminating,
                Phase::Closed,
            ]
        );
        assert_eq!(run.writes.last().map(String::as_str), Some("exit\n"));
    }

    #[tokio::test]
    async fn test_failed_upload_closes_transport() {
        let stub = StubTransport::new(Script::default());
        let closes = stub.closes.clone();
        let mut session =
            Session::with_transport(config(Mode::Automated, Duration::from_secs(120)), stub);
        let plan = SimulationPlan::new(
            "/nonexistent/mnpilot/mininet-script.py",
            "/nonexistent/mnpilot/input-topo.json",
        );

        let err = session.upload(&plan).await.unwrap_err();
        assert!(matches!(err.kind, SessionErrorKind::Upload(_)));
        assert_eq!(err.phase, Phase::Idle);
        assert!(!session.is_open());
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        let err = session
            .run(Arc::new(CaptureConsole::new()), None)
            .await
            .unwrap_err();
        assert!(matches!(err.kind, SessionErrorKind::Channel(ChannelError::Closed)));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_without_run() {
        let stub = StubTransport::new(Script::default());
        let closes = stub.closes.clone();
        let session =
            Session::with_transport(config(Mode::Automated, Duration::from_secs(1)), stub);
        assert!(session.is_open());
        assert!(session.id().starts_with("alice@192.168.64.5:22-"));

        tokio_test::block_on(session.close());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
