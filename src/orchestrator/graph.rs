//! Process graph: declarative description and supervised execution
//!
//! A [`GraphSpec`] lists processes and the byte pipes between them. Spawning
//! it yields the output node's stdout plus a [`GraphHandle`] that resolves to
//! a [`GraphOutcome`] once every process has exited.
//!
//! Pipes into a node's stdin are plain OS pipes. Any further input of a node
//! is served through a loopback TCP relay: the `{input:N}` placeholder in the
//! node's arguments is replaced with `tcp://127.0.0.1:<port>` and the source
//! node's stdout is copied into the accepted connection.

use crate::error::{Error, Result};
use crate::progress::{DiagnosticTail, LineSplitter};
use crate::tools::diagnostic_message;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::process::{ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

/// How long a failed node's diagnostics may take to drain
const DIAGNOSTIC_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Index of a node within [`GraphSpec::nodes`]
pub type NodeId = usize;

/// Where a pipe enters its target node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputSlot {
    /// The node's stdin
    Stdin,
    /// A loopback relay substituted for the `{input:N}` placeholder
    Numbered(usize),
}

/// Placeholder a node's arguments use for numbered input `n`
pub fn input_placeholder(n: usize) -> String {
    format!("{{input:{n}}}")
}

/// Receives a node's diagnostic output line by line
pub trait DiagnosticSink: Send + 'static {
    /// Called for every non-empty line on the node's stderr
    fn line(&mut self, line: &str);
}

/// One process of the graph
pub struct NodeSpec {
    role: String,
    program: PathBuf,
    args: Vec<String>,
    sink: Option<Box<dyn DiagnosticSink>>,
}

impl NodeSpec {
    /// A process identified by `role` in logs and failures
    pub fn new(role: impl Into<String>, program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            role: role.into(),
            program: program.into(),
            args,
            sink: None,
        }
    }

    /// Forward the node's stderr lines to `sink`
    pub fn with_sink(mut self, sink: impl DiagnosticSink) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Role name
    pub fn role(&self) -> &str {
        &self.role
    }

    /// Program path
    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    /// Arguments, placeholders unresolved
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl std::fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSpec")
            .field("role", &self.role)
            .field("program", &self.program)
            .field("args", &self.args)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

/// A byte pipe from one node's stdout into another node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipeEdge {
    /// Node whose stdout is read
    pub from: NodeId,
    /// Node receiving the bytes
    pub to: NodeId,
    /// Where the bytes enter
    pub slot: InputSlot,
}

/// Declarative process graph
#[derive(Debug)]
pub struct GraphSpec {
    /// Processes, indexed by [`NodeId`]
    pub nodes: Vec<NodeSpec>,
    /// Pipes between them
    pub edges: Vec<PipeEdge>,
    /// Node whose stdout becomes the graph output
    pub output: NodeId,
}

/// Why a graph failed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeFailure {
    /// Role of the node (or relay) that failed first
    pub role: String,
    /// Exit status, when the failure was an exit
    pub status: Option<String>,
    /// Tail of the node's diagnostics
    pub diagnostics: String,
}

impl std::fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.status.as_deref().unwrap_or("failure");
        write!(
            f,
            "{} failed: {}",
            self.role,
            diagnostic_message(&self.diagnostics, status)
        )
    }
}

/// Final state of a spawned graph
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GraphOutcome {
    /// Every process exited successfully
    Completed,
    /// The graph was cancelled before finishing
    Cancelled,
    /// A process or relay failed; every sibling was killed
    Failed(NodeFailure),
}

impl std::fmt::Display for GraphOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphOutcome::Completed => f.write_str("completed"),
            GraphOutcome::Cancelled => f.write_str("cancelled"),
            GraphOutcome::Failed(failure) => failure.fmt(f),
        }
    }
}

/// Control handle of a spawned graph
#[derive(Clone, Debug)]
pub struct GraphHandle {
    cancel: CancellationToken,
    outcome: watch::Receiver<Option<GraphOutcome>>,
}

impl GraphHandle {
    /// Kill every process of the graph
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels the graph when triggered
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether every process has exited
    pub fn is_finished(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// Wait until every process has exited
    pub async fn outcome(&self) -> GraphOutcome {
        let mut outcome = self.outcome.clone();
        match outcome.wait_for(Option::is_some).await {
            Ok(value) => value.clone().unwrap_or(GraphOutcome::Cancelled),
            Err(_) => GraphOutcome::Failed(NodeFailure {
                role: "supervisor".to_string(),
                status: None,
                diagnostics: "process graph supervisor stopped unexpectedly".to_string(),
            }),
        }
    }
}

/// A spawned graph
#[derive(Debug)]
pub struct RunningGraph {
    output: ChildStdout,
    handle: GraphHandle,
    pids: Vec<(String, Option<u32>)>,
}

impl RunningGraph {
    /// Control handle
    pub fn handle(&self) -> &GraphHandle {
        &self.handle
    }

    /// Role and OS process id of every node
    pub fn pids(&self) -> &[(String, Option<u32>)] {
        &self.pids
    }

    /// The output as a byte stream
    ///
    /// Dropping the stream before it ends cancels the graph. At end of output
    /// the stream waits for the graph outcome and yields an error unless the
    /// graph completed, so a failed graph never looks like a finished body.
    pub fn into_body(self) -> (BoxStream<'static, std::io::Result<Bytes>>, GraphHandle) {
        let handle = self.handle.clone();
        let state = BodyState {
            reader: ReaderStream::new(self.output),
            handle: self.handle,
            done: false,
        };
        let guard = handle.cancel_token().drop_guard();

        let body = futures::stream::unfold((state, guard), |(mut state, guard)| async move {
            if state.done {
                return None;
            }
            match state.reader.next().await {
                Some(Ok(chunk)) => Some((Ok(chunk), (state, guard))),
                Some(Err(e)) => {
                    state.done = true;
                    Some((Err(e), (state, guard)))
                }
                None => match state.handle.outcome().await {
                    GraphOutcome::Completed => None,
                    other => {
                        state.done = true;
                        Some((Err(std::io::Error::other(other.to_string())), (state, guard)))
                    }
                },
            }
        });

        (body.boxed(), handle)
    }
}

struct BodyState {
    reader: ReaderStream<ChildStdout>,
    handle: GraphHandle,
    done: bool,
}

enum GraphEvent {
    Exited {
        node: NodeId,
        status: std::io::Result<Option<ExitStatus>>,
    },
    RelayFailed {
        label: String,
        error: std::io::Error,
    },
}

impl GraphSpec {
    /// Check edge endpoints, output and placeholders
    ///
    /// # Errors
    ///
    /// [`Error::Stream`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(Error::Stream { reason });
        let count = self.nodes.len();

        if self.output >= count {
            return invalid(format!("output node {} does not exist", self.output));
        }

        let mut stdout_used = vec![false; count];
        let mut stdin_used = vec![false; count];
        for edge in &self.edges {
            if edge.from >= count || edge.to >= count || edge.from == edge.to {
                return invalid(format!("edge {} -> {} is invalid", edge.from, edge.to));
            }
            if edge.from == self.output {
                return invalid("the output node cannot feed another node".to_string());
            }
            if std::mem::replace(&mut stdout_used[edge.from], true) {
                return invalid(format!("stdout of {} is piped twice", self.nodes[edge.from].role));
            }
            match edge.slot {
                InputSlot::Stdin => {
                    if std::mem::replace(&mut stdin_used[edge.to], true) {
                        return invalid(format!("stdin of {} is piped twice", self.nodes[edge.to].role));
                    }
                }
                InputSlot::Numbered(n) => {
                    let placeholder = input_placeholder(n);
                    if !self.nodes[edge.to].args.iter().any(|a| *a == placeholder) {
                        return invalid(format!(
                            "{} has no {placeholder} argument",
                            self.nodes[edge.to].role
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Start every process and the pipes between them
    ///
    /// `kill_grace` bounds how long a killed process may take to be reaped.
    ///
    /// # Errors
    ///
    /// - [`Error::Stream`] for an invalid graph
    /// - [`Error::ProcessSpawn`] if a process cannot be started; processes
    ///   already started are killed
    /// - [`Error::Io`] if a relay listener cannot be bound
    pub async fn spawn(mut self, kill_grace: Duration) -> Result<RunningGraph> {
        self.validate()?;

        let mut listeners: Vec<Option<TcpListener>> = Vec::with_capacity(self.edges.len());
        for edge in &self.edges {
            let InputSlot::Numbered(n) = edge.slot else {
                listeners.push(None);
                continue;
            };
            let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
            let url = format!("tcp://{}", listener.local_addr()?);
            let placeholder = input_placeholder(n);
            for arg in &mut self.nodes[edge.to].args {
                if *arg == placeholder {
                    *arg = url.clone();
                }
            }
            listeners.push(Some(listener));
        }

        let stdin_fed: Vec<bool> = (0..self.nodes.len())
            .map(|id| {
                self.edges
                    .iter()
                    .any(|e| e.to == id && e.slot == InputSlot::Stdin)
            })
            .collect();

        let mut children = Vec::with_capacity(self.nodes.len());
        for (node, fed) in self.nodes.iter().zip(&stdin_fed) {
            let mut command = Command::new(&node.program);
            command
                .args(&node.args)
                .stdin(if *fed { Stdio::piped() } else { Stdio::null() })
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            // children spawned so far are killed when `children` drops
            let child = command.spawn().map_err(|source| Error::ProcessSpawn {
                program: node.program.display().to_string(),
                source,
            })?;
            children.push(child);
        }

        let roles: Vec<String> = self.nodes.iter().map(|n| n.role.clone()).collect();
        let pids: Vec<(String, Option<u32>)> = roles
            .iter()
            .cloned()
            .zip(children.iter().map(|c| c.id()))
            .collect();

        let cancel = CancellationToken::new();
        let kill = cancel.child_token();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut stdouts: Vec<Option<ChildStdout>> =
            children.iter_mut().map(|c| c.stdout.take()).collect();
        let mut stdins: Vec<_> = children.iter_mut().map(|c| c.stdin.take()).collect();

        let output = stdouts[self.output].take().ok_or_else(|| Error::Stream {
            reason: "output process has no stdout".to_string(),
        })?;

        let pipes = connect_pipes(&self.edges, &roles, listeners, &mut stdouts, &mut stdins)?;
        for pipe in pipes {
            tokio::spawn(relay(
                pipe.source,
                pipe.target,
                pipe.label,
                kill.clone(),
                events_tx.clone(),
            ));
        }

        // unconnected outputs are drained so their writers never block
        for (id, stdout) in stdouts.into_iter().enumerate() {
            if let Some(mut stdout) = stdout {
                let role = roles[id].clone();
                tokio::spawn(async move {
                    if let Err(e) = tokio::io::copy(&mut stdout, &mut tokio::io::sink()).await {
                        tracing::debug!(role = %role, error = %e, "Draining unused output failed");
                    }
                });
            }
        }

        let mut tails = Vec::with_capacity(children.len());
        for (child, node) in children.iter_mut().zip(self.nodes.iter_mut()) {
            tails.push(Some(tokio::spawn(read_diagnostics(
                child.stderr.take(),
                node.sink.take(),
            ))));
        }

        for (id, mut child) in children.into_iter().enumerate() {
            let kill = kill.clone();
            let events = events_tx.clone();
            let role = roles[id].clone();
            tokio::spawn(async move {
                let status = tokio::select! {
                    status = child.wait() => status.map(Some),
                    _ = kill.cancelled() => {
                        if let Err(e) = child.start_kill() {
                            tracing::debug!(role = %role, error = %e, "Kill signal not delivered");
                        }
                        match tokio::time::timeout(kill_grace, child.wait()).await {
                            Ok(status) => status.map(Some),
                            Err(_) => {
                                tracing::warn!(role = %role, "Process not reaped within the grace period");
                                Ok(None)
                            }
                        }
                    }
                };
                let _ = events.send(GraphEvent::Exited { node: id, status });
            });
        }
        drop(events_tx);

        tracing::debug!(processes = ?pids, "Process graph started");

        let (outcome_tx, outcome_rx) = watch::channel(None);
        tokio::spawn(supervise(Supervisor {
            roles,
            tails,
            events: events_rx,
            cancel: cancel.clone(),
            kill,
            outcome: outcome_tx,
        }));

        Ok(RunningGraph {
            output,
            handle: GraphHandle {
                cancel,
                outcome: outcome_rx,
            },
            pids,
        })
    }
}

enum RelayTarget {
    Pipe(ChildStdin),
    Tcp(TcpListener),
}

struct Pipe {
    source: ChildStdout,
    target: RelayTarget,
    label: String,
}

/// Pair every edge with its source stdout and its target
///
/// Either every edge is connected or none is: nothing is started here, so a
/// failure leaves no relay behind.
fn connect_pipes(
    edges: &[PipeEdge],
    roles: &[String],
    listeners: Vec<Option<TcpListener>>,
    stdouts: &mut [Option<ChildStdout>],
    stdins: &mut [Option<ChildStdin>],
) -> Result<Vec<Pipe>> {
    let mut pipes = Vec::with_capacity(edges.len());
    for (edge, listener) in edges.iter().zip(listeners) {
        let label = format!("{} -> {}", roles[edge.from], roles[edge.to]);
        let target = match (edge.slot, listener) {
            (InputSlot::Stdin, _) => stdins[edge.to].take().map(RelayTarget::Pipe),
            (InputSlot::Numbered(_), Some(listener)) => Some(RelayTarget::Tcp(listener)),
            (InputSlot::Numbered(_), None) => None,
        };
        match (stdouts[edge.from].take(), target) {
            (Some(source), Some(target)) => pipes.push(Pipe {
                source,
                target,
                label,
            }),
            _ => {
                return Err(Error::Stream {
                    reason: format!("pipe {label} could not be connected"),
                });
            }
        }
    }
    Ok(pipes)
}

async fn relay(
    mut source: ChildStdout,
    target: RelayTarget,
    label: String,
    kill: CancellationToken,
    events: mpsc::UnboundedSender<GraphEvent>,
) {
    let result = tokio::select! {
        result = async {
            match target {
                RelayTarget::Pipe(mut sink) => pump(&mut source, &mut sink).await,
                RelayTarget::Tcp(listener) => {
                    let (mut socket, peer) = listener.accept().await?;
                    drop(listener);
                    tracing::trace!(pipe = %label, peer = %peer, "Relay connected");
                    pump(&mut source, &mut socket).await
                }
            }
        } => result,
        _ = kill.cancelled() => return,
    };

    match result {
        Ok(bytes) => tracing::debug!(pipe = %label, bytes, "Relay finished"),
        Err(error) => {
            let _ = events.send(GraphEvent::RelayFailed { label, error });
        }
    }
}

async fn pump<R, W>(source: &mut R, sink: &mut W) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let bytes = tokio::io::copy(source, sink).await?;
    sink.shutdown().await?;
    Ok(bytes)
}

async fn read_diagnostics(
    stderr: Option<ChildStderr>,
    mut sink: Option<Box<dyn DiagnosticSink>>,
) -> DiagnosticTail {
    let mut tail = DiagnosticTail::default();
    let Some(mut stderr) = stderr else {
        return tail;
    };

    let mut splitter = LineSplitter::new();
    let mut buf = vec![0u8; 4096];
    loop {
        let read = match stderr.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        for line in splitter.push(&buf[..read]) {
            if let Some(sink) = sink.as_mut() {
                sink.line(&line);
            }
            tail.push(&line);
        }
    }
    if let Some(line) = splitter.finish() {
        if let Some(sink) = sink.as_mut() {
            sink.line(&line);
        }
        tail.push(&line);
    }
    tail
}

struct Supervisor {
    roles: Vec<String>,
    tails: Vec<Option<JoinHandle<DiagnosticTail>>>,
    events: mpsc::UnboundedReceiver<GraphEvent>,
    cancel: CancellationToken,
    kill: CancellationToken,
    outcome: watch::Sender<Option<GraphOutcome>>,
}

impl Supervisor {
    async fn diagnostics(&mut self, node: NodeId) -> String {
        let Some(handle) = self.tails.get_mut(node).and_then(Option::take) else {
            return String::new();
        };
        match tokio::time::timeout(DIAGNOSTIC_DRAIN_TIMEOUT, handle).await {
            Ok(Ok(tail)) => tail.joined(),
            _ => String::new(),
        }
    }
}

async fn supervise(mut sup: Supervisor) {
    let mut remaining = sup.roles.len();
    let mut failure: Option<NodeFailure> = None;
    let mut relay_failure: Option<NodeFailure> = None;
    let mut cancelled = false;

    while remaining > 0 {
        tokio::select! {
            event = sup.events.recv() => match event {
                Some(GraphEvent::Exited { node, status }) => {
                    remaining -= 1;
                    let role = sup.roles[node].clone();
                    let stopping = failure.is_some() || sup.cancel.is_cancelled();
                    match status {
                        Ok(Some(status)) if status.success() => {
                            tracing::debug!(role = %role, "Process exited");
                        }
                        Ok(Some(status)) if !stopping => {
                            let diagnostics = sup.diagnostics(node).await;
                            tracing::warn!(role = %role, status = %status, "Process failed");
                            failure = Some(NodeFailure {
                                role,
                                status: Some(status.to_string()),
                                diagnostics,
                            });
                            sup.kill.cancel();
                        }
                        Err(e) if !stopping => {
                            tracing::warn!(role = %role, error = %e, "Waiting for process failed");
                            failure = Some(NodeFailure {
                                role,
                                status: None,
                                diagnostics: e.to_string(),
                            });
                            sup.kill.cancel();
                        }
                        _ => tracing::debug!(role = %role, "Process stopped"),
                    }
                }
                Some(GraphEvent::RelayFailed { label, error }) => {
                    if relay_failure.is_none() && !sup.kill.is_cancelled() {
                        tracing::debug!(pipe = %label, error = %error, "Relay failed");
                        relay_failure = Some(NodeFailure {
                            role: format!("pipe {label}"),
                            status: None,
                            diagnostics: error.to_string(),
                        });
                    }
                }
                None => break,
            },
            _ = sup.cancel.cancelled(), if !cancelled => {
                cancelled = true;
                tracing::debug!("Process graph cancelled");
            }
        }
    }

    // stops relays still waiting for a connection
    sup.kill.cancel();

    let outcome = match (failure, relay_failure) {
        (Some(failure), _) => GraphOutcome::Failed(failure),
        _ if sup.cancel.is_cancelled() => GraphOutcome::Cancelled,
        (None, Some(relay)) => GraphOutcome::Failed(relay),
        (None, None) => GraphOutcome::Completed,
    };
    tracing::debug!(outcome = %outcome, "Process graph finished");
    let _ = sup.outcome.send(Some(outcome));
}
