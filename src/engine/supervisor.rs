//! Engine process supervisor.
//! Spawns the engine, waits for its stdout handshake, connects a transport and
//! restarts the process when it dies. After `max_retries + 1` consecutive failed
//! launches the engine is Disabled and no further spawns happen until an
//! explicit start.
//!
//! Every launch gets a generation number and its own cancellation token, so
//! output and exit events from a process that has been replaced are ignored.

use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handshake::{parse_handshake_line, HandshakeInfo};
use super::{port, process};
use crate::config::{EngineConfig, PORT_PLACEHOLDER};
use crate::error::{EngineError, EngineResult};
use crate::metrics::{metric_names, MetricsRegistry};
use crate::rpc::{Transport, TransportFactory};
use crate::state_machine::{EngineStatus, StateMachine};

struct LaunchState {
    generation: u64,
    token: CancellationToken,
    pid: Option<u32>,
    launched_at: Option<Instant>,
    watcher: Option<JoinHandle<()>>,
    connection: Option<Arc<dyn Transport>>,
    address: Option<String>,
}

impl LaunchState {
    /// Retire the current launch and hand out the identity of the next one.
    fn advance(&mut self) -> (u64, CancellationToken) {
        self.token.cancel();
        self.token = CancellationToken::new();
        self.generation += 1;
        self.pid = None;
        self.launched_at = None;
        self.connection = None;
        self.address = None;
        (self.generation, self.token.clone())
    }
}

pub struct EngineSupervisor {
    name: String,
    config: EngineConfig,
    state: Arc<StateMachine>,
    metrics: Arc<MetricsRegistry>,
    transport_factory: TransportFactory,
    failures: AtomicU32,
    inner: Mutex<LaunchState>,
}

impl EngineSupervisor {
    pub fn new(
        name: impl Into<String>,
        config: EngineConfig,
        metrics: Arc<MetricsRegistry>,
        transport_factory: TransportFactory,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            config,
            state: Arc::new(StateMachine::new()),
            metrics,
            transport_factory,
            failures: AtomicU32::new(0),
            inner: Mutex::new(LaunchState {
                generation: 0,
                token: CancellationToken::new(),
                pid: None,
                launched_at: None,
                watcher: None,
                connection: None,
                address: None,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn status(&self) -> EngineStatus {
        self.state.current()
    }

    pub fn state(&self) -> &Arc<StateMachine> {
        &self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.state.subscribe()
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Pid of the running engine process, if any.
    pub fn pid(&self) -> Option<u32> {
        self.inner.lock().pid
    }

    /// Address the current connection dials.
    pub fn address(&self) -> Option<String> {
        self.inner.lock().address.clone()
    }

    /// The live connection, if the engine has completed its handshake.
    pub fn connection(&self) -> Option<Arc<dyn Transport>> {
        self.inner.lock().connection.clone()
    }

    /// The live connection together with the launch generation it belongs to.
    pub fn connection_with_generation(&self) -> Option<(u64, Arc<dyn Transport>)> {
        let inner = self.inner.lock();
        inner.connection.clone().map(|c| (inner.generation, c))
    }

    /// Launch the engine if it is Disabled and wait until it is ready.
    pub async fn start(self: &Arc<Self>) -> EngineResult<()> {
        if self.state.transition_from(EngineStatus::Disabled, EngineStatus::Starting) {
            self.failures.store(0, Ordering::SeqCst);
            let (generation, token) = self.inner.lock().advance();
            self.spawn_launch(generation, token);
        }
        self.await_ready().await
    }

    /// Attach to an engine that is already running at `address`. Any managed
    /// launch is retired.
    pub fn connect(&self, address: &str) -> EngineResult<()> {
        let transport = (self.transport_factory)(address)?;
        {
            let mut inner = self.inner.lock();
            inner.advance();
            inner.connection = Some(transport);
            inner.address = Some(address.to_string());
        }
        self.failures.store(0, Ordering::SeqCst);
        self.state.transition_from(EngineStatus::Disabled, EngineStatus::Starting);
        if !self.state.current().is_ready() {
            self.state.transition(EngineStatus::Enabled)?;
        }
        info!(engine = %self.name, %address, "attached to running engine");
        Ok(())
    }

    /// Replace the running process and wait for the new one.
    ///
    /// Failing to become ready in time is reported but does not disable the engine.
    pub async fn restart(self: &Arc<Self>) -> EngineResult<()> {
        if self.state.current() == EngineStatus::Disabled {
            return self.start().await;
        }
        if self.state.current() != EngineStatus::Restarting {
            self.state.transition(EngineStatus::Restarting)?;
        }
        info!(engine = %self.name, "restarting engine");
        self.metrics.increment(metric_names::ENGINE_RESTARTS);
        let (generation, token) = self.inner.lock().advance();
        self.spawn_launch(generation, token);
        self.await_ready().await
    }

    /// Called by RPC callers when the connection of `generation` broke. Starts a
    /// restart in the background unless one is already under way. Failures of a
    /// connection that has since been replaced are ignored.
    pub fn report_transport_failure(self: &Arc<Self>, generation: u64) {
        self.metrics.increment(metric_names::TRANSPORT_FAILURES);
        let next = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                debug!(engine = %self.name, generation, "ignoring transport failure of replaced connection");
                return;
            }
            let status = self.state.current();
            if !status.is_ready() || self.state.transition(EngineStatus::Restarting).is_err() {
                debug!(engine = %self.name, %status, "transport failure while not ready");
                return;
            }
            inner.advance()
        };
        warn!(engine = %self.name, "transport failure, restarting engine");
        self.metrics.increment(metric_names::ENGINE_RESTARTS);
        self.spawn_launch(next.0, next.1);
    }

    /// Disable the engine and terminate its process tree.
    pub async fn shutdown(&self) {
        let (token, watcher, pid) = {
            let mut inner = self.inner.lock();
            let token = inner.token.clone();
            let pid = inner.pid;
            let watcher = inner.watcher.take();
            inner.advance();
            (token, watcher, pid)
        };
        self.state.force_disable();
        token.cancel();
        if let Some(watcher) = watcher {
            let _ = watcher.await;
        }
        info!(engine = %self.name, ?pid, "engine shut down");
    }

    /// Wait for Enabled/Processing within the configured polling bound.
    pub async fn await_ready(&self) -> EngineResult<()> {
        let tries = self.config.status_poll_max_tries;
        if self
            .state
            .wait_until_ready(self.config.status_poll_interval(), tries)
            .await
        {
            Ok(())
        } else if self.state.current() == EngineStatus::Disabled {
            Err(EngineError::Disabled)
        } else {
            Err(EngineError::NotReady { tries })
        }
    }

    /// Port to hand the engine. Falls back to the configured default when the
    /// search range is exhausted.
    pub(crate) async fn resolve_port(&self) -> u16 {
        if !self.config.args.iter().any(|a| a.contains(PORT_PLACEHOLDER)) {
            return self.config.default_port;
        }
        let range = self.config.port_search_start..=self.config.port_search_end;
        match port::find_free_port(range).await {
            Some(port) => port,
            None => {
                warn!(
                    engine = %self.name,
                    default_port = self.config.default_port,
                    "no free port in search range, using default"
                );
                self.config.default_port
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.lock().generation == generation
    }

    fn spawn_launch(self: &Arc<Self>, generation: u64, token: CancellationToken) {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.launch(generation, token).await });
    }

    async fn launch(self: Arc<Self>, generation: u64, token: CancellationToken) {
        let port = self.resolve_port().await;
        if !self.is_current(generation) {
            return;
        }

        let mut command = Command::new(&self.config.executable);
        command
            .args(self.config.render_args(port))
            .envs(&self.config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }
        process::isolate(&mut command);

        self.metrics.increment(metric_names::ENGINE_SPAWN_ATTEMPTS);
        info!(
            engine = %self.name,
            program = %self.config.executable.display(),
            port,
            generation,
            "spawning engine process"
        );

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                let err = EngineError::Spawn {
                    program: self.config.executable.clone(),
                    source,
                };
                error!(engine = %self.name, error = %err, "engine spawn failed");
                self.on_failure(generation, &err);
                return;
            }
        };

        let pid = child.id();
        info!(engine = %self.name, ?pid, generation, "engine process spawned");

        let weak = Arc::downgrade(&self);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(watch_stdout(weak.clone(), generation, self.name.clone(), stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(self.name.clone(), stderr));
        }

        let grace = self.config.shutdown_grace();
        let watcher = tokio::spawn(async move {
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                _ = token.cancelled() => None,
            };
            match exited {
                Some(status) => {
                    let code = status.ok().and_then(|s| s.code());
                    if let Some(this) = weak.upgrade() {
                        this.on_failure(generation, &EngineError::PrematureExit(code));
                    }
                }
                None => process::terminate_tree(&mut child, grace).await,
            }
        });

        let mut inner = self.inner.lock();
        if inner.generation == generation {
            inner.pid = pid;
            inner.launched_at = Some(Instant::now());
            inner.watcher = Some(watcher);
        }
    }

    fn on_handshake(self: &Arc<Self>, generation: u64, info: HandshakeInfo) {
        let address = info.connect_address();
        let transport = match (self.transport_factory)(&address) {
            Ok(transport) => transport,
            Err(e) => {
                self.on_failure(generation, &e);
                return;
            }
        };

        {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                debug!(engine = %self.name, generation, "ignoring handshake from replaced process");
                return;
            }
            inner.connection = Some(transport);
            inner.address = Some(address.clone());
            if let Some(launched_at) = inner.launched_at {
                self.metrics.record(
                    metric_names::ENGINE_READY,
                    launched_at.elapsed().as_micros() as f64,
                );
            }
        }

        self.failures.store(0, Ordering::SeqCst);
        let enabled = self.state.transition_from(EngineStatus::Starting, EngineStatus::Enabled)
            || self.state.transition_from(EngineStatus::Restarting, EngineStatus::Enabled);
        if enabled {
            info!(engine = %self.name, %address, generation, "engine ready");
        } else {
            debug!(engine = %self.name, status = %self.state.current(), "handshake outside of a launch");
        }
    }

    /// A launch died: spawn error, bad handshake or process exit.
    fn on_failure(self: &Arc<Self>, generation: u64, reason: &EngineError) {
        let next = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                debug!(engine = %self.name, generation, "ignoring failure of replaced process");
                return;
            }
            if self.state.current() == EngineStatus::Disabled {
                return;
            }
            let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
            if failures > self.config.max_retries {
                error!(
                    engine = %self.name,
                    failures,
                    error = %reason,
                    "engine keeps failing, disabling"
                );
                inner.watcher = None;
                inner.advance();
                None
            } else {
                warn!(
                    engine = %self.name,
                    attempt = failures,
                    max_retries = self.config.max_retries,
                    error = %reason,
                    "engine process failed, restarting"
                );
                inner.watcher = None;
                Some(inner.advance())
            }
        };

        match next {
            None => self.state.force_disable(),
            Some((generation, token)) => {
                if self.state.current() != EngineStatus::Restarting {
                    let _ = self.state.transition(EngineStatus::Restarting);
                }
                self.metrics.increment(metric_names::ENGINE_RESTARTS);
                self.spawn_launch(generation, token);
            }
        }
    }
}

impl Drop for EngineSupervisor {
    fn drop(&mut self) {
        self.inner.get_mut().token.cancel();
    }
}

async fn watch_stdout(
    supervisor: Weak<EngineSupervisor>,
    generation: u64,
    name: String,
    stdout: ChildStdout,
) {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Some(handshake) = parse_handshake_line(&line) else {
            debug!(engine = %name, "{line}");
            continue;
        };
        let Some(supervisor) = supervisor.upgrade() else {
            return;
        };
        match handshake {
            Ok(info) => supervisor.on_handshake(generation, info),
            Err(e) => {
                warn!(engine = %name, error = %e, "unusable handshake");
                supervisor.on_failure(generation, &e);
            }
        }
    }
}

async fn log_stderr(name: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        warn!(engine = %name, "{line}");
    }
}
