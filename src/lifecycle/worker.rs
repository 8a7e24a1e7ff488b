//! Acceptor worker threads.
//!
//! # Responsibilities
//! - Run one single-threaded Tokio runtime per worker thread
//! - Accept on a duplicate of every listening socket
//! - Stop accepting or shut down on command, acknowledging each step
//!
//! # Design Decisions
//! - Readiness is reported before `start()` returns, so a worker that cannot
//!   build its runtime fails the start instead of silently missing
//! - Shutdown drains open connections up to the configured budget

use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::error::ServerError;
use crate::lifecycle::shutdown::Shutdown;
use crate::net::acceptor::{accept_loop, EndpointRuntime, ServeContext};
use crate::net::listener::Listener;

/// Upper bound on waiting for a worker to acknowledge a command.
const ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Time left for tasks still alive after the drain.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

enum WorkerCommand {
    StopAccepting(std_mpsc::Sender<()>),
    Shutdown,
}

/// Handle to a running worker thread.
pub(crate) struct AcceptorWorker {
    id: usize,
    commands: mpsc::UnboundedSender<WorkerCommand>,
    thread: Option<thread::JoinHandle<()>>,
}

impl AcceptorWorker {
    /// Spawn a worker. It sends exactly one message on `ready`.
    pub(crate) fn spawn(
        id: usize,
        listeners: Vec<(Arc<EndpointRuntime>, std::net::TcpListener)>,
        ctx: Arc<ServeContext>,
        drain_timeout: Duration,
        ready: std_mpsc::Sender<Result<(), ServerError>>,
    ) -> Result<Self, ServerError> {
        let (commands, command_rx) = mpsc::unbounded_channel();

        let thread = thread::Builder::new()
            .name(format!("frontend-worker-{id}"))
            .spawn(move || run(id, listeners, ctx, drain_timeout, command_rx, ready))
            .map_err(|source| ServerError::Worker { worker: id, source })?;

        Ok(Self {
            id,
            commands,
            thread: Some(thread),
        })
    }

    /// Close this worker's listeners and wait until its accept loops exit.
    pub(crate) fn stop_accepting(&self) {
        let (ack_tx, ack_rx) = std_mpsc::channel();
        if self.commands.send(WorkerCommand::StopAccepting(ack_tx)).is_err() {
            return;
        }
        if ack_rx.recv_timeout(ACK_TIMEOUT).is_err() {
            tracing::warn!(worker = self.id, "Worker did not acknowledge stop accepting");
        }
    }

    /// Ask the worker to drain and exit, without waiting.
    pub(crate) fn begin_shutdown(&self) {
        let _ = self.commands.send(WorkerCommand::Shutdown);
    }

    /// Wait for the worker thread to exit.
    pub(crate) fn join(mut self) {
        self.begin_shutdown();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!(worker = self.id, "Worker thread panicked");
            }
        }
    }
}

fn run(
    id: usize,
    listeners: Vec<(Arc<EndpointRuntime>, std::net::TcpListener)>,
    ctx: Arc<ServeContext>,
    drain_timeout: Duration,
    commands: mpsc::UnboundedReceiver<WorkerCommand>,
    ready: std_mpsc::Sender<Result<(), ServerError>>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(source) => {
            let _ = ready.send(Err(ServerError::Worker { worker: id, source }));
            return;
        }
    };

    ctx.chain.on_server_start(id);
    runtime.block_on(serve(id, listeners, &ctx, drain_timeout, commands, ready));
    ctx.chain.on_server_stop();

    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    tracing::debug!(worker = id, "Worker stopped");
}

async fn serve(
    id: usize,
    listeners: Vec<(Arc<EndpointRuntime>, std::net::TcpListener)>,
    ctx: &Arc<ServeContext>,
    drain_timeout: Duration,
    mut commands: mpsc::UnboundedReceiver<WorkerCommand>,
    ready: std_mpsc::Sender<Result<(), ServerError>>,
) {
    let accepting = Shutdown::new();
    let draining = Shutdown::new();
    let mut accept_tasks = JoinSet::new();

    for (endpoint, listener) in listeners {
        let listener = match Listener::from_std(listener, Arc::clone(&ctx.connection_limit)) {
            Ok(listener) => listener,
            Err(e) => {
                let source = std::io::Error::other(e.to_string());
                let _ = ready.send(Err(ServerError::Worker { worker: id, source }));
                return;
            }
        };
        accept_tasks.spawn(accept_loop(
            listener,
            endpoint,
            Arc::clone(ctx),
            accepting.subscribe(),
            draining.clone(),
        ));
    }

    let _ = ready.send(Ok(()));
    drop(ready);
    tracing::debug!(worker = id, listeners = accept_tasks.len(), "Worker accepting");

    while let Some(command) = commands.recv().await {
        match command {
            WorkerCommand::StopAccepting(ack) => {
                accepting.trigger();
                while accept_tasks.join_next().await.is_some() {}
                let _ = ack.send(());
            }
            WorkerCommand::Shutdown => break,
        }
    }

    accepting.trigger();
    while accept_tasks.join_next().await.is_some() {}

    draining.trigger();
    if !ctx.tracker.wait_for_drain(drain_timeout).await {
        tracing::warn!(
            worker = id,
            open_connections = ctx.tracker.active_count(),
            "Drain timeout reached, closing remaining connections"
        );
    }
}
