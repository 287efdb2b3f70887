use std::future::Future;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::sync::broadcast::Receiver;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{error, info};

use crate::config::Config;
use crate::connection::{Connection, Outcome};
use crate::shard::Hub;

/// Server listener state. Created in the `run` call. It includes a `run` method
/// which performs the TCP listening and initialization of per-connection state.
struct Listener {
    listener: TcpListener,

    hub: Hub,
    config: Config,

    /// Broadcasts a shutdown signal to all active connections.
    ///
    /// The initial `shutdown` trigger is provided by the `run` caller, but the
    /// in-protocol `shutdown` command fires the same sender from inside a
    /// connection task, so both paths converge here.
    notify_shutdown: broadcast::Sender<()>,

    /// Used as part of the graceful shutdown process to wait for client
    /// connections to complete processing.
    ///
    /// Tokio channels are closed once all `Sender` handles go out of scope.
    /// When a channel is closed, the receiver receives `None`. This is
    /// leveraged to detect all connection handlers completing. When a
    /// connection handler is initialized, it is assigned a clone of
    /// `shutdown_complete_tx`. When the listener shuts down, it drops the
    /// sender held by this `shutdown_complete_tx` field. Once all handler tasks
    /// complete, all clones of the `Sender` are also dropped. This results in
    /// `shutdown_complete_rx.recv()` completing with `None`. At this point, it
    /// is safe to exit the server process.
    shutdown_complete_tx: mpsc::Sender<()>,
}

impl Listener {
    pub async fn run(&mut self) -> std::io::Result<()> {
        info!(port = self.config.port, "accepting inbound connections");
        loop {
            let socket = self.accept().await?;
            let mut handler = Handler {
                con: Connection::new(socket),
                hub: self.hub.clone(),
                config: self.config.clone(),
                notify_shutdown: self.notify_shutdown.clone(),
                shutdown: self.notify_shutdown.subscribe(),
                _shutdown_complete: self.shutdown_complete_tx.clone(),
            };
            tokio::spawn(async move {
                if let Err(err) = handler.run().await {
                    error!(cause = %err, "connection error");
                }
            });
        }
    }

    /// Accept an inbound connection.
    ///
    /// Errors are handled by backing off and retrying. An exponential backoff
    /// strategy is used. After the first failure, the task waits for 1 second.
    /// After the second failure, the task waits for 2 seconds. Each subsequent
    /// failure doubles the wait time. If accepting fails on the 6th try after
    /// waiting for 64 seconds, then this function returns with an error.
    async fn accept(&mut self) -> std::io::Result<TcpStream> {
        let mut backoff = 1;

        loop {
            match self.listener.accept().await {
                Ok((socket, _)) => return Ok(socket),
                Err(err) => {
                    if backoff > 64 {
                        return Err(err);
                    }
                }
            }

            time::sleep(Duration::from_secs(backoff)).await;
            backoff *= 2;
        }
    }
}

struct Handler {
    con: Connection,
    hub: Hub,
    config: Config,
    notify_shutdown: broadcast::Sender<()>,
    shutdown: Receiver<()>,
    /// Not used directly. Instead, when `Handler` is dropped, this sender drops
    /// with it, letting the listener's `shutdown_complete_rx.recv()` observe that
    /// every connection has finished.
    _shutdown_complete: mpsc::Sender<()>,
}

impl Handler {
    async fn run(&mut self) -> std::io::Result<()> {
        tokio::select! {
            outcome = self.con.run(&self.hub, &self.config.limits) => {
                if let Outcome::Shutdown = outcome? {
                    // The in-protocol `shutdown` command fires the same broadcast the
                    // Ctrl-C path uses, so every other connection drains the same way.
                    let _ = self.notify_shutdown.send(());
                }
                Ok(())
            }
            _ = self.shutdown.recv() => Ok(()),
        }
    }
}

pub async fn run(listener: TcpListener, config: Config, shutdown: impl Future) {
    let hub = Hub::spawn(config.shards, config.shard_capacity_bytes);

    // When the provided `shutdown` future completes, we must send a shutdown
    // message to all active connections. We use a broadcast channel for this
    // purpose. The call below ignores the receiver of the broadcast pair, and when
    // a receiver is needed, the subscribe() method on the sender is used to create
    // one.
    let (notify_shutdown, _) = broadcast::channel(1);
    let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel(1);

    let mut server = Listener {
        hub,
        config,
        listener,
        notify_shutdown,
        shutdown_complete_tx,
    };

    // Concurrently run the server and listen for the `shutdown` signal. The
    // server task runs until an error is encountered, so under normal
    // circumstances, this `select!` statement runs until the `shutdown` signal
    // is received.
    tokio::select! {
        res = server.run() => {
            if let Err(err) = res {
                error!(cause = %err, "failed to accept");
            }
        }
        _ = shutdown => {
            info!("shutting down");
        }
    }

    // Extract the `shutdown_complete` receiver and transmitter, explicitly drop
    // `shutdown_transmitter`. This is important, as the `.await` below would
    // otherwise never complete.
    let Listener {
        notify_shutdown,
        shutdown_complete_tx,
        ..
    } = server;

    // When `notify_shutdown` is dropped, all tasks which have `subscribe`d will
    // receive the shutdown signal and can exit.
    drop(notify_shutdown);
    // Drop final `Sender` so the `Receiver` below can complete.
    drop(shutdown_complete_tx);

    // Wait for all active connections to finish processing. As the `Sender`
    // handle held by the listener has been dropped above, the only remaining
    // `Sender` instances are held by connection handler tasks. When those drop,
    // the `mpsc` channel will close and `recv()` will return `None`.
    shutdown_complete_rx.recv().await;
}
