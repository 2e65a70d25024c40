//! Owner-side listener
//!
//! The accept loop owns the listener and the ownership token. Each accepted
//! connection runs in its own task and reads commands line by line. A `quit`
//! asks the accept loop to release through a channel and waits for the
//! acknowledgement, so the endpoint and segment are gone before `ok` is sent
//! and only the first `quit` ever wins. Once released, every other open
//! connection is closed without a reply, so nobody concedes to an owner that
//! is already on its way out.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use eyre::{Context, Result};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::protocol::{Command, OK_REPLY, read_line, write_line};
use crate::error::CoordinationError;
use crate::segment::OwnershipToken;
use crate::state::{CoordinatorState, ExitReason, ExitSignal, StateCell};

/// Create and bind the owner's listening socket
///
/// Only the ownership token holder calls this, so a socket file already at
/// `socket_path` is stale and gets removed.
pub fn create_listener_at(socket_path: &Path) -> io::Result<UnixListener> {
    debug!(?socket_path, "create_listener_at: creating socket");

    if let Some(parent) = socket_path.parent() {
        fs::create_dir_all(parent)?;
        if let Err(e) = fs::set_permissions(parent, fs::Permissions::from_mode(0o700)) {
            debug!(?parent, error = %e, "create_listener_at: could not restrict directory");
        }
    }

    if socket_path.exists() {
        debug!(?socket_path, "create_listener_at: removing stale socket");
        fs::remove_file(socket_path)?;
    }

    let listener = UnixListener::bind(socket_path)?;
    fs::set_permissions(socket_path, fs::Permissions::from_mode(0o600))?;
    debug!(?socket_path, "create_listener_at: socket bound");
    Ok(listener)
}

/// Pause after a failed accept so descriptor exhaustion doesn't spin the loop
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Remove the socket file on release
pub fn cleanup_socket(socket_path: &Path) {
    if socket_path.exists() {
        debug!(?socket_path, "cleanup_socket: removing socket file");
        if let Err(e) = fs::remove_file(socket_path) {
            warn!(?socket_path, error = %e, "Failed to remove socket file");
        }
    }
}

/// Bound endpoint plus the token it serves under
#[derive(Debug)]
pub struct OwnerServer {
    listener: UnixListener,
    socket_path: PathBuf,
    token: OwnershipToken,
    version: String,
}

impl OwnerServer {
    /// Bind the endpoint for a freshly claimed token
    ///
    /// On failure the token is released before returning so this process
    /// doesn't pose as an owner nobody can reach.
    pub fn bind(socket_path: PathBuf, token: OwnershipToken, version: impl Into<String>) -> Result<Self, CoordinationError> {
        match create_listener_at(&socket_path) {
            Ok(listener) => {
                info!(?socket_path, segment = %token.name(), "Serving coordination endpoint");
                Ok(Self {
                    listener,
                    socket_path,
                    token,
                    version: version.into(),
                })
            }
            Err(source) => {
                token.release();
                Err(CoordinationError::EndpointListenFailed {
                    path: socket_path.display().to_string(),
                    source,
                })
            }
        }
    }

    /// Run the accept loop on its own task
    pub fn spawn(self, state: StateCell, exit: ExitSignal) -> ServerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(state, exit, shutdown_rx));
        ServerHandle { shutdown_tx, task }
    }

    async fn run(self, state: StateCell, exit: ExitSignal, mut shutdown_rx: watch::Receiver<bool>) {
        let OwnerServer {
            listener,
            socket_path,
            token,
            version,
        } = self;

        let (release_tx, mut release_rx) = mpsc::channel::<oneshot::Sender<()>>(1);
        let (released_tx, released_rx) = watch::channel(false);
        let ctx = Arc::new(ConnectionContext {
            version,
            release_tx,
            released: released_rx,
            state: state.clone(),
            exit,
        });

        let ack = loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let conn_id = Uuid::now_v7();
                        debug!(%conn_id, "run: connection accepted");
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, ctx).await {
                                debug!(%conn_id, error = %e, "Connection ended with error");
                            }
                        });
                    }
                    Err(e) => accept_failed(&e).await,
                },
                Some(ack) = release_rx.recv() => {
                    debug!("run: release requested by challenger");
                    break Some(ack);
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!("run: shutdown requested");
                        break None;
                    }
                }
            }
        };

        state.transition(CoordinatorState::Releasing);
        drop(listener);
        cleanup_socket(&socket_path);
        token.release();
        released_tx.send_replace(true);
        info!(?socket_path, "Coordination endpoint closed");

        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }
}

/// Control handle for a running accept loop
#[derive(Debug)]
pub struct ServerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Close the endpoint and release ownership, waiting for the loop to exit
    pub async fn stop(self) {
        debug!("ServerHandle::stop: called");
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Coordination server task failed");
        }
    }
}

struct ConnectionContext {
    version: String,
    release_tx: mpsc::Sender<oneshot::Sender<()>>,
    released: watch::Receiver<bool>,
    state: StateCell,
    exit: ExitSignal,
}

async fn handle_connection(stream: UnixStream, ctx: Arc<ConnectionContext>) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut released = ctx.released.clone();

    loop {
        let line = tokio::select! {
            line = read_line(&mut reader) => line.context("Failed to read command")?,
            _ = wait_released(&mut released) => None,
        };
        let Some(line) = line else {
            break;
        };
        if *released.borrow() {
            break;
        }

        match Command::parse(&line) {
            Command::Version => {
                debug!(version = %ctx.version, "handle_connection: version");
                write_line(&mut write_half, &ctx.version)
                    .await
                    .context("Failed to send version")?;
            }
            Command::Quit => {
                debug!("handle_connection: quit");
                return handle_quit(write_half, &ctx).await;
            }
            Command::Unknown(other) => {
                debug!(command = %other, "handle_connection: ignoring unknown command");
            }
        }
    }

    debug!(released = *released.borrow(), "handle_connection: closing");
    Ok(())
}

async fn accept_failed(e: &io::Error) {
    warn!(error = %e, "Failed to accept connection");
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}

async fn wait_released(released: &mut watch::Receiver<bool>) {
    // An error means the accept loop is gone, which is a release too
    let _ = released.wait_for(|r| *r).await;
}

async fn handle_quit(mut writer: OwnedWriteHalf, ctx: &ConnectionContext) -> Result<()> {
    let (ack_tx, ack_rx) = oneshot::channel();
    if ctx.release_tx.send(ack_tx).await.is_err() || ack_rx.await.is_err() {
        debug!("handle_quit: endpoint already released, closing without reply");
        return Ok(());
    }

    // Ownership is gone from here on, so the exit request goes out even if
    // the reply can't be delivered.
    let reply = write_line(&mut writer, OK_REPLY).await;
    let _ = writer.shutdown().await;

    info!("Told to quit by a challenger");
    ctx.state.transition(CoordinatorState::Terminating);
    ctx.exit.request(ExitReason::Displaced);

    reply.context("Failed to acknowledge quit")
}
