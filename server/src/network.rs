//! Server network layer: listener, session table and background tasks

use crate::config::ServerConfig;
use crate::context::ServerContext;
use crate::error::{Result, ServerError};
use crate::session::ClientSession;
use crate::tag;
use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

/// A bound relay server, ready to run
pub struct Server {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Server {
    /// Binds the listening socket. Failing here is fatal for the process.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        info!("Server listening on {}", listener.local_addr()?);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Server {
            listener,
            ctx: Arc::new(ServerContext::new(config)),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Address the listener is bound to. With port 0 in the config this is
    /// where the OS-assigned port can be read back.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared state the server will hand to every session
    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.ctx)
    }

    /// Runs the server on a background task and returns a handle to it.
    pub fn spawn(self) -> Result<ServerHandle> {
        let addr = self.local_addr()?;
        let ctx = self.context();
        let shutdown_tx = self.shutdown_tx.clone();
        let task = tokio::spawn(self.run());

        Ok(ServerHandle {
            addr,
            ctx,
            shutdown_tx,
            task,
        })
    }

    /// Accepts connections until shutdown is signalled, then waits for every
    /// session and background task to finish.
    pub async fn run(self) {
        let Server {
            listener,
            ctx,
            shutdown_tx,
            mut shutdown_rx,
        } = self;

        let mut background = JoinSet::new();
        background.spawn(tag::run_proximity_scanner(
            Arc::clone(&ctx),
            shutdown_rx.clone(),
        ));
        background.spawn(tag::run_failsafe(Arc::clone(&ctx), shutdown_rx.clone()));

        let mut sessions = JoinSet::new();

        info!("Server started successfully");

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        info!("Client joined: {}", addr);
                        let session = ClientSession::new(Arc::clone(&ctx), addr);
                        sessions.spawn(session.run(stream, shutdown_rx.clone()));
                    }
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                    }
                },

                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = finished {
                        error!("Session task failed: {}", e);
                    }
                },

                _ = shutdown_rx.changed() => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        drop(listener);
        while let Some(finished) = sessions.join_next().await {
            if let Err(e) = finished {
                error!("Session task failed: {}", e);
            }
        }
        while let Some(finished) = background.join_next().await {
            if let Err(e) = finished {
                error!("Background task failed: {}", e);
            }
        }

        // Keeps the channel open until every task has seen the signal
        drop(shutdown_tx);
    }
}

/// Handle to a server running on a background task
pub struct ServerHandle {
    addr: SocketAddr,
    ctx: Arc<ServerContext>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the running server accepts connections on
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shared state of the running server, for inspecting players and It
    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Stops accepting, closes every session and waits for the server task.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!("Server task failed: {}", e);
        }
    }
}
