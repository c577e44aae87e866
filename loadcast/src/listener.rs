use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Context;
use log::{debug, error, info};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

use crate::{
    config::ServerConfig,
    logging::Scope,
    predictor::Predictor,
    registry::Registry,
    session::{Session, SessionId},
};

/// Accepts forecast connections and runs one [`Session`] task per client.
pub struct Listener {
    socket: TcpListener,
    predictor: Arc<dyn Predictor>,
    scope: Scope,
    sessions: Registry,
    next_id: SessionId,
}

impl Listener {
    /// Bind and listen. Failing here is fatal for the server and is returned to the caller.
    pub async fn bind(
        config: &ServerConfig,
        predictor: Arc<dyn Predictor>,
        scope: &Scope,
    ) -> anyhow::Result<Self> {
        let scope = scope.child("listener");
        let addr = config.addr();
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .context("could not create tcp socket")?;
        socket
            .set_reuseaddr(true)
            .context("could not set SO_REUSEADDR")?;
        socket
            .bind(addr)
            .with_context(|| format!("could not bind tcp socket at {addr}"))?;
        let socket = socket
            .listen(config.backlog)
            .with_context(|| format!("could not listen on {addr}"))?;

        info!(
            target: scope.target(),
            "Server listening on {}",
            socket.local_addr().context("could not get tcp listener address")?
        );

        Ok(Self {
            socket,
            predictor,
            scope,
            sessions: Registry::default(),
            next_id: 0,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.socket
            .local_addr()
            .context("could not get tcp listener address")
    }

    /// Accept connections until `shutdown` resolves, then wait for all sessions to end.
    ///
    /// Sessions are not interrupted; each one runs until its client goes away.
    pub async fn serve<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(target: self.scope.target(), "Interrupted, no longer accepting connections");
                    break;
                }
                accepted = self.socket.accept() => {
                    match accepted {
                        Err(e) => {
                            error!(target: self.scope.target(), "failed to accept tcp connection: {e}");
                        }
                        Ok((stream, peer)) => self.spawn_session(stream, peer),
                    }
                }
            }
        }

        if !self.sessions.is_empty() {
            debug!(
                target: self.scope.target(),
                "Waiting for {} sessions to finish",
                self.sessions.len()
            );
        }
        self.sessions.drain(&self.scope).await;
    }

    fn spawn_session(&mut self, stream: TcpStream, peer: SocketAddr) {
        let reaped = self.sessions.reap();
        if reaped > 0 {
            debug!(target: self.scope.target(), "Forgot {reaped} finished sessions");
        }

        let id = self.next_id;
        self.next_id += 1;
        debug!(target: self.scope.target(), "[{id}] accepted {peer}");

        let session = Session::new(id, stream, peer, Arc::clone(&self.predictor), &self.scope);
        self.sessions.register(id, tokio::spawn(session.run()));
    }
}
