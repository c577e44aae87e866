use std::net::SocketAddr;

use anyhow::{Context, anyhow, bail};
use log::{debug, error};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, ToSocketAddrs},
};

use crate::{
    config::ClientConfig,
    constants::PREDICTION_SIZE,
    logging::Scope,
    protocol::{Matrix, decode_predictions, encode_request},
};

/// Caller side of the protocol: ships load matrices to a forecast server and
/// waits for the answer.
///
/// A failed or timed out exchange leaves the stream in an unknown position, so
/// the client refuses any further request after one. Connect again instead.
#[derive(Debug)]
pub struct ForecastClient {
    stream: TcpStream,
    peer: SocketAddr,
    config: ClientConfig,
    available: bool,
    scope: Scope,
}

impl ForecastClient {
    pub async fn connect(
        addr: impl ToSocketAddrs,
        config: ClientConfig,
        scope: &Scope,
    ) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .context("could not connect to forecast server")?;
        let peer = stream
            .peer_addr()
            .context("could not get forecast server address")?;
        stream
            .set_nodelay(true)
            .context("could not set TCP_NODELAY")?;

        let scope = scope.child("client");
        debug!(target: scope.target(), "connected to {peer}");
        Ok(Self {
            stream,
            peer,
            config,
            available: true,
            scope,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub async fn predict(&mut self, matrix: &Matrix) -> anyhow::Result<Vec<f64>> {
        if matrix.nrows() == 0 || matrix.ncols() == 0 {
            bail!(
                "Load matrix with {} rows and {} columns, nothing to predict",
                matrix.nrows(),
                matrix.ncols()
            );
        }
        if !self.available {
            bail!("Connection to {} is not usable anymore", self.peer);
        }

        let exchanged = self.exchange(matrix).await;
        if let Err(e) = &exchanged {
            error!(target: self.scope.target(), "{}: {e:#}", self.peer);
            self.available = false;
        }
        exchanged
    }

    async fn exchange(&mut self, matrix: &Matrix) -> anyhow::Result<Vec<f64>> {
        let request = encode_request(matrix)?;
        self.stream
            .write_all(&request)
            .await
            .context("Send data failed")?;

        let mut response = vec![0; matrix.nrows() * PREDICTION_SIZE];
        tokio::time::timeout(
            self.config.recv_timeout,
            self.stream.read_exact(&mut response),
        )
        .await
        .map_err(|_| anyhow!("no response within {:?}", self.config.recv_timeout))?
        .context("Recv data failed")?;

        decode_predictions(&response)
    }
}
