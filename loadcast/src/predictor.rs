use std::sync::{Arc, Mutex};

use anyhow::{Context, anyhow};
use async_trait::async_trait;

use crate::protocol::Matrix;

/// The forecasting model as seen by the server.
///
/// One instance is shared by all sessions and called concurrently without any
/// locking on the caller side. Models that are not reentrant must be wrapped
/// in [`Serialized`].
#[async_trait]
pub trait Predictor: Send + Sync + 'static {
    /// Forecast one value per row of `matrix`, in row order.
    async fn predict(&self, matrix: &Matrix) -> anyhow::Result<Vec<f64>>;
}

/// Forecasts the last observation of every row. A row without columns forecasts `0.0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastValue;

#[async_trait]
impl Predictor for LastValue {
    async fn predict(&self, matrix: &Matrix) -> anyhow::Result<Vec<f64>> {
        let cols = matrix.ncols();
        Ok((0..matrix.nrows())
            .map(|row| match cols {
                0 => 0.0,
                _ => f64::from(matrix[(row, cols - 1)]),
            })
            .collect())
    }
}

/// Runs a synchronous, reentrant model on the blocking pool so a slow model
/// only stalls the session that asked.
pub struct Blocking<F> {
    model: Arc<F>,
}

impl<F> Blocking<F>
where
    F: Fn(&Matrix) -> anyhow::Result<Vec<f64>> + Send + Sync + 'static,
{
    pub fn new(model: F) -> Self {
        Self {
            model: Arc::new(model),
        }
    }
}

#[async_trait]
impl<F> Predictor for Blocking<F>
where
    F: Fn(&Matrix) -> anyhow::Result<Vec<f64>> + Send + Sync + 'static,
{
    async fn predict(&self, matrix: &Matrix) -> anyhow::Result<Vec<f64>> {
        let model = Arc::clone(&self.model);
        let matrix = matrix.clone();
        tokio::task::spawn_blocking(move || (*model)(&matrix))
            .await
            .context("model task did not complete")?
    }
}

/// Runs a stateful model that must never see two matrices at once.
pub struct Serialized<M> {
    model: Arc<Mutex<M>>,
}

impl<M> Serialized<M>
where
    M: FnMut(&Matrix) -> anyhow::Result<Vec<f64>> + Send + 'static,
{
    pub fn new(model: M) -> Self {
        Self {
            model: Arc::new(Mutex::new(model)),
        }
    }
}

#[async_trait]
impl<M> Predictor for Serialized<M>
where
    M: FnMut(&Matrix) -> anyhow::Result<Vec<f64>> + Send + 'static,
{
    async fn predict(&self, matrix: &Matrix) -> anyhow::Result<Vec<f64>> {
        let model = Arc::clone(&self.model);
        let matrix = matrix.clone();
        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| anyhow!("model panicked during an earlier prediction"))?;
            (*model)(&matrix)
        })
        .await
        .context("model task did not complete")?
    }
}
