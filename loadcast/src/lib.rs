//! Forecast server for load matrices.
//!
//! A [`Listener`] accepts TCP connections and hands each one to its own
//! [`Session`], which reads matrices framed as described in [`protocol`],
//! asks the shared [`Predictor`] for one value per row and writes the values
//! back on the same connection. [`ForecastClient`] is the calling side.

pub mod client;
pub mod config;
pub mod constants;
pub mod listener;
pub mod logging;
pub mod predictor;
pub mod protocol;
pub mod registry;
pub mod session;

pub use client::ForecastClient;
pub use config::{ClientConfig, ServerConfig};
pub use listener::Listener;
pub use logging::Scope;
pub use predictor::{Blocking, LastValue, Predictor, Serialized};
pub use protocol::{Matrix, matrix_from_rows};
pub use session::{Session, SessionEnd};
