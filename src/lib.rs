//! Client SDK for the remote forecasting service: payload building,
//! authenticated job submission and polling, response reshaping, and chart
//! rendering.

pub mod client;
pub mod config;
pub mod error;
pub mod evaluate;
pub mod explain;
pub mod payload;
pub mod poller;
pub mod render;
pub mod reshape;
pub mod table;
pub mod transport;

#[cfg(test)]
pub mod test_support;

pub use client::ForecastClient;
pub use error::{ClientError, ClientResult};
pub use table::Frame;
