//! Bandwidth and latency measurement against speedtest.net style endpoints.
//!
//! A measurement runs configuration fetch, endpoint selection, latency,
//! download and upload strictly in that order, with every request leaving
//! through the connection's egress address.

pub mod client;
pub mod protocol;
pub mod selection;

pub use client::MeasurementClient;
pub use protocol::{Endpoint, ServiceConfiguration};

use crate::models::{Connection, MeasurementResult};
use async_trait::async_trait;
use std::net::IpAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeasurementError {
    #[error("cannot bind to egress address {address}: {source}")]
    BindError {
        address: IpAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("measurement configuration unavailable: {0}")]
    ConfigUnavailable(String),

    #[error("no measurement endpoints available")]
    NoEndpointsAvailable,

    #[error("all {0} latency probes failed")]
    LatencyProbeFailed(u32),

    #[error("{0} transferred no data")]
    TransferFailed(&'static str),

    #[error("http client setup failed: {0}")]
    ClientSetup(String),

    #[error("measurement task aborted: {0}")]
    Aborted(String),
}

/// Anything able to produce a measurement for a connection.
#[async_trait]
pub trait Measurer: Send + Sync {
    async fn measure(&self, connection: &Connection) -> Result<MeasurementResult, MeasurementError>;
}
