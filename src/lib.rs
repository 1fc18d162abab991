//! # HitBTC WebSocket client
//!
//! A persistent client for HitBTC's JSON-RPC-over-WebSocket API. It keeps one
//! socket open, re-opens it after failures, correlates responses with the
//! requests that caused them and delivers responses and stream notifications
//! through a bounded queue.
//!
//! ## Quick Start
//! ```rust,ignore
//! use hitbtc_ws::prelude::*;
//!
//! let client = HitBtcClient::new(ClientConfig::default())?;
//! client.start()?;
//! client.wait_connected(Duration::from_secs(10)).await;
//! client.subscribe_ticker("ETHBTC", false, None).await?;
//!
//! while let Ok(outcome) = client.recv(true, None).await {
//!     println!("{:?}", outcome);
//! }
//! ```

pub mod auth;
pub mod client;
pub mod connection;
pub mod data;
pub mod error;
pub mod registry;
pub mod report;
pub mod router;
pub mod sink;
pub mod subscription;
pub mod timers;
pub mod worker;

pub use auth::{AuthMode, Credentials, LoginParams};
pub use client::{params, ClientConfigBuilder, HitBtcClient};
pub use connection::{Connector, ConnectionManager, FrameReader, FrameWriter, TungsteniteConnector};
pub use data::*;
pub use error::*;
pub use registry::{IdGenerator, RequestRegistry};
pub use router::{classify, Classified, MessageRouter, Route, RouterCounts};
pub use sink::{OutputReceiver, OutputSink};
pub use subscription::Channel;
pub use worker::{TaskWorker, ThreadWorker, Worker, WorkerHandle};

/// Prelude - minimal public API surface
///
/// Import with: `use hitbtc_ws::prelude::*;`
pub mod prelude {
    pub use crate::auth::{AuthMode, Credentials};
    pub use crate::client::{params, ClientConfigBuilder, HitBtcClient};
    pub use crate::data::{ClientConfig, ConnectionState, Outcome, Params, RequestId};
    pub use crate::error::{ClientError, SinkError};
    pub use crate::subscription::Channel;
    pub use std::time::Duration;
}

/// Install a `tracing` fmt subscriber at `level`
///
/// Does nothing if a global subscriber is already set.
pub fn init_logging(level: tracing::Level) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
}
