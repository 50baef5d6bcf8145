//! # dabmod-control
//!
//! Remote-control client for a DabMod modulation engine.
//!
//! The engine exposes a ZeroMQ request/reply control socket. This crate
//! speaks ZMTP/3 natively over tokio TCP, checks liveness with a
//! `ping`/`ok` probe on every fresh connection, and layers typed gain and
//! predistortion accessors on top of the raw multi-part exchange.
//!
//! ## Crate structure
//!
//! - [`wire`]: ZMTP greeting, frame and READY command codec
//! - [`socket`]: REQ socket over a tokio `TcpStream`
//! - [`transport`]: `Connector`/`Transport` seam used by the client
//! - [`protocol`]: Command tokenisation, reply decoding, gain limits
//! - [`coefs`]: Memoryless-polynomial coefficient file store
//! - [`config`]: Endpoint and client configuration (TOML)
//! - [`client`]: The control client itself
//! - [`error`]: Error taxonomy shared by all of the above

pub mod client;
pub mod coefs;
pub mod config;
pub mod error;
pub mod protocol;
pub mod socket;
pub mod transport;
pub mod wire;

pub use client::ControlClient;
pub use coefs::{read_coef_file, write_coef_file, CoefficientSet};
pub use config::{ControlConfig, Endpoint};
pub use error::{Error, FormatIssue, Result};
pub use protocol::{Command, Reply};
pub use transport::{Connector, TcpConnector, Transport};
