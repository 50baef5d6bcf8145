//! Connection seam between the control client and the network.
//!
//! The [`ControlClient`](crate::client::ControlClient) never touches a
//! socket directly. It asks a [`Connector`] for a fresh [`Transport`] per
//! exchange, which lets tests substitute scripted or recording doubles for
//! the real ZMTP connection.

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::Endpoint;
use crate::error::Result;
use crate::socket::ReqSocket;
use crate::wire::Frame;

/// One open request/reply connection.
#[async_trait]
pub trait Transport: Send {
    /// Send one multi-part request. Frame MORE flags are preserved.
    async fn send(&mut self, frames: Vec<Frame>) -> Result<()>;

    /// Block until a complete multi-part reply has arrived.
    async fn recv(&mut self) -> Result<Vec<Bytes>>;

    /// Release the connection. Dropping the transport must release it too.
    async fn close(&mut self) -> Result<()>;
}

/// Opens transports to an endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Transport>>;
}

/// Production connector: a ZMTP REQ socket over TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Transport>> {
        let socket = ReqSocket::connect(&endpoint.address()).await?;
        Ok(Box::new(socket))
    }
}

#[async_trait]
impl Transport for ReqSocket {
    async fn send(&mut self, frames: Vec<Frame>) -> Result<()> {
        self.send_multipart(&frames).await
    }

    async fn recv(&mut self) -> Result<Vec<Bytes>> {
        self.recv_multipart().await
    }

    async fn close(&mut self) -> Result<()> {
        ReqSocket::close(self).await
    }
}
