//! REQ socket over a tokio `TcpStream`.
//!
//! [`ZmtpStream`] owns the handshake and frame I/O and is shared by both
//! ends of the protocol; [`ReqSocket`] adds the request envelope (the empty
//! delimiter frame) that a REP peer expects in front of every request.

use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::wire::{
    error_reason, pong_for, CommandBody, Frame, FrameDecoder, Greeting, ReadyCommand, SocketType,
    WireError, GREETING_LEN, MAX_MESSAGE_PARTS,
};

const READ_CHUNK: usize = 4096;

/// A TCP stream that has completed the ZMTP greeting and `READY` exchange.
pub struct ZmtpStream {
    stream: TcpStream,
    read_buf: BytesMut,
    decoder: FrameDecoder,
    peer_addr: SocketAddr,
    peer_socket_type: String,
}

impl ZmtpStream {
    /// Run the NULL-mechanism handshake on an established TCP stream.
    pub async fn handshake(stream: TcpStream, socket_type: SocketType) -> Result<Self> {
        let peer_addr = stream.peer_addr()?;
        let mut zmtp = ZmtpStream {
            stream,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            decoder: FrameDecoder::default(),
            peer_addr,
            peer_socket_type: String::new(),
        };

        let as_server = socket_type == SocketType::Rep;
        let mut out = BytesMut::with_capacity(GREETING_LEN);
        Greeting::null(as_server).encode(&mut out);
        zmtp.stream.write_all(&out).await?;

        let mut greeting = [0u8; GREETING_LEN];
        zmtp.stream.read_exact(&mut greeting).await?;
        let peer = Greeting::decode(&greeting)?;
        tracing::trace!(peer = %peer_addr, major = peer.major, minor = peer.minor, "greeting");

        zmtp.write_frames(&[ReadyCommand::for_socket(socket_type).to_frame()])
            .await?;

        let frame = zmtp.read_frame().await?;
        if !frame.is_command() {
            return Err(WireError::MalformedCommand("expected READY, got a message".into()).into());
        }
        let cmd = CommandBody::parse(frame.body())?;
        match cmd.name.as_str() {
            ReadyCommand::NAME => {}
            "ERROR" => return Err(WireError::PeerError(error_reason(&cmd.data)).into()),
            other => {
                return Err(
                    WireError::MalformedCommand(format!("expected READY, got {other}")).into(),
                )
            }
        }
        let ready = ReadyCommand::parse(&cmd.data)?;
        let peer_type = ready.socket_type().unwrap_or_default().to_string();
        if !socket_type
            .compatible_peers()
            .iter()
            .any(|t| t.eq_ignore_ascii_case(&peer_type))
        {
            return Err(WireError::IncompatibleSocket(peer_type).into());
        }
        zmtp.peer_socket_type = peer_type;
        Ok(zmtp)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn peer_socket_type(&self) -> &str {
        &self.peer_socket_type
    }

    /// Write frames in one buffered burst.
    pub async fn write_frames(&mut self, frames: &[Frame]) -> Result<()> {
        let len = frames.iter().map(Frame::encoded_len).sum();
        let mut out = BytesMut::with_capacity(len);
        for frame in frames {
            frame.encode(&mut out);
        }
        self.stream.write_all(&out).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read the next frame, message or command.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.decoder.decode(&mut self.read_buf)? {
                return Ok(frame);
            }
            self.read_buf.reserve(READ_CHUNK);
            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "peer closed the connection",
                )
                .into());
            }
        }
    }

    /// Read one complete multi-part message, servicing any command frames
    /// that arrive in between.
    ///
    /// Returns `Ok(None)` if the peer closed cleanly between messages.
    pub async fn read_message(&mut self) -> Result<Option<Vec<Frame>>> {
        let mut parts = Vec::new();
        loop {
            let frame = match self.read_frame().await {
                Ok(frame) => frame,
                Err(Error::Socket(e))
                    if parts.is_empty()
                        && self.read_buf.is_empty()
                        && e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };
            if frame.is_command() {
                self.handle_command(&frame).await?;
                continue;
            }
            if parts.len() == MAX_MESSAGE_PARTS {
                return Err(WireError::TooManyParts(MAX_MESSAGE_PARTS).into());
            }
            let more = frame.is_more();
            parts.push(frame);
            if !more {
                return Ok(Some(parts));
            }
        }
    }

    async fn handle_command(&mut self, frame: &Frame) -> Result<()> {
        let cmd = CommandBody::parse(frame.body())?;
        match cmd.name.as_str() {
            "PING" => self.write_frames(&[pong_for(&cmd.data)]).await,
            "ERROR" => Err(WireError::PeerError(error_reason(&cmd.data)).into()),
            other => {
                tracing::debug!(command = other, "ignoring ZMTP command");
                Ok(())
            }
        }
    }

    /// Shut down the write half; the socket closes when dropped.
    pub async fn close(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Client side of a request/reply pair.
///
/// The TCP stream closes when the socket is dropped, so every exit path of
/// an exchange releases the connection.
pub struct ReqSocket {
    inner: ZmtpStream,
}

impl ReqSocket {
    /// Connect to `addr` (`host:port`) and complete the handshake.
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let inner = ZmtpStream::handshake(stream, SocketType::Req).await?;
        tracing::debug!(peer = %inner.peer_addr(), peer_type = inner.peer_socket_type(), "REQ socket connected");
        Ok(ReqSocket { inner })
    }

    /// Send one request. The MORE flags of `frames` are written as given.
    pub async fn send_multipart(&mut self, frames: &[Frame]) -> Result<()> {
        let mut wire = Vec::with_capacity(frames.len() + 1);
        wire.push(Frame::delimiter());
        wire.extend_from_slice(frames);
        self.inner.write_frames(&wire).await
    }

    /// Receive one reply, with the envelope delimiter stripped.
    pub async fn recv_multipart(&mut self) -> Result<Vec<Bytes>> {
        let Some(frames) = self.inner.read_message().await? else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "peer closed the connection before replying",
            )
            .into());
        };
        let mut bodies = frames.into_iter().map(Frame::into_body);
        match bodies.next() {
            Some(delimiter) if delimiter.is_empty() => Ok(bodies.collect()),
            _ => Err(WireError::MissingDelimiter.into()),
        }
    }

    pub async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn pair() -> (ReqSocket, ZmtpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = async {
            let (stream, _) = listener.accept().await.unwrap();
            ZmtpStream::handshake(stream, SocketType::Rep).await.unwrap()
        };
        let (client, server) = tokio::join!(ReqSocket::connect(&addr), server);
        (client.unwrap(), server)
    }

    #[tokio::test]
    async fn request_reply_roundtrip() {
        let (mut req, mut rep) = pair().await;
        assert_eq!(rep.peer_socket_type(), "REQ");

        req.send_multipart(&[Frame::message("get", true), Frame::message("x", false)])
            .await
            .unwrap();
        let request = rep.read_message().await.unwrap().unwrap();
        assert_eq!(request.len(), 3);
        assert!(request[0].body().is_empty());

        rep.write_frames(&[Frame::delimiter(), Frame::message("42", false)])
            .await
            .unwrap();
        assert_eq!(req.recv_multipart().await.unwrap(), [Bytes::from_static(b"42")]);
    }

    #[tokio::test]
    async fn endless_multipart_message_is_refused() {
        let (mut req, mut rep) = pair().await;
        let flood: Vec<Frame> = (0..MAX_MESSAGE_PARTS)
            .map(|_| Frame::message("x", true))
            .collect();
        req.send_multipart(&flood).await.unwrap();

        match rep.read_message().await {
            Err(Error::Wire(WireError::TooManyParts(limit))) => {
                assert_eq!(limit, MAX_MESSAGE_PARTS)
            }
            other => panic!("expected TooManyParts, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn clean_close_between_messages_is_none() {
        let (mut req, mut rep) = pair().await;
        req.close().await.unwrap();
        assert!(rep.read_message().await.unwrap().is_none());
    }
}
