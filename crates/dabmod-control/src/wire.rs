//! # ZMTP/3 Wire Format
//!
//! Native codec for the subset of ZeroMQ's message transport protocol that a
//! REQ/REP control socket needs: the fixed greeting, message and command
//! frames, and the NULL-mechanism `READY` handshake.
//!
//! ## Greeting (64 bytes)
//!
//! ```text
//! +------+-----------+------+-------+-------+----------------+--------+---------+
//! | 0xFF | padding×8 | 0x7F | major | minor | mechanism (20) | server | filler  |
//! +------+-----------+------+-------+-------+----------------+--------+---------+
//!    0       1..9       9     10      11        12..32          32      33..64
//! ```
//!
//! ## Frame
//!
//! ```text
//! +-------+----------------------------+-----------+
//! | flags | size (1 byte, or 8 if LONG) |   body    |
//! +-------+----------------------------+-----------+
//!  flags: bit0 MORE, bit1 LONG, bit2 COMMAND, bits 3-7 reserved (zero)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Total greeting length.
pub const GREETING_LEN: usize = 64;

/// Protocol version we announce.
pub const VERSION_MAJOR: u8 = 3;
pub const VERSION_MINOR: u8 = 0;

/// The only security mechanism this codec speaks.
pub const MECHANISM_NULL: &str = "NULL";

const SIGNATURE_HEAD: u8 = 0xFF;
const SIGNATURE_TAIL: u8 = 0x7F;
const MECHANISM_LEN: usize = 20;

/// Default upper bound for a single frame body (16 MiB).
pub const MAX_FRAME_SIZE: u64 = 16 * 1024 * 1024;

/// Upper bound for the frames of one multi-part message, envelope included.
pub const MAX_MESSAGE_PARTS: usize = 1024;

/// Frame flag bits.
pub mod flags {
    pub const MORE: u8 = 0x01;
    pub const LONG: u8 = 0x02;
    pub const COMMAND: u8 = 0x04;
    pub const RESERVED: u8 = 0xF8;
}

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("greeting truncated at {0} bytes")]
    TruncatedGreeting(usize),
    #[error("bad greeting signature")]
    BadSignature,
    #[error("unsupported ZMTP version {0}.{1}")]
    UnsupportedVersion(u8, u8),
    #[error("unsupported security mechanism {0:?}")]
    UnsupportedMechanism(String),
    #[error("reserved frame flag bits set: {0:#04x}")]
    ReservedFlags(u8),
    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(u64),
    #[error("message exceeds {0} frames")]
    TooManyParts(usize),
    #[error("malformed command: {0}")]
    MalformedCommand(String),
    #[error("peer socket type {0:?} is not compatible")]
    IncompatibleSocket(String),
    #[error("peer reported error: {0}")]
    PeerError(String),
    #[error("message lacks the empty envelope delimiter")]
    MissingDelimiter,
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
}

// ─── Socket Type ─────────────────────────────────────────────────────────────

/// Socket types announced in the `READY` handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    Req,
    Rep,
}

impl SocketType {
    pub fn as_str(self) -> &'static str {
        match self {
            SocketType::Req => "REQ",
            SocketType::Rep => "REP",
        }
    }

    /// Peer socket types this socket may be paired with.
    pub fn compatible_peers(self) -> &'static [&'static str] {
        match self {
            SocketType::Req => &["REP", "ROUTER"],
            SocketType::Rep => &["REQ", "DEALER"],
        }
    }
}

// ─── Greeting ────────────────────────────────────────────────────────────────

/// Decoded greeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub major: u8,
    pub minor: u8,
    pub mechanism: String,
    pub as_server: bool,
}

impl Greeting {
    /// NULL-mechanism greeting for our own side of the handshake.
    pub fn null(as_server: bool) -> Self {
        Greeting {
            major: VERSION_MAJOR,
            minor: VERSION_MINOR,
            mechanism: MECHANISM_NULL.to_string(),
            as_server,
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(SIGNATURE_HEAD);
        buf.put_bytes(0, 8);
        buf.put_u8(SIGNATURE_TAIL);
        buf.put_u8(self.major);
        buf.put_u8(self.minor);
        let mech = self.mechanism.as_bytes();
        let n = mech.len().min(MECHANISM_LEN);
        buf.put_slice(&mech[..n]);
        buf.put_bytes(0, MECHANISM_LEN - n);
        buf.put_u8(self.as_server as u8);
        buf.put_bytes(0, 31);
    }

    /// Decode and validate a peer greeting.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < GREETING_LEN {
            return Err(WireError::TruncatedGreeting(buf.len()));
        }
        if buf[0] != SIGNATURE_HEAD || buf[9] != SIGNATURE_TAIL {
            return Err(WireError::BadSignature);
        }
        let (major, minor) = (buf[10], buf[11]);
        if major < VERSION_MAJOR {
            return Err(WireError::UnsupportedVersion(major, minor));
        }
        let raw = &buf[12..12 + MECHANISM_LEN];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(MECHANISM_LEN);
        let mechanism = String::from_utf8_lossy(&raw[..end]).into_owned();
        if mechanism != MECHANISM_NULL {
            return Err(WireError::UnsupportedMechanism(mechanism));
        }
        Ok(Greeting {
            major,
            minor,
            mechanism,
            as_server: buf[32] != 0,
        })
    }
}

// ─── Frame ───────────────────────────────────────────────────────────────────

/// One message or command frame. The LONG bit is a pure encoding detail
/// and never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    flags: u8,
    body: Bytes,
}

impl Frame {
    /// A message frame; `more` marks that further frames of the same
    /// message follow.
    pub fn message(body: impl Into<Bytes>, more: bool) -> Self {
        Frame {
            flags: if more { flags::MORE } else { 0 },
            body: body.into(),
        }
    }

    /// A command frame (handshake and heartbeat traffic).
    pub fn command(body: impl Into<Bytes>) -> Self {
        Frame {
            flags: flags::COMMAND,
            body: body.into(),
        }
    }

    /// The empty frame that separates the REQ envelope from the payload.
    pub fn delimiter() -> Self {
        Frame::message(Bytes::new(), true)
    }

    #[inline]
    pub fn is_more(&self) -> bool {
        self.flags & flags::MORE != 0
    }

    #[inline]
    pub fn is_command(&self) -> bool {
        self.flags & flags::COMMAND != 0
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Encoded size on the wire.
    pub fn encoded_len(&self) -> usize {
        let header = if self.body.len() > u8::MAX as usize { 9 } else { 2 };
        header + self.body.len()
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        let len = self.body.len();
        if len > u8::MAX as usize {
            buf.put_u8(self.flags | flags::LONG);
            buf.put_u64(len as u64);
        } else {
            buf.put_u8(self.flags);
            buf.put_u8(len as u8);
        }
        buf.put_slice(&self.body);
    }
}

/// Incremental frame decoder over a read buffer.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    max_frame_size: u64,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        FrameDecoder {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl FrameDecoder {
    pub fn with_max_frame_size(max_frame_size: u64) -> Self {
        FrameDecoder { max_frame_size }
    }

    /// Take one complete frame off the front of `buf`.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched until the whole frame
    /// has been buffered.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Frame>, WireError> {
        let Some(&raw_flags) = buf.first() else {
            return Ok(None);
        };
        if raw_flags & flags::RESERVED != 0 {
            return Err(WireError::ReservedFlags(raw_flags));
        }

        let long = raw_flags & flags::LONG != 0;
        let header = if long { 9 } else { 2 };
        if buf.len() < header {
            return Ok(None);
        }

        let size = if long {
            let mut peek = &buf[1..9];
            peek.get_u64()
        } else {
            buf[1] as u64
        };
        if size > self.max_frame_size {
            return Err(WireError::FrameTooLarge(size));
        }

        let total = header + size as usize;
        if buf.len() < total {
            buf.reserve(total - buf.len());
            return Ok(None);
        }

        buf.advance(header);
        let body = buf.split_to(size as usize).freeze();
        Ok(Some(Frame {
            flags: raw_flags & !flags::LONG,
            body,
        }))
    }
}

// ─── Commands ────────────────────────────────────────────────────────────────

/// A command frame body: `name-len:u8 name data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBody {
    pub name: String,
    pub data: Bytes,
}

impl CommandBody {
    pub fn new(name: &str, data: impl Into<Bytes>) -> Self {
        CommandBody {
            name: name.to_string(),
            data: data.into(),
        }
    }

    pub fn parse(body: &Bytes) -> Result<Self, WireError> {
        let mut buf = body.clone();
        if !buf.has_remaining() {
            return Err(WireError::MalformedCommand("empty command".into()));
        }
        let name_len = buf.get_u8() as usize;
        if buf.remaining() < name_len {
            return Err(WireError::MalformedCommand("truncated command name".into()));
        }
        let name = std::str::from_utf8(&buf[..name_len])
            .map_err(|_| WireError::MalformedCommand("command name is not ASCII".into()))?
            .to_string();
        buf.advance(name_len);
        Ok(CommandBody { name, data: buf })
    }

    pub fn to_frame(&self) -> Frame {
        let mut out = BytesMut::with_capacity(1 + self.name.len() + self.data.len());
        out.put_u8(self.name.len() as u8);
        out.put_slice(self.name.as_bytes());
        out.put_slice(&self.data);
        Frame::command(out.freeze())
    }
}

/// The `READY` command with its metadata properties.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReadyCommand {
    pub properties: Vec<(String, Bytes)>,
}

impl ReadyCommand {
    pub const NAME: &'static str = "READY";

    pub fn for_socket(socket_type: SocketType) -> Self {
        ReadyCommand {
            properties: vec![(
                "Socket-Type".to_string(),
                Bytes::from_static(socket_type.as_str().as_bytes()),
            )],
        }
    }

    /// Property lookup; names are case-insensitive.
    pub fn property(&self, name: &str) -> Option<&Bytes> {
        self.properties
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn socket_type(&self) -> Option<&str> {
        self.property("Socket-Type")
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    pub fn to_frame(&self) -> Frame {
        let mut data = BytesMut::new();
        for (name, value) in &self.properties {
            data.put_u8(name.len() as u8);
            data.put_slice(name.as_bytes());
            data.put_u32(value.len() as u32);
            data.put_slice(value);
        }
        CommandBody::new(Self::NAME, data.freeze()).to_frame()
    }

    /// Parse the data part of a `READY` command.
    pub fn parse(data: &Bytes) -> Result<Self, WireError> {
        let mut buf = data.clone();
        let mut properties = Vec::new();
        while buf.has_remaining() {
            let name_len = buf.get_u8() as usize;
            if buf.remaining() < name_len + 4 {
                return Err(WireError::MalformedCommand("truncated READY property".into()));
            }
            let name = String::from_utf8_lossy(&buf[..name_len]).into_owned();
            buf.advance(name_len);
            let value_len = buf.get_u32() as usize;
            if buf.remaining() < value_len {
                return Err(WireError::MalformedCommand(format!(
                    "truncated value for READY property {name}"
                )));
            }
            let value = buf.split_to(value_len);
            properties.push((name, value));
        }
        let ready = ReadyCommand { properties };
        if ready.socket_type().is_none() {
            return Err(WireError::MalformedCommand(
                "READY without Socket-Type".into(),
            ));
        }
        Ok(ready)
    }
}

/// Build the `PONG` answering a ZMTP 3.1 `PING` (`ttl:u16 context`).
pub fn pong_for(ping_data: &Bytes) -> Frame {
    let context = if ping_data.len() > 2 {
        ping_data.slice(2..)
    } else {
        Bytes::new()
    };
    CommandBody::new("PONG", context).to_frame()
}

/// Reason carried by an `ERROR` command.
pub fn error_reason(data: &Bytes) -> String {
    let Some((&len, rest)) = data.split_first() else {
        return String::new();
    };
    let len = (len as usize).min(rest.len());
    String::from_utf8_lossy(&rest[..len]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(frame: &Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        buf
    }

    #[test]
    fn greeting_layout() {
        let mut buf = BytesMut::new();
        Greeting::null(false).encode(&mut buf);
        assert_eq!(buf.len(), GREETING_LEN);
        assert_eq!(buf[0], 0xFF);
        assert_eq!(buf[9], 0x7F);
        assert_eq!(buf[10], 3);
        assert_eq!(&buf[12..16], b"NULL");
        assert_eq!(buf[16], 0);
        assert_eq!(buf[32], 0);

        let decoded = Greeting::decode(&buf).unwrap();
        assert_eq!(decoded, Greeting::null(false));
    }

    #[test]
    fn greeting_rejects_old_version_and_other_mechanisms() {
        let mut buf = BytesMut::new();
        Greeting::null(true).encode(&mut buf);
        let mut old = buf.clone();
        old[10] = 2;
        assert_eq!(
            Greeting::decode(&old),
            Err(WireError::UnsupportedVersion(2, 0))
        );

        let mut plain = buf.clone();
        plain[12..17].copy_from_slice(b"PLAIN");
        assert_eq!(
            Greeting::decode(&plain),
            Err(WireError::UnsupportedMechanism("PLAIN".into()))
        );

        assert_eq!(
            Greeting::decode(&buf[..10]),
            Err(WireError::TruncatedGreeting(10))
        );
        let mut bad = buf.clone();
        bad[0] = 0x00;
        assert_eq!(Greeting::decode(&bad), Err(WireError::BadSignature));
    }

    #[test]
    fn short_frame_encoding() {
        let buf = encode(&Frame::message("set", true));
        assert_eq!(&buf[..], &[0x01, 3, b's', b'e', b't']);

        let buf = encode(&Frame::message("50", false));
        assert_eq!(&buf[..], &[0x00, 2, b'5', b'0']);
    }

    #[test]
    fn long_frame_switches_size_encoding() {
        let body = vec![b'x'; 300];
        let frame = Frame::message(body.clone(), false);
        let mut buf = encode(&frame);
        assert_eq!(buf[0], flags::LONG);
        assert_eq!(&buf[1..9], &300u64.to_be_bytes());
        assert_eq!(buf.len(), frame.encoded_len());

        let decoded = FrameDecoder::default().decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn decoder_waits_for_whole_frame() {
        let full = encode(&Frame::message("txgain", true));
        let decoder = FrameDecoder::default();

        let mut buf = BytesMut::from(&full[..4]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 4);

        buf.extend_from_slice(&full[4..]);
        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert!(frame.is_more());
        assert_eq!(&frame.body()[..], b"txgain");
    }

    #[test]
    fn decoder_rejects_reserved_bits_and_oversize() {
        let decoder = FrameDecoder::with_max_frame_size(8);
        let mut buf = BytesMut::from(&[0x80u8, 0][..]);
        assert_eq!(decoder.decode(&mut buf), Err(WireError::ReservedFlags(0x80)));

        let mut buf = BytesMut::from(&[0x00u8, 9][..]);
        assert_eq!(decoder.decode(&mut buf), Err(WireError::FrameTooLarge(9)));
    }

    #[test]
    fn ready_roundtrip() {
        let frame = ReadyCommand::for_socket(SocketType::Req).to_frame();
        assert!(frame.is_command());
        assert!(!frame.is_more());

        let cmd = CommandBody::parse(frame.body()).unwrap();
        assert_eq!(cmd.name, "READY");
        let ready = ReadyCommand::parse(&cmd.data).unwrap();
        assert_eq!(ready.socket_type(), Some("REQ"));
    }

    #[test]
    fn ready_property_names_are_case_insensitive() {
        let ready = ReadyCommand {
            properties: vec![("socket-type".into(), Bytes::from_static(b"REP"))],
        };
        assert_eq!(ready.socket_type(), Some("REP"));
    }

    #[test]
    fn ready_without_socket_type_is_rejected() {
        let mut data = BytesMut::new();
        data.put_u8(8);
        data.put_slice(b"Identity");
        data.put_u32(0);
        assert!(matches!(
            ReadyCommand::parse(&data.freeze()),
            Err(WireError::MalformedCommand(_))
        ));
    }

    #[test]
    fn ping_gets_pong_with_context() {
        let ping = Bytes::from_static(&[0x00, 0x0A, b'c', b't', b'x']);
        let pong = pong_for(&ping);
        let cmd = CommandBody::parse(pong.body()).unwrap();
        assert_eq!(cmd.name, "PONG");
        assert_eq!(&cmd.data[..], b"ctx");
    }

    #[test]
    fn error_reason_is_length_prefixed() {
        let data = Bytes::from_static(b"\x0bbad request");
        assert_eq!(error_reason(&data), "bad request");
        assert_eq!(error_reason(&Bytes::new()), "");
    }

    #[test]
    fn compatible_peers() {
        assert!(SocketType::Req.compatible_peers().contains(&"REP"));
        assert!(!SocketType::Req.compatible_peers().contains(&"REQ"));
        assert!(SocketType::Rep.compatible_peers().contains(&"REQ"));
    }
}
