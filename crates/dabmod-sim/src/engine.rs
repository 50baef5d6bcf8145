//! # Stub Engine
//!
//! A REP-side implementation of the remote-control socket. It answers the
//! liveness probe, replays scripted replies, and optionally keeps a
//! parameter table so `set` followed by `get` behaves like the real engine.
//! Every request is journaled with its per-frame MORE flags so tests can
//! assert on exactly what crossed the wire.
//!
//! ```text
//!   client ──REQ──▶ [delimiter | tok0+ | tok1+ | … | tokN]  ──▶ StubEngine
//!          ◀──────── [delimiter | rep0+ | … | repM]          ◀──
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use dabmod_control::coefs::{read_coef_file, CoefficientSet};
use dabmod_control::socket::ZmtpStream;
use dabmod_control::wire::{Frame, SocketType, WireError};
use dabmod_control::{ControlConfig, Endpoint};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// One received frame as seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedFrame {
    pub body: String,
    pub more: bool,
}

#[derive(Debug, Default)]
struct Journal {
    connections: usize,
    pings: usize,
    messages: Vec<Vec<RecordedFrame>>,
}

type ParamKey = (String, String);

/// Configures and spawns a [`StubEngine`].
#[derive(Debug, Clone)]
pub struct EngineBuilder {
    ping_reply: Vec<String>,
    replies: HashMap<String, Vec<String>>,
    params: Option<HashMap<ParamKey, String>>,
    unresponsive: bool,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        EngineBuilder {
            ping_reply: vec!["ok".to_string()],
            replies: HashMap::new(),
            params: None,
            unresponsive: false,
        }
    }
}

fn owned(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|t| t.to_string()).collect()
}

impl EngineBuilder {
    /// Answer the `ping` probe with `reply` instead of `ok`.
    pub fn ping_reply(mut self, reply: &[&str]) -> Self {
        self.ping_reply = owned(reply);
        self
    }

    /// Answer the exact command line `command` with `reply`.
    pub fn reply(mut self, command: &str, reply: &[&str]) -> Self {
        self.replies.insert(command.to_string(), owned(reply));
        self
    }

    /// Keep a parameter table: `set m p v` stores, `get m p` reads back.
    pub fn stateful(mut self) -> Self {
        self.params.get_or_insert_with(HashMap::new);
        self
    }

    /// Seed one parameter; implies [`stateful`](Self::stateful).
    pub fn param(mut self, module: &str, param: &str, value: &str) -> Self {
        self.params
            .get_or_insert_with(HashMap::new)
            .insert((module.to_string(), param.to_string()), value.to_string());
        self
    }

    /// Answer the probe, then never reply to commands.
    pub fn unresponsive(mut self) -> Self {
        self.unresponsive = true;
        self
    }

    pub async fn spawn(self) -> std::io::Result<StubEngine> {
        Self::spawn_on(self, "127.0.0.1:0").await
    }

    pub async fn spawn_on(self, addr: &str) -> std::io::Result<StubEngine> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let inner = Arc::new(Inner {
            ping_reply: self.ping_reply,
            replies: self.replies,
            stateful: self.params.is_some(),
            params: Mutex::new(self.params.unwrap_or_default()),
            loaded: Mutex::new(None),
            unresponsive: self.unresponsive,
            journal: Mutex::new(Journal::default()),
        });
        let handle = tokio::spawn(accept_loop(listener, inner.clone()));
        tracing::debug!(%addr, "stub engine listening");
        Ok(StubEngine {
            addr,
            inner,
            handle,
        })
    }
}

struct Inner {
    ping_reply: Vec<String>,
    replies: HashMap<String, Vec<String>>,
    stateful: bool,
    params: Mutex<HashMap<ParamKey, String>>,
    loaded: Mutex<Option<CoefficientSet>>,
    unresponsive: bool,
    journal: Mutex<Journal>,
}

fn fail(reason: &str) -> Vec<String> {
    vec!["fail".to_string(), reason.to_string()]
}

impl Inner {
    fn record(&self, frames: Vec<RecordedFrame>) -> bool {
        let mut journal = self.journal.lock().unwrap_or_else(|e| e.into_inner());
        let is_ping = frames.len() == 1 && frames[0].body == "ping";
        if is_ping {
            journal.pings += 1;
        } else {
            journal.messages.push(frames);
        }
        is_ping
    }

    fn respond(&self, tokens: &[String], is_ping: bool) -> Vec<String> {
        if is_ping {
            return self.ping_reply.clone();
        }
        if let Some(reply) = self.replies.get(&tokens.join(" ")) {
            return reply.clone();
        }
        if !self.stateful {
            return fail("unknown command");
        }

        let mut params = self.params.lock().unwrap_or_else(|e| e.into_inner());
        match tokens {
            [verb, module, param] if verb == "get" => {
                match params.get(&(module.clone(), param.clone())) {
                    Some(value) => vec![value.clone()],
                    None => fail("unknown parameter"),
                }
            }
            [verb, module, param, value] if verb == "set" => {
                if module == "memlesspoly" && param == "coeffile" {
                    match read_coef_file(Path::new(value)) {
                        Ok(set) => {
                            tracing::info!(path = %value, n = set.len(), "reloaded coefficients");
                            *self.loaded.lock().unwrap_or_else(|e| e.into_inner()) = Some(set);
                        }
                        Err(e) => return fail(&e.to_string()),
                    }
                }
                params.insert((module.clone(), param.clone()), value.clone());
                vec!["ok".to_string()]
            }
            _ => fail("unknown command"),
        }
    }
}

async fn accept_loop(listener: TcpListener, inner: Arc<Inner>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            }
        };
        let inner = inner.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, &inner).await {
                tracing::debug!(%peer, error = %e, "connection ended with error");
            }
        });
    }
}

async fn serve_connection(stream: TcpStream, inner: &Inner) -> dabmod_control::Result<()> {
    inner
        .journal
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .connections += 1;
    let mut zmtp = ZmtpStream::handshake(stream, SocketType::Rep).await?;

    while let Some(frames) = zmtp.read_message().await? {
        let mut frames = frames.into_iter();
        match frames.next() {
            Some(delimiter) if delimiter.body().is_empty() => {}
            _ => return Err(WireError::MissingDelimiter.into()),
        }

        let recorded: Vec<RecordedFrame> = frames
            .map(|f| RecordedFrame {
                body: String::from_utf8_lossy(f.body()).into_owned(),
                more: f.is_more(),
            })
            .collect();
        let tokens: Vec<String> = recorded.iter().map(|f| f.body.clone()).collect();
        let is_ping = inner.record(recorded);
        tracing::debug!(request = ?tokens, "stub engine request");

        if inner.unresponsive && !is_ping {
            continue;
        }
        let reply = inner.respond(&tokens, is_ping);
        zmtp.write_frames(&reply_frames(&reply)).await?;
    }
    Ok(())
}

/// Delimiter plus one frame per token. An empty reply is just the
/// delimiter, sent as a final frame.
fn reply_frames(reply: &[String]) -> Vec<Frame> {
    if reply.is_empty() {
        return vec![Frame::message(Bytes::new(), false)];
    }
    let last = reply.len() - 1;
    std::iter::once(Frame::delimiter())
        .chain(
            reply
                .iter()
                .enumerate()
                .map(|(i, t)| Frame::message(Bytes::from(t.clone()), i < last)),
        )
        .collect()
}

/// A running stub engine. The listener stops when this is dropped.
pub struct StubEngine {
    addr: SocketAddr,
    inner: Arc<Inner>,
    handle: JoinHandle<()>,
}

impl StubEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.addr.ip().to_string(), self.addr.port())
    }

    /// Client configuration pointing at this engine.
    pub fn client_config(&self, coef_path: impl AsRef<Path>) -> ControlConfig {
        ControlConfig {
            endpoint: self.endpoint(),
            coef_path: coef_path.as_ref().to_path_buf(),
            timeout: Duration::from_secs(2),
        }
    }

    pub fn connections(&self) -> usize {
        self.journal(|j| j.connections)
    }

    /// Number of `ping` probes received.
    pub fn pings(&self) -> usize {
        self.journal(|j| j.pings)
    }

    /// Every non-probe request, frame by frame.
    pub fn messages(&self) -> Vec<Vec<RecordedFrame>> {
        self.journal(|j| j.messages.clone())
    }

    /// Every non-probe request as a command line.
    pub fn commands(&self) -> Vec<String> {
        self.messages()
            .iter()
            .map(|m| {
                m.iter()
                    .map(|f| f.body.as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect()
    }

    pub fn param(&self, module: &str, param: &str) -> Option<String> {
        self.inner
            .params
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(module.to_string(), param.to_string()))
            .cloned()
    }

    /// Coefficients read on the last successful `set memlesspoly coeffile`.
    pub fn loaded_coefs(&self) -> Option<CoefficientSet> {
        self.inner
            .loaded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn journal<T>(&self, f: impl FnOnce(&Journal) -> T) -> T {
        let journal = self.inner.journal.lock().unwrap_or_else(|e| e.into_inner());
        f(&*journal)
    }
}

impl Drop for StubEngine {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
