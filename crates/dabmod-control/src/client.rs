//! The DabMod control client.
//!
//! Every exchange is one-shot: open a fresh connection, check liveness with
//! `ping`/`ok`, send one multi-part request, read one multi-part reply,
//! release the connection. No state survives between calls; the
//! coefficient file on disk is re-read every time it is needed.

use std::future::Future;
use std::path::Path;

use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};

use crate::coefs::{read_coef_file, write_coef_file, CoefficientSet};
use crate::config::{ControlConfig, Endpoint};
use crate::error::{Error, Result};
use crate::protocol::{Command, Reply};
use crate::transport::{Connector, TcpConnector, Transport};

/// A live connection that has passed the liveness probe.
///
/// Dropping it releases the underlying transport, which covers every early
/// return in an exchange; [`Session::close`] is the orderly path.
struct Session {
    transport: Box<dyn Transport>,
    endpoint: String,
}

impl Session {
    async fn roundtrip(&mut self, command: &Command) -> Result<Reply> {
        self.transport.send(command.to_frames()).await?;
        let frames = self.transport.recv().await?;
        Ok(Reply::from_frames(frames)?)
    }

    async fn close(mut self) {
        if let Err(e) = self.transport.close().await {
            tracing::debug!(endpoint = %self.endpoint, error = %e, "close failed");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        tracing::trace!(endpoint = %self.endpoint, "connection released");
    }
}

/// Client for the engine's remote-control socket.
pub struct ControlClient<C = TcpConnector> {
    config: ControlConfig,
    connector: C,
    shutdown: Option<watch::Receiver<bool>>,
}

impl ControlClient<TcpConnector> {
    pub fn new(config: ControlConfig) -> Self {
        ControlClient::with_connector(config, TcpConnector)
    }
}

impl<C: Connector> ControlClient<C> {
    pub fn with_connector(config: ControlConfig, connector: C) -> Self {
        tracing::debug!(endpoint = %config.endpoint, coef_path = %config.coef_path.display(), "control client created");
        ControlClient {
            config,
            connector,
            shutdown: None,
        }
    }

    /// Abort in-flight exchanges with [`Error::Cancelled`] once `shutdown`
    /// reads `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.config.endpoint
    }

    pub fn coef_path(&self) -> &Path {
        &self.config.coef_path
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    // ── Raw exchange ────────────────────────────────────────────────

    /// Open a connection and run the liveness probe on it.
    async fn connect(&self, deadline: Instant) -> Result<Session> {
        let endpoint = self.config.endpoint.to_string();
        let unreachable = |reason: String| Error::Connection {
            endpoint: endpoint.clone(),
            reason,
        };
        let timed_out = || unreachable(format!("timed out after {:?}", self.config.timeout));

        let transport = match timeout_at(deadline, self.connector.connect(&self.config.endpoint)).await
        {
            Ok(Ok(transport)) => transport,
            Ok(Err(e)) => return Err(unreachable(e.to_string())),
            Err(_) => return Err(timed_out()),
        };
        let mut session = Session {
            transport,
            endpoint: endpoint.clone(),
        };

        let reply = match timeout_at(deadline, session.roundtrip(&Command::ping())).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => return Err(unreachable(e.to_string())),
            Err(_) => return Err(timed_out()),
        };
        if !reply.is_ok() {
            return Err(unreachable(format!("unexpected reply {:?}", reply.tokens())));
        }
        Ok(session)
    }

    async fn exchange(&self, command: &Command) -> Result<Reply> {
        let deadline = Instant::now() + self.config.timeout;
        let mut session = self.connect(deadline).await?;

        tracing::debug!(endpoint = %self.config.endpoint, command = %command, "send");
        let failed = |reason: String| Error::Transport {
            message: command.to_string(),
            reason,
        };
        let reply = match timeout_at(deadline, session.roundtrip(command)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => return Err(failed(e.to_string())),
            Err(_) => return Err(failed(format!("timed out after {:?}", self.config.timeout))),
        };
        tracing::debug!(command = %command, reply = ?reply.tokens(), "received");

        session.close().await;
        Ok(reply)
    }

    /// Race `fut` against the shutdown signal, if one is attached.
    async fn cancellable<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let Some(mut shutdown) = self.shutdown.clone() else {
            return fut.await;
        };
        if *shutdown.borrow_and_update() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            res = fut => res,
            _ = wait_for_shutdown(&mut shutdown) => Err(Error::Cancelled),
        }
    }

    /// Probe the engine without sending a command.
    pub async fn ping(&self) -> Result<()> {
        self.cancellable(async {
            let deadline = Instant::now() + self.config.timeout;
            self.connect(deadline).await?.close().await;
            Ok(())
        })
        .await
    }

    pub async fn send_command(&self, command: &Command) -> Result<Reply> {
        self.cancellable(self.exchange(command)).await
    }

    /// Send a human-readable command such as `"get uhd txgain"`.
    pub async fn send_receive(&self, message: &str) -> Result<Reply> {
        self.send_command(&Command::parse(message)).await
    }

    // ── Typed accessors ─────────────────────────────────────────────

    async fn query<T: std::str::FromStr>(&self, command: Command) -> Result<T> {
        let reply = self.send_command(&command).await?.check(&command)?;
        reply.first_as(&command)
    }

    /// Set the UHD TX gain, `0..=89` dB.
    pub async fn set_txgain(&self, gain: i64) -> Result<Reply> {
        self.send_command(&Command::set_txgain(gain)?).await
    }

    pub async fn get_txgain(&self) -> Result<i64> {
        self.query(Command::get_txgain()).await
    }

    /// Set the UHD RX gain, `0..=89` dB.
    pub async fn set_rxgain(&self, gain: i64) -> Result<Reply> {
        self.send_command(&Command::set_rxgain(gain)?).await
    }

    pub async fn get_rxgain(&self) -> Result<i64> {
        self.query(Command::get_rxgain()).await
    }

    pub async fn set_digital_gain(&self, gain: f64) -> Result<Reply> {
        self.send_command(&Command::set_digital_gain(gain)).await
    }

    pub async fn get_digital_gain(&self) -> Result<f64> {
        self.query(Command::get_digital_gain()).await
    }

    /// Read any remote-control parameter as text.
    pub async fn get_param(&self, module: &str, param: &str) -> Result<String> {
        let command = Command::get(module, param)?;
        let reply = self.send_command(&command).await?.check(&command)?;
        reply.first_value(&command).map(str::to_string)
    }

    /// Write any remote-control parameter.
    pub async fn set_param(&self, module: &str, param: &str, value: &str) -> Result<Reply> {
        self.send_command(&Command::set(module, param, value)?).await
    }

    // ── Predistortion coefficients ──────────────────────────────────

    /// Load the coefficients currently on disk. No network traffic.
    pub fn get_coefs(&self) -> Result<CoefficientSet> {
        read_coef_file(&self.config.coef_path)
    }

    /// Persist `am`/`pm` and have the engine reload them.
    pub async fn set_coefs(&self, am: Vec<f64>, pm: Vec<f64>) -> Result<Reply> {
        let set = CoefficientSet::new(am, pm)?;
        self.apply_coefs(&set).await
    }

    pub async fn apply_coefs(&self, set: &CoefficientSet) -> Result<Reply> {
        let command = Command::set_coeffile(&self.config.coef_path)?;
        write_coef_file(set, &self.config.coef_path)?;
        tracing::info!(n = set.len(), path = %self.config.coef_path.display(), "coefficients written, reloading");
        self.send_command(&command).await
    }
}

/// Resolves once the watched flag is `true`; never resolves if the sender
/// is gone.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;

    use crate::wire::Frame;

    #[derive(Default)]
    struct Log {
        connects: usize,
        sent: Vec<Vec<Frame>>,
        closed: usize,
    }

    /// Replays canned replies in order and records everything sent.
    #[derive(Clone)]
    struct ScriptedConnector {
        replies: Vec<Vec<&'static str>>,
        log: Arc<Mutex<Log>>,
    }

    impl ScriptedConnector {
        fn new(replies: Vec<Vec<&'static str>>) -> Self {
            ScriptedConnector {
                replies,
                log: Arc::default(),
            }
        }

        fn connects(&self) -> usize {
            self.log.lock().unwrap().connects
        }

        fn sent(&self) -> Vec<Vec<Frame>> {
            self.log.lock().unwrap().sent.clone()
        }
    }

    struct ScriptedTransport {
        replies: VecDeque<Vec<&'static str>>,
        log: Arc<Mutex<Log>>,
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, _endpoint: &Endpoint) -> Result<Box<dyn Transport>> {
            self.log.lock().unwrap().connects += 1;
            Ok(Box::new(ScriptedTransport {
                replies: self.replies.iter().cloned().collect(),
                log: self.log.clone(),
            }))
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&mut self, frames: Vec<Frame>) -> Result<()> {
            self.log.lock().unwrap().sent.push(frames);
            Ok(())
        }

        async fn recv(&mut self) -> Result<Vec<Bytes>> {
            match self.replies.pop_front() {
                Some(reply) => Ok(reply
                    .into_iter()
                    .map(|s| Bytes::from_static(s.as_bytes()))
                    .collect()),
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> Result<()> {
            self.log.lock().unwrap().closed += 1;
            Ok(())
        }
    }

    fn client(replies: Vec<Vec<&'static str>>) -> ControlClient<ScriptedConnector> {
        client_with_timeout(replies, Duration::from_millis(200))
    }

    fn client_with_timeout(
        replies: Vec<Vec<&'static str>>,
        timeout: Duration,
    ) -> ControlClient<ScriptedConnector> {
        let config = ControlConfig::new(9400, "poly.coef").with_timeout(timeout);
        ControlClient::with_connector(config, ScriptedConnector::new(replies))
    }

    fn bodies(frames: &[Frame]) -> Vec<String> {
        frames
            .iter()
            .map(|f| String::from_utf8(f.body().to_vec()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn gain_validation_happens_before_connecting() {
        let c = client(vec![vec!["ok"], vec!["ok"]]);
        for bad in [-1, 90] {
            assert!(matches!(c.set_txgain(bad).await, Err(Error::Validation(_))));
            assert!(matches!(c.set_rxgain(bad).await, Err(Error::Validation(_))));
        }
        assert_eq!(c.connector().connects(), 0);
    }

    #[tokio::test]
    async fn command_frames_follow_ping() {
        let c = client(vec![vec!["ok"], vec!["ok"]]);
        let reply = c.send_receive("set uhd txgain 50").await.unwrap();
        assert_eq!(reply.tokens(), ["ok"]);

        let sent = c.connector().sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(bodies(&sent[0]), ["ping"]);
        assert!(!sent[0][0].is_more());

        assert_eq!(bodies(&sent[1]), ["set", "uhd", "txgain", "50"]);
        let more: Vec<bool> = sent[1].iter().map(Frame::is_more).collect();
        assert_eq!(more, [true, true, true, false]);
        assert_eq!(c.connector().log.lock().unwrap().closed, 1);
    }

    #[tokio::test]
    async fn bad_ping_reply_is_a_connection_error() {
        for ping_reply in [vec!["error"], vec!["ok", "extra"], vec![]] {
            let c = client(vec![ping_reply, vec!["42"]]);
            let err = c.get_txgain().await.unwrap_err();
            match err {
                Error::Connection { endpoint, .. } => {
                    assert_eq!(endpoint, "tcp://localhost:9400")
                }
                other => panic!("expected connection error, got {other:?}"),
            }
            assert_eq!(c.connector().sent().len(), 1, "only the probe may be sent");
        }
    }

    #[tokio::test]
    async fn typed_getters_parse_first_token() {
        let c = client(vec![vec!["ok"], vec!["42"]]);
        assert_eq!(c.get_txgain().await.unwrap(), 42);

        let c = client(vec![vec!["ok"], vec!["0.75000"]]);
        assert_eq!(c.get_digital_gain().await.unwrap(), 0.75);

        let c = client(vec![vec!["ok"], vec!["n/a"]]);
        assert!(matches!(c.get_rxgain().await, Err(Error::Parse { .. })));

        let c = client(vec![vec!["ok"], vec![]]);
        assert!(matches!(c.get_rxgain().await, Err(Error::Parse { .. })));

        let c = client(vec![vec!["ok"], vec!["fail", "unknown"]]);
        assert!(matches!(c.get_txgain().await, Err(Error::Rejected { .. })));
    }

    #[tokio::test]
    async fn digital_gain_is_sent_with_five_decimals() {
        let c = client(vec![vec!["ok"], vec!["ok"]]);
        c.set_digital_gain(1.0).await.unwrap();
        let sent = c.connector().sent();
        assert_eq!(bodies(&sent[1]), ["set", "gain", "digital", "1.00000"]);
    }

    #[tokio::test]
    async fn silent_engine_times_out() {
        let c = client(vec![vec!["ok"]]);
        let err = c.get_txgain().await.unwrap_err();
        match err {
            Error::Transport { message, reason } => {
                assert_eq!(message, "get uhd txgain");
                assert!(reason.contains("timed out"));
            }
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn shutdown_cancels_exchange() {
        let (tx, rx) = watch::channel(false);
        let c = client_with_timeout(vec![vec!["ok"]], Duration::from_secs(30)).with_shutdown(rx);

        let pending = c.get_txgain();
        let stop = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send(true).unwrap();
        };
        let (res, ()) = tokio::join!(pending, stop);
        assert!(matches!(res, Err(Error::Cancelled)));

        // Already signalled: refuse immediately.
        assert!(matches!(c.ping().await, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn set_coefs_checks_lengths_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poly.coef");
        let config = ControlConfig::new(9400, &path);
        let c = ControlClient::with_connector(config, ScriptedConnector::new(vec![]));

        let err = c.set_coefs(vec![1.0, 2.0], vec![0.1]).await.unwrap_err();
        assert!(matches!(err, Error::Invariant(_)));
        assert!(!path.exists());
        assert_eq!(c.connector().connects(), 0);
    }

    #[tokio::test]
    async fn set_coefs_writes_then_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poly.coef");
        let config = ControlConfig::new(9400, &path);
        let c = ControlClient::with_connector(
            config,
            ScriptedConnector::new(vec![vec!["ok"], vec!["ok"]]),
        );

        c.set_coefs(vec![1.0, 2.0], vec![0.1, 0.2]).await.unwrap();
        let set = c.get_coefs().unwrap();
        assert_eq!(set.am(), [1.0, 2.0]);
        assert_eq!(set.pm(), [0.1, 0.2]);

        let sent = c.connector().sent();
        let expected = format!("set memlesspoly coeffile {}", path.display());
        assert_eq!(bodies(&sent[1]).join(" "), expected);
    }
}
