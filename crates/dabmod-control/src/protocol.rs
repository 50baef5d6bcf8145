//! Remote-control commands and replies.
//!
//! A command is a human-readable line such as `set uhd txgain 50`. On the
//! wire every space-separated token travels as its own frame, so tokens can
//! never contain whitespace themselves. Replies come back one token per
//! frame and are treated opaquely unless a scalar value is expected.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::wire::{Frame, WireError};

/// Highest TX/RX gain the UHD front end accepts, in dB.
pub const MAX_UHD_GAIN: i64 = 89;

/// Decimal places the engine expects for the digital gain.
pub const DIGITAL_GAIN_PRECISION: usize = 5;

/// Reply token the engine uses for a refused command.
pub const FAIL: &str = "fail";

/// Liveness probe payload and its only acceptable answer.
pub const PING: &str = "ping";
pub const PING_OK: &str = "ok";

/// Reject gains outside `0..=MAX_UHD_GAIN` before anything is sent.
pub fn validate_uhd_gain(gain: i64) -> Result<i64> {
    if !(0..=MAX_UHD_GAIN).contains(&gain) {
        return Err(Error::Validation(format!(
            "gain has to be in [0,{MAX_UHD_GAIN}], got {gain}"
        )));
    }
    Ok(gain)
}

// ── Command ─────────────────────────────────────────────────────────

/// An ordered list of tokens, one wire frame each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    tokens: Vec<String>,
}

impl Command {
    /// Split on single spaces, literally: `"a  b"` yields an empty middle
    /// token.
    pub fn parse(message: &str) -> Self {
        Command {
            tokens: message.split(' ').map(str::to_string).collect(),
        }
    }

    /// Build from explicit tokens. None may be empty or contain whitespace.
    pub fn new<I, S>(tokens: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tokens: Vec<String> = tokens.into_iter().map(Into::into).collect();
        if tokens.is_empty() {
            return Err(Error::Validation("command has no tokens".into()));
        }
        if let Some(bad) = tokens
            .iter()
            .find(|t| t.is_empty() || t.chars().any(char::is_whitespace))
        {
            return Err(Error::Validation(format!(
                "command token {bad:?} is empty or contains whitespace"
            )));
        }
        Ok(Command { tokens })
    }

    pub fn ping() -> Self {
        Command {
            tokens: vec![PING.to_string()],
        }
    }

    pub fn get(module: &str, param: &str) -> Result<Self> {
        Command::new(["get", module, param])
    }

    pub fn set(module: &str, param: &str, value: &str) -> Result<Self> {
        Command::new(["set", module, param, value])
    }

    pub fn set_txgain(gain: i64) -> Result<Self> {
        let gain = validate_uhd_gain(gain)?;
        Ok(Command::parse(&format!("set uhd txgain {gain}")))
    }

    pub fn get_txgain() -> Self {
        Command::parse("get uhd txgain")
    }

    pub fn set_rxgain(gain: i64) -> Result<Self> {
        let gain = validate_uhd_gain(gain)?;
        Ok(Command::parse(&format!("set uhd rxgain {gain}")))
    }

    pub fn get_rxgain() -> Self {
        Command::parse("get uhd rxgain")
    }

    /// No range is enforced; the value is rendered with exactly five decimals.
    pub fn set_digital_gain(gain: f64) -> Self {
        Command::parse(&format!(
            "set gain digital {gain:.prec$}",
            prec = DIGITAL_GAIN_PRECISION
        ))
    }

    pub fn get_digital_gain() -> Self {
        Command::parse("get gain digital")
    }

    /// Tell the predistorter to reload its coefficients from `path`.
    pub fn set_coeffile(path: &Path) -> Result<Self> {
        let path = path.to_str().ok_or_else(|| {
            Error::Validation(format!("coef path {} is not UTF-8", path.display()))
        })?;
        Command::set("memlesspoly", "coeffile", path)
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// One frame per token; every frame but the last is flagged MORE.
    pub fn to_frames(&self) -> Vec<Frame> {
        let last = self.tokens.len().saturating_sub(1);
        self.tokens
            .iter()
            .enumerate()
            .map(|(i, token)| Frame::message(Bytes::from(token.clone()), i < last))
            .collect()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tokens.join(" "))
    }
}

// ── Reply ───────────────────────────────────────────────────────────

/// Decoded reply tokens, one per received frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reply {
    tokens: Vec<String>,
}

impl Reply {
    pub fn new(tokens: Vec<String>) -> Self {
        Reply { tokens }
    }

    /// Decode every frame as strict UTF-8.
    pub fn from_frames(frames: Vec<Bytes>) -> std::result::Result<Self, WireError> {
        let tokens = frames
            .into_iter()
            .map(|b| String::from_utf8(b.to_vec()).map_err(|_| WireError::InvalidUtf8))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Reply { tokens })
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn into_tokens(self) -> Vec<String> {
        self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn first(&self) -> Option<&str> {
        self.tokens.first().map(String::as_str)
    }

    /// Exactly the single token `ok`.
    pub fn is_ok(&self) -> bool {
        self.tokens.len() == 1 && self.tokens[0] == PING_OK
    }

    pub fn is_fail(&self) -> bool {
        self.first() == Some(FAIL)
    }

    /// Turn a `fail` reply into [`Error::Rejected`].
    pub fn check(self, command: &Command) -> Result<Self> {
        if self.is_fail() {
            return Err(Error::Rejected {
                command: command.to_string(),
                reason: self.tokens[1..].join(" "),
            });
        }
        Ok(self)
    }

    /// The first token as text.
    pub fn first_value(&self, command: &Command) -> Result<&str> {
        self.first().ok_or_else(|| Error::Parse {
            command: command.to_string(),
            reply: Vec::new(),
            expected: "a value",
        })
    }

    /// The first token parsed as `T`.
    pub fn first_as<T: FromStr>(&self, command: &Command) -> Result<T> {
        let parse_error = || Error::Parse {
            command: command.to_string(),
            reply: self.tokens.clone(),
            expected: std::any::type_name::<T>(),
        };
        self.first()
            .ok_or_else(parse_error)?
            .trim()
            .parse()
            .map_err(|_| parse_error())
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tokens.join(" "))
    }
}
