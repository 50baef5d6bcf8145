//! Argument model and command dispatch.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use dabmod_control::{Command, ControlClient, ControlConfig, Reply};
use serde_json::{json, Value};

/// Adjust a running DabMod engine over its remote-control socket.
#[derive(Parser, Debug)]
#[command(name = "dabmod-adapt", about = "DabMod remote-control client")]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Print results as JSON.
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Action,
}

#[derive(Args, Debug, Default)]
pub struct ConnectionArgs {
    /// TOML file with `host`, `port`, `coef_path`, `timeout_ms`.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Engine host.
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Engine remote-control port.
    #[arg(long, global = true, value_parser = clap::value_parser!(u16).range(1..))]
    pub port: Option<u16>,

    /// Coefficient file shared with the engine.
    #[arg(long, global = true)]
    pub coef_path: Option<PathBuf>,

    /// Per-exchange timeout in milliseconds.
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout_ms: Option<u64>,
}

impl ConnectionArgs {
    /// Config file (or defaults) with flag overrides applied on top.
    pub fn resolve(&self) -> anyhow::Result<ControlConfig> {
        let mut config = match &self.config {
            Some(path) => ControlConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ControlConfig::default(),
        };
        if let Some(host) = &self.host {
            config = config.with_host(host.clone());
        }
        if let Some(port) = self.port {
            config.endpoint.port = port;
        }
        if let Some(path) = &self.coef_path {
            config.coef_path = path.clone();
        }
        if let Some(ms) = self.timeout_ms {
            config = config.with_timeout(Duration::from_millis(ms));
        }
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
pub enum Action {
    /// Check that the engine answers the liveness probe.
    Ping,
    /// Read a gain.
    #[command(subcommand)]
    Get(GainName),
    /// Write a gain.
    #[command(subcommand)]
    Set(GainValue),
    /// Read or write any remote-control parameter.
    #[command(subcommand)]
    Param(ParamAction),
    /// Inspect or replace the predistortion coefficients.
    #[command(subcommand)]
    Coefs(CoefsAction),
    /// Send an arbitrary command, one token per argument.
    Raw {
        #[arg(required = true, num_args = 1.., allow_hyphen_values = true)]
        tokens: Vec<String>,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainName {
    /// UHD TX gain (dB).
    Txgain,
    /// UHD RX gain (dB).
    Rxgain,
    /// Digital gain (linear).
    Digital,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq)]
pub enum GainValue {
    /// UHD TX gain, 0..=89 dB.
    Txgain {
        #[arg(allow_negative_numbers = true)]
        gain: i64,
    },
    /// UHD RX gain, 0..=89 dB.
    Rxgain {
        #[arg(allow_negative_numbers = true)]
        gain: i64,
    },
    /// Digital gain, sent with five decimals.
    Digital {
        #[arg(allow_negative_numbers = true)]
        gain: f64,
    },
}

#[derive(Subcommand, Debug)]
pub enum ParamAction {
    Get { module: String, param: String },
    Set { module: String, param: String, value: String },
}

#[derive(Subcommand, Debug)]
pub enum CoefsAction {
    /// Print the coefficients currently on disk.
    Show,
    /// Write new coefficients and have the engine reload them.
    Set {
        /// AM coefficients, comma separated or repeated.
        #[arg(long, required = true, value_delimiter = ',', allow_negative_numbers = true)]
        am: Vec<f64>,
        /// PM coefficients, same count as `--am`.
        #[arg(long, required = true, value_delimiter = ',', allow_negative_numbers = true)]
        pm: Vec<f64>,
    },
}

/// What a subcommand produced, ready for printing.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Alive { endpoint: String },
    Integer { name: &'static str, value: i64 },
    Float { name: &'static str, value: f64 },
    Text { name: String, value: String },
    Reply(Vec<String>),
    Coefs { am: Vec<f64>, pm: Vec<f64> },
}

impl Outcome {
    pub fn to_json(&self) -> Value {
        match self {
            Outcome::Alive { endpoint } => json!({ "endpoint": endpoint, "alive": true }),
            Outcome::Integer { name, value } => json!({ *name: value }),
            Outcome::Float { name, value } => json!({ *name: value }),
            Outcome::Text { name, value } => json!({ name.as_str(): value }),
            Outcome::Reply(tokens) => json!({ "reply": tokens }),
            Outcome::Coefs { am, pm } => json!({ "n": am.len(), "am": am, "pm": pm }),
        }
    }

    pub fn to_text(&self) -> String {
        match self {
            Outcome::Alive { endpoint } => format!("{endpoint} ok"),
            Outcome::Integer { value, .. } => value.to_string(),
            Outcome::Float { value, .. } => value.to_string(),
            Outcome::Text { value, .. } => value.clone(),
            Outcome::Reply(tokens) => tokens.join(" "),
            Outcome::Coefs { am, pm } => {
                let mut out = format!("n = {}", am.len());
                for (i, (a, p)) in am.iter().zip(pm).enumerate() {
                    out.push_str(&format!("\n{i:>3}  am {a:>24}  pm {p:>24}"));
                }
                out
            }
        }
    }

    pub fn render(&self, json: bool) -> String {
        if json {
            self.to_json().to_string()
        } else {
            self.to_text()
        }
    }
}

fn checked(reply: Reply, command: &Command) -> anyhow::Result<Outcome> {
    Ok(Outcome::Reply(reply.check(command)?.into_tokens()))
}

/// Run one action against the engine.
pub async fn run(client: &ControlClient, action: Action) -> anyhow::Result<Outcome> {
    let outcome = match action {
        Action::Ping => {
            client.ping().await?;
            Outcome::Alive {
                endpoint: client.endpoint().to_string(),
            }
        }
        Action::Get(GainName::Txgain) => Outcome::Integer {
            name: "txgain",
            value: client.get_txgain().await?,
        },
        Action::Get(GainName::Rxgain) => Outcome::Integer {
            name: "rxgain",
            value: client.get_rxgain().await?,
        },
        Action::Get(GainName::Digital) => Outcome::Float {
            name: "digital",
            value: client.get_digital_gain().await?,
        },
        Action::Set(gain) => {
            let command = match gain {
                GainValue::Txgain { gain } => Command::set_txgain(gain)?,
                GainValue::Rxgain { gain } => Command::set_rxgain(gain)?,
                GainValue::Digital { gain } => Command::set_digital_gain(gain),
            };
            checked(client.send_command(&command).await?, &command)?
        }
        Action::Param(ParamAction::Get { module, param }) => {
            let value = client.get_param(&module, &param).await?;
            Outcome::Text {
                name: format!("{module}.{param}"),
                value,
            }
        }
        Action::Param(ParamAction::Set {
            module,
            param,
            value,
        }) => {
            let command = Command::set(&module, &param, &value)?;
            checked(client.send_command(&command).await?, &command)?
        }
        Action::Coefs(CoefsAction::Show) => {
            let (am, pm) = client.get_coefs()?.into_parts();
            Outcome::Coefs { am, pm }
        }
        Action::Coefs(CoefsAction::Set { am, pm }) => {
            let reply = client.set_coefs(am, pm).await?;
            checked(reply, &Command::set_coeffile(client.coef_path())?)?
        }
        Action::Raw { tokens } => {
            let command = Command::new(tokens)?;
            Outcome::Reply(client.send_command(&command).await?.into_tokens())
        }
    };
    Ok(outcome)
}
