use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use mxlink_frame::sim::SimCoprocessor;
use mxlink_frame::{LinkConfig, LinkDriver};
use mxlink_ipc::sim::SimFirmware;
use mxlink_ipc::{MismatchPolicy, Session, SessionConfig};
use tracing::debug;

use crate::exit::{ipc_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod echo;
pub mod header;
pub mod monitor;
pub mod request;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Round-trip a payload through the echo command.
    Echo(EchoArgs),
    /// Send one command with arbitrary parameters and print the response.
    Request(RequestArgs),
    /// Inject events and print them as handlers receive them.
    Monitor(MonitorArgs),
    /// Decode and validate an 8-byte SPI header.
    Header(HeaderArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Echo(args) => echo::run(args, format),
        Command::Request(args) => request::run(args, format),
        Command::Monitor(args) => monitor::run(args, format),
        Command::Header(args) => header::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// How the link is driven.
#[derive(Copy, Clone, Debug, Default, ValueEnum)]
pub enum Mode {
    /// Dedicated pump thread.
    #[default]
    Thread,
    /// Caller-driven polling.
    Poll,
}

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
pub enum Policy {
    #[default]
    Discard,
    Halt,
}

impl From<Policy> for MismatchPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Discard => MismatchPolicy::Discard,
            Policy::Halt => MismatchPolicy::Halt,
        }
    }
}

/// Link options shared by the session-backed subcommands.
#[derive(Args, Debug)]
pub struct LinkArgs {
    /// Response timeout (e.g. 100ms, 2s).
    #[arg(long, default_value = "500ms")]
    pub timeout: String,
    /// Drive the link from a pump thread or by polling.
    #[arg(long, value_enum, default_value_t = Mode::Thread)]
    pub mode: Mode,
    /// Handling of responses that match no pending request.
    #[arg(long, value_enum, default_value_t = Policy::Discard)]
    pub mismatch_policy: Policy,
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    /// Text payload.
    #[arg(long, conflicts_with_all = ["hex", "size"])]
    pub data: Option<String>,
    /// Hex-encoded payload.
    #[arg(long, conflicts_with_all = ["data", "size"])]
    pub hex: Option<String>,
    /// Generated payload of N bytes.
    #[arg(long, conflicts_with_all = ["data", "hex"])]
    pub size: Option<usize>,
    /// Number of round trips.
    #[arg(long, default_value = "1")]
    pub repeat: usize,
    #[command(flatten)]
    pub link: LinkArgs,
}

#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Api id, decimal or 0x-prefixed hex.
    pub api_id: String,
    /// Hex-encoded parameters.
    #[arg(long, default_value = "")]
    pub params: String,
    /// Response bytes to keep.
    #[arg(long)]
    pub capacity: Option<usize>,
    /// Make the simulated firmware ignore this api id.
    #[arg(long)]
    pub silent: bool,
    #[command(flatten)]
    pub link: LinkArgs,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Events to inject (comma-separated). Default: sta-up,sta-got-ip,bypass,reboot.
    #[arg(long, value_enum, value_delimiter = ',')]
    pub inject: Option<Vec<monitor::Injection>>,
    /// Delay between injected events (e.g. 50ms).
    #[arg(long, default_value = "50ms")]
    pub interval: String,
    /// Exit after printing N events.
    #[arg(long)]
    pub count: Option<usize>,
    #[command(flatten)]
    pub link: LinkArgs,
}

#[derive(Args, Debug)]
pub struct HeaderArgs {
    /// Eight header bytes, hex-encoded.
    pub bytes: String,
    /// Validate as a master WRITE header instead of a slave READ header.
    #[arg(long)]
    pub master: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// A session bound to an in-process simulated co-processor.
pub struct SimLink {
    pub sim: SimCoprocessor,
    pub firmware: SimFirmware,
    pub session: Session,
    pub timeout: Duration,
}

impl SimLink {
    pub fn open(args: &LinkArgs) -> CliResult<Self> {
        let timeout = parse_duration(&args.timeout)?;
        let firmware = SimFirmware::default();
        let sim = SimCoprocessor::new(firmware.responder());
        let driver = LinkDriver::new(
            sim.bus(),
            sim.bus(),
            Arc::clone(sim.signals()),
            LinkConfig::default(),
        );
        let config = SessionConfig {
            mismatch_policy: args.mismatch_policy.into(),
            ..SessionConfig::default()
        };
        let session = match args.mode {
            Mode::Thread => Session::spawn(driver, config),
            Mode::Poll => Session::polled(driver, config),
        }
        .map_err(|err| ipc_error("session start failed", err))?;
        debug!(mode = ?args.mode, ?timeout, "session ready");

        Ok(Self {
            sim,
            firmware,
            session,
            timeout,
        })
    }
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "ms")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}

pub fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let digits: String = input
        .trim()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    hex::decode(&digits)
        .map_err(|err| CliError::new(USAGE, format!("invalid hex {input:?}: {err}")))
}

pub fn parse_api_id(input: &str) -> CliResult<u16> {
    let input = input.trim();
    let parsed = match input.strip_prefix("0x").or_else(|| input.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.map_err(|_| CliError::new(USAGE, format!("invalid api id: {input}")))
}
